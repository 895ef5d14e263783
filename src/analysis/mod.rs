//! Document analysis: normalize, cache, prompt, complete, parse.
//! Also hosts the chat assistant that answers questions from retrieved
//! excerpts of one document.

pub mod normalize;
pub mod openrouter;
pub mod parse;
pub mod prompt;
pub mod retrieval;
pub mod sqlite_cache;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, TtlCache};
use crate::cancellation::TaskGeneration;
use crate::config::Config;
use crate::glossary::Glossary;
use crate::highlight::{HighlightCache, Segment};
use crate::metrics::{metric_names, MetricsRegistry, RequestIds};

pub use openrouter::{ChunkSink, Completion, CompletionBackend, LlmError, OpenRouterClient};
pub use parse::{parse_analysis, DocumentAnalysis};
pub use prompt::{ChatMessage, ChatTurn};
pub use sqlite_cache::SqliteCache;

/// Turns of history replayed to the model on each chat question.
pub const MAX_HISTORY_TURNS: usize = 10;
/// Excerpts included as context for one chat question.
const CHAT_EXCERPTS: usize = 4;
const CHAT_EXCERPT_CHARS: usize = 1500;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("document is empty after normalization")]
    EmptyDocument,
    #[error("question is empty")]
    EmptyQuestion,
    #[error("analysis superseded by a newer request")]
    Superseded,
    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub request_id: String,
    pub analysis: DocumentAnalysis,
    /// Glossary phrases found in the document, in first-occurrence order.
    pub glossary_terms: Vec<String>,
    pub language: Option<String>,
    pub cached: bool,
    pub elapsed_ms: f64,
}

pub struct AnalysisService<B> {
    backend: Arc<B>,
    glossary: Arc<Glossary>,
    l1: TtlCache<DocumentAnalysis>,
    l2: Option<Arc<SqliteCache>>,
    highlights: HighlightCache,
    generations: TaskGeneration,
    metrics: Arc<MetricsRegistry>,
    max_document_chars: usize,
}

impl<B: CompletionBackend> AnalysisService<B> {
    pub fn new(backend: Arc<B>, glossary: Arc<Glossary>, config: &Config) -> Self {
        Self {
            backend,
            glossary,
            l1: TtlCache::new(config.cache_capacity, config.cache_ttl),
            l2: None,
            highlights: HighlightCache::new(config.cache_capacity, config.cache_ttl),
            generations: TaskGeneration::new(),
            metrics: Arc::new(MetricsRegistry::new()),
            max_document_chars: config.max_document_chars,
        }
    }

    /// Attach the persistent L2 cache.
    pub fn with_persistent_cache(mut self, l2: Arc<SqliteCache>) -> Self {
        self.l2 = Some(l2);
        self
    }

    pub fn glossary(&self) -> &Glossary {
        &self.glossary
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Highlight glossary terms in `text`; repeated input is served from cache.
    pub fn highlight(&self, text: &str) -> Arc<Vec<Segment>> {
        let span = self.metrics.span(metric_names::HIGHLIGHT);
        let segments = self.highlights.highlight(text, &self.glossary);
        span.finish();
        segments
    }

    /// Analyze a document. Starting a new analysis supersedes the one in
    /// flight, which then returns `AnalysisError::Superseded`.
    pub async fn analyze(&self, document: &str) -> Result<AnalysisReport, AnalysisError> {
        let guard = self.generations.supersede();
        let ids = RequestIds::new(guard.my_generation());
        let total = self.metrics.span(metric_names::ANALYSIS_TOTAL);

        let doc = normalize::normalize(document);
        if doc.text.is_empty() {
            return Err(AnalysisError::EmptyDocument);
        }

        let matched = self.glossary.terms_in(&doc.text);
        let glossary_terms: Vec<String> = matched.iter().map(|t| t.term.clone()).collect();
        let key = cache_key(&[
            self.backend.model().as_bytes(),
            self.glossary.digest().as_slice(),
            doc.text.as_bytes(),
        ]);

        let report = |analysis: DocumentAnalysis, cached: bool, total_us: f64| AnalysisReport {
            request_id: ids.request_id.clone(),
            analysis,
            glossary_terms: glossary_terms.clone(),
            language: doc.language.clone(),
            cached,
            elapsed_ms: total_us / 1000.0,
        };

        if let Some(hit) = self.l1.get(&key) {
            debug!(request_id = %ids.request_id, "L1 cache hit");
            return Ok(report(hit, true, total.finish()));
        }
        if let Some(hit) = self.l2.as_ref().and_then(|l2| l2.get(&key)) {
            self.l1.insert(key, hit.clone());
            return Ok(report(hit, true, total.finish()));
        }

        let messages = prompt::build_analysis_messages(
            &doc.text,
            &matched,
            doc.language.as_deref(),
            self.max_document_chars,
        );

        let llm_span = self.metrics.span(metric_names::LLM_COMPLETE);
        let completion = match self.backend.complete(&messages, guard.token()).await {
            Ok(c) => c,
            Err(LlmError::Cancelled) if !guard.is_current() => {
                info!(request_id = %ids.request_id, generation = ids.generation, "analysis superseded");
                return Err(AnalysisError::Superseded);
            }
            Err(e) => {
                warn!(request_id = %ids.request_id, error = %e, "analysis failed");
                return Err(e.into());
            }
        };
        llm_span.finish();

        if !guard.should_continue() {
            info!(request_id = %ids.request_id, generation = ids.generation, "analysis superseded");
            return Err(AnalysisError::Superseded);
        }

        let analysis = parse_analysis(&completion.text);
        self.l1.insert(key, analysis.clone());
        if let Some(l2) = &self.l2 {
            l2.insert(&key, &analysis, self.backend.model());
        }

        let elapsed_us = total.finish();
        info!(
            request_id = %ids.request_id,
            tokens = completion.tokens_used,
            summary = analysis.summary.len(),
            red_flags = analysis.red_flags.len(),
            elapsed_ms = elapsed_us / 1000.0,
            "analysis complete"
        );
        Ok(report(analysis, false, elapsed_us))
    }

    /// Cancel the analysis in flight, if any.
    pub fn cancel(&self) {
        self.generations.cancel_all();
    }

    /// Open a chat session over `document`.
    pub fn chat(&self, document: &str) -> Result<ChatSession<B>, AnalysisError> {
        let doc = normalize::normalize(document);
        if doc.text.is_empty() {
            return Err(AnalysisError::EmptyDocument);
        }
        Ok(ChatSession::new(Arc::clone(&self.backend), &doc.text, CHAT_EXCERPT_CHARS)
            .with_metrics(Arc::clone(&self.metrics)))
    }
}

/// Question/answer session about one document.
pub struct ChatSession<B> {
    backend: Arc<B>,
    excerpts: Vec<retrieval::Excerpt>,
    history: Vec<ChatTurn>,
    cancel: CancellationToken,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl<B: CompletionBackend> ChatSession<B> {
    pub fn new(backend: Arc<B>, document: &str, max_excerpt_chars: usize) -> Self {
        let excerpts = retrieval::chunk_document(document, max_excerpt_chars);
        debug!(excerpts = excerpts.len(), "chat session opened");
        Self {
            backend,
            excerpts,
            history: Vec::new(),
            cancel: CancellationToken::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Token that aborts the question in flight when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn ask(&mut self, question: &str) -> Result<String, AnalysisError> {
        self.exchange(question, None).await
    }

    /// Ask, forwarding the answer to `on_chunk` as it arrives.
    pub async fn ask_streaming(
        &mut self,
        question: &str,
        on_chunk: &ChunkSink,
    ) -> Result<String, AnalysisError> {
        self.exchange(question, Some(on_chunk)).await
    }

    async fn exchange(
        &mut self,
        question: &str,
        on_chunk: Option<&ChunkSink>,
    ) -> Result<String, AnalysisError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AnalysisError::EmptyQuestion);
        }
        let span = self.metrics.as_ref().map(|m| m.span(metric_names::CHAT_TOTAL));

        let excerpts = retrieval::top_excerpts(&self.excerpts, question, CHAT_EXCERPTS);
        let messages = prompt::build_chat_messages(question, &excerpts, &self.history);
        let completion = match on_chunk {
            Some(on_chunk) => {
                self.backend
                    .complete_stream(&messages, &self.cancel, on_chunk)
                    .await?
            }
            None => self.backend.complete(&messages, &self.cancel).await?,
        };

        let answer = completion.text.trim().to_string();
        self.history.push(ChatTurn {
            question: question.to_string(),
            answer: answer.clone(),
        });
        if self.history.len() > MAX_HISTORY_TURNS {
            let excess = self.history.len() - MAX_HISTORY_TURNS;
            self.history.drain(..excess);
        }
        if let Some(span) = span {
            span.finish();
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::glossary::{Category, GlossaryTerm};

    enum Reply {
        Text(&'static str),
        WaitForCancel,
    }

    /// Backend that plays back canned replies and records prompts.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Reply>>,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            messages: &[ChatMessage],
            cancel: &CancellationToken,
        ) -> Result<Completion, LlmError> {
            self.prompts.lock().push(messages.to_vec());
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().pop_front();
            match reply {
                Some(Reply::Text(text)) => Ok(Completion {
                    text: text.to_string(),
                    tokens_used: 10,
                    elapsed_ms: 1.0,
                }),
                Some(Reply::WaitForCancel) => {
                    cancel.cancelled().await;
                    Err(LlmError::Cancelled)
                }
                None => Err(LlmError::EmptyCompletion),
            }
        }
    }

    const REPLY: &str = "SUMMARY:\nA twelve-month lease.\n\nRED FLAGS:\n- Deposit is non-refundable.";

    fn service(backend: &Arc<ScriptedBackend>) -> AnalysisService<ScriptedBackend> {
        let glossary = Glossary::from_terms(vec![
            GlossaryTerm::new("1", "security deposit", "Money held by the landlord.", Category::Lease),
            GlossaryTerm::new("2", "sublease", "Renting to a third party.", Category::Lease),
        ])
        .unwrap();
        AnalysisService::new(Arc::clone(backend), Arc::new(glossary), &Config::default())
    }

    #[tokio::test]
    async fn analyzes_and_reports_glossary_terms() {
        let backend = ScriptedBackend::new(vec![Reply::Text(REPLY)]);
        let svc = service(&backend);
        let report = svc
            .analyze("The Security  Deposit of $500 is held by the landlord.")
            .await
            .unwrap();
        assert!(!report.cached);
        assert_eq!(report.analysis.summary, vec!["A twelve-month lease."]);
        assert_eq!(report.analysis.red_flags, vec!["Deposit is non-refundable."]);
        assert_eq!(report.glossary_terms, vec!["security deposit"]);

        let prompts = backend.prompts.lock();
        assert!(prompts[0][1].content.contains("- security deposit: Money held by the landlord."));
        assert!(!prompts[0][1].content.contains("sublease"));
    }

    #[tokio::test]
    async fn repeat_analysis_hits_cache() {
        let backend = ScriptedBackend::new(vec![Reply::Text(REPLY)]);
        let svc = service(&backend);
        let first = svc.analyze("Rent is due monthly.").await.unwrap();
        // Cosmetic whitespace differences normalize to the same key.
        let second = svc.analyze("  Rent is   due monthly.\r\n").await.unwrap();
        assert!(second.cached);
        assert_eq!(second.analysis, first.analysis);
        assert_ne!(second.request_id, first.request_id);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn persistent_cache_survives_a_new_service() {
        let dir = tempfile::tempdir().unwrap();
        let l2 = Arc::new(SqliteCache::open(&dir.path().join("cache.db")).unwrap());

        let backend = ScriptedBackend::new(vec![Reply::Text(REPLY)]);
        let svc = service(&backend).with_persistent_cache(Arc::clone(&l2));
        svc.analyze("Rent is due monthly.").await.unwrap();

        let fresh = ScriptedBackend::new(vec![]);
        let svc = service(&fresh).with_persistent_cache(l2);
        let report = svc.analyze("Rent is due monthly.").await.unwrap();
        assert!(report.cached);
        assert_eq!(fresh.calls(), 0);
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let backend = ScriptedBackend::new(vec![]);
        let svc = service(&backend);
        assert!(matches!(
            svc.analyze(" \n\t ").await,
            Err(AnalysisError::EmptyDocument)
        ));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn unstructured_reply_still_yields_both_sections() {
        let backend = ScriptedBackend::new(vec![Reply::Text("I cannot help with that.")]);
        let svc = service(&backend);
        let report = svc.analyze("Some contract.").await.unwrap();
        assert!(!report.analysis.summary.is_empty());
        assert!(!report.analysis.red_flags.is_empty());
    }

    #[tokio::test]
    async fn backend_errors_propagate() {
        let backend = ScriptedBackend::new(vec![]);
        let svc = service(&backend);
        assert!(matches!(
            svc.analyze("Some contract.").await,
            Err(AnalysisError::Llm(LlmError::EmptyCompletion))
        ));
    }

    #[tokio::test]
    async fn newer_analysis_supersedes_older() {
        let backend = ScriptedBackend::new(vec![Reply::WaitForCancel, Reply::Text(REPLY)]);
        let svc = Arc::new(service(&backend));

        let older = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.analyze("First lease document.").await })
        };
        while backend.calls() == 0 {
            tokio::task::yield_now().await;
        }

        let newer = svc.analyze("Second lease document.").await.unwrap();
        assert!(!newer.cached);
        assert!(matches!(older.await.unwrap(), Err(AnalysisError::Superseded)));
    }

    #[tokio::test]
    async fn explicit_cancel_is_not_superseded() {
        let backend = ScriptedBackend::new(vec![Reply::WaitForCancel]);
        let svc = Arc::new(service(&backend));
        let task = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.analyze("A lease.").await })
        };
        while backend.calls() == 0 {
            tokio::task::yield_now().await;
        }
        svc.cancel();
        assert!(matches!(
            task.await.unwrap(),
            Err(AnalysisError::Llm(LlmError::Cancelled))
        ));
    }

    #[tokio::test]
    async fn highlight_records_metric() {
        let backend = ScriptedBackend::new(vec![]);
        let svc = service(&backend);
        let segments = svc.highlight("No sublease allowed.");
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].text, "sublease");
        assert_eq!(svc.metrics().summary()[metric_names::HIGHLIGHT].count, 1);
    }

    #[tokio::test]
    async fn chat_keeps_bounded_history() {
        let replies = (0..12).map(|_| Reply::Text(" The 1st of the month. ")).collect();
        let backend = ScriptedBackend::new(replies);
        let svc = service(&backend);
        let mut chat = svc
            .chat("Rent is due on the 1st.\n\nThe deposit is $500.")
            .unwrap();

        let answer = chat.ask("When is rent due?").await.unwrap();
        assert_eq!(answer, "The 1st of the month.");
        {
            let prompts = backend.prompts.lock();
            assert!(prompts[0][0].content.contains("Rent is due on the 1st."));
        }

        for _ in 0..11 {
            chat.ask("And again?").await.unwrap();
        }
        assert_eq!(chat.history().len(), MAX_HISTORY_TURNS);
        // system + 10 replayed turns + question
        let prompts = backend.prompts.lock();
        assert_eq!(prompts.last().unwrap().len(), 1 + 2 * MAX_HISTORY_TURNS + 1);
    }

    #[tokio::test]
    async fn chat_rejects_empty_question() {
        let backend = ScriptedBackend::new(vec![]);
        let svc = service(&backend);
        let mut chat = svc.chat("A lease.").unwrap();
        assert!(matches!(chat.ask("   ").await, Err(AnalysisError::EmptyQuestion)));
        assert!(chat.history().is_empty());
        assert!(matches!(svc.chat(""), Err(AnalysisError::EmptyDocument)));
    }

    #[tokio::test]
    async fn streaming_falls_back_to_single_chunk() {
        let backend = ScriptedBackend::new(vec![Reply::Text("Yes.")]);
        let svc = service(&backend);
        let mut chat = svc.chat("Pets are allowed.").unwrap();
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&seen);
        let answer = chat
            .ask_streaming("Are pets allowed?", &move |chunk: &str| sink.lock().push_str(chunk))
            .await
            .unwrap();
        assert_eq!(answer, "Yes.");
        assert_eq!(*seen.lock(), "Yes.");
    }
}
