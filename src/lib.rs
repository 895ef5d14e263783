//! clausewise: legal document analysis core.
//! Glossary term highlighting, LLM-backed summaries and red flags, and a
//! document chat assistant.

pub mod analysis;
pub mod cache;
pub mod cancellation;
pub mod config;
pub mod glossary;
pub mod highlight;
pub mod metrics;

pub use analysis::{
    AnalysisError, AnalysisReport, AnalysisService, ChatSession, CompletionBackend,
    DocumentAnalysis, OpenRouterClient,
};
pub use config::Config;
pub use glossary::{Category, Glossary, GlossaryTerm};
pub use highlight::{highlight, Segment, TermIndex};

/// Install the global tracing subscriber.
/// Filter comes from `RUST_LOG`, defaulting to `clausewise=info`.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("clausewise=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
