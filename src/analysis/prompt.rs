//! Prompt construction for document analysis and the chat assistant.

use serde::{Deserialize, Serialize};

use super::normalize::language_name;
use super::retrieval::Excerpt;
use crate::glossary::GlossaryTerm;

/// Analysis replies must use these literal headers; see `parse::parse_analysis`.
pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are a careful legal assistant who explains \
contracts to non-lawyers. Reply with exactly two sections introduced by the literal headers \
`SUMMARY:` and `RED FLAGS:`. Under SUMMARY give two to four short plain-language sentences. \
Under RED FLAGS list each concerning clause on its own line starting with `- `. \
Do not give legal advice.";

pub const CHAT_SYSTEM_PROMPT: &str = "You are a legal assistant answering questions about one \
document. Answer only from the numbered excerpts below; if they do not contain the answer, say \
so. Quote the clause you rely on. Do not give legal advice.";

/// Glossary hints included in an analysis prompt.
const MAX_GLOSSARY_HINTS: usize = 25;
const MAX_DEFINITION_CHARS: usize = 200;
const TRUNCATION_MARKER: &str = "\n[... truncated ...]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat-completions message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completed question/answer exchange in a chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

/// Prefix of `text` holding at most `max_chars` chars, and whether it was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => (&text[..byte], true),
        None => (text, false),
    }
}

/// Messages for a one-shot document analysis.
pub fn build_analysis_messages(
    document: &str,
    glossary_terms: &[&GlossaryTerm],
    language: Option<&str>,
    max_document_chars: usize,
) -> Vec<ChatMessage> {
    let (body, truncated) = truncate_chars(document, max_document_chars);

    let mut prompt = String::with_capacity(body.len() + 512);
    prompt.push_str("Analyze the following document.\n");

    if let Some(code) = language.filter(|c| *c != "en" && *c != "other") {
        prompt.push_str(&format!(
            "The document is written in {}. Write both sections in {}, keeping the headers in English.\n",
            language_name(code),
            language_name(code)
        ));
    }

    if !glossary_terms.is_empty() {
        prompt.push_str("\nKnown legal terms that appear in the document:\n");
        for t in glossary_terms.iter().take(MAX_GLOSSARY_HINTS) {
            let (definition, cut) = truncate_chars(t.definition.trim(), MAX_DEFINITION_CHARS);
            let ellipsis = if cut { "..." } else { "" };
            prompt.push_str(&format!("- {}: {definition}{ellipsis}\n", t.term));
        }
    }

    prompt.push_str("\nDOCUMENT:\n\"\"\"\n");
    prompt.push_str(body);
    if truncated {
        prompt.push_str(TRUNCATION_MARKER);
    }
    prompt.push_str("\n\"\"\"");

    vec![
        ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

/// Messages for a chat question: excerpts as context, then prior turns.
pub fn build_chat_messages(
    question: &str,
    excerpts: &[&Excerpt],
    history: &[ChatTurn],
) -> Vec<ChatMessage> {
    let mut system = String::from(CHAT_SYSTEM_PROMPT);
    system.push_str("\n\nEXCERPTS:");
    if excerpts.is_empty() {
        system.push_str("\n(none)");
    }
    for (n, e) in excerpts.iter().enumerate() {
        system.push_str(&format!("\n[{}] {}", n + 1, e.text.trim()));
    }

    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(system));
    for turn in history {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }
    messages.push(ChatMessage::user(question.trim()));
    messages
}
