//! Term highlighting.
//! Partitions document text into plain and highlighted segments using a
//! precompiled `TermIndex`. Longest phrase wins at a position, equal lengths
//! resolve by glossary order, and matches never start or end inside a word.

pub mod cache;
pub mod index;

use serde::Serialize;

use crate::glossary::GlossaryTerm;

pub use cache::HighlightCache;
pub use index::{TermIndex, TermMatch};

/// One rendering unit. `term` is present exactly when the span is highlighted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub text: String,
    pub is_highlighted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<GlossaryTerm>,
}

impl Segment {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_highlighted: false,
            term: None,
        }
    }

    pub fn highlighted(text: impl Into<String>, term: GlossaryTerm) -> Self {
        Self {
            text: text.into(),
            is_highlighted: true,
            term: Some(term),
        }
    }
}

/// Split `text` into segments against `index`.
///
/// Empty input yields an empty sequence; an empty index yields the whole
/// text as a single plain segment.
pub fn highlight(text: &str, index: &TermIndex) -> Vec<Segment> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut cursor = 0;
    for m in index.find_matches(text) {
        if m.start > cursor {
            segments.push(Segment::plain(&text[cursor..m.start]));
        }
        segments.push(Segment::highlighted(&text[m.start..m.end], m.term.clone()));
        cursor = m.end;
    }
    if cursor < text.len() {
        segments.push(Segment::plain(&text[cursor..]));
    }

    merge_plain(segments)
}

/// Highlight against an ad hoc term list. Builds a throwaway index; prefer
/// `Glossary::index` when highlighting more than once.
pub fn highlight_terms(text: &str, terms: &[GlossaryTerm]) -> Result<Vec<Segment>, regex::Error> {
    let index = TermIndex::new(terms)?;
    Ok(highlight(text, &index))
}

/// Merge adjacent plain segments and drop empty ones.
pub fn merge_plain(segments: Vec<Segment>) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        if seg.text.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(prev) if !prev.is_highlighted && !seg.is_highlighted => {
                prev.text.push_str(&seg.text);
            }
            _ => out.push(seg),
        }
    }
    out
}
