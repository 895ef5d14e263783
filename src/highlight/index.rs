//! Precompiled term index.
//! One case-insensitive, leftmost-first alternation over every glossary
//! phrase, longest phrase first, with a capture group per term.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::glossary::GlossaryTerm;

/// Compiled pattern budget; large glossaries exceed the regex default.
const PATTERN_SIZE_LIMIT: usize = 64 << 20;

/// Immutable, shareable match index built once per glossary load.
#[derive(Debug, Clone)]
pub struct TermIndex {
    /// Terms in match-priority order; slot `i` is capture group `i + 1`.
    terms: Vec<GlossaryTerm>,
    pattern: Option<Regex>,
}

/// One located term occurrence (byte offsets into the searched text).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermMatch<'a> {
    pub term: &'a GlossaryTerm,
    pub start: usize,
    pub end: usize,
}

impl TermIndex {
    /// Compile an index. Terms must already be validated (non-blank phrases).
    pub fn new(terms: &[GlossaryTerm]) -> Result<Self, regex::Error> {
        if terms.is_empty() {
            return Ok(Self::empty());
        }

        let mut ranked: Vec<(usize, &GlossaryTerm)> = terms
            .iter()
            .map(|t| (phrase_len(&t.term), t))
            .collect();
        // Stable: equal lengths keep glossary order.
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        let alternatives: Vec<String> = ranked
            .iter()
            .map(|(_, t)| format!("(?:{})", term_pattern(&t.term)))
            .collect();

        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()?;

        Ok(Self {
            terms: ranked.into_iter().map(|(_, t)| t.clone()).collect(),
            pattern: Some(pattern),
        })
    }

    pub fn empty() -> Self {
        Self {
            terms: Vec::new(),
            pattern: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terms in match-priority order.
    pub fn terms(&self) -> &[GlossaryTerm] {
        &self.terms
    }

    /// Non-overlapping term occurrences, left to right. Matched terms borrow
    /// from the index, not from `text`.
    pub fn find_matches<'s, 't>(
        &'s self,
        text: &'t str,
    ) -> impl Iterator<Item = TermMatch<'s>> + 't
    where
        's: 't,
    {
        self.pattern
            .iter()
            .flat_map(move |re| re.captures_iter(text))
            .filter_map(move |caps| {
                caps.iter()
                    .skip(1)
                    .enumerate()
                    .find_map(|(slot, group)| group.map(|m| (slot, m)))
                    .map(|(slot, m)| TermMatch {
                        term: &self.terms[slot],
                        start: m.start(),
                        end: m.end(),
                    })
            })
    }
}

/// Phrase length in chars with whitespace runs collapsed to one space.
fn phrase_len(phrase: &str) -> usize {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let chars: usize = words.iter().map(|w| w.chars().count()).sum();
    chars + words.len().saturating_sub(1)
}

/// Literal pattern for one phrase, wrapped in a capture group.
/// Whitespace runs match any whitespace run. `\b` is only placed next to a
/// word character; beside punctuation it would demand a word on the far side.
fn term_pattern(phrase: &str) -> String {
    let body = phrase
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let trimmed = phrase.trim();
    let lead = if trimmed.chars().next().is_some_and(is_word_char) {
        r"\b"
    } else {
        ""
    };
    let trail = if trimmed.chars().next_back().is_some_and(is_word_char) {
        r"\b"
    } else {
        ""
    };
    format!("{lead}({body}){trail}")
}

/// Unicode `\w`, the class `\b` is defined against (includes combining marks).
static WORD_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w$").expect("word-char pattern is valid"));

fn is_word_char(c: char) -> bool {
    let mut buf = [0u8; 4];
    WORD_CHAR.is_match(c.encode_utf8(&mut buf))
}
