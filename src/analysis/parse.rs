//! Completion parsing.
//! Splits a free-text model reply into `SUMMARY:` and `RED FLAGS:` sections.
//! Parsing never fails: missing sections fall back to sentence heuristics
//! and then to fixed placeholders, so a rendered analysis always has at
//! least one summary entry and one red flag.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const PLACEHOLDER_SUMMARY: &str = "No summary could be generated for this document.";
pub const PLACEHOLDER_RED_FLAG: &str =
    "No specific red flags were identified. Review the full document carefully before signing.";

/// Sentences taken when the reply has no summary section.
const FALLBACK_SENTENCES: usize = 3;

/// Parsed analysis. Both lists are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub summary: Vec<String>,
    pub red_flags: Vec<String>,
}

/// One lexed block of a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    Summary(String),
    RedFlags(Vec<String>),
    /// Preamble before any header, or a block under a header we do not render.
    Unrecognized(String),
}

struct ResponseParser {
    header: Regex,
    bullet: Regex,
    nothing_found: Regex,
}

impl ResponseParser {
    fn new() -> Self {
        Self {
            // Line-start header, optionally markdown-wrapped: `## Summary`, `**RED FLAGS:**`.
            header: Regex::new(
                r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*|__)?[ \t]*(summary|red[ \t]*flags?|key[ \t]+terms|recommendations|next[ \t]+steps)[ \t]*(?:\*\*|__)?[ \t]*(?::[ \t]*(?:\*\*|__)?|$)",
            )
            .expect("header pattern is valid"),
            // A numeric marker needs trailing space, so `12.5% fee` keeps its figure.
            bullet: Regex::new(
                r"^(?:[-*•‣◦–+]+|\(?\d{1,3}[.):](?:[ \t]+|$)|\([a-zA-Z]\)|[a-zA-Z][.)][ \t])[ \t]*",
            )
            .expect("bullet pattern is valid"),
            nothing_found: Regex::new(
                r"(?i)^(?:none|n/?a|nothing(?: notable)?|no (?:significant |specific |obvious )?red flags?(?: (?:were |are )?(?:found|identified|noted))?)[.!]?$",
            )
            .expect("nothing-found pattern is valid"),
        }
    }

    fn lex(&self, text: &str) -> Vec<Section> {
        let headers: Vec<_> = self.header.captures_iter(text).collect();
        let mut sections = Vec::with_capacity(headers.len() + 1);

        let preamble_end = headers
            .first()
            .and_then(|c| c.get(0))
            .map_or(text.len(), |m| m.start());
        let preamble = text[..preamble_end].trim();
        if !preamble.is_empty() {
            sections.push(Section::Unrecognized(preamble.to_string()));
        }

        for (i, caps) in headers.iter().enumerate() {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let body_end = headers
                .get(i + 1)
                .and_then(|c| c.get(0))
                .map_or(text.len(), |m| m.start());
            let body = text[whole.end()..body_end].trim();
            let name = name.as_str().to_ascii_lowercase();

            if name.starts_with("summary") {
                sections.push(Section::Summary(body.to_string()));
            } else if name.starts_with("red") {
                sections.push(Section::RedFlags(self.red_flag_lines(body)));
            } else if !body.is_empty() {
                sections.push(Section::Unrecognized(body.to_string()));
            }
        }
        sections
    }

    fn strip_bullet<'a>(&self, line: &'a str) -> &'a str {
        let line = line.trim();
        let stripped = self.bullet.find(line).map_or(line, |m| &line[m.end()..]);
        stripped.trim()
    }

    /// One red flag per non-empty line, bullet or number prefix removed.
    fn red_flag_lines(&self, body: &str) -> Vec<String> {
        body.lines()
            .map(|l| self.strip_bullet(l))
            .filter(|l| !l.is_empty() && !self.nothing_found.is_match(l))
            .map(str::to_string)
            .collect()
    }

    /// Bullet lines are separate entries; wrapped prose lines join into one.
    fn summary_entries(&self, body: &str) -> Vec<String> {
        let mut entries = Vec::new();
        let mut paragraph: Vec<&str> = Vec::new();

        for raw in body.lines() {
            let line = raw.trim();
            if line.is_empty() {
                flush_paragraph(&mut paragraph, &mut entries);
                continue;
            }
            if self.bullet.is_match(line) {
                flush_paragraph(&mut paragraph, &mut entries);
                let item = self.strip_bullet(line);
                if !item.is_empty() {
                    entries.push(item.to_string());
                }
            } else {
                paragraph.push(line);
            }
        }
        flush_paragraph(&mut paragraph, &mut entries);
        entries
    }

    fn fallback_summary(&self, text: &str) -> Vec<String> {
        split_sentences(text)
            .into_iter()
            .map(|s| self.strip_bullet(s))
            .filter(|s| !s.is_empty())
            .take(FALLBACK_SENTENCES)
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect()
    }

    fn parse(&self, text: &str) -> DocumentAnalysis {
        let mut summary = Vec::new();
        let mut red_flags = Vec::new();
        let mut unrecognized = Vec::new();
        let mut saw_summary = false;

        for section in self.lex(text) {
            match section {
                Section::Summary(body) => {
                    saw_summary = true;
                    summary.extend(self.summary_entries(&body));
                }
                Section::RedFlags(lines) => red_flags.extend(lines),
                Section::Unrecognized(body) => unrecognized.push(body),
            }
        }

        if !saw_summary {
            summary = self.fallback_summary(&unrecognized.join("\n\n"));
        }
        if summary.is_empty() {
            summary.push(PLACEHOLDER_SUMMARY.to_string());
        }
        if red_flags.is_empty() {
            red_flags.push(PLACEHOLDER_RED_FLAG.to_string());
        }

        DocumentAnalysis { summary, red_flags }
    }
}

fn flush_paragraph(paragraph: &mut Vec<&str>, entries: &mut Vec<String>) {
    if !paragraph.is_empty() {
        entries.push(paragraph.join(" "));
        paragraph.clear();
    }
}

/// Naive sentence split: a terminator followed by whitespace or end of text.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_break = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
            if at_break {
                let end = i + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

static PARSER: LazyLock<ResponseParser> = LazyLock::new(ResponseParser::new);

/// Lex a completion into its sections without applying fallbacks.
pub fn lex_sections(text: &str) -> Vec<Section> {
    PARSER.lex(text)
}

/// Parse a completion into a renderable analysis. Never fails.
pub fn parse_analysis(text: &str) -> DocumentAnalysis {
    PARSER.parse(text)
}
