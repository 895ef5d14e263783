//! Document excerpt retrieval for the chat assistant.
//! Documents are packed into paragraph-aligned excerpts; a question selects
//! the excerpts sharing the most distinct keywords with it.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("paragraph pattern is valid"));

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "could", "do", "does",
    "for", "from", "has", "have", "how", "i", "if", "in", "is", "it", "its", "me", "my", "of",
    "on", "or", "should", "that", "the", "their", "there", "this", "to", "was", "what", "when",
    "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// A contiguous slice of the document (byte range into the original text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Byte ranges of paragraphs, separators excluded.
fn paragraph_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for sep in PARAGRAPH_BREAK.find_iter(text) {
        if sep.start() > start {
            ranges.push((start, sep.start()));
        }
        start = sep.end();
    }
    if start < text.len() {
        ranges.push((start, text.len()));
    }
    ranges
        .into_iter()
        .filter(|&(s, e)| !text[s..e].trim().is_empty())
        .collect()
}

/// Split an oversize range into pieces of at most `max_chars` chars.
fn hard_split(text: &str, (start, end): (usize, usize), max_chars: usize) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut piece_start = start;
    let mut count = 0;
    for (offset, _) in text[start..end].char_indices() {
        if count == max_chars {
            pieces.push((piece_start, start + offset));
            piece_start = start + offset;
            count = 0;
        }
        count += 1;
    }
    if piece_start < end {
        pieces.push((piece_start, end));
    }
    pieces
}

/// Pack paragraphs into excerpts of at most `max_chars` chars each.
pub fn chunk_document(text: &str, max_chars: usize) -> Vec<Excerpt> {
    let max_chars = max_chars.max(1);
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for para in paragraph_ranges(text) {
        let para_chars = text[para.0..para.1].chars().count();
        if para_chars > max_chars {
            ranges.extend(current.take());
            ranges.extend(hard_split(text, para, max_chars));
            continue;
        }
        current = match current {
            Some((s, _)) if text[s..para.1].chars().count() <= max_chars => Some((s, para.1)),
            Some(done) => {
                ranges.push(done);
                Some(para)
            }
            None => Some(para),
        };
    }
    ranges.extend(current);

    ranges
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Excerpt {
            index,
            text: text[start..end].to_string(),
            start,
            end,
        })
        .collect()
}

/// Lowercased alphanumeric tokens, stopwords removed.
fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Up to `k` excerpts most relevant to `question`, returned in document order.
/// With no keyword overlap at all, the opening excerpts are returned.
pub fn top_excerpts<'a>(excerpts: &'a [Excerpt], question: &str, k: usize) -> Vec<&'a Excerpt> {
    let wanted = keywords(question);
    let mut scored: Vec<(usize, &Excerpt)> = excerpts
        .iter()
        .map(|e| {
            let have = keywords(&e.text);
            (wanted.iter().filter(|w| have.contains(*w)).count(), e)
        })
        .collect();

    if scored.iter().all(|(score, _)| *score == 0) {
        return excerpts.iter().take(k).collect();
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.index.cmp(&b.1.index)));
    let mut picked: Vec<&Excerpt> = scored
        .into_iter()
        .filter(|(score, _)| *score > 0)
        .take(k)
        .map(|(_, e)| e)
        .collect();
    picked.sort_by_key(|e| e.index);
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_paragraphs_up_to_limit() {
        let text = "First para.\n\nSecond para.\n\nThird paragraph is longer.";
        let chunks = chunk_document(text, 30);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First para.\n\nSecond para.");
        assert_eq!(chunks[1].text, "Third paragraph is longer.");
        assert_eq!(&text[chunks[1].start..chunks[1].end], chunks[1].text);
    }

    #[test]
    fn oversize_paragraph_is_split_on_char_boundaries() {
        let text = "ééééé";
        let chunks = chunk_document(text, 2);
        let pieces: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(pieces, vec!["éé", "éé", "é"]);
        assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn empty_document_has_no_excerpts() {
        assert!(chunk_document("", 100).is_empty());
        assert!(chunk_document("\n\n \n\n", 100).is_empty());
    }

    #[test]
    fn ranks_by_keyword_overlap() {
        let text = "Rent is due monthly.\n\nThe security deposit is refundable.\n\nTermination requires notice.";
        let chunks = chunk_document(text, 40);
        assert_eq!(chunks.len(), 3);
        let top = top_excerpts(&chunks, "Is my security deposit refundable?", 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].text, "The security deposit is refundable.");
    }

    #[test]
    fn results_come_back_in_document_order() {
        let text = "Notice period is thirty days.\n\nRent is due monthly.\n\nLate rent incurs a notice fee.";
        let chunks = chunk_document(text, 30);
        let top = top_excerpts(&chunks, "rent notice", 2);
        let indices: Vec<usize> = top.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn no_overlap_returns_opening_excerpts() {
        let text = "Alpha.\n\nBeta.\n\nGamma.";
        let chunks = chunk_document(text, 6);
        let top = top_excerpts(&chunks, "what is this?", 2);
        assert_eq!(top.iter().map(|e| e.index).collect::<Vec<_>>(), vec![0, 1]);
    }
}
