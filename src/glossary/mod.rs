//! Glossary loading and validation.
//! Terms are validated once at load time and compiled into a `TermIndex`,
//! so every later highlight call reuses the same immutable index.

pub mod store;

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::highlight::TermIndex;

pub use store::GlossaryStore;

/// Category a glossary term belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Category {
    #[default]
    General,
    Employment,
    Lease,
    /// Any category the store knows about that this crate does not.
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::General => "general",
            Category::Employment => "employment",
            Category::Lease => "lease",
            Category::Other(name) => name,
        }
    }
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "" | "general" => Category::General,
            "employment" => Category::Employment,
            "lease" => Category::Lease,
            _ => Category::Other(value),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // The store returns null for uncategorised rows.
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(Category::from).unwrap_or_default())
    }
}

/// A single glossary entry as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub id: String,
    /// Display phrase in plain language. Never interpreted as a pattern.
    pub term: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub definition: String,
    #[serde(default)]
    pub category: Category,
}

impl GlossaryTerm {
    pub fn new(
        id: impl Into<String>,
        term: impl Into<String>,
        definition: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            id: id.into(),
            term: term.into(),
            definition: definition.into(),
            category,
        }
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Error)]
pub enum GlossaryError {
    #[error("glossary IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("glossary parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("glossary term {id:?} has a blank phrase")]
    BlankTerm { id: String },
    #[error("glossary term {term:?} has no id")]
    MissingId { term: String },
    #[error("duplicate glossary id {0:?}")]
    DuplicateId(String),
    #[error("glossary pattern could not be compiled: {0}")]
    Pattern(#[from] regex::Error),
    #[error("glossary request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("glossary store returned {status}: {body}")]
    Server { status: u16, body: String },
}

/// On-disk glossary: either `{"version": n, "terms": [...]}` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum GlossaryFile {
    Versioned {
        #[serde(default)]
        version: u32,
        terms: Vec<GlossaryTerm>,
    },
    Bare(Vec<GlossaryTerm>),
}

/// Loaded, validated glossary with its compiled match index.
pub struct Glossary {
    version: u32,
    terms: Vec<GlossaryTerm>,
    digest: [u8; 32],
    index: TermIndex,
}

impl Glossary {
    /// Validate `terms` and compile the highlight index.
    /// Order is preserved; it is the tie-break order for equal-length phrases.
    pub fn from_terms(terms: Vec<GlossaryTerm>) -> Result<Self, GlossaryError> {
        Self::with_version(0, terms)
    }

    pub fn with_version(version: u32, terms: Vec<GlossaryTerm>) -> Result<Self, GlossaryError> {
        validate(&terms)?;
        let index = TermIndex::new(&terms)?;
        let digest = compute_digest(version, &terms);
        info!(version, terms = terms.len(), "glossary loaded");
        Ok(Self {
            version,
            terms,
            digest,
            index,
        })
    }

    /// Load glossary from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self, GlossaryError> {
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content)? {
            GlossaryFile::Versioned { version, terms } => Self::with_version(version, terms),
            GlossaryFile::Bare(terms) => Self::from_terms(terms),
        }
    }

    /// Create an empty glossary (nothing loaded yet, or the store was unreachable).
    pub fn empty() -> Self {
        Self {
            version: 0,
            terms: Vec::new(),
            digest: compute_digest(0, &[]),
            index: TermIndex::empty(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[GlossaryTerm] {
        &self.terms
    }

    /// Content digest, part of every cache key that depends on the glossary.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    pub fn index(&self) -> &TermIndex {
        &self.index
    }

    /// Terms that occur in `text`, deduplicated, in first-occurrence order.
    pub fn terms_in<'s>(&'s self, text: &str) -> Vec<&'s GlossaryTerm> {
        let mut seen = HashSet::new();
        let found: Vec<&GlossaryTerm> = self
            .index
            .find_matches(text)
            .filter(|m| seen.insert(m.term.id.as_str()))
            .map(|m| m.term)
            .collect();
        debug!(found = found.len(), "glossary terms matched");
        found
    }
}

fn validate(terms: &[GlossaryTerm]) -> Result<(), GlossaryError> {
    let mut ids = HashSet::with_capacity(terms.len());
    for t in terms {
        if t.id.trim().is_empty() {
            return Err(GlossaryError::MissingId {
                term: t.term.clone(),
            });
        }
        if t.term.trim().is_empty() {
            return Err(GlossaryError::BlankTerm { id: t.id.clone() });
        }
        if !ids.insert(t.id.as_str()) {
            return Err(GlossaryError::DuplicateId(t.id.clone()));
        }
    }
    Ok(())
}

fn compute_digest(version: u32, terms: &[GlossaryTerm]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&version.to_le_bytes());
    for t in terms {
        for field in [
            t.id.as_str(),
            t.term.as_str(),
            t.definition.as_str(),
            t.category.as_str(),
        ] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
    }
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn term(id: &str, phrase: &str) -> GlossaryTerm {
        GlossaryTerm::new(id, phrase, format!("definition of {phrase}"), Category::General)
    }

    #[test]
    fn rejects_blank_phrase() {
        let err = Glossary::from_terms(vec![term("1", "lease"), term("2", "   ")])
            .err()
            .unwrap();
        assert!(matches!(err, GlossaryError::BlankTerm { ref id } if id == "2"));
    }

    #[test]
    fn rejects_empty_phrase_and_missing_id() {
        assert!(matches!(
            Glossary::from_terms(vec![term("1", "")]),
            Err(GlossaryError::BlankTerm { .. })
        ));
        assert!(matches!(
            Glossary::from_terms(vec![term("", "lease")]),
            Err(GlossaryError::MissingId { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = Glossary::from_terms(vec![term("a", "lease"), term("a", "tenant")])
            .err()
            .unwrap();
        assert!(matches!(err, GlossaryError::DuplicateId(ref id) if id == "a"));
    }

    #[test]
    fn category_parses_known_and_unknown_values() {
        assert_eq!(Category::from("Employment".to_string()), Category::Employment);
        assert_eq!(Category::from("lease".to_string()), Category::Lease);
        assert_eq!(
            Category::from("ip".to_string()),
            Category::Other("ip".to_string())
        );
        let parsed: GlossaryTerm = serde_json::from_str(
            r#"{"id":"7","term":"escrow","definition":null,"category":null}"#,
        )
        .unwrap();
        assert_eq!(parsed.category, Category::General);
        assert_eq!(parsed.definition, "");
    }

    #[test]
    fn loads_versioned_and_bare_files() {
        let mut versioned = tempfile::NamedTempFile::new().unwrap();
        write!(
            versioned,
            r#"{{"version": 3, "terms": [{{"id":"1","term":"indemnify","definition":"cover losses","category":"general"}}]}}"#
        )
        .unwrap();
        let g = Glossary::load_from_file(versioned.path()).unwrap();
        assert_eq!(g.version(), 3);
        assert_eq!(g.len(), 1);

        let mut bare = tempfile::NamedTempFile::new().unwrap();
        write!(
            bare,
            r#"[{{"id":"1","term":"sublet","definition":"rent to another","category":"lease"}}]"#
        )
        .unwrap();
        let g = Glossary::load_from_file(bare.path()).unwrap();
        assert_eq!(g.version(), 0);
        assert_eq!(g.terms()[0].category, Category::Lease);
    }

    #[test]
    fn digest_changes_with_content() {
        let a = Glossary::from_terms(vec![term("1", "lease")]).unwrap();
        let b = Glossary::from_terms(vec![term("1", "leases")]).unwrap();
        let a2 = Glossary::from_terms(vec![term("1", "lease")]).unwrap();
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), a2.digest());
    }

    #[test]
    fn terms_in_deduplicates_in_document_order() {
        let g = Glossary::from_terms(vec![
            term("1", "tenant"),
            term("2", "landlord"),
            term("3", "escrow"),
        ])
        .unwrap();
        let found = g.terms_in("The Landlord and the tenant agree; the landlord may...");
        let ids: Vec<&str> = found.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[test]
    fn matched_terms_outlive_the_searched_text() {
        let g = Glossary::from_terms(vec![term("1", "escrow")]).unwrap();
        let found = {
            let text = String::from("Funds are held in Escrow until closing.");
            g.terms_in(&text)
        };
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].term, "escrow");
    }

    #[test]
    fn empty_glossary_finds_nothing() {
        let g = Glossary::empty();
        assert!(g.is_empty());
        assert!(g.terms_in("anything at all").is_empty());
    }
}
