//! Highlight result cache.
//! Key: blake3 of (glossary digest | document text), so reloading a changed
//! glossary never serves stale segments.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{highlight, Segment};
use crate::cache::{cache_key, TtlCache};
use crate::glossary::Glossary;

pub struct HighlightCache {
    inner: TtlCache<Arc<Vec<Segment>>>,
}

impl HighlightCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(capacity, ttl),
        }
    }

    /// Highlight `text`, reusing a previous result for identical input.
    pub fn highlight(&self, text: &str, glossary: &Glossary) -> Arc<Vec<Segment>> {
        let key = cache_key(&[glossary.digest().as_slice(), text.as_bytes()]);
        if let Some(hit) = self.inner.get(&key) {
            debug!(segments = hit.len(), "highlight cache hit");
            return hit;
        }
        let segments = Arc::new(highlight(text, glossary.index()));
        self.inner.insert(key, Arc::clone(&segments));
        segments
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glossary::{Category, GlossaryTerm};

    fn glossary(phrase: &str) -> Glossary {
        Glossary::from_terms(vec![GlossaryTerm::new("1", phrase, "", Category::Lease)]).unwrap()
    }

    #[test]
    fn repeated_input_is_served_from_cache() {
        let cache = HighlightCache::new(8, Duration::from_secs(60));
        let g = glossary("tenant");
        let first = cache.highlight("The tenant shall pay.", &g);
        let second = cache.highlight("The tenant shall pay.", &g);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn glossary_change_misses_cache() {
        let cache = HighlightCache::new(8, Duration::from_secs(60));
        let text = "The tenant and the landlord.";
        let a = cache.highlight(text, &glossary("tenant"));
        let b = cache.highlight(text, &glossary("landlord"));
        assert_eq!(a[1].text, "tenant");
        assert_eq!(b[1].text, "landlord");
        assert_eq!(cache.len(), 2);
    }
}
