//! Remote glossary store (PostgREST endpoint of the hosted Postgres backend).
//! The full term set is read once per session, sorted by term name.

use std::time::Duration;

use tracing::{info, warn};

use super::{Glossary, GlossaryError, GlossaryTerm};
use crate::config::Config;

/// Read-only client for the glossary table.
pub struct GlossaryStore {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    table: String,
}

impl GlossaryStore {
    /// `base_url` should be like `https://xyz.supabase.co` (no trailing slash needed).
    pub fn new(base_url: &str, anon_key: &str, table: &str) -> Result<Self, GlossaryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            table: table.to_string(),
        })
    }

    /// Build a store from configuration, or `None` if the store is not configured.
    pub fn from_config(config: &Config) -> Option<Result<Self, GlossaryError>> {
        let url = config.supabase_url.as_deref()?;
        let key = config.supabase_anon_key.as_deref()?;
        Some(Self::new(url, key, &config.glossary_table))
    }

    fn terms_url(&self) -> String {
        format!(
            "{}/rest/v1/{}?select=id,term,definition,category&order=term.asc",
            self.base_url, self.table
        )
    }

    /// Fetch every term and build a validated glossary.
    pub async fn fetch_all(&self) -> Result<Glossary, GlossaryError> {
        let url = self.terms_url();
        info!(url = %url, "fetching glossary");

        let resp = self
            .http
            .get(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "glossary fetch failed");
            return Err(GlossaryError::Server {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let bytes = resp.bytes().await?;
        let terms: Vec<GlossaryTerm> = serde_json::from_slice(&bytes)?;
        Glossary::from_terms(terms)
    }

    /// Fetch the glossary, degrading to an empty one on any failure.
    pub async fn fetch_or_empty(&self) -> Glossary {
        self.fetch_all().await.unwrap_or_else(|e| {
            warn!(error = %e, "glossary unavailable, highlighting disabled");
            Glossary::empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_trims_trailing_slash() {
        let store = GlossaryStore::new("https://example.supabase.co/", "anon", "glossary_terms")
            .unwrap();
        assert_eq!(store.base_url, "https://example.supabase.co");
        assert_eq!(
            store.terms_url(),
            "https://example.supabase.co/rest/v1/glossary_terms?select=id,term,definition,category&order=term.asc"
        );
    }

    #[test]
    fn store_rows_deserialize() {
        let rows = r#"[
            {"id":"a1","term":"arbitration","definition":"private dispute resolution","category":"general"},
            {"id":"b2","term":"at-will employment","definition":"either side may end it","category":"employment"}
        ]"#;
        let terms: Vec<GlossaryTerm> = serde_json::from_str(rows).unwrap();
        let g = Glossary::from_terms(terms).unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g.terms()[1].term, "at-will employment");
    }

    #[test]
    fn unconfigured_store_is_none() {
        let config = Config::default();
        assert!(GlossaryStore::from_config(&config).is_none());
    }
}
