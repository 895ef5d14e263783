//! L2 persistent analysis cache backed by SQLite.
//! Keyed by the same blake3 digest as the in-memory cache, so analyses
//! survive across CLI invocations. Read and write failures are logged and
//! behave as misses.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::parse::DocumentAnalysis;
use crate::cache::CacheKey;

/// Default TTL for stored analyses: 7 days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

pub struct SqliteCache {
    conn: Mutex<Connection>,
    ttl_secs: i64,
}

impl SqliteCache {
    /// Open (or create) the cache database at `db_path`.
    pub fn open(db_path: &Path) -> rusqlite::Result<Self> {
        Self::open_with_ttl(db_path, DEFAULT_TTL)
    }

    pub fn open_with_ttl(db_path: &Path, ttl: Duration) -> rusqlite::Result<Self> {
        let conn = Connection::open(db_path)?;

        // WAL for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS analysis_cache (
                cache_key BLOB PRIMARY KEY,
                analysis_json TEXT NOT NULL,
                model TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_analysis_created
                ON analysis_cache(created_at);",
        )?;

        info!(path = %db_path.display(), "analysis cache opened");

        Ok(Self {
            conn: Mutex::new(conn),
            ttl_secs: ttl.as_secs() as i64,
        })
    }

    /// Returns None if absent, expired or undecodable.
    pub fn get(&self, key: &CacheKey) -> Option<DocumentAnalysis> {
        let conn = self.conn.lock();
        let cutoff = now_unix() - self.ttl_secs;

        let json: Option<String> = match conn
            .query_row(
                "SELECT analysis_json FROM analysis_cache
                 WHERE cache_key = ?1 AND created_at > ?2",
                params![key.as_slice(), cutoff],
                |row| row.get(0),
            )
            .optional()
        {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "analysis cache read failed");
                None
            }
        };

        let analysis = serde_json::from_str(&json?)
            .map_err(|e| warn!(error = %e, "stored analysis is not valid JSON"))
            .ok()?;
        debug!("L2 cache hit");
        Some(analysis)
    }

    pub fn insert(&self, key: &CacheKey, analysis: &DocumentAnalysis, model: &str) {
        let json = match serde_json::to_string(analysis) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "analysis could not be serialized");
                return;
            }
        };
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            "INSERT OR REPLACE INTO analysis_cache
             (cache_key, analysis_json, model, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key.as_slice(), json, model, now_unix()],
        ) {
            warn!(error = %e, "analysis cache insert failed");
        }
    }

    /// Remove expired entries, returning how many were deleted.
    pub fn cleanup_expired(&self) -> usize {
        let conn = self.conn.lock();
        let cutoff = now_unix() - self.ttl_secs;
        match conn.execute(
            "DELETE FROM analysis_cache WHERE created_at <= ?1",
            params![cutoff],
        ) {
            Ok(count) => {
                if count > 0 {
                    info!(removed = count, "analysis cache cleanup");
                }
                count
            }
            Err(e) => {
                warn!(error = %e, "analysis cache cleanup failed");
                0
            }
        }
    }

    /// Run `cleanup_expired` every `period` on the tokio runtime.
    pub fn spawn_cleanup(cache: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let cache = Arc::clone(&cache);
                let _ = tokio::task::spawn_blocking(move || cache.cleanup_expired()).await;
            }
        })
    }
}

/// Current time as Unix timestamp (seconds).
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cache_key;

    fn sample() -> DocumentAnalysis {
        DocumentAnalysis {
            summary: vec!["A twelve-month residential lease.".into()],
            red_flags: vec!["Deposit is non-refundable.".into()],
        }
    }

    #[test]
    fn round_trips_an_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db")).unwrap();
        let key = cache_key(&["model".as_bytes(), "doc".as_bytes()]);

        assert!(cache.get(&key).is_none());
        cache.insert(&key, &sample(), "openai/gpt-4o-mini");
        assert_eq!(cache.get(&key), Some(sample()));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let key = cache_key(&["doc".as_bytes()]);
        {
            let cache = SqliteCache::open(&path).unwrap();
            cache.insert(&key, &sample(), "m");
        }
        let reopened = SqliteCache::open(&path).unwrap();
        assert_eq!(reopened.get(&key), Some(sample()));
    }

    #[test]
    fn zero_ttl_expires_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SqliteCache::open_with_ttl(&dir.path().join("c.db"), Duration::ZERO).unwrap();
        let key = cache_key(&["doc".as_bytes()]);
        cache.insert(&key, &sample(), "m");
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.cleanup_expired(), 0);
    }

    #[test]
    fn corrupt_rows_read_as_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SqliteCache::open(&dir.path().join("c.db")).unwrap();
        let key = cache_key(&["doc".as_bytes()]);
        cache
            .conn
            .lock()
            .execute(
                "INSERT INTO analysis_cache VALUES (?1, 'not json', 'm', ?2)",
                params![key.as_slice(), now_unix()],
            )
            .unwrap();
        assert!(cache.get(&key).is_none());
    }
}
