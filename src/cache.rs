use std::{path::Path, sync::Mutex, thread, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::utils;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed for {identity}: {source}")]
    Http {
        identity: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("non-success status {status} for {identity}")]
    Status { identity: String, status: u16 },
    #[error("http client setup failed: {0}")]
    Client(#[source] reqwest::Error),
    #[error("cache store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("cache store lock poisoned")]
    Poisoned,
    #[error("no cached response for {0} and network access is disabled")]
    Offline(String),
}

/// What to fetch. GET requests are identified by URL; POST requests by URL plus a body hash.
#[derive(Debug, Clone)]
pub enum Request {
    Get {
        url: String,
        headers: Vec<(String, String)>,
    },
    PostJson {
        url: String,
        body: Value,
        headers: Vec<(String, String)>,
    },
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Request::Get {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Request::PostJson {
            url: url.into(),
            body,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        match &mut self {
            Request::Get { headers, .. } | Request::PostJson { headers, .. } => {
                headers.push((name.to_string(), value.into()));
            }
        }
        self
    }

    pub fn url(&self) -> &str {
        match self {
            Request::Get { url, .. } | Request::PostJson { url, .. } => url,
        }
    }

    pub fn identity(&self) -> String {
        match self {
            Request::Get { url, .. } => url.clone(),
            Request::PostJson { url, body, .. } => {
                let mut hasher = Sha256::new();
                hasher.update(body.to_string().as_bytes());
                format!("{url}_POST_{:x}", hasher.finalize())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// The network side of the cache.
pub trait Transport: Send + Sync {
    fn send(&self, request: &Request) -> Result<RawResponse, FetchError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &Request) -> Result<RawResponse, FetchError> {
        let identity = request.identity();
        let (builder, headers) = match request {
            Request::Get { url, headers } => (self.client.get(url), headers),
            Request::PostJson { url, body, headers } => (self.client.post(url).json(body), headers),
        };
        let builder = headers
            .iter()
            .fold(builder, |b, (name, value)| b.header(name.as_str(), value.as_str()));

        let response = builder.send().map_err(|source| FetchError::Http {
            identity: identity.clone(),
            source,
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|source| FetchError::Http { identity, source })?;
        Ok(RawResponse { status, body })
    }
}

/// Refuses every request; used when replaying a warm cache.
pub struct OfflineTransport;

impl Transport for OfflineTransport {
    fn send(&self, request: &Request) -> Result<RawResponse, FetchError> {
        Err(FetchError::Offline(request.identity()))
    }
}

/// Persistent response cache keyed by request identity. Entries never expire.
pub struct HttpCache {
    conn: Mutex<Connection>,
    transport: Box<dyn Transport>,
    delay: Duration,
}

impl HttpCache {
    pub fn open(
        path: &Path,
        transport: Box<dyn Transport>,
        delay: Duration,
    ) -> Result<Self, FetchError> {
        utils::ensure_parent(path);
        Self::with_connection(Connection::open(path)?, transport, delay)
    }

    pub fn open_in_memory(transport: Box<dyn Transport>) -> Result<Self, FetchError> {
        Self::with_connection(Connection::open_in_memory()?, transport, Duration::ZERO)
    }

    fn with_connection(
        conn: Connection,
        transport: Box<dyn Transport>,
        delay: Duration,
    ) -> Result<Self, FetchError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache(
                identity TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            transport,
            delay,
        })
    }

    pub fn fetch(&self, request: &Request) -> Result<String, FetchError> {
        self.fetch_with(&request.identity(), || self.transport.send(request))
    }

    /// Returns the stored body for `identity`, or runs `retrieve`, throttles, checks the
    /// status and stores the body.
    pub fn fetch_with<F>(&self, identity: &str, retrieve: F) -> Result<String, FetchError>
    where
        F: FnOnce() -> Result<RawResponse, FetchError>,
    {
        if let Some(body) = self.get(identity)? {
            debug!(identity, "cache hit");
            return Ok(body);
        }

        debug!(identity, "cache miss");
        let response = retrieve()?;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if !(200..300).contains(&response.status) {
            return Err(FetchError::Status {
                identity: identity.to_string(),
                status: response.status,
            });
        }
        self.put(identity, &response.body)?;
        Ok(response.body)
    }

    pub fn get(&self, identity: &str) -> Result<Option<String>, FetchError> {
        let conn = self.conn.lock().map_err(|_| FetchError::Poisoned)?;
        let body = conn
            .query_row(
                "SELECT body FROM cache WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    pub fn put(&self, identity: &str, body: &str) -> Result<(), FetchError> {
        let conn = self.conn.lock().map_err(|_| FetchError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO cache (identity, body, fetched_at) VALUES (?1, ?2, ?3)",
            params![identity, body, Utc::now()],
        )?;
        Ok(())
    }

    pub fn fetched_at(&self, identity: &str) -> Result<Option<DateTime<Utc>>, FetchError> {
        let conn = self.conn.lock().map_err(|_| FetchError::Poisoned)?;
        let at = conn
            .query_row(
                "SELECT fetched_at FROM cache WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(at)
    }

    pub fn len(&self) -> Result<usize, FetchError> {
        let conn = self.conn.lock().map_err(|_| FetchError::Poisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, FetchError> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<usize, FetchError> {
        let conn = self.conn.lock().map_err(|_| FetchError::Poisoned)?;
        Ok(conn.execute("DELETE FROM cache", [])?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Answers every request with a body derived from its identity and counts calls.
    pub(crate) struct CountingTransport {
        pub calls: Arc<AtomicUsize>,
        pub status: u16,
    }

    impl Transport for CountingTransport {
        fn send(&self, request: &Request) -> Result<RawResponse, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RawResponse {
                status: self.status,
                body: format!("body #{n} for {}", request.identity()),
            })
        }
    }

    fn counting_cache(status: u16) -> (HttpCache, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport {
            calls: Arc::clone(&calls),
            status,
        };
        let cache = HttpCache::open_in_memory(Box::new(transport)).expect("in-memory cache");
        (cache, calls)
    }

    #[test]
    fn second_fetch_is_served_from_store() {
        let (cache, calls) = counting_cache(200);
        let request = Request::get("https://example.com/program");

        let first = cache.fetch(&request).expect("first fetch");
        let second = cache.fetch(&request).expect("second fetch");
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_follows_live_calls_only() {
        let dir = tempfile::tempdir().expect("temp dir");
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport {
            calls: Arc::clone(&calls),
            status: 200,
        };
        let delay = Duration::from_millis(200);
        let cache = HttpCache::open(&dir.path().join("cache.sqlite"), Box::new(transport), delay)
            .expect("open cache");
        let request = Request::get("https://example.com/slow");

        let started = std::time::Instant::now();
        cache.fetch(&request).expect("miss");
        assert!(started.elapsed() >= delay);

        let started = std::time::Instant::now();
        cache.fetch(&request).expect("hit");
        assert!(started.elapsed() < delay / 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn post_bodies_cache_independently() {
        let (cache, calls) = counting_cache(200);
        let monday = Request::post_json("https://example.com/graphql", json!({"day": "2025-11-05"}));
        let tuesday = Request::post_json("https://example.com/graphql", json!({"day": "2025-11-06"}));

        assert_ne!(monday.identity(), tuesday.identity());
        assert!(monday.identity().starts_with("https://example.com/graphql_POST_"));

        let a = cache.fetch(&monday).expect("monday");
        let b = cache.fetch(&tuesday).expect("tuesday");
        assert_ne!(a, b);
        cache.fetch(&monday).expect("monday again");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().expect("len"), 2);
    }

    #[test]
    fn headers_do_not_change_identity() {
        let plain = Request::get("https://example.com/a");
        let with_referer = Request::get("https://example.com/a").header("Referer", "https://x");
        assert_eq!(plain.identity(), with_referer.identity());
    }

    #[test]
    fn non_success_status_is_not_stored() {
        let (cache, calls) = counting_cache(503);
        let request = Request::get("https://example.com/down");

        let err = cache.fetch(&request).expect_err("503 should fail");
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        assert!(cache.get(&request.identity()).expect("lookup").is_none());
        cache.fetch(&request).expect_err("still failing");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn put_replaces_existing_entry() {
        let (cache, _) = counting_cache(200);
        cache.put("k", "old").expect("put");
        cache.put("k", "new").expect("replace");
        assert_eq!(cache.get("k").expect("get").as_deref(), Some("new"));
        assert_eq!(cache.len().expect("len"), 1);
        assert!(cache.fetched_at("k").expect("fetched_at").is_some());
    }

    #[test]
    fn offline_cache_serves_hits_and_refuses_misses() {
        let cache = HttpCache::open_in_memory(Box::new(OfflineTransport)).expect("cache");
        cache.put("https://example.com/warm", "warm body").expect("put");

        let hit = cache.fetch(&Request::get("https://example.com/warm")).expect("hit");
        assert_eq!(hit, "warm body");
        let miss = cache.fetch(&Request::get("https://example.com/cold"));
        assert!(matches!(miss, Err(FetchError::Offline(_))));
    }

    #[test]
    fn store_survives_reopen_and_clear_empties_it() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cache.sqlite");
        {
            let cache = HttpCache::open(&path, Box::new(OfflineTransport), Duration::ZERO)
                .expect("open");
            cache.put("https://example.com/", "persisted").expect("put");
        }
        let cache =
            HttpCache::open(&path, Box::new(OfflineTransport), Duration::ZERO).expect("reopen");
        assert_eq!(
            cache.get("https://example.com/").expect("get").as_deref(),
            Some("persisted")
        );
        assert_eq!(cache.clear().expect("clear"), 1);
        assert!(cache.is_empty().expect("is_empty"));
    }
}
