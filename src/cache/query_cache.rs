//! Typed view of the cache used by the proxy and the continuation poller.
//!
//! Every method is best effort: a store failure is logged at `warn` and the
//! caller sees `None`/`false`, never an error.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::{field, CacheError, CacheKey, CacheStore};

/// Headers and body of a request or response kept in the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMessage {
    /// HTTP status for responses; requests leave this empty.
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CachedMessage {
    pub fn response(status: u16, headers: Vec<(String, String)>, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            headers,
            body: body.into(),
        }
    }

    pub fn request(headers: Vec<(String, String)>, body: impl Into<String>) -> Self {
        Self {
            status: None,
            headers,
            body: body.into(),
        }
    }
}

/// Where the next continuation step of a query should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStep {
    pub next_uri: String,
    pub host: String,
    pub backend_url: String,
}

/// Best-effort facade over a [`CacheStore`].
#[derive(Clone)]
pub struct QueryCache {
    store: Arc<dyn CacheStore>,
}

impl QueryCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    fn best_effort<T>(&self, op: &'static str, key: &str, result: Result<T, CacheError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(op, key, error = %e, "Cache operation failed");
                None
            }
        }
    }

    fn write_message(&self, key: &str, message: &CachedMessage) {
        let headers = match serde_json::to_string(&message.headers) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to encode cached headers");
                return;
            }
        };
        if let Some(status) = message.status {
            let r = self.store.set_in_hash(key, field::STATUS, &status.to_string());
            self.best_effort("set_in_hash", key, r);
        }
        let r = self.store.set_in_hash(key, field::HEADER, &headers);
        self.best_effort("set_in_hash", key, r);
        let r = self.store.set_in_hash(key, field::BODY, &message.body);
        self.best_effort("set_in_hash", key, r);
    }

    fn read_message(&self, key: &str) -> Option<CachedMessage> {
        let r = self.store.get_hash(key);
        let hash = self.best_effort("get_hash", key, r)?;
        let body = hash.get(field::BODY)?.clone();
        let headers = hash
            .get(field::HEADER)
            .and_then(|h| serde_json::from_str(h).ok())
            .unwrap_or_default();
        let status = hash.get(field::STATUS).and_then(|s| s.parse().ok());
        Some(CachedMessage { status, headers, body })
    }

    fn meta(&self, query_id: &str, name: &str) -> Option<String> {
        let key = CacheKey::metadata(query_id);
        let r = self.store.get_from_hash(&key, name);
        self.best_effort("get_from_hash", &key, r).flatten()
    }

    fn set_meta(&self, query_id: &str, name: &str, value: &str) {
        let key = CacheKey::metadata(query_id);
        let r = self.store.set_in_hash(&key, name, value);
        self.best_effort("set_in_hash", &key, r);
    }

    /// Store the request that created a query and the engine's first answer.
    pub fn cache_initial(&self, query_id: &str, request: &CachedMessage, response: &CachedMessage) {
        self.write_message(&CacheKey::initial_request(query_id), request);
        self.write_message(&CacheKey::initial_response(query_id), response);
    }

    pub fn initial_request(&self, query_id: &str) -> Option<CachedMessage> {
        self.read_message(&CacheKey::initial_request(query_id))
    }

    pub fn initial_response(&self, query_id: &str) -> Option<CachedMessage> {
        self.read_message(&CacheKey::initial_response(query_id))
    }

    /// Store one continuation step, by its path and as the query's latest answer.
    pub fn cache_step_response(&self, query_id: &str, path: &str, response: &CachedMessage) {
        self.write_message(&CacheKey::step_response(path), response);
        self.write_message(&CacheKey::last_response(query_id), response);
    }

    pub fn step_response(&self, path: &str) -> Option<CachedMessage> {
        self.read_message(&CacheKey::step_response(path))
    }

    pub fn last_response(&self, query_id: &str) -> Option<CachedMessage> {
        self.read_message(&CacheKey::last_response(query_id))
    }

    /// Set the completion flag. Returns true only for the call that set it.
    pub fn mark_completed(&self, query_id: &str) -> bool {
        if self.is_completed(query_id) {
            return false;
        }
        self.set_meta(query_id, field::COMPLETED, "true");
        true
    }

    pub fn is_completed(&self, query_id: &str) -> bool {
        self.meta(query_id, field::COMPLETED).as_deref() == Some("true")
    }

    pub fn set_state(&self, query_id: &str, state: &str) {
        self.set_meta(query_id, field::STATE, state);
    }

    pub fn state(&self, query_id: &str) -> Option<String> {
        self.meta(query_id, field::STATE)
    }

    /// Link a query to the transaction (original query id) it belongs to.
    pub fn link_transaction(&self, query_id: &str, transaction_id: &str) {
        self.set_meta(query_id, field::TRANSACTION_ID, transaction_id);
    }

    /// The transaction a query belongs to; a query with no link is its own.
    pub fn transaction_id(&self, query_id: &str) -> String {
        self.meta(query_id, field::TRANSACTION_ID)
            .unwrap_or_else(|| query_id.to_string())
    }

    /// Retries spent by a transaction.
    pub fn retries(&self, transaction_id: &str) -> u32 {
        self.meta(transaction_id, field::RETRIES)
            .and_then(|r| r.parse().ok())
            .unwrap_or(0)
    }

    /// Atomically count one more retry for a transaction.
    pub fn increment_retries(&self, transaction_id: &str) -> Option<i64> {
        let key = CacheKey::metadata(transaction_id);
        let r = self.store.increment_in_hash(&key, field::RETRIES, 1);
        self.best_effort("increment_in_hash", &key, r)
    }

    /// Record which backend owns a query.
    pub fn bind(&self, query_id: &str, backend_url: &str, created_at: u64) {
        self.set_meta(query_id, field::BACKEND, backend_url);
        self.set_meta(query_id, field::BOUND_AT, &created_at.to_string());
    }

    /// Backend URL and bind time (seconds since the epoch) of a query.
    pub fn binding(&self, query_id: &str) -> Option<(String, u64)> {
        let backend = self.meta(query_id, field::BACKEND)?;
        let created_at = self
            .meta(query_id, field::BOUND_AT)
            .and_then(|t| t.parse().ok())
            .unwrap_or_else(now_secs);
        Some((backend, created_at))
    }

    /// Remember the next step so a restarted gateway can pick it up.
    pub fn record_pending(&self, query_id: &str, step: &PendingStep) {
        self.set_meta(query_id, field::NEXT_URI, &step.next_uri);
        self.set_meta(query_id, field::HOST, &step.host);
        self.set_meta(query_id, field::BACKEND, &step.backend_url);
    }

    pub fn pending(&self, query_id: &str) -> Option<PendingStep> {
        let key = CacheKey::metadata(query_id);
        let r = self.store.get_hash(&key);
        let meta = self.best_effort("get_hash", &key, r)?;
        Some(PendingStep {
            next_uri: meta.get(field::NEXT_URI)?.clone(),
            host: meta.get(field::HOST).cloned().unwrap_or_default(),
            backend_url: meta.get(field::BACKEND)?.clone(),
        })
    }

    pub fn push_dropped(&self, query_id: &str) {
        let key = CacheKey::dropped();
        let r = self.store.add_to_list(&key, query_id);
        if self.best_effort("add_to_list", &key, r).is_some() {
            tracing::info!(query_id, "Query continuation parked in dropped list");
        }
    }

    pub fn pop_dropped(&self) -> Option<String> {
        let key = CacheKey::dropped();
        let r = self.store.get_from_list(&key);
        self.best_effort("get_from_list", &key, r).flatten()
    }

    /// What a client polling `path` for `query_id` should see from the cache.
    ///
    /// The exact step if it was cached; else the latest step once the query
    /// completed; else the first answer of the query's transaction.
    pub fn cached_response_for(&self, path: &str, query_id: &str) -> Option<CachedMessage> {
        if let Some(step) = self.step_response(path) {
            return Some(step);
        }
        if self.is_completed(query_id) {
            if let Some(last) = self.last_response(query_id) {
                return Some(last);
            }
        }
        let transaction_id = self.transaction_id(query_id);
        self.initial_response(&transaction_id)
            .or_else(|| self.initial_response(query_id))
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use std::collections::HashMap;
    use std::time::Duration;

    fn cache() -> QueryCache {
        QueryCache::new(Arc::new(MemoryStore::new(Duration::from_secs(600))))
    }

    /// A store whose every operation fails.
    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn set(&self, _: &str, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn get_from_hash(&self, _: &str, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn get_hash(&self, _: &str) -> Result<HashMap<String, String>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn set_in_hash(&self, _: &str, _: &str, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn increment_in_hash(&self, _: &str, _: &str, _: i64) -> Result<i64, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn add_to_list(&self, _: &str, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn get_from_list(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn delete_keys(&self, _: &[&str]) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn validate_connection(&self) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    #[test]
    fn test_initial_round_trip() {
        let cache = cache();
        let request = CachedMessage::request(vec![("X-Trino-User".into(), "alice".into())], "SELECT 1");
        let response = CachedMessage::response(200, vec![], r#"{"id":"q1"}"#);
        cache.cache_initial("q1", &request, &response);

        assert_eq!(cache.initial_request("q1"), Some(request));
        assert_eq!(cache.initial_response("q1"), Some(response));
    }

    #[test]
    fn test_mark_completed_once() {
        let cache = cache();
        assert!(!cache.is_completed("q1"));
        assert!(cache.mark_completed("q1"));
        assert!(!cache.mark_completed("q1"));
        assert!(cache.is_completed("q1"));
    }

    #[test]
    fn test_transaction_and_retries() {
        let cache = cache();
        assert_eq!(cache.transaction_id("q2"), "q2");
        cache.link_transaction("q2", "q1");
        assert_eq!(cache.transaction_id("q2"), "q1");

        assert_eq!(cache.retries("q1"), 0);
        cache.increment_retries("q1");
        cache.increment_retries("q1");
        assert_eq!(cache.retries("q1"), 2);
    }

    #[test]
    fn test_dropped_queue_order() {
        let cache = cache();
        cache.push_dropped("a");
        cache.push_dropped("b");
        assert_eq!(cache.pop_dropped().as_deref(), Some("a"));
        assert_eq!(cache.pop_dropped().as_deref(), Some("b"));
        assert_eq!(cache.pop_dropped(), None);
    }

    #[test]
    fn test_cached_response_precedence() {
        let cache = cache();
        let first = CachedMessage::response(200, vec![], "first");
        cache.cache_initial("q1", &CachedMessage::default(), &first);
        cache.link_transaction("q2", "q1");

        // Nothing for q2 yet: fall back to the transaction's first answer.
        assert_eq!(cache.cached_response_for("/v1/statement/q2/1", "q2"), Some(first));

        let step = CachedMessage::response(200, vec![], "step1");
        cache.cache_step_response("q2", "/v1/statement/q2/1", &step);
        assert_eq!(cache.cached_response_for("/v1/statement/q2/1", "q2"), Some(step.clone()));

        cache.mark_completed("q2");
        assert_eq!(cache.cached_response_for("/v1/statement/q2/9", "q2"), Some(step));
    }

    #[test]
    fn test_failures_are_swallowed() {
        let cache = QueryCache::new(Arc::new(BrokenStore));
        cache.cache_initial("q1", &CachedMessage::default(), &CachedMessage::default());
        cache.push_dropped("q1");
        cache.bind("q1", "http://b1", 0);

        assert_eq!(cache.binding("q1"), None);
        assert_eq!(cache.increment_retries("q1"), None);
        assert!(!cache.is_completed("q1"));
        assert_eq!(cache.pop_dropped(), None);
    }
}
