//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! proxy response hook / continuation poller
//!     → QueryCache (typed, best-effort facade)
//!     → CacheKey builds "{namespace}/{id}:{field}"
//!     → CacheStore (MemoryStore, or any KV server behind the trait)
//!
//! Restart:
//!     MemoryStore::load_from_file() → dropped list + bindings survive
//! ```
//!
//! # Design Decisions
//! - Every write refreshes the entry TTL
//! - Hot-path failures are logged and swallowed by QueryCache
//! - One key scheme for every namespace

pub mod memory;
pub mod query_cache;

use std::collections::HashMap;
use thiserror::Error;

pub use memory::MemoryStore;
pub use query_cache::{CachedMessage, PendingStep, QueryCache};

/// Errors surfaced by a cache backing store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("key '{0}' holds a value of a different type")]
    WrongType(String),

    #[error("field '{field}' of '{key}' is not an integer")]
    NotAnInteger { key: String, field: String },

    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key-value contract the core depends on.
///
/// Keys are ASCII strings. Implementations apply their TTL on every write.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    fn get_from_hash(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;

    /// Every field of a hash; empty when the key is absent.
    fn get_hash(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    fn set_in_hash(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;

    /// Atomically add `by` to an integer hash field, returning the new value.
    fn increment_in_hash(&self, key: &str, field: &str, by: i64) -> Result<i64, CacheError>;

    /// Push to the head of a list.
    fn add_to_list(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Pop from the tail of a list, so the list behaves as a FIFO queue.
    fn get_from_list(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Remove keys, returning how many existed.
    fn delete_keys(&self, keys: &[&str]) -> Result<usize, CacheError>;

    /// Cheap round trip used at startup.
    fn validate_connection(&self) -> Result<(), CacheError>;
}

/// Key namespaces.
pub mod namespace {
    pub const ACTIVE_QUERIES: &str = "active-queries";
    pub const QUERY_CACHE: &str = "query-cache";
}

/// Builds cache keys as `{namespace}/{id}:{field}`.
pub struct CacheKey;

impl CacheKey {
    pub fn build(namespace: &str, id: &str, field: &str) -> String {
        format!("{namespace}/{id}:{field}")
    }

    /// Metadata hash of a query (transaction, retries, state, binding).
    pub fn metadata(query_id: &str) -> String {
        Self::build(namespace::ACTIVE_QUERIES, query_id, "metadata")
    }

    /// Queue of query ids whose continuation was interrupted.
    pub fn dropped() -> String {
        Self::build(namespace::ACTIVE_QUERIES, "dropped", "list")
    }

    pub fn initial_request(query_id: &str) -> String {
        Self::build(namespace::QUERY_CACHE, query_id, "initial-request")
    }

    pub fn initial_response(query_id: &str) -> String {
        Self::build(namespace::QUERY_CACHE, query_id, "initial-response")
    }

    pub fn last_response(query_id: &str) -> String {
        Self::build(namespace::QUERY_CACHE, query_id, "last-response")
    }

    /// Response of one continuation step, keyed by its path and query.
    pub fn step_response(path: &str) -> String {
        Self::build(namespace::QUERY_CACHE, path, "response")
    }
}

/// Metadata hash field names.
pub mod field {
    pub const COMPLETED: &str = "completed";
    pub const TRANSACTION_ID: &str = "transaction-id";
    pub const RETRIES: &str = "retries";
    pub const STATE: &str = "state";
    pub const BACKEND: &str = "backend";
    pub const BOUND_AT: &str = "bound-at";
    pub const NEXT_URI: &str = "next-uri";
    pub const HOST: &str = "host";
    pub const STATUS: &str = "status";
    pub const HEADER: &str = "header";
    pub const BODY: &str = "body";
}
