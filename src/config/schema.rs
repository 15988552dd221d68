//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Routing behaviour shared by all requests.
    pub gateway: RoutingConfig,

    /// Query-engine clusters known to the gateway.
    pub backends: Vec<BackendConfig>,

    /// Routing group pause flags.
    pub routing_groups: Vec<RoutingGroupConfig>,

    /// Cluster health monitor settings.
    pub monitor: MonitorConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Server-side continuation polling.
    pub continuation: ContinuationConfig,

    /// Retry policy for cluster-reported query errors.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Read-only admin API.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body the gateway buffers, in bytes.
    pub max_body_bytes: usize,

    /// Requests proxied concurrently; further requests wait.
    pub max_concurrent_requests: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 4 * 1024 * 1024,
            max_concurrent_requests: 1024,
        }
    }
}

/// Routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Port of the local application that receives non-query traffic.
    pub local_application_port: u16,

    /// Routing group used when a request names none, or its group is unusable.
    pub adhoc_group: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            local_application_port: 8090,
            adhoc_group: "adhoc".to_string(),
        }
    }
}

/// Stats endpoint flavour of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatsDialect {
    /// Pick by inspecting the backend URL.
    #[default]
    Auto,
    /// `/ui/api/stats`.
    Trino,
    /// `/v1/cluster`.
    Presto,
}

/// Query-engine cluster configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub name: String,

    /// Base URL queries are forwarded to (e.g., "http://trino-1:8080").
    pub base_url: String,

    /// Routing group this cluster belongs to.
    #[serde(default = "default_routing_group")]
    pub routing_group: String,

    /// Inactive clusters receive no new queries.
    #[serde(default = "default_active")]
    pub active: bool,

    /// Which stats endpoint the cluster exposes.
    #[serde(default)]
    pub dialect: StatsDialect,
}

fn default_routing_group() -> String {
    "adhoc".to_string()
}

fn default_active() -> bool {
    true
}

/// Routing group pause flag.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingGroupConfig {
    pub name: String,

    #[serde(default)]
    pub paused: bool,
}

/// Health monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Enable the periodic stats poll.
    pub enabled: bool,

    /// Seconds between the end of one cycle and the start of the next.
    pub interval_secs: u64,

    /// Connect/read timeout for a single stats fetch, in seconds.
    pub timeout_secs: u64,

    /// Maximum concurrent stats fetches per cycle.
    pub concurrency: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            timeout_secs: 15,
            concurrency: 10,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live applied on every write, in seconds.
    pub ttl_secs: u64,

    /// Optional JSON snapshot file loaded at startup and written at shutdown.
    pub snapshot_path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            snapshot_path: None,
        }
    }
}

/// Continuation poller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContinuationConfig {
    /// Follow nextUri on behalf of clients.
    pub enabled: bool,

    /// Maximum in-flight continuation steps.
    pub workers: usize,

    /// Timeout for one poll GET or retry submission, in seconds.
    pub request_timeout_secs: u64,

    /// How long shutdown waits for in-flight steps, in seconds.
    pub grace_period_secs: u64,

    /// Endpoint retried queries are resubmitted to (normally this gateway).
    pub retry_endpoint: String,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 16,
            request_timeout_secs: 15,
            grace_period_secs: 10,
            retry_endpoint: "http://localhost:8080/v1/statement".to_string(),
        }
    }
}

/// How cluster-reported errors are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    /// Retry only errors in `retryable_errors`.
    #[default]
    Classified,
    /// Retry every error until the budget runs out.
    Always,
    /// Never resubmit.
    Never,
}

/// An error the engine reports that is worth resubmitting.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryableError {
    pub name: String,
    pub code: i64,
}

impl RetryableError {
    fn new(name: &str, code: i64) -> Self {
        Self {
            name: name.to_string(),
            code,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub mode: RetryMode,

    /// Maximum resubmissions per query chain.
    pub max_retries: u32,

    /// Treat timeouts and connection failures during polling as retryable.
    pub retry_transport_failures: bool,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Errors matched by name or code in `classified` mode.
    pub retryable_errors: Vec<RetryableError>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            mode: RetryMode::Classified,
            max_retries: 2,
            retry_transport_failures: true,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            retryable_errors: vec![
                RetryableError::new("SERVER_STARTING_UP", 65548),
                RetryableError::new("REMOTE_HOST_GONE", 65558),
                RetryableError::new("REMOTE_TASK_FAILED", 65563),
                RetryableError::new("QUERY_QUEUE_FULL", 131074),
                RetryableError::new("HIVE_METASTORE_ERROR", 0x0100_0000),
            ],
        }
    }
}

/// Timeout configuration for proxied requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
