//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new backend list and pause flags pushed to the registry
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only cluster membership is hot-reloaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, BackendConfig, CacheConfig, ContinuationConfig, GatewayConfig, ListenerConfig,
    MonitorConfig, ObservabilityConfig, RetryConfig, RetryMode, RetryableError,
    RoutingConfig, RoutingGroupConfig, StatsDialect, TimeoutConfig,
};
