//! Cluster health monitoring.
//!
//! # Data Flow
//! ```text
//! Periodic timer (monitor.rs)
//!     → registry: active backends, group pause states
//!     → fetch stats concurrently (bounded)
//!     → stats.rs: parse, unhealthy on any failure
//!     → routing table rebuild (queue = queued queries)
//!     → observers
//! ```
//!
//! # Design Decisions
//! - One failing backend never aborts a cycle
//! - Cycles never overlap
//! - Unhealthy backends drop out of the sample set until they answer again

pub mod monitor;
pub mod stats;

pub use monitor::ClusterMonitor;
pub use stats::{ClusterStats, ClusterStatsObserver, StatsSnapshot};
