//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! ClusterMonitor tick
//!     → RoutingUpdate {group states, group → backend → queue length}
//!     → table.rs rebuild (one lock, wholesale swap)
//!     → weights.rs computes a cumulative table per group
//!
//! New query
//!     → provide_backend_for_group(group, last backend)
//!     → weighted draw over the group's table
//!     → adhoc group when the group is unusable
//! ```
//!
//! # Design Decisions
//! - Readers load an ArcSwap snapshot and never wait on a rebuild
//! - Backends without a sample this cycle are not weighted at all
//! - A rebuild replaces the table instead of patching it

pub mod table;
pub mod weights;

use thiserror::Error;

pub use table::{RoutingUpdate, TableSnapshot, WeightedRoutingTable};
pub use weights::{compute_weights, WeightTable, MAX_WEIGHT, MIN_WEIGHT};

/// Reasons no backend can be chosen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("Number of active backends found zero")]
    NoActiveBackends,

    #[error("All backends of routing group '{0}' are unavailable")]
    GroupUnavailable(String),

    #[error("Backend '{0}' has no known URL")]
    UnknownBackend(String),
}
