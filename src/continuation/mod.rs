//! Server-side continuation of queries.
//!
//! # Data Flow
//! ```text
//! proxy response hook (submit answered with id + nextUri)
//!     → poller.rs submit_new → queue
//!     → worker: client.rs GET nextUri (rewritten to the bound backend)
//!     → cache step response, parse with protocol.rs
//!         - nextUri present  → enqueue next step
//!         - no nextUri       → Completed, completion flag set
//!         - error            → retry.rs decides
//!             retryable, budget left → resubmit, poll the new id
//!             otherwise              → FailedTerminal
//!
//! Shutdown:
//!     in-flight steps get a grace period, then everything left is parked in
//!     the cache's dropped list for the next process to resume
//! ```
//!
//! # Design Decisions
//! - Durability lives in the cache, never in the queue
//! - One in-flight step per query

pub mod client;
pub mod poller;
pub mod protocol;
pub mod retry;

pub use client::{ClientError, EngineResponse, HttpQueryEngineClient, QueryEngineClient};
pub use poller::{BackendResolver, ContinuationPoller, ContinuationRequest, QueryState, StepOutcome};
pub use protocol::{QueryError, QueryResults};
pub use retry::RetryPolicy;
