//! Resilience helpers for outbound calls.
//!
//! # Data Flow
//! ```text
//! Call to a backend:
//!     → timeouts.rs (every call has a deadline)
//!     → on a retryable failure: backoff.rs delays the resubmission
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retry decisions live with the continuation poller; this module only times them

pub mod backoff;
pub mod timeouts;
