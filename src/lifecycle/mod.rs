//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → cache → registry → routing table → router
//!     → continuation poller → first monitor cycle → resume dropped queries
//!     → listeners
//!
//! Shutdown (GatewayHandle::shutdown):
//!     Context flag → listeners stop → monitor stops → poller drains
//!     → cache snapshot written
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: traffic is accepted only once routing has samples
//! - One context carries the shutdown flag to every component

pub mod context;
pub mod signals;
pub mod startup;

pub use context::GatewayContext;
pub use signals::wait_for_shutdown_signal;
pub use startup::{Gateway, GatewayHandle, StartupError};
