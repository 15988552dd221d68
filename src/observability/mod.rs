//! Observability.
//!
//! # Data Flow
//! ```text
//! All subsystems emit tracing events with structured fields
//!     → logging.rs (env filter, text or JSON formatter)
//!     → stdout
//! HTTP requests additionally pass through tower-http's TraceLayer,
//! tagged with the request id.
//! ```

pub mod logging;
