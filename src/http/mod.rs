//! HTTP proxy layer.
//!
//! # Data Flow
//! ```text
//! Client request
//!     → server.rs (axum, middleware, body buffered)
//!     → hooks.rs route_request (affinity router)
//!     → forward to backend or local application
//!     → hooks.rs on_response (bind, cache, start continuation)
//!     → response to client
//!
//! Forward failed for a statement poll:
//!     → cached answer if one exists, else 502
//! ```

pub mod hooks;
pub mod request;
pub mod server;

pub use hooks::{ProxiedExchange, ProxyHooks};
pub use request::{MakeGatewayRequestId, X_REQUEST_ID};
pub use server::HttpServer;
