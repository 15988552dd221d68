//! High-availability gateway for distributed SQL query-engine clusters.

pub mod admin;
pub mod cache;
pub mod config;
pub mod continuation;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod routing;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::{Gateway, GatewayContext, GatewayHandle};
