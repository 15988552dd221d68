//! Read-only admin API.
//!
//! `/admin/status`, `/admin/backends` and `/admin/routing/{group}` on their
//! own bind address. Nothing here mutates gateway state.

pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::handlers::*;
use crate::health::StatsSnapshot;
use crate::lifecycle::GatewayContext;
use crate::load_balancer::WeightedRoutingTable;
use crate::registry::BackendRegistry;
use crate::routing::QueryAffinityRouter;

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<dyn BackendRegistry>,
    pub table: Arc<WeightedRoutingTable>,
    pub router: Arc<QueryAffinityRouter>,
    pub stats: Arc<StatsSnapshot>,
    pub context: Arc<GatewayContext>,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .route("/admin/routing/{group}", get(get_group_routing))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until the context is triggered.
pub async fn serve(listener: TcpListener, state: AdminState) -> Result<(), std::io::Error> {
    let context = state.context.clone();
    tracing::info!(address = %listener.local_addr()?, "Admin API starting");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { context.cancelled().await })
        .await
}
