//! HTTP server setup and the proxy handler.
//!
//! # Responsibilities
//! - Create the axum router with the catch-all proxy handler
//! - Wire up middleware (tracing, timeout, body limit, request id, concurrency)
//! - Forward requests to the target chosen by [`ProxyHooks`]
//! - Serve cached answers to reconnecting clients

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::hooks::{ProxiedExchange, ProxyHooks};
use super::request::{request_id, MakeGatewayRequestId};
use crate::cache::CachedMessage;
use crate::config::schema::GatewayConfig;
use crate::lifecycle::GatewayContext;
use crate::load_balancer::RoutingError;
use crate::resilience::timeouts::{with_timeout, TimeoutError};
use crate::routing::paths::{is_statement_path, query_id_from_path};
use crate::routing::RouteKind;

/// Prefix under which reconnecting clients read cached answers.
pub const CACHED_PREFIX: &str = "/cached";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub hooks: Arc<ProxyHooks>,
    pub client: Client<HttpConnector, Body>,
    pub max_body_bytes: usize,
    pub upstream_timeout: Duration,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(hooks: Arc<ProxyHooks>, config: &GatewayConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            hooks,
            client,
            max_body_bytes: config.listener.max_body_bytes,
            upstream_timeout: Duration::from_secs(config.timeouts.request_secs),
        };

        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        // Allow the upstream call its full timeout before the outer layer fires.
        let request_timeout = Duration::from_secs(config.timeouts.request_secs + config.timeouts.connect_secs);
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(TimeoutLayer::new(request_timeout))
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_concurrent_requests))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeGatewayRequestId))
    }

    /// The router, for serving on a custom listener or in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until the context is triggered.
    pub async fn run(self, listener: TcpListener, context: Arc<GatewayContext>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { context.cancelled().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let request_id = request_id(&parts.headers).to_string();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);

    if let Some(rest) = path.strip_prefix(CACHED_PREFIX) {
        return serve_cached(&state, rest, query.as_deref());
    }

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Failed to read request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    if !state.hooks.router().policy().authorize(&path, &parts.headers) {
        tracing::warn!(request_id = %request_id, path = %path, "Request not authorized");
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    let decision = match state
        .hooks
        .route_request(&path, query.as_deref(), &body, &parts.headers)
    {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!(request_id = %request_id, path = %path, error = %e, "No backend for request");
            let status = match e {
                RoutingError::NoActiveBackends | RoutingError::GroupUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                RoutingError::UnknownBackend(_) => StatusCode::BAD_GATEWAY,
            };
            return (status, e.to_string()).into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        path = %path,
        target = %decision.target,
        "Proxying request"
    );

    let uri = match upstream_uri(&decision.target, &parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, target = %decision.target, error = %e, "Invalid upstream URI");
            return (StatusCode::BAD_GATEWAY, "Invalid upstream").into_response();
        }
    };

    let mut upstream = Request::builder().method(parts.method.clone()).uri(uri);
    if let Some(headers) = upstream.headers_mut() {
        for (name, value) in parts.headers.iter() {
            if name != header::CONTENT_LENGTH && name != header::TRANSFER_ENCODING {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    let upstream = match upstream.body(Body::from(body.clone())) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build upstream request");
            return (StatusCode::BAD_GATEWAY, "Invalid upstream request").into_response();
        }
    };

    let forwarded = with_timeout(state.upstream_timeout, async {
        let response = state.client.request(upstream).await.map_err(|e| e.to_string())?;
        let (head, body) = response.into_parts();
        let bytes = axum::body::to_bytes(Body::new(body), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        Ok::<_, String>((head, bytes))
    })
    .await;

    let (head, response_body) = match forwarded {
        Ok(Ok(answer)) => answer,
        Ok(Err(e)) => return upstream_failed(&state, &parts.method, &path, &request_id, &e),
        Err(TimeoutError(elapsed)) => {
            let reason = format!("timed out after {elapsed:?}");
            return upstream_failed(&state, &parts.method, &path, &request_id, &reason);
        }
    };

    if decision.kind != RouteKind::PassThrough {
        let exchange = ProxiedExchange {
            method: parts.method.clone(),
            path: path.clone(),
            query,
            request_headers: parts.headers.clone(),
            request_body: String::from_utf8_lossy(&body).into_owned(),
            status: head.status.as_u16(),
            response_headers: head.headers.clone(),
            response_body: String::from_utf8_lossy(&response_body).into_owned(),
            backend_url: decision.target.clone(),
        };
        state.hooks.on_response(&exchange);
    }

    tracing::debug!(
        request_id = %request_id,
        status = head.status.as_u16(),
        target = %decision.target,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request proxied"
    );

    let mut response = Response::from_parts(head, Body::from(response_body));
    response.headers_mut().remove(header::TRANSFER_ENCODING);
    response
}

/// Upstream URI: the target's scheme and authority with the request's path and query.
fn upstream_uri(target: &str, original: &Uri) -> Result<Uri, axum::http::Error> {
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = format!("{}{}", target.trim_end_matches('/'), path_and_query).parse()?;
    Ok(uri)
}

/// A failed forward of a statement poll falls back to the cache.
fn upstream_failed(state: &AppState, method: &Method, path: &str, request_id: &str, reason: &str) -> Response {
    tracing::warn!(request_id = %request_id, path = %path, error = %reason, "Upstream request failed");

    if *method == Method::GET && is_statement_path(path) {
        if let Some(query_id) = query_id_from_path(path) {
            if let Some(cached) = state.hooks.cached_response(path, &query_id) {
                tracing::info!(request_id = %request_id, query_id = %query_id, "Serving cached response");
                return cached_response(cached);
            }
        }
    }
    (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
}

fn serve_cached(state: &AppState, path: &str, query: Option<&str>) -> Response {
    let Some(query_id) = query_id_from_path(path) else {
        return (StatusCode::NOT_FOUND, "No query id in path").into_response();
    };
    let key = match query {
        Some(q) => format!("{path}?{q}"),
        None => path.to_string(),
    };
    match state.hooks.cached_response(&key, &query_id) {
        Some(cached) => cached_response(cached),
        None => (StatusCode::NOT_FOUND, "No cached response").into_response(),
    }
}

fn cached_response(cached: CachedMessage) -> Response {
    let status = cached
        .status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("x-gateway-cached", HeaderValue::from_static("true"));
    (status, headers, Bytes::from(cached.body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, QueryCache};
    use crate::load_balancer::WeightedRoutingTable;
    use crate::routing::{QueryAffinityRouter, RequestAuthorizer, RoutingPolicy};
    use tower::ServiceExt;

    #[test]
    fn test_upstream_uri_keeps_path_and_query() {
        let original: Uri = "/v1/statement/executing/q1/abc/2?x=1".parse().unwrap();
        let uri = upstream_uri("http://trino-1:8080/", &original).unwrap();
        assert_eq!(uri.to_string(), "http://trino-1:8080/v1/statement/executing/q1/abc/2?x=1");

        let root: Uri = "/".parse().unwrap();
        assert_eq!(upstream_uri("http://localhost:8090", &root).unwrap().to_string(), "http://localhost:8090/");
    }

    struct DenyAll;

    impl RequestAuthorizer for DenyAll {
        fn authorize(&self, _path: &str, _headers: &HeaderMap) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_unauthorized_request_is_forbidden() {
        let cache = QueryCache::new(Arc::new(MemoryStore::new(Duration::from_secs(600))));
        let router = Arc::new(QueryAffinityRouter::new(
            RoutingPolicy::default().with_authorizer(Arc::new(DenyAll)),
            Arc::new(WeightedRoutingTable::new("adhoc")),
            cache.clone(),
            8090,
        ));
        let hooks = Arc::new(ProxyHooks::new(router, cache, None));
        let server = HttpServer::new(hooks, &GatewayConfig::default());

        let request = Request::builder()
            .method("POST")
            .uri("/v1/statement")
            .body(Body::from("SELECT 1"))
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_cached_response_defaults() {
        let response = cached_response(CachedMessage::request(vec![], "{}"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-gateway-cached").unwrap(), "true");
    }
}
