//! Routing policy: which requests are load balanced and how their query id
//! is found.

use std::fmt;
use std::sync::Arc;

use axum::http::HeaderMap;

use super::matcher::{AnyMatcher, PathMatcher};
use super::paths;

/// Decides whether a request may be proxied at all.
pub trait RequestAuthorizer: Send + Sync {
    fn authorize(&self, path: &str, headers: &HeaderMap) -> bool;
}

/// Lets every request through. Authentication happens in front of the gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl RequestAuthorizer for AllowAll {
    fn authorize(&self, _path: &str, _headers: &HeaderMap) -> bool {
        true
    }
}

/// Capabilities the proxy hooks are composed from.
pub struct RoutingPolicy {
    whitelist: AnyMatcher,
    authorizer: Arc<dyn RequestAuthorizer>,
}

impl fmt::Debug for RoutingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingPolicy")
            .field("whitelist", &self.whitelist)
            .finish_non_exhaustive()
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::new(AnyMatcher::prefixes(paths::WHITELIST))
    }
}

impl RoutingPolicy {
    pub fn new(whitelist: AnyMatcher) -> Self {
        Self {
            whitelist,
            authorizer: Arc::new(AllowAll),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn RequestAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Whether the path belongs to a query engine rather than the local app.
    pub fn is_whitelisted(&self, path: &str) -> bool {
        self.whitelist.matches(path)
    }

    pub fn extract_query_id(&self, path: &str, query: Option<&str>, body: &str) -> Option<String> {
        paths::extract_query_id(path, query, body)
    }

    pub fn authorize(&self, path: &str, headers: &HeaderMap) -> bool {
        self.authorizer.authorize(path, headers)
    }
}
