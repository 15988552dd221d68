//! Protocol header names.

use axum::http::HeaderMap;

pub const USER_HEADER: &str = "X-Trino-User";
pub const ALTERNATE_USER_HEADER: &str = "X-Presto-User";
pub const SOURCE_HEADER: &str = "X-Trino-Source";
pub const ALTERNATE_SOURCE_HEADER: &str = "X-Presto-Source";
pub const ROUTING_GROUP_HEADER: &str = "X-Trino-Routing-Group";
pub const ALTERNATE_ROUTING_GROUP_HEADER: &str = "X-Presto-Routing-Group";
pub const CLIENT_TAGS_HEADER: &str = "X-Trino-Client-Tags";
pub const ALTERNATE_CLIENT_TAGS_HEADER: &str = "X-Presto-Client-Tags";

/// Backend URL a resubmitted query must avoid.
pub const EXCLUDE_BACKEND_HEADER: &str = "X-Gateway-Exclude-Backend";

/// Original query id of a resubmitted query.
pub const TRANSACTION_ID_HEADER: &str = "X-Gateway-Transaction-Id";

/// Trimmed value of a header. Empty values count as absent.
pub fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Value of `primary`, else of `alternate`.
pub fn first_header(headers: &HeaderMap, primary: &str, alternate: &str) -> Option<String> {
    header(headers, primary).or_else(|| header(headers, alternate))
}

/// Routing group a request asks for: the routing-group header, else client tags.
pub fn requested_routing_group(headers: &HeaderMap) -> Option<String> {
    first_header(headers, ROUTING_GROUP_HEADER, ALTERNATE_ROUTING_GROUP_HEADER)
        .or_else(|| first_header(headers, CLIENT_TAGS_HEADER, ALTERNATE_CLIENT_TAGS_HEADER))
}

pub fn user(headers: &HeaderMap) -> Option<String> {
    first_header(headers, USER_HEADER, ALTERNATE_USER_HEADER)
}

pub fn source(headers: &HeaderMap) -> Option<String> {
    first_header(headers, SOURCE_HEADER, ALTERNATE_SOURCE_HEADER)
}

pub fn excluded_backend(headers: &HeaderMap) -> Option<String> {
    header(headers, EXCLUDE_BACKEND_HEADER)
}

pub fn transaction_id(headers: &HeaderMap) -> Option<String> {
    header(headers, TRANSACTION_ID_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_primary_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(ALTERNATE_ROUTING_GROUP_HEADER, HeaderValue::from_static("legacy"));
        assert_eq!(requested_routing_group(&headers).as_deref(), Some("legacy"));

        headers.insert(ROUTING_GROUP_HEADER, HeaderValue::from_static("etl"));
        assert_eq!(requested_routing_group(&headers).as_deref(), Some("etl"));
    }

    #[test]
    fn test_client_tags_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(ALTERNATE_CLIENT_TAGS_HEADER, HeaderValue::from_static("batch"));
        assert_eq!(requested_routing_group(&headers).as_deref(), Some("batch"));

        headers.insert(ROUTING_GROUP_HEADER, HeaderValue::from_static(""));
        assert_eq!(requested_routing_group(&headers).as_deref(), Some("batch"));
    }

    #[test]
    fn test_user_and_source() {
        let mut headers = HeaderMap::new();
        headers.insert(ALTERNATE_USER_HEADER, HeaderValue::from_static("bob"));
        headers.insert(SOURCE_HEADER, HeaderValue::from_static("cli"));
        assert_eq!(user(&headers).as_deref(), Some("bob"));
        assert_eq!(source(&headers).as_deref(), Some("cli"));
        assert_eq!(transaction_id(&headers), None);
    }
}
