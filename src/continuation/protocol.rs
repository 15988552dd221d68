//! Query engine response documents.

use serde::{Deserialize, Serialize};

/// Error name used for failed or timed out continuation requests.
pub const STEP_FAILED_ERROR: &str = "GATEWAY_STEP_FAILED";

/// The subset of a submit or poll response the gateway acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub next_uri: Option<String>,

    #[serde(default)]
    pub error: Option<QueryError>,
}

impl QueryResults {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Error node of a query response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryError {
    #[serde(default)]
    pub error_code: i64,

    #[serde(default)]
    pub error_name: String,

    #[serde(default)]
    pub error_type: String,

    #[serde(default)]
    pub message: Option<String>,
}

impl QueryError {
    /// Error recorded when a step could not reach its backend.
    pub fn step_failed(message: impl Into<String>) -> Self {
        Self {
            error_code: -1,
            error_name: STEP_FAILED_ERROR.to_string(),
            error_type: "EXTERNAL".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn is_step_failure(&self) -> bool {
        self.error_name == STEP_FAILED_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_poll_response() {
        let body = r#"{
            "id": "20240101_000000_00001_abcde",
            "infoUri": "http://trino:8080/ui/query.html?20240101_000000_00001_abcde",
            "nextUri": "http://trino:8080/v1/statement/executing/20240101_000000_00001_abcde/y/1",
            "stats": {"state": "RUNNING"}
        }"#;
        let results = QueryResults::parse(body).unwrap();
        assert_eq!(results.id.as_deref(), Some("20240101_000000_00001_abcde"));
        assert!(results.next_uri.unwrap().ends_with("/y/1"));
        assert!(results.error.is_none());
    }

    #[test]
    fn test_parse_error_response() {
        let body = r#"{
            "id": "q1",
            "error": {
                "message": "Query exceeded maximum queued queries",
                "errorCode": 131074,
                "errorName": "QUERY_QUEUE_FULL",
                "errorType": "INSUFFICIENT_RESOURCES"
            }
        }"#;
        let results = QueryResults::parse(body).unwrap();
        let error = results.error.unwrap();
        assert_eq!(error.error_code, 131074);
        assert_eq!(error.error_name, "QUERY_QUEUE_FULL");
        assert!(results.next_uri.is_none());
    }

    #[test]
    fn test_malformed_body() {
        assert!(QueryResults::parse("<html>502</html>").is_err());
    }
}
