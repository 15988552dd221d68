//! Query id extraction.
//!
//! Statement and query paths follow this grammar:
//!
//! ```text
//! /v1/statement[/<marker>]*/<query-id>[/...]
//! /v1/query[/<marker>]*/<query-id>[/...]
//! marker := queued | scheduled | executing | partialCancel
//! ```
//!
//! UI paths carry the query id as their raw query string. A kill-query
//! statement in the body names the id as a quoted `query_id` argument.

pub const STATEMENT_PATH: &str = "/v1/statement";
pub const QUERY_PATH: &str = "/v1/query";
pub const INFO_PATH: &str = "/v1/info";
pub const UI_PATH: &str = "/ui";
pub const UI_STATS_PATH: &str = "/ui/api/stats";

/// Paths that reach a query engine cluster.
pub const WHITELIST: [&str; 5] = [STATEMENT_PATH, QUERY_PATH, UI_PATH, INFO_PATH, UI_STATS_PATH];

const STATE_MARKERS: [&str; 4] = ["queued", "scheduled", "executing", "partialCancel"];

const KILL_QUERY_PROCEDURE: &str = "system.runtime.kill_query";

/// Segments following `prefix` when `path` is `prefix` or `prefix/...`.
fn segments_after<'a>(path: &'a str, prefix: &str) -> Option<impl Iterator<Item = &'a str>> {
    let rest = path.strip_prefix(prefix)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }
    Some(rest.split('/').filter(|s| !s.is_empty()))
}

/// Query id named by a statement or query path.
pub fn query_id_from_path(path: &str) -> Option<String> {
    let segments = segments_after(path, STATEMENT_PATH).or_else(|| segments_after(path, QUERY_PATH))?;
    segments
        .skip_while(|s| STATE_MARKERS.contains(s))
        .next()
        .map(str::to_string)
}

/// True when `path` is a statement path (submit or continuation).
pub fn is_statement_path(path: &str) -> bool {
    segments_after(path, STATEMENT_PATH).is_some()
}

/// Query id of a kill-query statement, if `body` is one.
pub fn query_id_from_kill_statement(body: &str) -> Option<String> {
    if !body.to_ascii_lowercase().contains(KILL_QUERY_PROCEDURE) {
        return None;
    }
    body.split(',')
        .filter(|part| part.to_ascii_lowercase().contains("query_id"))
        .find_map(first_quoted_token)
}

/// First `'token'` whose contents are non-empty and free of whitespace.
fn first_quoted_token(text: &str) -> Option<String> {
    let quotes: Vec<usize> = text.match_indices('\'').map(|(i, _)| i).collect();
    quotes.windows(2).find_map(|pair| {
        let inner = &text[pair[0] + 1..pair[1]];
        (!inner.is_empty() && !inner.chars().any(char::is_whitespace)).then(|| inner.to_string())
    })
}

/// Query id carried by a request, kill-query body first.
pub fn extract_query_id(path: &str, query: Option<&str>, body: &str) -> Option<String> {
    if let Some(id) = query_id_from_kill_statement(body) {
        return Some(id);
    }
    if path.starts_with(STATEMENT_PATH) || path.starts_with(QUERY_PATH) {
        return query_id_from_path(path);
    }
    if path.starts_with(UI_PATH) {
        return query.filter(|q| !q.is_empty()).map(str::to_string);
    }
    None
}
