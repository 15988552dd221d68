//! Path whitelist matching.
//!
//! # Responsibilities
//! - Decide whether a request path belongs to the query engine protocol
//! - Prefix matching, case-sensitive, no regex
//!
//! # Design Decisions
//! - Any matching prefix wins (OR semantics)
//! - Empty whitelist matches nothing

/// Stateless check over a request path.
pub trait PathMatcher: Send + Sync + std::fmt::Debug {
    fn matches(&self, path: &str) -> bool;
}

/// Matches a path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl PathMatcher for PathPrefixMatcher {
    fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// Combines matchers with OR semantics.
#[derive(Debug, Default)]
pub struct AnyMatcher {
    matchers: Vec<Box<dyn PathMatcher>>,
}

impl AnyMatcher {
    pub fn new(matchers: Vec<Box<dyn PathMatcher>>) -> Self {
        Self { matchers }
    }

    /// One prefix matcher per entry.
    pub fn prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            prefixes
                .into_iter()
                .map(|p| Box::new(PathPrefixMatcher::new(p)) as Box<dyn PathMatcher>)
                .collect(),
        )
    }
}

impl PathMatcher for AnyMatcher {
    fn matches(&self, path: &str) -> bool {
        self.matchers.iter().any(|m| m.matches(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_prefix_matcher() {
        let matcher = PathPrefixMatcher::new("/v1/statement");
        assert!(matcher.matches("/v1/statement"));
        assert!(matcher.matches("/v1/statement/executing/q1/x/1"));
        assert!(!matcher.matches("/v1/Statement"));
        assert!(!matcher.matches("/v2/statement"));
    }

    #[test]
    fn test_any_matcher() {
        let matcher = AnyMatcher::prefixes(["/v1/query", "/ui"]);
        assert!(matcher.matches("/ui/query.html"));
        assert!(matcher.matches("/v1/query/q1"));
        assert!(!matcher.matches("/admin"));
        assert!(!AnyMatcher::default().matches("/ui"));
    }
}
