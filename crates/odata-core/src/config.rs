//! Service configuration.
//!
//! Reads config from env vars:
//!   ODATA_SERVICE_ROOT_PATTERN: regex locating the service root in a URI (default: `/odata\.svc`)
//!   ODATA_CONTAINER           : entity container name (default: `Container`)
//!   ODATA_MAX_BATCH_PARTS     : max requests in one `$batch` body (default: 100)
//!   ODATA_MAX_EXPAND_DEPTH    : max nesting of `$expand` (default: 5)

use regex::{Regex, RegexBuilder};

pub const DEFAULT_SERVICE_ROOT_PATTERN: &str = r"/odata\.svc";
pub const DEFAULT_CONTAINER_NAME: &str = "Container";
pub const DEFAULT_MAX_BATCH_PARTS: usize = 100;
pub const DEFAULT_MAX_EXPAND_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub service_root_pattern: String,
    pub container_name: String,
    pub max_batch_parts: usize,
    pub max_expand_depth: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_root_pattern: DEFAULT_SERVICE_ROOT_PATTERN.to_string(),
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            max_batch_parts: DEFAULT_MAX_BATCH_PARTS,
            max_expand_depth: DEFAULT_MAX_EXPAND_DEPTH,
        }
    }
}

impl ServiceConfig {
    /// Build from environment variables; unparseable numbers fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_root_pattern: std::env::var("ODATA_SERVICE_ROOT_PATTERN")
                .unwrap_or(defaults.service_root_pattern),
            container_name: std::env::var("ODATA_CONTAINER").unwrap_or(defaults.container_name),
            max_batch_parts: std::env::var("ODATA_MAX_BATCH_PARTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_batch_parts),
            max_expand_depth: std::env::var("ODATA_MAX_EXPAND_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_expand_depth),
        }
    }

    pub fn service_root(&self) -> Result<ServiceRoot, regex::Error> {
        ServiceRoot::new(&self.service_root_pattern)
    }
}

/// Compiled service-root matcher.
///
/// The first case-insensitive match of the pattern marks the end of the
/// service root; it must be followed by `/`, `?` or the end of the URI.
#[derive(Debug, Clone)]
pub struct ServiceRoot {
    pattern: Regex,
}

impl ServiceRoot {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { pattern })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Split a URI into `(service_root, relative_part)`.
    ///
    /// The relative part has its leading `/` removed.
    pub fn split<'a>(&self, uri: &'a str) -> Option<(&'a str, &'a str)> {
        let m = self.pattern.find(uri)?;
        let rest = &uri[m.end()..];
        if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('?')) {
            return None;
        }
        Some((&uri[..m.end()], rest.strip_prefix('/').unwrap_or(rest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_matches_case_insensitively() {
        let root = ServiceRoot::new(DEFAULT_SERVICE_ROOT_PATTERN).unwrap();
        let (svc, rel) = root
            .split("http://localhost:8080/OData.svc/Customers('A1')")
            .unwrap();
        assert_eq!(svc, "http://localhost:8080/OData.svc");
        assert_eq!(rel, "Customers('A1')");
    }

    #[test]
    fn first_occurrence_wins() {
        let root = ServiceRoot::new(DEFAULT_SERVICE_ROOT_PATTERN).unwrap();
        let (svc, rel) = root.split("/odata.svc/Files('/odata.svc/x')").unwrap();
        assert_eq!(svc, "/odata.svc");
        assert_eq!(rel, "Files('/odata.svc/x')");
    }

    #[test]
    fn root_must_end_at_segment_boundary() {
        let root = ServiceRoot::new(DEFAULT_SERVICE_ROOT_PATTERN).unwrap();
        assert!(root.split("/odata.svcx/Customers").is_none());
        assert_eq!(root.split("/odata.svc?$format=json").unwrap().1, "?$format=json");
        assert_eq!(root.split("/odata.svc").unwrap().1, "");
    }

    #[test]
    fn missing_root_is_none() {
        let root = ServiceRoot::new(DEFAULT_SERVICE_ROOT_PATTERN).unwrap();
        assert!(root.split("/api/Customers").is_none());
    }

    #[test]
    fn defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.container_name, "Container");
        assert_eq!(config.max_batch_parts, 100);
        assert!(config.service_root().is_ok());
    }
}
