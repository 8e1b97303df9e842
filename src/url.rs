//! Node identity scheme.
//!
//! Every node id carries a scheme prefix naming its addressing domain:
//! `file://` for artifacts that live on disk and `ng://` for virtual
//! artifacts that only exist inside the pipeline (generated barrels and
//! the like). Paths are recovered by stripping the known prefix length,
//! never by generic URL parsing.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// A node that can be read through the filesystem.
pub const URL_PROTOCOL_FILE: &str = "file://";

/// A node that only exists inside the pipeline.
pub const URL_PROTOCOL_NG: &str = "ng://";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlScheme {
    File,
    Ng,
}

/// Prefixed node identifier. Equality and hashing always use the full
/// prefixed string, so `file:///a` and `ng:///a` never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeUrl(String);

impl NodeUrl {
    /// Parses a prefixed id, rejecting anything without a known scheme.
    pub fn parse(value: impl Into<String>) -> Result<Self, GraphError> {
        let value = value.into();
        if value.starts_with(URL_PROTOCOL_FILE) || value.starts_with(URL_PROTOCOL_NG) {
            Ok(Self(value))
        } else {
            Err(GraphError::UnrecognizedScheme(value))
        }
    }

    pub fn file(path: impl AsRef<str>) -> Self {
        Self(format!("{}{}", URL_PROTOCOL_FILE, path.as_ref()))
    }

    pub fn ng(path: impl AsRef<str>) -> Self {
        Self(format!("{}{}", URL_PROTOCOL_NG, path.as_ref()))
    }

    pub fn scheme(&self) -> UrlScheme {
        if self.is_file() {
            UrlScheme::File
        } else {
            UrlScheme::Ng
        }
    }

    pub fn is_file(&self) -> bool {
        self.0.starts_with(URL_PROTOCOL_FILE)
    }

    /// Path behind a `file://` id. Virtual ids have no on-disk path.
    pub fn file_path(&self) -> Result<PathBuf, GraphError> {
        self.0
            .strip_prefix(URL_PROTOCOL_FILE)
            .map(PathBuf::from)
            .ok_or_else(|| GraphError::UnrecognizedScheme(self.0.clone()))
    }

    /// Logical path with whichever prefix this id carries removed.
    pub fn path(&self) -> &str {
        self.0
            .strip_prefix(URL_PROTOCOL_FILE)
            .or_else(|| self.0.strip_prefix(URL_PROTOCOL_NG))
            .unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeUrl {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<NodeUrl> for String {
    fn from(url: NodeUrl) -> Self {
        url.0
    }
}

impl AsRef<str> for NodeUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url_round_trips_path() {
        let url = NodeUrl::file("/work/lib/src/public-api.ts");
        assert_eq!(url.as_str(), "file:///work/lib/src/public-api.ts");
        assert!(url.is_file());
        assert_eq!(
            url.file_path().unwrap(),
            PathBuf::from("/work/lib/src/public-api.ts")
        );
    }

    #[test]
    fn test_ng_url_has_no_file_path() {
        let url = NodeUrl::ng("@scope/lib/testing");
        assert_eq!(url.scheme(), UrlScheme::Ng);
        assert_eq!(url.path(), "@scope/lib/testing");
        assert_eq!(
            url.file_path(),
            Err(GraphError::UnrecognizedScheme("ng://@scope/lib/testing".to_string()))
        );
    }

    #[test]
    fn test_same_path_in_both_domains_differs() {
        assert_ne!(NodeUrl::file("/lib"), NodeUrl::ng("/lib"));
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        assert!(NodeUrl::parse("https://example.com").is_err());
        assert!(NodeUrl::parse("/plain/path").is_err());
        assert_eq!(
            NodeUrl::parse("ng://lib").unwrap(),
            NodeUrl::ng("lib")
        );
    }

    #[test]
    fn test_deserialize_checks_scheme() {
        let url: NodeUrl = serde_json::from_str("\"file:///work/lib/index.ts\"").unwrap();
        assert_eq!(url.path(), "/work/lib/index.ts");
        assert_eq!(serde_json::to_string(&url).unwrap(), "\"file:///work/lib/index.ts\"");

        assert!(serde_json::from_str::<NodeUrl>("\"abc\"").is_err());
        assert!(serde_json::from_str::<NodeUrl>("\"https://example.com\"").is_err());
    }
}
