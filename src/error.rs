//! Error types for the build core.
//!
//! `BuildError` is what a pipeline invocation can return to its caller.
//! Cache I/O failures exist as a variant so the disk layer can report them,
//! but `ContentCache` downgrades them to a warning plus a cache miss before
//! they ever reach a pipeline caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::{NodeKind, NodeState};

#[derive(Error, Debug)]
pub enum BuildError {
    /// A required option is missing or malformed. Fatal to the invocation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A preprocessor or postprocessor collaborator failed.
    #[error("failed to transform {path}: {message}")]
    Transform { path: PathBuf, message: String },

    /// The disk cache could not be read or written.
    #[error("cache I/O error at {path}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl BuildError {
    pub fn transform(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Transform {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Errors raised by build graph operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {url} already exists as {existing:?}, cannot create it as {requested:?}")]
    KindMismatch {
        url: String,
        existing: NodeKind,
        requested: NodeKind,
    },

    #[error("node {0} not found")]
    NotFound(String),

    #[error("node {url}: transition {from:?} -> {to:?} is not allowed")]
    InvalidTransition {
        url: String,
        from: NodeState,
        to: NodeState,
    },

    /// Cache or data was read before the node was first populated.
    #[error("node {0} has not been populated yet")]
    NotPopulated(String),

    #[error("node {url} is a {actual:?}, expected {expected:?}")]
    WrongKind {
        url: String,
        expected: NodeKind,
        actual: NodeKind,
    },

    #[error("{0} does not use a recognized url scheme")]
    UnrecognizedScheme(String),
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_error_display() {
        let err = BuildError::transform("src/app.scss", "undefined variable $primary");
        let msg = err.to_string();
        assert!(msg.contains("src/app.scss"));
        assert!(msg.contains("undefined variable"));
    }

    #[test]
    fn test_cache_io_error_display() {
        let err = BuildError::CacheIo {
            path: PathBuf::from("/tmp/ngpack/objects/ab"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("cache I/O error"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = GraphError::InvalidTransition {
            url: "ng://lib".to_string(),
            from: NodeState::Pending,
            to: NodeState::Clean,
        };
        let msg = err.to_string();
        assert!(msg.contains("Pending"));
        assert!(msg.contains("Clean"));
    }

    #[test]
    fn test_graph_error_converts() {
        let err: BuildError = GraphError::NotFound("file:///lib".to_string()).into();
        assert!(matches!(err, BuildError::Graph(GraphError::NotFound(_))));
    }
}
