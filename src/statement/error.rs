use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or validating a statement definition file.
/// Never fatal: the store keeps serving the previous definition.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed definition {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid definition {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("Invalid SQL template: {0}")]
    Template(String),

    #[error("Unknown root alias: {0}")]
    UnknownRoot(String),

    #[error("Not a statement file: {}", .0.display())]
    NotStatementFile(PathBuf),
}

impl ParseError {
    pub fn invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ParseError::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Lookup failures in the statement store and router
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Statement not found: {0}")]
    NotFound(String),

    #[error("Unknown root alias: {0}")]
    UnknownRoot(String),

    #[error("Invalid statement path: {0}")]
    InvalidPath(String),
}

/// Failures setting up filesystem notifications
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Root directory {alias} ({}) cannot be watched: {reason}", .path.display())]
    Root {
        alias: String,
        path: PathBuf,
        reason: String,
    },
}
