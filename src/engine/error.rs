use std::sync::Arc;
use thiserror::Error;

use crate::types::PayloadShape;

/// Failures while executing a statement.
///
/// Clone so a failed cache computation can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Payload shape mismatch for {path}: {reason}")]
    ShapeMismatch { path: String, reason: String },

    #[error("Missing parameter :{name} for {path}")]
    MissingParameter { path: String, name: String },

    #[error("Invalid control field `{field}`: {reason}")]
    InvalidControl { field: &'static str, reason: String },

    #[error("Execution failed for {path}: {source}")]
    Execution {
        path: String,
        #[source]
        source: Arc<sqlx::Error>,
    },

    #[error("Cycle detected in {path} at id {id}")]
    Cycle { path: String, id: String },

    #[error("Invalid tree data in {path}: {reason}")]
    Tree { path: String, reason: String },

    #[error("No key produced by {path}: {reason}")]
    KeyUnavailable { path: String, reason: String },

    #[error("Statement {path} exceeded the {timeout_ms}ms deadline")]
    Timeout { path: String, timeout_ms: u128 },

    #[error("Statement {path} is inconsistent: {reason}")]
    Internal { path: String, reason: String },
}

impl EngineError {
    pub fn execution(path: &str, source: sqlx::Error) -> Self {
        EngineError::Execution {
            path: path.to_string(),
            source: Arc::new(source),
        }
    }

    pub fn shape(path: &str, expected: PayloadShape, actual: PayloadShape) -> Self {
        EngineError::ShapeMismatch {
            path: path.to_string(),
            reason: format!("expected {} payload, got {}", expected, actual),
        }
    }

    /// True when the caller sent a request that can never succeed as-is
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::ShapeMismatch { .. } | EngineError::MissingParameter { .. } | EngineError::InvalidControl { .. }
        )
    }
}
