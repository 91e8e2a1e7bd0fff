//! Error taxonomy for the ingestion, cache and query layers.
//!
//! Decode- and schema-level problems are absorbed inside a rebuild (they
//! only shrink the Index). Everything a caller can see is a [`LinearError`]
//! with a stable machine-readable [`kind`](LinearError::kind) and a
//! human-readable message, rendered as
//!
//! ```json
//! { "error": { "code": "not_found", "message": "issue not found: T-9" } }
//! ```

use serde::Serialize;
use std::time::Duration;

/// Convenience alias used across the crate's domain APIs.
pub type LinearResult<T> = std::result::Result<T, LinearError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinearError {
    /// The Raw Record Source could not be opened or read.
    #[error("snapshot source unavailable: {0}")]
    SourceUnavailable(String),

    /// A store could not be classified. Its entities are left out of the Index.
    #[error("schema inference failed for store '{store}': {reason}")]
    SchemaInferenceFailed { store: String, reason: String },

    /// Too few decodable records to infer a schema.
    #[error("insufficient sample in store '{store}': {decodable} decodable record(s), need {required}")]
    InsufficientSample {
        store: String,
        decodable: usize,
        required: usize,
    },

    /// A single record could not be decoded into an entity.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No usable Index exists, not even a stale one.
    #[error("no data available: {0}")]
    NoDataAvailable(String),

    #[error("snapshot source timed out after {0:?}")]
    Timeout(Duration),
}

impl LinearError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::SchemaInferenceFailed { .. } => "schema_inference_failed",
            Self::InsufficientSample { .. } => "insufficient_sample",
            Self::Decode(_) => "decode_error",
            Self::NotFound { .. } => "not_found",
            Self::InvalidCursor(_) => "invalid_cursor",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NoDataAvailable(_) => "no_data_available",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Whether the fault lies with the caller's request rather than the data.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::InvalidCursor(_) | Self::InvalidArgument(_)
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: self.kind().to_string(),
                message: self.to_string(),
            },
        }
    }
}

/// JSON error envelope shared by the HTTP API, MCP bridge and CLI.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}
