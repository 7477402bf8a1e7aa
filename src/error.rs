//! Failure taxonomy and the centralized error classifier.
//!
//! Lower layers never pick HTTP status codes. Every stage of the pipeline
//! surfaces a [`PipelineError`]; [`classify`] is the single place where a
//! failure becomes a `(status, body)` pair, so the mapping table is
//! unit-testable without a server running.

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::ollama::BackendError;
use crate::validation::ValidationIssue;

/// Stable top-level error strings, part of the HTTP contract.
pub const INVALID_JSON: &str = "Invalid JSON payload";
pub const MODEL_NOT_CONFIGURED: &str = "Ollama model configuration missing in env file";
pub const MODEL_NOT_AVAILABLE: &str =
    "Specified Ollama model is not available. Ensure Ollama is serving";
pub const MODEL_REQUEST_FAIL: &str =
    "Unable to connect to Ollama. Make sure the instance is running on http://localhost:11434";
pub const INTERNAL_SERVER_ERROR: &str = "Internal server error";
pub const UNKNOWN_ERROR: &str = "An unknown error occurred";

/// Any failure the request pipeline can surface.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The body could not be interpreted as JSON at all.
    #[error("invalid JSON payload: {detail}")]
    Parse { detail: String },

    /// The body parsed but failed schema validation.
    #[error("request failed schema validation")]
    Schema(Vec<ValidationIssue>),

    /// No model identifier in the environment.
    #[error("model identifier missing from environment")]
    ModelNotConfigured,

    /// The backend does not serve the configured model.
    #[error("model '{model}' is not served by the backend")]
    ModelNotAvailable { model: String },

    /// The backend could not be reached at all.
    #[error("backend unreachable: {0}")]
    UpstreamConnection(#[source] BackendError),

    /// The backend failed with a diagnostic worth echoing.
    #[error("backend request failed: {0}")]
    Upstream(#[source] BackendError),

    /// A failure that carries no usable diagnostic.
    #[error("backend failed without a recognizable error")]
    Unknown,
}

impl From<BackendError> for PipelineError {
    /// Classification order matters: connection-refusal detection runs
    /// before the generic fallback.
    fn from(err: BackendError) -> Self {
        if matches!(err, BackendError::Opaque) {
            return PipelineError::Unknown;
        }
        if is_connection_refused(&err) || chain_mentions(&err, "fetch failed") {
            return PipelineError::UpstreamConnection(err);
        }
        PipelineError::Upstream(err)
    }
}

/// Walk the source chain looking for a connection-refused I/O error.
fn is_connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && io.kind() == std::io::ErrorKind::ConnectionRefused
        {
            return true;
        }
        current = err.source();
    }
    false
}

/// Does any error in the chain mention `needle` in its display form?
fn chain_mentions(err: &(dyn std::error::Error + 'static), needle: &str) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = current {
        if err.to_string().contains(needle) {
            return true;
        }
        current = err.source();
    }
    false
}

/// How schema failures are surfaced, which differs per endpoint.
///
/// The chat form reports every structural failure under one fixed error key
/// with the full issue list attached; the single-turn form discriminates by
/// failure reason and surfaces only the first issue's message. Both are
/// intentional, observed behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Chat,
    Simple,
}

/// The sole externally visible failure shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
            details: None,
            message: None,
        }
    }
}

/// Map a pipeline failure to its HTTP status and response body.
pub fn classify(err: &PipelineError, policy: Policy) -> (StatusCode, ErrorBody) {
    match err {
        PipelineError::Parse { detail } => (
            StatusCode::BAD_REQUEST,
            ErrorBody {
                details: Some(serde_json::Value::String(detail.clone())),
                ..ErrorBody::new(INVALID_JSON)
            },
        ),
        PipelineError::Schema(issues) => match policy {
            Policy::Chat => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    details: serde_json::to_value(issues).ok(),
                    ..ErrorBody::new(INVALID_JSON)
                },
            ),
            Policy::Simple => {
                let first = issues
                    .first()
                    .map(|issue| issue.message.as_str())
                    .unwrap_or(INVALID_JSON);
                (StatusCode::BAD_REQUEST, ErrorBody::new(first))
            }
        },
        PipelineError::ModelNotConfigured => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorBody::new(MODEL_NOT_CONFIGURED),
        ),
        PipelineError::ModelNotAvailable { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorBody::new(MODEL_NOT_AVAILABLE),
        ),
        PipelineError::UpstreamConnection(_) => (
            StatusCode::BAD_GATEWAY,
            ErrorBody::new(MODEL_REQUEST_FAIL),
        ),
        PipelineError::Upstream(source) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody {
                message: Some(source.to_string()),
                ..ErrorBody::new(INTERNAL_SERVER_ERROR)
            },
        ),
        PipelineError::Unknown => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody::new(UNKNOWN_ERROR),
        ),
    }
}
