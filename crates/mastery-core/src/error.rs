//! Error types for the assessment engine.
//!
//! [`GenerationError`] describes failures of the external generation service.
//! It lives in `mastery-core` so the controller can downcast provider errors
//! and classify them for retry decisions without string matching.
//! [`EngineError`] is what callers of the controller and service see; every
//! variant maps to a distinct machine-readable [`ErrorCode`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur when talking to the content generation service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model was not found.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The service answered with no usable text.
    #[error("generation service returned an empty response")]
    EmptyResponse,

    /// The response could not be parsed into the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The evaluation parsed but failed validation (e.g. missing score).
    #[error("invalid evaluation: {0}")]
    InvalidEvaluation(String),
}

impl GenerationError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            GenerationError::AuthenticationFailed(_) | GenerationError::ModelNotFound(_)
        )
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            GenerationError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Classify an opaque provider error.
    ///
    /// Providers return `anyhow::Error`; those that originate from a
    /// `GenerationError` are recovered as-is, anything else is treated as a
    /// transport failure.
    pub fn from_provider(err: anyhow::Error) -> Self {
        match err.downcast::<GenerationError>() {
            Ok(e) => e,
            Err(other) => GenerationError::NetworkError(format!("{other:#}")),
        }
    }
}

/// Machine-readable error codes a UI can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The generation service failed for this turn; the session is intact.
    GenerationFailed,
    /// The caller sent an answer when none was expected, or vice versa.
    InputContract,
    /// The session record is missing, corrupt, or inconsistent.
    InvalidSession,
    /// Another writer updated the session first.
    SessionConflict,
    /// The session store could not be read or written.
    StorageFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::GenerationFailed => "generation_failed",
            ErrorCode::InputContract => "input_contract",
            ErrorCode::InvalidSession => "invalid_session",
            ErrorCode::SessionConflict => "session_conflict",
            ErrorCode::StorageFailure => "storage_failure",
        }
    }

    /// Whether the same request may succeed if sent again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::GenerationFailed | ErrorCode::SessionConflict)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the assessment controller and service.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The generation service kept failing; nothing was committed.
    #[error("generation failed after {attempts} attempt(s): {source}")]
    Generation {
        attempts: u32,
        #[source]
        source: GenerationError,
    },

    /// The caller violated the turn contract.
    #[error("input contract violation: {0}")]
    InputContract(String),

    /// The session cannot be used and must be restarted.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// Session store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Generation { .. } => ErrorCode::GenerationFailed,
            EngineError::InputContract(_) => ErrorCode::InputContract,
            EngineError::InvalidSession(_) => ErrorCode::InvalidSession,
            EngineError::Store(e) => e.code(),
        }
    }
}
