//! Engine Error Taxonomy
//!
//! The closed set of conditions the access layer distinguishes. Backend
//! specific codes are mapped onto it by `engine::codes` before any
//! orchestration logic sees them.

use thiserror::Error;

use super::types::TransientKind;

/// Result type for engine calls
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// No acknowledgment within the deadline. For writes the outcome is ambiguous.
    #[error("operation timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// The node is up but cannot service the request right now
    #[error("temporary failure: {0}")]
    Temporary(String),

    #[error("key not found")]
    KeyNotFound,

    /// Stored CAS differs from the expected one
    #[error("CAS mismatch")]
    CasConflict,

    #[error("durability requirement not met: {0}")]
    DurabilityFailure(String),

    /// Secondary index missing or offline
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// Anything else the backend rejected
    #[error("backend error {code}: {message}")]
    Backend { code: u32, message: String },
}

impl EngineError {
    /// Create a backend error.
    pub fn backend(code: u32, message: impl Into<String>) -> Self {
        Self::Backend {
            code,
            message: message.into(),
        }
    }

    /// The transient class of this error, if it has one.
    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            Self::Timeout => Some(TransientKind::Timeout),
            Self::Network(_) => Some(TransientKind::Network),
            Self::Temporary(_) => Some(TransientKind::Temporary),
            _ => None,
        }
    }

    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "FAILSAFE_ENGINE_TIMEOUT",
            Self::Network(_) => "FAILSAFE_ENGINE_NETWORK",
            Self::Temporary(_) => "FAILSAFE_ENGINE_TEMPORARY",
            Self::KeyNotFound => "FAILSAFE_ENGINE_KEY_NOT_FOUND",
            Self::CasConflict => "FAILSAFE_ENGINE_CAS_CONFLICT",
            Self::DurabilityFailure(_) => "FAILSAFE_ENGINE_DURABILITY_FAILURE",
            Self::IndexUnavailable(_) => "FAILSAFE_ENGINE_INDEX_UNAVAILABLE",
            Self::Backend { .. } => "FAILSAFE_ENGINE_BACKEND",
        }
    }
}
