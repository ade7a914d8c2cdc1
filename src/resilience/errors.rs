//! Access Error Types
//!
//! What callers of the access layer see. Backend rejections pass through
//! unchanged as [`AccessError::Engine`]; the remaining variants are produced
//! by the orchestration itself.

use std::fmt;

use thiserror::Error;

use crate::engine::{EngineError, TransientKind};

/// Result type for access-layer operations
pub type AccessResult<T> = Result<T, AccessError>;

/// Access-layer errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    /// Retry budget spent. Distinct from the underlying backend error so
    /// callers can tell "gave up" from "backend rejected".
    #[error("retries exceeded for key '{key}' after {attempts} attempts (last failure: {last})")]
    RetriesExceeded {
        key: String,
        attempts: u32,
        last: RetryCause,
    },

    /// A write may or may not have been applied and it could not be settled
    #[error("outcome of write to key '{key}' is ambiguous")]
    Ambiguous { key: String },

    #[error("key '{key}' not found")]
    KeyNotFound { key: String },

    /// Document shape does not allow the requested modification
    #[error("document '{key}' cannot be modified: {reason}")]
    InvalidDocument { key: String, reason: String },

    /// A transient failure surfaced where no retry applies
    #[error("{kind} failure on key '{key}'")]
    Transient { key: String, kind: TransientKind },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Why the final attempt of a retry loop failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    Transient(TransientKind),
    /// Lost a CAS race or missed the durability target
    Conflict,
}

impl RetryCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient(kind) => kind.as_str(),
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AccessError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_retries_exceeded(&self) -> bool {
        matches!(self, Self::RetriesExceeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::RetriesExceeded { .. } => "FAILSAFE_RETRIES_EXCEEDED",
            Self::Ambiguous { .. } => "FAILSAFE_AMBIGUOUS",
            Self::KeyNotFound { .. } => "FAILSAFE_KEY_NOT_FOUND",
            Self::InvalidDocument { .. } => "FAILSAFE_INVALID_DOCUMENT",
            Self::Transient { .. } => "FAILSAFE_TRANSIENT",
            Self::Cancelled => "FAILSAFE_CANCELLED",
            Self::Engine(e) => e.code(),
            Self::Config(_) => "FAILSAFE_CONFIG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_exceeded_carries_context() {
        let err = AccessError::RetriesExceeded {
            key: "airport_1254".into(),
            attempts: 3,
            last: RetryCause::Transient(TransientKind::Timeout),
        };
        let msg = err.to_string();
        assert!(msg.contains("airport_1254"));
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("last failure: timeout"));
        assert!(err.is_retries_exceeded());
        assert_eq!(err.code(), "FAILSAFE_RETRIES_EXCEEDED");
    }

    #[test]
    fn test_engine_errors_pass_through() {
        let err: AccessError = EngineError::backend(7, "auth failed").into();
        assert_eq!(err.to_string(), "backend error 7: auth failed");
        assert_eq!(err.code(), "FAILSAFE_ENGINE_BACKEND");
        assert!(!err.is_retries_exceeded());
    }

    #[test]
    fn test_cancelled() {
        assert!(AccessError::Cancelled.is_cancelled());
        assert_eq!(AccessError::Cancelled.code(), "FAILSAFE_CANCELLED");
    }
}
