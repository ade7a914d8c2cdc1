//! Classified operation outcomes
//!
//! Every engine read is folded into one of four cases before any
//! orchestration decision is made. Only `Retryable` may cross a retry or
//! fallback boundary silently.

use crate::engine::{Document, EngineError, EngineResult, TransientKind};

use super::errors::{AccessError, AccessResult};

/// Outcome of a single read (or of a retry chain of reads)
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Found(Document),
    NotFound,
    Retryable(TransientKind),
    Fatal(AccessError),
}

impl Outcome {
    /// Classify a raw engine result
    pub fn classify(result: EngineResult<Document>) -> Self {
        match result {
            Ok(doc) => Outcome::Found(doc),
            Err(EngineError::KeyNotFound) => Outcome::NotFound,
            Err(err) => match err.transient_kind() {
                Some(kind) => Outcome::Retryable(kind),
                None => Outcome::Fatal(AccessError::Engine(err)),
            },
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Outcome::Found(_))
    }

    pub fn is_retries_exceeded(&self) -> bool {
        matches!(self, Outcome::Fatal(err) if err.is_retries_exceeded())
    }

    pub fn document(&self) -> Option<&Document> {
        match self {
            Outcome::Found(doc) => Some(doc),
            _ => None,
        }
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Found(_) => "found",
            Outcome::NotFound => "not_found",
            Outcome::Retryable(kind) => kind.as_str(),
            Outcome::Fatal(_) => "fatal",
        }
    }

    /// Convert into a caller-facing result. `NotFound` becomes `Ok(None)`.
    pub fn into_result(self, key: &str) -> AccessResult<Option<Document>> {
        match self {
            Outcome::Found(doc) => Ok(Some(doc)),
            Outcome::NotFound => Ok(None),
            Outcome::Retryable(kind) => Err(AccessError::Transient {
                key: key.to_string(),
                kind,
            }),
            Outcome::Fatal(err) => Err(err),
        }
    }
}

impl From<AccessError> for Outcome {
    fn from(err: AccessError) -> Self {
        Outcome::Fatal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Cas;
    use crate::resilience::errors::RetryCause;
    use serde_json::json;

    #[test]
    fn test_classify() {
        let doc = Document::new(json!({"a": 1}), Cas::new(1));
        assert_eq!(Outcome::classify(Ok(doc.clone())), Outcome::Found(doc));
        assert_eq!(Outcome::classify(Err(EngineError::KeyNotFound)), Outcome::NotFound);
        assert_eq!(
            Outcome::classify(Err(EngineError::Timeout)),
            Outcome::Retryable(TransientKind::Timeout)
        );
        assert_eq!(
            Outcome::classify(Err(EngineError::CasConflict)),
            Outcome::Fatal(AccessError::Engine(EngineError::CasConflict))
        );
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Outcome::NotFound.into_result("k"), Ok(None));
        assert_eq!(
            Outcome::Retryable(TransientKind::Network).into_result("k"),
            Err(AccessError::Transient {
                key: "k".into(),
                kind: TransientKind::Network
            })
        );
        assert_eq!(
            Outcome::Fatal(AccessError::Cancelled).into_result("k"),
            Err(AccessError::Cancelled)
        );
    }

    #[test]
    fn test_retries_exceeded_detection() {
        let exhausted = Outcome::Fatal(AccessError::RetriesExceeded {
            key: "k".into(),
            attempts: 3,
            last: RetryCause::Transient(TransientKind::Temporary),
        });
        assert!(exhausted.is_retries_exceeded());
        assert!(!Outcome::NotFound.is_retries_exceeded());
    }
}
