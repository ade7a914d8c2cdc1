//! Durable read-modify-write increments
//!
//! Each attempt reads the document, adds `amount` to one numeric field and
//! writes it back conditionally on the CAS it read, requesting a durability
//! acknowledgment. Lost CAS races and missed durability targets restart the
//! attempt from the read; an ambiguous timeout is settled by replaying the
//! exact same conditional write.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Number, Value};

use crate::engine::{
    Cas, Document, DurabilityLevel, EngineError, StorageEngine, TransientKind, UpsertOptions,
};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};

use super::cancel::CancelSignal;
use super::errors::{AccessError, AccessResult, RetryCause};
use super::outcome::Outcome;

/// Default bound on logical conflict restarts
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Default wait before replaying an ambiguous write
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// How one conditional write ended
enum WriteStep {
    Done(Document),
    Conflict(&'static str),
}

/// Durable field increments with CAS conflict handling.
///
/// # Caller contract
///
/// At most one writer per key. After an ambiguous timeout the incrementer
/// replays its conditional write with the CAS it originally read. If the
/// first write landed, the replay reports a conflict and the current
/// document is returned; if it did not, the replay applies it. A second
/// writer modifying the key in between is indistinguishable from the first
/// write having landed, so its presence would make this increment silently
/// skip. Serialize increments per key before calling.
///
/// A network failure on the conditional write is settled and replayed
/// exactly like a timeout. Only a temporary failure is returned without a
/// replay, as `AccessError::Transient`.
pub struct DurableIncrementer {
    engine: Arc<dyn StorageEngine>,
    durability: DurabilityLevel,
    max_conflict_retries: u32,
    settle_delay: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl DurableIncrementer {
    /// Majority durability, 5 conflict retries, 1s settle delay
    pub fn new(engine: Arc<dyn StorageEngine>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            engine,
            durability: DurabilityLevel::Majority,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            settle_delay: DEFAULT_SETTLE_DELAY,
            metrics,
        }
    }

    pub fn with_durability(mut self, durability: DurabilityLevel) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_max_conflict_retries(mut self, max: u32) -> Self {
        self.max_conflict_retries = max;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Add `amount` to `value[field]` of `key` and return the stored document
    pub async fn increment(
        &self,
        key: &str,
        field: &str,
        amount: i64,
        cancel: &CancelSignal,
    ) -> AccessResult<Document> {
        let scope = ObservationScope::with_fields("INCREMENT", &[("key", key), ("field", field)]);
        match self.run(key, field, amount, cancel).await {
            Ok((doc, attempts)) => {
                self.metrics.increment_increments();
                scope.complete_with_fields(&[
                    ("attempts", attempts.to_string().as_str()),
                    ("cas", doc.cas.to_string().as_str()),
                ]);
                Ok(doc)
            }
            Err(err) => {
                scope.fail(err.code(), &err.to_string());
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        key: &str,
        field: &str,
        amount: i64,
        cancel: &CancelSignal,
    ) -> AccessResult<(Document, u32)> {
        let mut retry: u32 = 0;
        loop {
            if retry > self.max_conflict_retries {
                return Err(AccessError::RetriesExceeded {
                    key: key.to_string(),
                    attempts: retry,
                    last: RetryCause::Conflict,
                });
            }

            let current = self.read(key, cancel).await?;
            let value = apply_increment(key, current.value, field, amount)?;

            match self.write(key, value, current.cas, cancel).await? {
                WriteStep::Done(doc) => return Ok((doc, retry + 1)),
                WriteStep::Conflict(reason) => {
                    self.metrics.increment_cas_conflicts();
                    log_event_with_fields(
                        Event::IncrementConflict,
                        &[
                            ("key", key),
                            ("reason", reason),
                            ("retry", (retry + 1).to_string().as_str()),
                        ],
                    );
                    retry += 1;
                }
            }
        }
    }

    async fn read(&self, key: &str, cancel: &CancelSignal) -> AccessResult<Document> {
        let read = cancel
            .run_for(key, &self.metrics, self.engine.get(key))
            .await?;
        match Outcome::classify(read) {
            Outcome::Found(doc) => Ok(doc),
            Outcome::NotFound => Err(AccessError::KeyNotFound {
                key: key.to_string(),
            }),
            Outcome::Retryable(kind) => Err(AccessError::Transient {
                key: key.to_string(),
                kind,
            }),
            Outcome::Fatal(err) => Err(err),
        }
    }

    async fn write(
        &self,
        key: &str,
        value: Value,
        old_cas: Cas,
        cancel: &CancelSignal,
    ) -> AccessResult<WriteStep> {
        let options = UpsertOptions::new()
            .with_cas(old_cas)
            .with_durability(self.durability);

        let first = cancel
            .run_for(key, &self.metrics, self.engine.upsert(key, value.clone(), options))
            .await?;

        match first {
            Ok(cas) => Ok(WriteStep::Done(Document::new(value, cas))),
            Err(EngineError::CasConflict) => Ok(WriteStep::Conflict("cas_mismatch")),
            Err(EngineError::DurabilityFailure(_)) => Ok(WriteStep::Conflict("durability")),
            Err(err @ (EngineError::Timeout | EngineError::Network(_))) => {
                self.metrics.increment_ambiguous_writes();
                log_event_with_fields(
                    Event::IncrementAmbiguous,
                    &[
                        ("key", key),
                        ("code", err.code()),
                        ("settle_ms", self.settle_delay.as_millis().to_string().as_str()),
                    ],
                );
                cancel
                    .run_for(key, &self.metrics, tokio::time::sleep(self.settle_delay))
                    .await?;
                self.replay(key, value, options, cancel).await
            }
            Err(EngineError::Temporary(_)) => Err(AccessError::Transient {
                key: key.to_string(),
                kind: TransientKind::Temporary,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Repeat the ambiguous write with the same CAS and value
    async fn replay(
        &self,
        key: &str,
        value: Value,
        options: UpsertOptions,
        cancel: &CancelSignal,
    ) -> AccessResult<WriteStep> {
        let replayed = cancel
            .run_for(key, &self.metrics, self.engine.upsert(key, value.clone(), options))
            .await?;

        match replayed {
            Ok(cas) => Ok(WriteStep::Done(Document::new(value, cas))),
            Err(EngineError::CasConflict) => {
                // The ambiguous write landed
                let current = self.read(key, cancel).await?;
                log_event_with_fields(
                    Event::IncrementReconciled,
                    &[("key", key), ("cas", current.cas.to_string().as_str())],
                );
                Ok(WriteStep::Done(current))
            }
            Err(EngineError::DurabilityFailure(_)) => Ok(WriteStep::Conflict("durability")),
            Err(err) if err.transient_kind().is_some() => Err(AccessError::Ambiguous {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

/// `value[field] += amount`. Integers stay integers unless the sum
/// overflows, in which case the field becomes a float.
fn apply_increment(key: &str, mut value: Value, field: &str, amount: i64) -> AccessResult<Value> {
    let invalid = |reason: String| AccessError::InvalidDocument {
        key: key.to_string(),
        reason,
    };

    let object = value
        .as_object_mut()
        .ok_or_else(|| invalid("document is not an object".to_string()))?;
    let slot = object
        .get_mut(field)
        .ok_or_else(|| invalid(format!("field '{}' is missing", field)))?;

    let updated = match &*slot {
        Value::Number(n) => match n.as_i64().and_then(|i| i.checked_add(amount)) {
            Some(sum) => Value::from(sum),
            None => n
                .as_f64()
                .and_then(|f| Number::from_f64(f + amount as f64))
                .map(Value::Number)
                .ok_or_else(|| invalid(format!("field '{}' overflowed", field)))?,
        },
        _ => return Err(invalid(format!("field '{}' is not a number", field))),
    };
    *slot = updated;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_integer() {
        let value = apply_increment("k", json!({"balance": 5}), "balance", 5).unwrap();
        assert_eq!(value, json!({"balance": 10}));
    }

    #[test]
    fn test_apply_float() {
        let value = apply_increment("k", json!({"balance": 1.5}), "balance", 2).unwrap();
        assert_eq!(value, json!({"balance": 3.5}));
    }

    #[test]
    fn test_apply_negative() {
        let value = apply_increment("k", json!({"balance": 5}), "balance", -7).unwrap();
        assert_eq!(value, json!({"balance": -2}));
    }

    #[test]
    fn test_apply_overflow_becomes_float() {
        let value = apply_increment("k", json!({"n": i64::MAX}), "n", 1).unwrap();
        assert!(value["n"].is_f64());
    }

    #[test]
    fn test_apply_rejects_bad_shapes() {
        for (doc, field) in [
            (json!({"balance": "5"}), "balance"),
            (json!({"name": "x"}), "balance"),
            (json!([1, 2]), "balance"),
        ] {
            let err = apply_increment("k", doc, field, 1).unwrap_err();
            assert_eq!(err.code(), "FAILSAFE_INVALID_DOCUMENT");
        }
    }
}
