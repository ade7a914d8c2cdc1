//! Optimistic writes that report whether they changed state
//!
//! An unconditional upsert whose transient failure is settled by reading the
//! key back and comparing CAS tokens against the one captured before the
//! write.

use std::sync::Arc;

use serde_json::Value;

use crate::engine::{Cas, StorageEngine, UpsertOptions};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};

use super::backoff::RetryState;
use super::cancel::CancelSignal;
use super::errors::{AccessError, AccessResult};
use super::outcome::Outcome;
use super::retry::RetryExecutor;

pub struct OptimisticWriter {
    engine: Arc<dyn StorageEngine>,
    retry: RetryExecutor,
    verify_policy: RetryState,
    metrics: Arc<MetricsRegistry>,
}

impl OptimisticWriter {
    /// `verify_policy` governs the read-back after an ambiguous upsert
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        verify_policy: RetryState,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            engine,
            retry: RetryExecutor::new(Arc::clone(&metrics)),
            verify_policy,
            metrics,
        }
    }

    /// Upsert `value` and report whether the stored document changed.
    ///
    /// - `Ok(true)`: the write is known to have applied
    /// - `Ok(false)`: the write failed ambiguously and the key does not exist
    /// - `Err(RetriesExceeded)`: the read-back could not confirm or deny it
    ///
    /// A failed initial read aborts before anything is written.
    pub async fn upsert_and_check(
        &self,
        key: &str,
        value: Value,
        cancel: &CancelSignal,
    ) -> AccessResult<bool> {
        let scope = ObservationScope::for_key("UPSERT_CHECK", key);
        match self.run(key, value, cancel).await {
            Ok(applied) => {
                scope.complete_with_fields(&[("applied", if applied { "true" } else { "false" })]);
                Ok(applied)
            }
            Err(err) => {
                scope.fail(err.code(), &err.to_string());
                Err(err)
            }
        }
    }

    async fn run(&self, key: &str, value: Value, cancel: &CancelSignal) -> AccessResult<bool> {
        let read = cancel
            .run_for(key, &self.metrics, self.engine.get(key))
            .await?;
        let old_cas = match Outcome::classify(read) {
            Outcome::Found(doc) => Some(doc.cas),
            Outcome::NotFound => None,
            Outcome::Retryable(kind) => {
                return Err(AccessError::Transient {
                    key: key.to_string(),
                    kind,
                })
            }
            Outcome::Fatal(err) => return Err(err),
        };

        let written = cancel
            .run_for(key, &self.metrics, self.engine.upsert(key, value, UpsertOptions::new()))
            .await?;

        let kind = match written {
            Ok(_) => return Ok(true),
            Err(err) => match err.transient_kind() {
                Some(kind) => kind,
                None => return Err(err.into()),
            },
        };

        self.metrics.increment_ambiguous_writes();
        log_event_with_fields(
            Event::UpsertAmbiguous,
            &[("key", key), ("kind", kind.as_str())],
        );
        self.verify(key, old_cas, cancel).await
    }

    async fn verify(
        &self,
        key: &str,
        old_cas: Option<Cas>,
        cancel: &CancelSignal,
    ) -> AccessResult<bool> {
        let applied = match self
            .retry
            .get(self.engine.as_ref(), key, self.verify_policy, cancel)
            .await
        {
            Outcome::NotFound => false,
            Outcome::Found(doc) => old_cas.map_or(true, |old| doc.cas != old),
            Outcome::Retryable(kind) => {
                return Err(AccessError::Transient {
                    key: key.to_string(),
                    kind,
                })
            }
            Outcome::Fatal(err) => return Err(err),
        };

        log_event_with_fields(
            Event::UpsertVerified,
            &[("key", key), ("applied", if applied { "true" } else { "false" })],
        );
        Ok(applied)
    }
}
