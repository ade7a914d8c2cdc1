//! Retry executor
//!
//! Runs an operation, retrying only while it reports a transient outcome.
//! Before each retry it sleeps the delay of the current state, then advances
//! the state through [`BackoffPolicy`]. `remaining = N` therefore means at
//! most `N + 1` invocations.

use std::future::Future;
use std::sync::Arc;

use crate::engine::StorageEngine;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

use super::backoff::{Backoff, BackoffPolicy, RetryState};
use super::cancel::{record_cancellation, CancelSignal};
use super::errors::{AccessError, RetryCause};
use super::outcome::Outcome;

/// Retries transient outcomes with backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    metrics: Arc<MetricsRegistry>,
}

impl RetryExecutor {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }

    /// Execute `op` until it yields a non-retryable outcome or the policy is
    /// exhausted.
    ///
    /// Exhaustion is reported as `Fatal(RetriesExceeded)`, never as a raw
    /// `Retryable`. Cancellation is reported as `Fatal(Cancelled)`.
    pub async fn execute<F, Fut>(
        &self,
        key: &str,
        mut op: F,
        policy: RetryState,
        cancel: &CancelSignal,
    ) -> Outcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let mut state = policy;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            self.metrics.increment_attempts();

            let kind = match cancel.run(op()).await {
                Ok(Outcome::Retryable(kind)) => kind,
                Ok(outcome) => return outcome,
                Err(err) => return self.cancelled(key, err),
            };

            let next = match BackoffPolicy::next(state) {
                Backoff::Next(next) => next,
                Backoff::Exhausted => {
                    self.metrics.increment_retries_exhausted();
                    log_event_with_fields(
                        Event::RetriesExhausted,
                        &[
                            ("key", key),
                            ("attempts", attempts.to_string().as_str()),
                            ("last", kind.as_str()),
                        ],
                    );
                    return Outcome::Fatal(AccessError::RetriesExceeded {
                        key: key.to_string(),
                        attempts,
                        last: RetryCause::Transient(kind),
                    });
                }
            };

            self.metrics.increment_retries();
            log_event_with_fields(
                Event::RetryScheduled,
                &[
                    ("key", key),
                    ("attempt", attempts.to_string().as_str()),
                    ("kind", kind.as_str()),
                    ("delay_ms", state.delay().as_millis().to_string().as_str()),
                    ("remaining", next.remaining().to_string().as_str()),
                ],
            );

            if let Err(err) = cancel.sleep(state.delay()).await {
                return self.cancelled(key, err);
            }
            state = next;
        }
    }

    /// Primary read of `key` under `policy`
    pub async fn get(
        &self,
        engine: &dyn StorageEngine,
        key: &str,
        policy: RetryState,
        cancel: &CancelSignal,
    ) -> Outcome {
        self.execute(
            key,
            || async move { Outcome::classify(engine.get(key).await) },
            policy,
            cancel,
        )
        .await
    }

    fn cancelled(&self, key: &str, err: AccessError) -> Outcome {
        record_cancellation(&self.metrics, &[("key", key)]);
        Outcome::Fatal(err)
    }
}
