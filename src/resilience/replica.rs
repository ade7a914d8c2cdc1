//! Replica-fallback reads
//!
//! Replicas may lag the active copy. Use these reads only for data where a
//! stale answer beats no answer.

use std::sync::Arc;

use crate::engine::StorageEngine;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

use super::backoff::RetryState;
use super::cancel::CancelSignal;
use super::errors::{AccessError, RetryCause};
use super::outcome::Outcome;
use super::retry::RetryExecutor;

/// Reads that fall back to a replica copy when the primary is unreachable
pub struct ReplicaReader {
    engine: Arc<dyn StorageEngine>,
    retry: RetryExecutor,
    policy: RetryState,
    metrics: Arc<MetricsRegistry>,
}

impl ReplicaReader {
    /// Create a reader whose composed path retries under `policy`
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        policy: RetryState,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            engine,
            retry: RetryExecutor::new(Arc::clone(&metrics)),
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> RetryState {
        self.policy
    }

    /// Primary read; one replica read if the primary timed out or was
    /// unreachable. Any other outcome is returned as is.
    pub async fn get(&self, key: &str, cancel: &CancelSignal) -> Outcome {
        let primary = match cancel.run_for(key, &self.metrics, self.engine.get(key)).await {
            Ok(result) => Outcome::classify(result),
            Err(err) => return Outcome::Fatal(err),
        };

        match primary {
            Outcome::Retryable(kind) if kind.is_replica_eligible() => {
                self.fallback(key, kind.as_str(), cancel).await
            }
            other => other,
        }
    }

    /// Primary read under the retry policy; one replica read once the retry
    /// budget is spent on timeouts or network failures. Exhaustion on
    /// temporary failures is returned as is.
    pub async fn get_retry_then_replica(&self, key: &str, cancel: &CancelSignal) -> Outcome {
        let primary = self
            .retry
            .get(self.engine.as_ref(), key, self.policy, cancel)
            .await;

        match primary {
            Outcome::Fatal(AccessError::RetriesExceeded {
                last: RetryCause::Transient(kind),
                ..
            }) if kind.is_replica_eligible() => self.fallback(key, kind.as_str(), cancel).await,
            other => other,
        }
    }

    async fn fallback(&self, key: &str, reason: &str, cancel: &CancelSignal) -> Outcome {
        self.metrics.increment_replica_fallbacks();
        log_event_with_fields(Event::ReplicaFallback, &[("key", key), ("reason", reason)]);

        match cancel
            .run_for(key, &self.metrics, self.engine.get_replica(key))
            .await
        {
            Ok(result) => Outcome::classify(result),
            Err(err) => Outcome::Fatal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, FaultOp, MemoryCluster, TransientKind};
    use serde_json::json;
    use std::time::Duration;

    fn reader(cluster: &Arc<MemoryCluster>) -> ReplicaReader {
        ReplicaReader::new(
            Arc::clone(cluster) as Arc<dyn StorageEngine>,
            RetryState::exponential(2, Duration::from_millis(1000)),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_success_skips_replica() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.seed("airport_1", json!({"city": "Calais"}));

        let outcome = reader(&cluster).get("airport_1", &CancelSignal::new()).await;
        assert!(outcome.is_found());
        assert_eq!(cluster.calls().replica_gets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reads_replica_once() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.seed("airport_1", json!({"city": "Calais"}));
        cluster.inject_times(FaultOp::Get, "airport_1", EngineError::Timeout, 1);

        let outcome = reader(&cluster).get("airport_1", &CancelSignal::new()).await;
        assert_eq!(
            outcome.document().map(|d| d.value.clone()),
            Some(json!({"city": "Calais"}))
        );
        assert_eq!(cluster.calls().replica_gets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_temporary_failure_not_sent_to_replica() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.seed("airport_1", json!({}));
        cluster.inject_times(
            FaultOp::Get,
            "airport_1",
            EngineError::Temporary("busy".into()),
            1,
        );

        let outcome = reader(&cluster).get("airport_1", &CancelSignal::new()).await;
        assert_eq!(outcome, Outcome::Retryable(TransientKind::Temporary));
        assert_eq!(cluster.calls().replica_gets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replica_error_returned_verbatim() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.inject_times(FaultOp::Get, "k", EngineError::Network("reset".into()), 1);
        cluster.inject_times(FaultOp::GetReplica, "k", EngineError::Timeout, 1);

        let outcome = reader(&cluster).get("k", &CancelSignal::new()).await;
        assert_eq!(outcome, Outcome::Retryable(TransientKind::Timeout));
    }
}
