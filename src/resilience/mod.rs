//! Resilient access layer
//!
//! Orchestration between application code and a replicated storage engine:
//!
//! - [`RetryExecutor`]: retry transient failures with backoff
//! - [`ReplicaReader`]: fall back to a replica when the primary is unreachable
//! - [`OptimisticWriter`]: upserts that report whether they changed state
//! - [`DurableIncrementer`]: CAS-guarded durable read-modify-write
//! - [`BatchReplicaFetcher`]: bounded fan-out reads with a replica pass
//! - [`SearchFallbackQuery`]: indexed search degrading to ID scan plus fetch
//!
//! Only transient failures (timeout, network, temporary) are retried or
//! rerouted. Everything else reaches the caller unchanged. Every operation
//! takes a [`CancelSignal`]; when it fires, pending engine calls and timers
//! are dropped and the operation resolves to [`AccessError::Cancelled`].
//!
//! [`AccessLayer`] wires the components to one pair of engine clients and
//! one [`ResilienceConfig`].

mod backoff;
mod batch;
mod cancel;
mod config;
mod errors;
mod increment;
mod optimistic;
mod outcome;
mod replica;
mod retry;
mod search;

use std::sync::Arc;

use crate::engine::{QueryEngine, StorageEngine};
use crate::observability::MetricsRegistry;

pub use backoff::{Backoff, BackoffPolicy, RetryState};
pub use batch::{BatchEntry, BatchReplicaFetcher, BatchResult, EntryStatus, FetchSource};
pub use cancel::CancelSignal;
pub use config::{
    BatchConfig, IncrementConfig, ResilienceConfig, RetryPolicyConfig, SearchConfig,
};
pub use errors::{AccessError, AccessResult, RetryCause};
pub use increment::{DurableIncrementer, DEFAULT_MAX_CONFLICT_RETRIES, DEFAULT_SETTLE_DELAY};
pub use optimistic::OptimisticWriter;
pub use outcome::Outcome;
pub use replica::ReplicaReader;
pub use retry::RetryExecutor;
pub use search::{SearchFallbackQuery, SearchPath, SearchResults};

/// Components built from one configuration, sharing engines and metrics
pub struct AccessLayer {
    storage: Arc<dyn StorageEngine>,
    query: Arc<dyn QueryEngine>,
    config: ResilienceConfig,
    metrics: Arc<MetricsRegistry>,
}

impl AccessLayer {
    /// Validate `config` and bind it to the engine clients
    pub fn new(
        storage: Arc<dyn StorageEngine>,
        query: Arc<dyn QueryEngine>,
        config: ResilienceConfig,
    ) -> AccessResult<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            query,
            config,
            metrics: Arc::new(MetricsRegistry::new()),
        })
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn retry_executor(&self) -> RetryExecutor {
        RetryExecutor::new(Arc::clone(&self.metrics))
    }

    /// Plain read retried under the `retry` policy
    pub async fn get(&self, key: &str, cancel: &CancelSignal) -> Outcome {
        self.retry_executor()
            .get(self.storage.as_ref(), key, self.config.retry.to_state(), cancel)
            .await
    }

    pub fn replica_reader(&self) -> ReplicaReader {
        ReplicaReader::new(
            Arc::clone(&self.storage),
            self.config.replica_retry.to_state(),
            Arc::clone(&self.metrics),
        )
    }

    pub fn optimistic_writer(&self) -> OptimisticWriter {
        OptimisticWriter::new(
            Arc::clone(&self.storage),
            self.config.verify_retry.to_state(),
            Arc::clone(&self.metrics),
        )
    }

    pub fn incrementer(&self) -> DurableIncrementer {
        DurableIncrementer::new(Arc::clone(&self.storage), Arc::clone(&self.metrics))
            .with_durability(self.config.increment.durability)
            .with_max_conflict_retries(self.config.increment.max_conflict_retries)
            .with_settle_delay(self.config.increment.settle_delay())
    }

    pub fn batch_fetcher(&self) -> BatchReplicaFetcher {
        BatchReplicaFetcher::new(Arc::clone(&self.storage), Arc::clone(&self.metrics))
    }

    pub fn search(&self) -> SearchFallbackQuery {
        SearchFallbackQuery::new(
            Arc::clone(&self.query),
            Arc::clone(&self.storage),
            self.config.search.clone(),
            Arc::clone(&self.metrics),
        )
        .with_concurrency(self.config.batch.window())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryCluster;
    use serde_json::json;

    fn layer(config: ResilienceConfig) -> AccessResult<AccessLayer> {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.seed("SD_inc_balance", json!({"name": "John Smith", "balance": 5}));
        AccessLayer::new(
            Arc::clone(&cluster) as Arc<dyn StorageEngine>,
            cluster as Arc<dyn QueryEngine>,
            config,
        )
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = ResilienceConfig::default();
        config.batch.concurrency = Some(0);
        assert!(layer(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_components_share_metrics() {
        let access = layer(ResilienceConfig::default()).unwrap();
        let cancel = CancelSignal::new();

        assert!(access.get("SD_inc_balance", &cancel).await.is_found());
        let doc = access
            .incrementer()
            .increment("SD_inc_balance", "balance", 5, &cancel)
            .await
            .unwrap();
        assert_eq!(doc.value["balance"], json!(10));

        let snapshot = access.metrics().snapshot();
        assert_eq!(snapshot.attempts, 1);
        assert_eq!(snapshot.increments, 1);
    }
}
