//! Batched reads with a replica pass
//!
//! A primary pass reads every distinct key through a bounded concurrency
//! window. Keys that did not come back `Found` then get one replica read
//! each, with no backoff. The result map is owned by the coordinating future;
//! nothing is shared between calls.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use crate::engine::{Document, StorageEngine};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};

use super::cancel::{record_cancellation, CancelSignal};
use super::errors::AccessResult;
use super::outcome::Outcome;

/// Which pass produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    Primary,
    Replica,
}

/// Final standing of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Found on the primary pass
    Primary,
    /// Found on the replica pass
    Replica,
    /// Not found by either pass
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub outcome: Outcome,
    pub source: FetchSource,
}

impl BatchEntry {
    pub fn status(&self) -> EntryStatus {
        match (&self.outcome, self.source) {
            (Outcome::Found(_), FetchSource::Primary) => EntryStatus::Primary,
            (Outcome::Found(_), FetchSource::Replica) => EntryStatus::Replica,
            _ => EntryStatus::Failed,
        }
    }
}

/// One entry per distinct requested key, plus the number still failing
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    entries: HashMap<String, BatchEntry>,
    order: Vec<String>,
    errors: usize,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys still not found after the replica pass
    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn get(&self, key: &str) -> Option<&BatchEntry> {
        self.entries.get(key)
    }

    pub fn document(&self, key: &str) -> Option<&Document> {
        self.entries.get(key).and_then(|e| e.outcome.document())
    }

    /// Distinct keys in request order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Retrieved documents in request order
    pub fn documents(&self) -> Vec<(&str, &Document)> {
        self.order
            .iter()
            .filter_map(|key| self.document(key).map(|doc| (key.as_str(), doc)))
            .collect()
    }

    /// Keys that neither pass could retrieve, in request order
    pub fn failed_keys(&self) -> Vec<&str> {
        self.keys()
            .filter(|key| self.status(key) == Some(EntryStatus::Failed))
            .collect()
    }

    pub fn status(&self, key: &str) -> Option<EntryStatus> {
        self.entries.get(key).map(BatchEntry::status)
    }

    /// Number of keys with the given final standing
    pub fn count(&self, status: EntryStatus) -> usize {
        self.entries.values().filter(|e| e.status() == status).count()
    }
}

pub struct BatchReplicaFetcher {
    engine: Arc<dyn StorageEngine>,
    metrics: Arc<MetricsRegistry>,
}

impl BatchReplicaFetcher {
    pub fn new(engine: Arc<dyn StorageEngine>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { engine, metrics }
    }

    /// Read `keys` with at most `concurrency` reads in flight per pass.
    /// `None` dispatches every key at once.
    ///
    /// Duplicate keys collapse into one entry. Only cancellation fails the
    /// whole batch; per-key failures are reported in the result.
    pub async fn fetch_many<K: AsRef<str>>(
        &self,
        keys: &[K],
        concurrency: Option<NonZeroUsize>,
        cancel: &CancelSignal,
    ) -> AccessResult<BatchResult> {
        let order = distinct(keys);
        if order.is_empty() {
            return Ok(BatchResult::default());
        }

        let window = concurrency.map_or(order.len(), NonZeroUsize::get);
        let total = order.len().to_string();
        let scope = ObservationScope::with_fields(
            "BATCH_FETCH",
            &[("keys", total.as_str()), ("concurrency", window.to_string().as_str())],
        );

        let result = self.run(order, window, cancel).await;
        match &result {
            Ok(batch) => scope.complete_with_fields(&[
                ("errors", batch.errors().to_string().as_str()),
                ("replica", batch.count(EntryStatus::Replica).to_string().as_str()),
            ]),
            Err(err) => {
                record_cancellation(&self.metrics, &[("keys", total.as_str())]);
                scope.fail(err.code(), &err.to_string());
            }
        }
        result
    }

    async fn run(
        &self,
        order: Vec<String>,
        window: usize,
        cancel: &CancelSignal,
    ) -> AccessResult<BatchResult> {
        let engine = self.engine.as_ref();

        let primary: Vec<(String, Outcome)> = cancel
            .run(
                stream::iter(order.iter())
                    .map(|key| async move {
                        (key.clone(), Outcome::classify(engine.get(key).await))
                    })
                    .buffer_unordered(window)
                    .collect::<Vec<_>>(),
            )
            .await?;

        let mut entries: HashMap<String, BatchEntry> = primary
            .into_iter()
            .map(|(key, outcome)| {
                let entry = BatchEntry {
                    outcome,
                    source: FetchSource::Primary,
                };
                (key, entry)
            })
            .collect();

        let missing: Vec<&String> = order
            .iter()
            .filter(|key| !entries[key.as_str()].outcome.is_found())
            .collect();
        log_event_with_fields(
            Event::BatchPrimaryComplete,
            &[
                ("keys", order.len().to_string().as_str()),
                ("missing", missing.len().to_string().as_str()),
            ],
        );

        if !missing.is_empty() {
            let attempted = missing.len();
            let replica: Vec<(String, Outcome)> = cancel
                .run(
                    stream::iter(missing)
                        .map(|key| async move {
                            (key.clone(), Outcome::classify(engine.get_replica(key).await))
                        })
                        .buffer_unordered(window)
                        .collect::<Vec<_>>(),
                )
                .await?;

            let recovered = replica.iter().filter(|(_, o)| o.is_found()).count();
            for (key, outcome) in replica {
                entries.insert(
                    key,
                    BatchEntry {
                        outcome,
                        source: FetchSource::Replica,
                    },
                );
            }
            log_event_with_fields(
                Event::BatchReplicaComplete,
                &[
                    ("attempted", attempted.to_string().as_str()),
                    ("recovered", recovered.to_string().as_str()),
                ],
            );
        }

        let errors = entries.values().filter(|e| !e.outcome.is_found()).count();
        self.metrics.record_batch(order.len() as u64, errors as u64);

        Ok(BatchResult {
            entries,
            order,
            errors,
        })
    }
}

/// Deduplicate, keeping first occurrence order
fn distinct<K: AsRef<str>>(keys: &[K]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter()
        .map(AsRef::as_ref)
        .filter(|key| seen.insert(*key))
        .map(str::to_string)
        .collect()
}
