//! Indexed search with a degraded fallback
//!
//! The indexed path runs a case-insensitive substring query. If the index
//! is unavailable the search degrades to an ID-only query over the same
//! predicate, a batched replica-backed fetch of those IDs and a local
//! projection of the requested fields.

use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::engine::{EngineError, QueryEngine, StorageEngine};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};

use super::batch::BatchReplicaFetcher;
use super::cancel::{record_cancellation, CancelSignal};
use super::config::SearchConfig;
use super::errors::{AccessError, AccessResult};

/// Which path served a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPath {
    Indexed,
    Degraded,
}

/// Search rows. Row order is unspecified and differs between paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub rows: Vec<Value>,
    pub path: SearchPath,
    /// Matching IDs that could not be fetched on the degraded path
    pub failed: usize,
}

pub struct SearchFallbackQuery {
    query: Arc<dyn QueryEngine>,
    fetcher: BatchReplicaFetcher,
    config: SearchConfig,
    concurrency: Option<NonZeroUsize>,
    metrics: Arc<MetricsRegistry>,
}

impl SearchFallbackQuery {
    pub fn new(
        query: Arc<dyn QueryEngine>,
        storage: Arc<dyn StorageEngine>,
        config: SearchConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            query,
            fetcher: BatchReplicaFetcher::new(storage, Arc::clone(&metrics)),
            config,
            concurrency: None,
            metrics,
        }
    }

    /// Bound the fan-out of the degraded path's batch fetch
    pub fn with_concurrency(mut self, concurrency: Option<NonZeroUsize>) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Indexed statement
    pub fn statement(&self) -> String {
        format!(
            "SELECT {} FROM `{}` WHERE LOWER({}) LIKE $1",
            self.config.projection.join(", "),
            self.config.keyspace,
            self.config.field
        )
    }

    /// ID-only statement over the same predicate
    pub fn id_statement(&self) -> String {
        format!(
            "SELECT META().id AS id FROM `{}` WHERE LOWER({}) LIKE $1",
            self.config.keyspace, self.config.field
        )
    }

    /// `%term%`, lowercased
    pub fn like_param(term: &str) -> Value {
        Value::String(format!("%{}%", term.to_lowercase()))
    }

    pub async fn search(&self, term: &str, cancel: &CancelSignal) -> AccessResult<SearchResults> {
        let scope = ObservationScope::with_fields("SEARCH", &[("term", term)]);
        match self.run(term, cancel).await {
            Ok(results) => {
                scope.complete_with_fields(&[
                    (
                        "path",
                        match results.path {
                            SearchPath::Indexed => "indexed",
                            SearchPath::Degraded => "degraded",
                        },
                    ),
                    ("rows", results.rows.len().to_string().as_str()),
                ]);
                Ok(results)
            }
            Err(err) => {
                scope.fail(err.code(), &err.to_string());
                Err(err)
            }
        }
    }

    async fn run(&self, term: &str, cancel: &CancelSignal) -> AccessResult<SearchResults> {
        let params = [Self::like_param(term)];
        let statement = self.statement();

        let indexed = cancel
            .run(self.query.query(&statement, &params))
            .await
            .map_err(|err| self.cancelled(term, err))?;
        match indexed {
            Ok(rows) => Ok(SearchResults {
                rows,
                path: SearchPath::Indexed,
                failed: 0,
            }),
            Err(EngineError::IndexUnavailable(reason)) => {
                self.metrics.increment_degraded_queries();
                log_event_with_fields(
                    Event::QueryDegraded,
                    &[("term", term), ("reason", reason.as_str())],
                );
                self.degraded(term, &params, cancel).await
            }
            Err(err) => Err(AccessError::Engine(err)),
        }
    }

    async fn degraded(
        &self,
        term: &str,
        params: &[Value],
        cancel: &CancelSignal,
    ) -> AccessResult<SearchResults> {
        let statement = self.id_statement();
        let id_rows = cancel
            .run(self.query.query(&statement, params))
            .await
            .map_err(|err| self.cancelled(term, err))?
            .map_err(AccessError::Engine)?;

        let ids: Vec<&str> = id_rows
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str))
            .collect();

        let batch = self
            .fetcher
            .fetch_many(ids.as_slice(), self.concurrency, cancel)
            .await?;

        let rows = batch
            .documents()
            .into_iter()
            .map(|(_, doc)| self.project(&doc.value))
            .collect();

        let failed = batch.errors();
        if failed > 0 {
            log_event_with_fields(
                Event::SearchPartial,
                &[
                    ("term", term),
                    ("matched", ids.len().to_string().as_str()),
                    ("failed", failed.to_string().as_str()),
                ],
            );
        }

        Ok(SearchResults {
            rows,
            path: SearchPath::Degraded,
            failed,
        })
    }

    fn cancelled(&self, term: &str, err: AccessError) -> AccessError {
        record_cancellation(&self.metrics, &[("term", term)]);
        err
    }

    /// Requested fields of a document; fields it lacks are omitted
    fn project(&self, value: &Value) -> Value {
        let row: Map<String, Value> = self
            .config
            .projection
            .iter()
            .filter_map(|field| value.get(field).map(|v| (field.clone(), v.clone())))
            .collect();
        Value::Object(row)
    }
}
