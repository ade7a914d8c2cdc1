//! Observable events
//!
//! Every notable transition of the access layer's state machines has a
//! typed event. Events carry their own severity so call sites only supply
//! fields.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Retry executor
    /// A transient failure will be retried after a delay
    RetryScheduled,
    /// Retry budget spent; the operation gave up
    RetriesExhausted,

    // Replica reads
    /// Primary unreachable, answering from a replica
    ReplicaFallback,

    // Optimistic writes
    /// Upsert failed transiently; the write may or may not have applied
    UpsertAmbiguous,
    /// Re-read settled an ambiguous upsert
    UpsertVerified,

    // Durable increments
    /// Conditional write lost a CAS race or missed its durability target
    IncrementConflict,
    /// Conditional write timed out; replaying after the settle delay
    IncrementAmbiguous,
    /// Replay found the original write had landed
    IncrementReconciled,

    // Batch reads
    /// Primary pass finished
    BatchPrimaryComplete,
    /// Replica pass finished
    BatchReplicaComplete,

    // Search
    /// Index unavailable, switching to ID scan plus batched fetch
    QueryDegraded,
    /// Some documents could not be fetched even from replicas
    SearchPartial,

    /// Caller cancelled or the deadline passed
    OperationCancelled,

    // Demo harness
    ConfigLoaded,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::RetryScheduled => "RETRY_SCHEDULED",
            Event::RetriesExhausted => "RETRIES_EXHAUSTED",
            Event::ReplicaFallback => "REPLICA_FALLBACK",
            Event::UpsertAmbiguous => "UPSERT_AMBIGUOUS",
            Event::UpsertVerified => "UPSERT_VERIFIED",
            Event::IncrementConflict => "INCREMENT_CONFLICT",
            Event::IncrementAmbiguous => "INCREMENT_AMBIGUOUS",
            Event::IncrementReconciled => "INCREMENT_RECONCILED",
            Event::BatchPrimaryComplete => "BATCH_PRIMARY_COMPLETE",
            Event::BatchReplicaComplete => "BATCH_REPLICA_COMPLETE",
            Event::QueryDegraded => "QUERY_DEGRADED",
            Event::SearchPartial => "SEARCH_PARTIAL",
            Event::OperationCancelled => "OPERATION_CANCELLED",
            Event::ConfigLoaded => "CONFIG_LOADED",
        }
    }

    /// Severity this event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::RetryScheduled | Event::BatchPrimaryComplete | Event::BatchReplicaComplete => {
                Severity::Trace
            }
            Event::RetriesExhausted
            | Event::ReplicaFallback
            | Event::UpsertAmbiguous
            | Event::IncrementConflict
            | Event::IncrementAmbiguous
            | Event::QueryDegraded
            | Event::SearchPartial
            | Event::OperationCancelled => Severity::Warn,
            Event::UpsertVerified | Event::IncrementReconciled | Event::ConfigLoaded => {
                Severity::Info
            }
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
