//! Storage and query engine boundary
//!
//! The access layer treats the storage engine and the query engine as black
//! boxes reachable through the two traits below. Clients are injected as
//! `Arc<dyn StorageEngine>` / `Arc<dyn QueryEngine>`; there is no global
//! handle.
//!
//! - `get` / `get_replica` / `upsert` on the key-value side
//! - `query(statement, params)` on the query side
//! - Backend codes are translated by [`codes`] into [`EngineError`]

pub mod codes;
mod errors;
pub mod memory;
mod types;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

pub use errors::{EngineError, EngineResult};
pub use memory::{CallCounts, Fault, FaultOp, MemoryCluster};
pub use types::{Cas, Document, DurabilityLevel, TransientKind, UpsertOptions};

/// Boxed future returned by engine calls
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = EngineResult<T>> + Send + 'a>>;

/// Key-value storage engine
pub trait StorageEngine: Send + Sync {
    /// Read the active copy of a document
    fn get<'a>(&'a self, key: &'a str) -> EngineFuture<'a, Document>;

    /// Read a single replica copy. No retry semantics of its own.
    fn get_replica<'a>(&'a self, key: &'a str) -> EngineFuture<'a, Document>;

    /// Create or replace a document, returning the new CAS
    fn upsert<'a>(
        &'a self,
        key: &'a str,
        value: Value,
        options: UpsertOptions,
    ) -> EngineFuture<'a, Cas>;
}

/// Query engine over secondary indexes
pub trait QueryEngine: Send + Sync {
    /// Execute a parameterized statement, returning its rows
    fn query<'a>(&'a self, statement: &'a str, params: &'a [Value])
        -> EngineFuture<'a, Vec<Value>>;
}
