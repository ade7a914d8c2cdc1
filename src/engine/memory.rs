//! In-memory cluster
//!
//! A single-keyspace implementation of both engine traits. Active and
//! replica copies are kept separately so tests and the demo CLI can stage
//! stale replicas, and faults can be scripted per key and operation.
//!
//! Faults are consumed in FIFO order, one per call. A scripted fault fires
//! before any state is inspected, except [`Fault::ApplyThenFail`] on an
//! upsert, which performs the write and then reports the error. That is how
//! an ambiguous write is simulated.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::{Map, Value};

use super::codes::{self, ClientFault};
use super::errors::{EngineError, EngineResult};
use super::types::{Cas, Document, UpsertOptions};
use super::{EngineFuture, QueryEngine, StorageEngine};

const STATEMENT_PATTERN: &str = r"(?is)^\s*SELECT\s+(?P<projection>.+?)\s+FROM\s+`(?P<keyspace>[^`]+)`\s+WHERE\s+LOWER\((?P<field>[A-Za-z_][A-Za-z0-9_]*)\)\s+LIKE\s+\$1\s*$";
const META_ID_PATTERN: &str = r"(?i)^META\(\)\.id(?:\s+AS\s+(?P<alias>[A-Za-z_][A-Za-z0-9_]*))?$";

/// Engine operation a fault is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    Get,
    GetReplica,
    Upsert,
}

/// A scripted failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Report the error without touching state
    Fail(EngineError),
    /// Apply the write, then report the error. Reads treat this like `Fail`.
    ApplyThenFail(EngineError),
}

impl Fault {
    fn into_error(self) -> EngineError {
        match self {
            Fault::Fail(err) | Fault::ApplyThenFail(err) => err,
        }
    }
}

/// Number of engine calls served, by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallCounts {
    pub gets: u64,
    pub replica_gets: u64,
    pub upserts: u64,
    pub queries: u64,
}

#[derive(Debug, Clone)]
struct Stored {
    value: Value,
    cas: Cas,
}

impl Stored {
    fn to_document(&self) -> Document {
        Document::new(self.value.clone(), self.cas)
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    active: HashMap<String, Stored>,
    replicas: HashMap<String, Stored>,
    last_cas: u64,
    faults: HashMap<(FaultOp, String), VecDeque<Fault>>,
    query_faults: VecDeque<EngineError>,
    calls: CallCounts,
    replication_paused: bool,
}

impl ClusterState {
    fn next_cas(&mut self) -> Cas {
        self.last_cas += 1;
        Cas::new(self.last_cas)
    }

    fn take_fault(&mut self, op: FaultOp, key: &str) -> Option<Fault> {
        let slot = (op, key.to_string());
        let queue = self.faults.get_mut(&slot)?;
        let fault = queue.pop_front();
        if queue.is_empty() {
            self.faults.remove(&slot);
        }
        fault
    }

    fn store(&mut self, key: &str, value: Value) -> Cas {
        let cas = self.next_cas();
        let stored = Stored { value, cas };
        if !self.replication_paused {
            self.replicas.insert(key.to_string(), stored.clone());
        }
        self.active.insert(key.to_string(), stored);
        cas
    }
}

/// Decrements the in-flight counter when a call finishes
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fault-injectable in-memory storage and query engine
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: RwLock<ClusterState>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before it is served
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ClusterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a document on the active node (and its replica unless
    /// replication is paused), bypassing faults and call counters.
    pub fn seed(&self, key: &str, value: Value) -> Cas {
        self.write_state().store(key, value)
    }

    /// Store a document on the replica only, e.g. a stale copy
    pub fn seed_replica(&self, key: &str, value: Value) -> Cas {
        let mut state = self.write_state();
        let cas = state.next_cas();
        state.replicas.insert(key.to_string(), Stored { value, cas });
        cas
    }

    /// Stop (or resume) copying writes to replicas
    pub fn pause_replication(&self, paused: bool) {
        self.write_state().replication_paused = paused;
    }

    /// Queue a fault for the next `op` on `key`
    pub fn inject(&self, op: FaultOp, key: &str, fault: Fault) {
        self.write_state()
            .faults
            .entry((op, key.to_string()))
            .or_default()
            .push_back(fault);
    }

    /// Queue the same failure `times` times
    pub fn inject_times(&self, op: FaultOp, key: &str, err: EngineError, times: usize) {
        for _ in 0..times {
            self.inject(op, key, Fault::Fail(err.clone()));
        }
    }

    /// Queue a failure expressed as a key-value status code.
    /// A success status queues nothing.
    pub fn inject_status(&self, op: FaultOp, key: &str, status: u16) {
        if let Err(err) = codes::from_kv_status(status) {
            self.inject(op, key, Fault::Fail(err));
        }
    }

    /// Queue a failure expressed as a client-side transport condition
    pub fn inject_client_fault(&self, op: FaultOp, key: &str, fault: ClientFault) {
        self.inject(op, key, Fault::Fail(codes::from_client_fault(fault)));
    }

    /// Fail the next query with `err`
    pub fn inject_query_fault(&self, err: EngineError) {
        self.write_state().query_faults.push_back(err);
    }

    /// Fail the next query with a query service error code
    pub fn inject_query_code(&self, code: u32, message: &str) {
        self.inject_query_fault(codes::from_query_code(code, message));
    }

    /// Calls served so far
    pub fn calls(&self) -> CallCounts {
        self.write_state().calls
    }

    /// Current active copy, without counting a call
    pub fn peek(&self, key: &str) -> Option<Document> {
        self.write_state().active.get(key).map(Stored::to_document)
    }

    /// Highest number of calls observed in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let slot = InFlight(&self.in_flight);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        slot
    }

    async fn read(&self, op: FaultOp, key: &str) -> EngineResult<Document> {
        let _slot = self.enter().await;
        let mut state = self.write_state();
        match op {
            FaultOp::GetReplica => state.calls.replica_gets += 1,
            _ => state.calls.gets += 1,
        }
        if let Some(fault) = state.take_fault(op, key) {
            return Err(fault.into_error());
        }
        let copies = match op {
            FaultOp::GetReplica => &state.replicas,
            _ => &state.active,
        };
        copies
            .get(key)
            .map(Stored::to_document)
            .ok_or(EngineError::KeyNotFound)
    }

    async fn write(&self, key: &str, value: Value, options: UpsertOptions) -> EngineResult<Cas> {
        let _slot = self.enter().await;
        let mut state = self.write_state();
        state.calls.upserts += 1;

        let fault = state.take_fault(FaultOp::Upsert, key);
        if let Some(Fault::Fail(err)) = fault {
            return Err(err);
        }

        if let Some(expected) = options.expected_cas {
            match state.active.get(key) {
                None => return Err(EngineError::KeyNotFound),
                Some(stored) if stored.cas != expected => return Err(EngineError::CasConflict),
                Some(_) => {}
            }
        }

        let cas = state.store(key, value);
        match fault {
            Some(Fault::ApplyThenFail(err)) => Err(err),
            _ => Ok(cas),
        }
    }

    async fn run_query(&self, statement: &str, params: &[Value]) -> EngineResult<Vec<Value>> {
        let _slot = self.enter().await;
        {
            let mut state = self.write_state();
            state.calls.queries += 1;
            if let Some(err) = state.query_faults.pop_front() {
                return Err(err);
            }
        }

        let parsed = ParsedStatement::parse(statement)?;
        let pattern = params.first().and_then(Value::as_str).ok_or_else(|| {
            EngineError::backend(codes::query::SYNTAX_ERROR, "missing string parameter $1")
        })?;
        let matcher = like_to_regex(pattern)?;

        let state = self.write_state();
        let mut keys: Vec<&String> = state.active.keys().collect();
        keys.sort();

        let rows = keys
            .into_iter()
            .filter_map(|key| {
                let stored = &state.active[key];
                let field = stored.value.get(&parsed.field)?.as_str()?;
                matcher
                    .is_match(&field.to_lowercase())
                    .then(|| parsed.projection.row(key, &stored.value))
            })
            .collect();
        Ok(rows)
    }
}

impl StorageEngine for MemoryCluster {
    fn get<'a>(&'a self, key: &'a str) -> EngineFuture<'a, Document> {
        Box::pin(self.read(FaultOp::Get, key))
    }

    fn get_replica<'a>(&'a self, key: &'a str) -> EngineFuture<'a, Document> {
        Box::pin(self.read(FaultOp::GetReplica, key))
    }

    fn upsert<'a>(
        &'a self,
        key: &'a str,
        value: Value,
        options: UpsertOptions,
    ) -> EngineFuture<'a, Cas> {
        Box::pin(self.write(key, value, options))
    }
}

impl QueryEngine for MemoryCluster {
    fn query<'a>(
        &'a self,
        statement: &'a str,
        params: &'a [Value],
    ) -> EngineFuture<'a, Vec<Value>> {
        Box::pin(self.run_query(statement, params))
    }
}

/// What a statement selects
#[derive(Debug, PartialEq)]
enum Projection {
    /// `META().id [AS alias]`
    Id(String),
    Fields(Vec<String>),
}

impl Projection {
    fn row(&self, key: &str, value: &Value) -> Value {
        let mut row = Map::new();
        match self {
            Projection::Id(alias) => {
                row.insert(alias.clone(), Value::String(key.to_string()));
            }
            Projection::Fields(fields) => {
                for field in fields {
                    if let Some(v) = value.get(field) {
                        row.insert(field.clone(), v.clone());
                    }
                }
            }
        }
        Value::Object(row)
    }
}

/// The one statement shape this engine understands:
/// ``SELECT <projection> FROM `<keyspace>` WHERE LOWER(<field>) LIKE $1``
#[derive(Debug)]
struct ParsedStatement {
    projection: Projection,
    field: String,
}

impl ParsedStatement {
    fn parse(statement: &str) -> EngineResult<Self> {
        let shape = compile(STATEMENT_PATTERN)?;
        let captures = shape.captures(statement).ok_or_else(|| {
            EngineError::backend(codes::query::SYNTAX_ERROR, "unsupported statement")
        })?;

        let projection_text = captures["projection"].trim();
        let meta_id = compile(META_ID_PATTERN)?;
        let projection = match meta_id.captures(projection_text) {
            Some(id) => Projection::Id(
                id.name("alias")
                    .map_or_else(|| "id".to_string(), |m| m.as_str().to_string()),
            ),
            None => Projection::Fields(
                projection_text
                    .split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect(),
            ),
        };

        Ok(Self {
            projection,
            field: captures["field"].to_string(),
        })
    }
}

fn compile(pattern: &str) -> EngineResult<Regex> {
    Regex::new(pattern).map_err(|e| EngineError::backend(codes::query::SYNTAX_ERROR, e.to_string()))
}

/// Translate a SQL `LIKE` pattern into an anchored regex
fn like_to_regex(pattern: &str) -> EngineResult<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '%' => translated.push_str(".*"),
            '_' => translated.push('.'),
            c => translated.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    translated.push('$');
    RegexBuilder::new(&translated)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| EngineError::backend(codes::query::SYNTAX_ERROR, e.to_string()))
}
