//! failsafe-kv - a resilient access layer for a replicated key-value store
//!
//! - `engine`: storage/query engine boundary, error taxonomy, in-memory cluster
//! - `resilience`: retry, replica fallback, optimistic and durable writes,
//!   batched reads and degraded search
//! - `observability`: structured logging, events, metrics
//! - `cli`: demo command line over a seeded in-memory cluster

pub mod cli;
pub mod engine;
pub mod observability;
pub mod resilience;
