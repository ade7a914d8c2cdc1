//! Engine value types
//!
//! Documents, CAS tokens and write options exchanged with the storage engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison-and-swap version stamp issued by the storage engine.
///
/// Only equality is meaningful: two tokens tell whether a document changed
/// since it was read, never which version is newer. `Cas` deliberately does
/// not implement `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cas(u64);

impl Cas {
    /// Wrap a raw token.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw token value, for logging and wire adapters.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A document value together with the CAS token it was read at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub value: Value,
    pub cas: Cas,
}

impl Document {
    pub fn new(value: Value, cas: Cas) -> Self {
        Self { value, cas }
    }
}

/// Acknowledgment a write must reach before the engine reports success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityLevel {
    /// Accepted into memory on the active node
    #[default]
    None,
    /// Replicated to a majority of nodes
    Majority,
    /// Replicated to a majority and persisted on the active node
    MajorityAndPersistActive,
    /// Persisted on a majority of nodes
    PersistToMajority,
}

impl DurabilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Majority => "majority",
            Self::MajorityAndPersistActive => "majority_and_persist_active",
            Self::PersistToMajority => "persist_to_majority",
        }
    }

    /// True when the write must be confirmed beyond a single node's memory.
    pub fn is_durable(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Options for an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpsertOptions {
    /// Fail with a CAS conflict unless the stored token still equals this one
    pub expected_cas: Option<Cas>,
    pub durability: DurabilityLevel,
}

impl UpsertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cas(mut self, cas: Cas) -> Self {
        self.expected_cas = Some(cas);
        self
    }

    pub fn with_durability(mut self, durability: DurabilityLevel) -> Self {
        self.durability = durability;
        self
    }
}

/// The three failure classes eligible for retry or fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    Timeout,
    Network,
    Temporary,
}

impl TransientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Temporary => "temporary",
        }
    }

    /// Timeouts and network errors suggest the primary copy is unreachable,
    /// so a replica may still answer. A temporary failure means the node is
    /// up but refusing work.
    pub fn is_replica_eligible(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network)
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
