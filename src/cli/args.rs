//! CLI argument definitions using clap
//!
//! Commands:
//! - failsafe-kv get <key>
//! - failsafe-kv upsert <key> <json>
//! - failsafe-kv increment <key> <field> <amount>
//! - failsafe-kv fetch <key>...
//! - failsafe-kv search <term>
//!
//! Every command runs against a freshly seeded in-memory cluster. The fault
//! flags script failures into that cluster before the command runs.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// failsafe-kv - resilient access to a replicated key-value store
#[derive(Parser, Debug)]
#[command(name = "failsafe-kv")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a JSON configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Minimum severity of log lines
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(flatten)]
    pub faults: FaultArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Failures scripted into the demo cluster
#[derive(Args, Debug, Default, Clone)]
pub struct FaultArgs {
    /// Primary reads of this key time out (repeatable)
    #[arg(long = "fail-primary", global = true, value_name = "KEY")]
    pub fail_primary: Vec<String>,

    /// Replica reads of this key time out too (repeatable)
    #[arg(long = "fail-replica", global = true, value_name = "KEY")]
    pub fail_replica: Vec<String>,

    /// The next write to the command's key applies, then reports a timeout
    #[arg(long, global = true)]
    pub ambiguous: bool,

    /// Writes to the command's key lose this many CAS races first
    #[arg(long, global = true, default_value_t = 0)]
    pub conflicts: usize,

    /// The secondary index is offline
    #[arg(long = "index-down", global = true)]
    pub index_down: bool,

    /// Per-call engine latency in milliseconds
    #[arg(long = "latency-ms", global = true)]
    pub latency_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read a document
    Get {
        key: String,

        /// How the read tolerates an unreachable primary
        #[arg(long, value_enum, default_value_t = ReadMode::RetryThenReplica)]
        mode: ReadMode,
    },

    /// Write a document and report whether it changed
    Upsert {
        key: String,

        /// Document body as JSON
        value: String,
    },

    /// Durably add to a numeric field
    Increment {
        key: String,
        field: String,

        #[arg(allow_hyphen_values = true)]
        amount: i64,
    },

    /// Read many documents with a replica pass for failures
    Fetch {
        #[arg(required = true)]
        keys: Vec<String>,

        /// Reads in flight per pass (overrides the configuration)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Search airports by name
    Search { term: String },
}

/// Read strategy for `get`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Retry the primary only
    Retry,
    /// One primary attempt, then a replica on timeout or network error
    Replica,
    /// Retry the primary, then one replica read
    RetryThenReplica,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
