//! CLI module for failsafe-kv
//!
//! Runs access-layer operations against a seeded in-memory cluster:
//! - get: primary read with retry and/or replica fallback
//! - upsert: optimistic write reporting whether state changed
//! - increment: durable CAS-guarded field increment
//! - fetch: batched read with a replica pass
//! - search: indexed search with degraded fallback

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, FaultArgs, ReadMode};
pub use commands::{apply_faults, load_config, run, run_cli, run_command, seed_cluster};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
