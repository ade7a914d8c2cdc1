//! CLI command implementations
//!
//! Each invocation builds a fresh in-memory cluster, seeds it with a few
//! airport documents and a balance document, scripts the requested faults
//! and runs one access-layer operation against it.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::engine::codes::{self, ClientFault};
use crate::engine::{EngineError, Fault, FaultOp, MemoryCluster, QueryEngine, StorageEngine};
use crate::observability::{log_event_with_fields, Event, Logger, MetricsSnapshot, Severity};
use crate::resilience::{AccessLayer, BatchResult, CancelSignal, Outcome, ResilienceConfig};

use super::args::{Cli, Command, FaultArgs, ReadMode};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Scripted failures queued per `--fail-primary` / `--fail-replica` key.
/// Enough to outlast any configured retry budget in the demo.
const PERSISTENT_FAULTS: usize = 32;

/// Airport documents in the demo keyspace: key, name, city, FAA code
const AIRPORTS: &[(&str, &str, &str, &str)] = &[
    ("airport_1254", "Calais Dunkerque", "Calais", "CQF"),
    ("airport_1255", "Peronne St Quentin", "Peronne", ""),
    ("airport_3469", "San Francisco Intl", "San Francisco", "SFO"),
    ("airport_3484", "Los Angeles Intl", "Los Angeles", "LAX"),
    ("airport_3567", "Colorado Springs Muni", "Colorado Springs", "COS"),
    ("airport_3614", "Palm Springs Intl", "Palm Springs", "PSP"),
    ("airport_3719", "Springfield Branson Natl", "Springfield", "SGF"),
    ("airport_3959", "Abraham Lincoln Capital", "Springfield", "SPI"),
    ("airport_507", "Heathrow", "London", "LHR"),
];

/// Parse CLI arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_cli(cli)
}

/// Run a parsed invocation, printing one JSON response
pub fn run_cli(cli: Cli) -> CliResult<()> {
    let severity: Severity = cli.log_level.parse().map_err(CliError::invalid_argument)?;
    Logger::set_min_severity(severity);

    let config = load_config(cli.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::io_error(format!("Failed to create tokio runtime: {}", e)))?;

    match rt.block_on(run_command(cli.command, &cli.faults, config)) {
        Ok((data, metrics)) => write_response(data, &metrics),
        Err(err) => {
            write_error(err.code_str(), err.message())?;
            Err(err)
        }
    }
}

/// Load configuration from `path`, or defaults when none is given
pub fn load_config(path: Option<&Path>) -> CliResult<ResilienceConfig> {
    let Some(path) = path else {
        return Ok(ResilienceConfig::default());
    };
    let config = ResilienceConfig::load(path)?;
    log_event_with_fields(
        Event::ConfigLoaded,
        &[("path", path.display().to_string().as_str())],
    );
    Ok(config)
}

/// Seed the demo documents
pub fn seed_cluster(cluster: &MemoryCluster) {
    for (key, name, city, faa) in AIRPORTS {
        cluster.seed(
            key,
            json!({"type": "airport", "airportname": name, "city": city, "faa": faa}),
        );
    }
    cluster.seed("SD_inc_balance", json!({"name": "John Smith", "balance": 5}));
    cluster.seed(
        "SD_inc_list",
        json!({"name": "John Smith", "transactions": [5], "total": []}),
    );
}

/// Queue the failures requested on the command line.
///
/// Write faults target `write_key`, the key of an upsert or increment.
pub fn apply_faults(cluster: &MemoryCluster, faults: &FaultArgs, write_key: Option<&str>) {
    for key in &faults.fail_primary {
        for _ in 0..PERSISTENT_FAULTS {
            cluster.inject_client_fault(FaultOp::Get, key, ClientFault::TimedOut);
        }
    }
    for key in &faults.fail_replica {
        for _ in 0..PERSISTENT_FAULTS {
            cluster.inject_client_fault(FaultOp::GetReplica, key, ClientFault::ConnectionRefused);
        }
    }

    if let Some(key) = write_key {
        cluster.inject_times(FaultOp::Upsert, key, EngineError::CasConflict, faults.conflicts);
        if faults.ambiguous {
            cluster.inject(FaultOp::Upsert, key, Fault::ApplyThenFail(EngineError::Timeout));
        }
    }

    if faults.index_down {
        cluster.inject_query_code(
            codes::query::NO_INDEX_AVAILABLE,
            "No index available on keyspace that matches your query",
        );
    }
}

fn write_key(command: &Command) -> Option<&str> {
    match command {
        Command::Upsert { key, .. } | Command::Increment { key, .. } => Some(key.as_str()),
        _ => None,
    }
}

/// Execute one command against a freshly seeded cluster
pub async fn run_command(
    command: Command,
    faults: &FaultArgs,
    config: ResilienceConfig,
) -> CliResult<(Value, MetricsSnapshot)> {
    let mut cluster = MemoryCluster::new();
    if let Some(ms) = faults.latency_ms {
        cluster = cluster.with_latency(Duration::from_millis(ms));
    }
    seed_cluster(&cluster);
    apply_faults(&cluster, faults, write_key(&command));

    let cluster = Arc::new(cluster);
    let access = AccessLayer::new(
        Arc::clone(&cluster) as Arc<dyn StorageEngine>,
        Arc::clone(&cluster) as Arc<dyn QueryEngine>,
        config,
    )?;
    let cancel = CancelSignal::new();

    let result = match command {
        Command::Get { key, mode } => get(&access, &key, mode, &cancel).await?,
        Command::Upsert { key, value } => {
            let value: Value = serde_json::from_str(&value)
                .map_err(|e| CliError::invalid_argument(format!("value is not JSON: {}", e)))?;
            let applied = access
                .optimistic_writer()
                .upsert_and_check(&key, value, &cancel)
                .await?;
            json!({
                "key": key,
                "applied": applied,
                "stored": cluster.peek(&key).map(|doc| doc.value),
            })
        }
        Command::Increment { key, field, amount } => {
            let doc = access
                .incrementer()
                .increment(&key, &field, amount, &cancel)
                .await?;
            json!({"key": key, "value": doc.value, "cas": doc.cas})
        }
        Command::Fetch { keys, concurrency } => {
            let window = match concurrency {
                Some(n) => Some(NonZeroUsize::new(n).ok_or_else(|| {
                    CliError::invalid_argument("--concurrency must be greater than 0")
                })?),
                None => access.config().batch.window(),
            };
            let batch = access
                .batch_fetcher()
                .fetch_many(keys.as_slice(), window, &cancel)
                .await?;
            render_batch(&batch)?
        }
        Command::Search { term } => {
            let results = access.search().search(&term, &cancel).await?;
            serde_json::to_value(results)?
        }
    };

    let data = json!({"result": result, "engine_calls": cluster.calls()});
    Ok((data, access.metrics().snapshot()))
}

async fn get(
    access: &AccessLayer,
    key: &str,
    mode: ReadMode,
    cancel: &CancelSignal,
) -> CliResult<Value> {
    let outcome = match mode {
        ReadMode::Retry => access.get(key, cancel).await,
        ReadMode::Replica => access.replica_reader().get(key, cancel).await,
        ReadMode::RetryThenReplica => {
            access
                .replica_reader()
                .get_retry_then_replica(key, cancel)
                .await
        }
    };
    let label = outcome.label();
    Ok(match outcome.into_result(key)? {
        Some(doc) => json!({"key": key, "outcome": label, "value": doc.value, "cas": doc.cas}),
        None => json!({"key": key, "outcome": label, "value": null}),
    })
}

fn render_batch(batch: &BatchResult) -> CliResult<Value> {
    let mut entries = Map::new();
    for key in batch.keys() {
        let Some(entry) = batch.get(key) else {
            continue;
        };
        let mut rendered = json!({
            "status": serde_json::to_value(entry.status())?,
            "source": serde_json::to_value(entry.source)?,
        });
        match &entry.outcome {
            Outcome::Found(doc) => rendered["value"] = doc.value.clone(),
            other => rendered["outcome"] = Value::String(other.label().to_string()),
        }
        entries.insert(key.to_string(), rendered);
    }
    Ok(json!({"entries": entries, "errors": batch.errors()}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn faults() -> FaultArgs {
        FaultArgs::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_with_conflict() {
        let mut faults = faults();
        faults.conflicts = 1;
        let command = Command::Increment {
            key: "SD_inc_balance".into(),
            field: "balance".into(),
            amount: 5,
        };

        let (data, metrics) = run_command(command, &faults, ResilienceConfig::default())
            .await
            .unwrap();
        assert_eq!(data["result"]["value"]["balance"], 10);
        assert_eq!(data["engine_calls"]["upserts"], 2);
        assert_eq!(metrics.cas_conflicts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_with_index_down() {
        let mut faults = faults();
        faults.index_down = true;
        let command = Command::Search {
            term: "spring".into(),
        };

        let (data, metrics) = run_command(command, &faults, ResilienceConfig::default())
            .await
            .unwrap();
        assert_eq!(data["result"]["path"], "degraded");
        assert_eq!(data["result"]["rows"].as_array().map(Vec::len), Some(3));
        assert_eq!(metrics.degraded_queries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_falls_back_to_replica() {
        let mut faults = faults();
        faults.fail_primary = vec!["airport_1254".into()];
        let command = Command::Get {
            key: "airport_1254".into(),
            mode: ReadMode::RetryThenReplica,
        };

        let (data, metrics) = run_command(command, &faults, ResilienceConfig::default())
            .await
            .unwrap();
        assert_eq!(data["result"]["value"]["city"], "Calais");
        assert_eq!(data["engine_calls"]["gets"], 3);
        assert_eq!(data["engine_calls"]["replica_gets"], 1);
        assert_eq!(metrics.replica_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_rejects_zero_concurrency() {
        let command = Command::Fetch {
            keys: vec!["airport_1254".into()],
            concurrency: Some(0),
        };
        let err = run_command(command, &faults(), ResilienceConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "FAILSAFE_CLI_INVALID_ARGUMENT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_rejects_bad_json() {
        let command = Command::Upsert {
            key: "k".into(),
            value: "{not json".into(),
        };
        assert!(run_command(command, &faults(), ResilienceConfig::default())
            .await
            .is_err());
    }

    #[test]
    fn test_load_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("failsafe.json");
        fs::write(&path, r#"{"verify_retry": {"retries": 1, "delay_ms": 10}}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.verify_retry.retries, 1);
        assert_eq!(load_config(None).unwrap(), ResilienceConfig::default());
    }

    #[test]
    fn test_load_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("failsafe.json");
        fs::write(&path, r#"{"batch": {"concurrency": 0}}"#).unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert_eq!(err.code_str(), "FAILSAFE_CLI_CONFIG_ERROR");
    }
}
