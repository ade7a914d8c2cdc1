//! Access layer configuration
//!
//! Loaded from a JSON file. Every section and every field inside a section
//! is optional; omitted values take the defaults below.
//!
//! ```json
//! {
//!   "retry":         { "retries": 2, "delay_ms": 1000, "factor": 1.0 },
//!   "replica_retry": { "retries": 2, "delay_ms": 1000, "factor": 2.0 },
//!   "verify_retry":  { "retries": 4, "delay_ms": 1000, "factor": 1.0 },
//!   "increment":     { "max_conflict_retries": 5, "settle_delay_ms": 1000, "durability": "majority" },
//!   "batch":         { "concurrency": null },
//!   "search":        { "keyspace": "travel-sample", "field": "airportname", "projection": ["airportname", "city"] }
//! }
//! ```

use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::DurabilityLevel;

use super::backoff::RetryState;
use super::errors::{AccessError, AccessResult};

/// Upper bound accepted for `increment.max_conflict_retries`
const MAX_CONFLICT_RETRIES_LIMIT: u32 = 100;

/// One retry policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    pub retries: u32,
    pub delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
}

impl RetryPolicyConfig {
    pub fn new(retries: u32, delay_ms: u64, factor: f64) -> Self {
        Self {
            retries,
            delay_ms,
            factor,
        }
    }

    /// Initial retry state for this policy
    pub fn to_state(&self) -> RetryState {
        RetryState::new(self.retries, Duration::from_millis(self.delay_ms), self.factor)
    }

    fn validate(&self, section: &str) -> AccessResult<()> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(AccessError::config(format!(
                "{}.factor must be >= 1, got {}",
                section, self.factor
            )));
        }
        if self.retries > 0 && self.delay_ms == 0 {
            return Err(AccessError::config(format!(
                "{}.delay_ms must be > 0 when retries > 0",
                section
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementConfig {
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_durability")]
    pub durability: DurabilityLevel,
}

impl IncrementConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for IncrementConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
            settle_delay_ms: default_settle_delay_ms(),
            durability: default_durability(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Reads in flight per pass. Absent means full fan-out.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl BatchConfig {
    /// `None` when unbounded. Zero is rejected by validation.
    pub fn window(&self) -> Option<NonZeroUsize> {
        self.concurrency.and_then(NonZeroUsize::new)
    }
}

/// Where and what the search queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    #[serde(default = "default_search_field")]
    pub field: String,
    #[serde(default = "default_projection")]
    pub projection: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keyspace: default_keyspace(),
            field: default_search_field(),
            projection: default_projection(),
        }
    }
}

impl SearchConfig {
    fn validate(&self) -> AccessResult<()> {
        if self.keyspace.is_empty() || self.keyspace.contains('`') {
            return Err(AccessError::config(format!(
                "search.keyspace is not a valid keyspace name: '{}'",
                self.keyspace
            )));
        }
        if !is_identifier(&self.field) {
            return Err(AccessError::config(format!(
                "search.field is not a valid identifier: '{}'",
                self.field
            )));
        }
        if self.projection.is_empty() {
            return Err(AccessError::config("search.projection must not be empty"));
        }
        if let Some(bad) = self.projection.iter().find(|f| !is_identifier(f)) {
            return Err(AccessError::config(format!(
                "search.projection contains an invalid identifier: '{}'",
                bad
            )));
        }
        Ok(())
    }
}

/// Complete access layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Plain retried reads
    #[serde(default = "default_retry")]
    pub retry: RetryPolicyConfig,

    /// Retries before a replica fallback
    #[serde(default = "default_replica_retry")]
    pub replica_retry: RetryPolicyConfig,

    /// Read-back after an ambiguous upsert
    #[serde(default = "default_verify_retry")]
    pub verify_retry: RetryPolicyConfig,

    #[serde(default)]
    pub increment: IncrementConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

fn default_factor() -> f64 {
    1.0
}
fn default_retry() -> RetryPolicyConfig {
    RetryPolicyConfig::new(2, 1000, 1.0)
}
fn default_replica_retry() -> RetryPolicyConfig {
    RetryPolicyConfig::new(2, 1000, 2.0)
}
fn default_verify_retry() -> RetryPolicyConfig {
    RetryPolicyConfig::new(4, 1000, 1.0)
}
fn default_max_conflict_retries() -> u32 {
    5
}
fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_durability() -> DurabilityLevel {
    DurabilityLevel::Majority
}
fn default_keyspace() -> String {
    "travel-sample".to_string()
}
fn default_search_field() -> String {
    "airportname".to_string()
}
fn default_projection() -> Vec<String> {
    vec!["airportname".to_string(), "city".to_string()]
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: default_retry(),
            replica_retry: default_replica_retry(),
            verify_retry: default_verify_retry(),
            increment: IncrementConfig::default(),
            batch: BatchConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl ResilienceConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> AccessResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| AccessError::config(format!("Failed to read config: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json(content: &str) -> AccessResult<Self> {
        let config: ResilienceConfig = serde_json::from_str(content)
            .map_err(|e| AccessError::config(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AccessResult<()> {
        self.retry.validate("retry")?;
        self.replica_retry.validate("replica_retry")?;
        self.verify_retry.validate("verify_retry")?;

        if self.increment.max_conflict_retries > MAX_CONFLICT_RETRIES_LIMIT {
            return Err(AccessError::config(format!(
                "increment.max_conflict_retries must be <= {}",
                MAX_CONFLICT_RETRIES_LIMIT
            )));
        }

        if self.batch.concurrency == Some(0) {
            return Err(AccessError::config("batch.concurrency must be > 0"));
        }

        self.search.validate()
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ResilienceConfig::from_json("{}").unwrap();
        assert_eq!(config, ResilienceConfig::default());
        assert_eq!(config.retry.to_state().remaining(), 2);
        assert_eq!(config.replica_retry.to_state().factor(), 2.0);
        assert_eq!(config.verify_retry.retries, 4);
        assert_eq!(config.increment.durability, DurabilityLevel::Majority);
        assert_eq!(config.batch.window(), None);
        assert_eq!(config.search.projection, vec!["airportname", "city"]);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("failsafe.json");
        let content = json!({
            "retry": {"retries": 3, "delay_ms": 250},
            "increment": {"durability": "persist_to_majority"},
            "batch": {"concurrency": 8}
        });
        fs::write(&path, content.to_string()).unwrap();

        let config = ResilienceConfig::load(&path).unwrap();
        assert_eq!(config.retry, RetryPolicyConfig::new(3, 250, 1.0));
        assert_eq!(config.increment.durability, DurabilityLevel::PersistToMajority);
        assert_eq!(config.increment.max_conflict_retries, 5);
        assert_eq!(config.batch.window(), NonZeroUsize::new(8));
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = ResilienceConfig::load(&temp_dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code(), "FAILSAFE_CONFIG");
    }

    #[test]
    fn test_rejects_shrinking_factor() {
        let err = ResilienceConfig::from_json(
            r#"{"replica_retry": {"retries": 2, "delay_ms": 1000, "factor": 0.5}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("replica_retry.factor"));
    }

    #[test]
    fn test_rejects_zero_delay_with_retries() {
        assert!(ResilienceConfig::from_json(r#"{"retry": {"retries": 1, "delay_ms": 0}}"#).is_err());
        assert!(ResilienceConfig::from_json(r#"{"retry": {"retries": 0, "delay_ms": 0}}"#).is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(ResilienceConfig::from_json(r#"{"batch": {"concurrency": 0}}"#).is_err());
    }

    #[test]
    fn test_rejects_bad_search_identifiers() {
        assert!(ResilienceConfig::from_json(r#"{"search": {"projection": []}}"#).is_err());
        assert!(
            ResilienceConfig::from_json(r#"{"search": {"field": "name) OR (1=1"}}"#).is_err()
        );
        assert!(ResilienceConfig::from_json(r#"{"search": {"keyspace": "a`b"}}"#).is_err());
    }

    #[test]
    fn test_rejects_unbounded_conflict_retries() {
        assert!(
            ResilienceConfig::from_json(r#"{"increment": {"max_conflict_retries": 1000}}"#)
                .is_err()
        );
    }
}
