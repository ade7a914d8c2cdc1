//! JSON output for the CLI
//!
//! - One JSON object per invocation on stdout
//! - Success: `{"status": "ok", "data": ..., "metrics": ...}`
//! - Failure: `{"status": "error", "code": ..., "message": ...}`
//!
//! Log lines go to stdout/stderr independently; use `--log-level error` to
//! keep stdout to the response alone.

use std::io::{self, Write};

use serde_json::{json, Value};

use crate::observability::MetricsSnapshot;

use super::errors::CliResult;

/// Render a success response
pub fn response(data: Value, metrics: &MetricsSnapshot) -> CliResult<Value> {
    Ok(json!({
        "status": "ok",
        "data": data,
        "metrics": serde_json::to_value(metrics)?,
    }))
}

/// Write a success response to stdout
pub fn write_response(data: Value, metrics: &MetricsSnapshot) -> CliResult<()> {
    write_value(&response(data, metrics)?)
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    write_value(&json!({
        "status": "error",
        "code": code,
        "message": message
    }))
}

fn write_value(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MetricsRegistry;

    #[test]
    fn test_response_envelope() {
        let metrics = MetricsRegistry::new();
        metrics.increment_attempts();
        let value = response(json!({"applied": true}), &metrics.snapshot()).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["data"]["applied"], true);
        assert_eq!(value["metrics"]["attempts"], 1);
        assert!(value["metrics"]["captured_at"].is_string());
    }
}
