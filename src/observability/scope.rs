//! ObservationScope for operation-level start/complete logging
//!
//! - Logs `{name}_BEGIN` (TRACE) on creation
//! - Logs `{name}_COMPLETE` (INFO) with `elapsed_ms` on `complete`
//! - Logs `{name}_FAILED` (ERROR) on `fail`
//! - Logs `{name}_INCOMPLETE` (WARN) if dropped first, which is what
//!   happens when a caller drops the operation's future mid-flight
//!
//! Every line carries the scope's `op_id` so the retry, fallback and
//! conflict events of one operation can be correlated.

use std::time::Instant;

use uuid::Uuid;

use super::logger::{Logger, Severity};

/// A scope that logs the lifecycle of one access-layer operation
pub struct ObservationScope {
    name: &'static str,
    op_id: String,
    started: Instant,
    completed: bool,
    fields: Vec<(&'static str, String)>,
}

impl ObservationScope {
    /// Open a scope tagged with the given fields
    pub fn with_fields(name: &'static str, fields: &[(&'static str, &str)]) -> Self {
        let scope = Self {
            name,
            op_id: Uuid::new_v4().to_string(),
            started: Instant::now(),
            completed: false,
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        };
        scope.emit(Severity::Trace, "BEGIN", &[]);
        scope
    }

    /// Open a scope for an operation on a single key
    pub fn for_key(name: &'static str, key: &str) -> Self {
        Self::with_fields(name, &[("key", key)])
    }

    /// Correlation id shared by every line of this operation
    pub fn op_id(&self) -> &str {
        &self.op_id
    }

    /// Mark the scope as successfully completed
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Mark the scope as successfully completed with additional fields
    pub fn complete_with_fields(mut self, extra: &[(&str, &str)]) {
        self.completed = true;
        let elapsed = self.elapsed_ms();
        let mut fields: Vec<(&str, &str)> = extra.to_vec();
        fields.push(("elapsed_ms", elapsed.as_str()));
        self.emit(Severity::Info, "COMPLETE", &fields);
    }

    /// Mark the scope as failed
    pub fn fail(mut self, code: &str, reason: &str) {
        self.completed = true;
        let elapsed = self.elapsed_ms();
        self.emit(
            Severity::Error,
            "FAILED",
            &[("code", code), ("reason", reason), ("elapsed_ms", elapsed.as_str())],
        );
    }

    /// Check if the scope has been completed
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn elapsed_ms(&self) -> String {
        self.started.elapsed().as_millis().to_string()
    }

    fn emit(&self, severity: Severity, suffix: &str, extra: &[(&str, &str)]) {
        if !Logger::enabled(severity) {
            return;
        }
        let event = format!("{}_{}", self.name, suffix);
        let mut fields: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|(k, v)| (*k, v.as_str()))
            .collect();
        fields.push(("op_id", self.op_id.as_str()));
        fields.extend_from_slice(extra);
        Logger::log(severity, &event, &fields);
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.completed {
            self.emit(
                Severity::Warn,
                "INCOMPLETE",
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_creation() {
        let scope = ObservationScope::for_key("TEST", "k");
        assert!(!scope.is_completed());
        assert_eq!(scope.op_id().len(), 36);
        scope.complete();
    }

    #[test]
    fn test_scope_ids_are_unique() {
        let a = ObservationScope::for_key("TEST", "k");
        let b = ObservationScope::for_key("TEST", "k");
        assert_ne!(a.op_id(), b.op_id());
        a.complete();
        b.complete();
    }

    #[test]
    fn test_scope_complete_with_extra_fields() {
        let scope = ObservationScope::with_fields("TEST", &[("key", "k"), ("field", "balance")]);
        scope.complete_with_fields(&[("applied", "true")]);
    }

    #[test]
    fn test_scope_fail() {
        let scope = ObservationScope::for_key("TEST", "k");
        scope.fail("FAILSAFE_TEST", "something went wrong");
    }

    #[test]
    fn test_scope_drop_without_complete() {
        let scope = ObservationScope::for_key("TEST", "k");
        drop(scope);
    }
}
