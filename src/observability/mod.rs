//! Observability subsystem
//!
//! - Structured logging (JSON lines)
//! - Typed lifecycle events with built-in severities
//! - Atomic counters
//! - Per-operation scopes with correlation ids
//!
//! Observability is read-only: nothing here influences retry, fallback or
//! conflict decisions, and a failed write to stdout is ignored.
//!
//! # Usage
//!
//! ```ignore
//! use failsafe_kv::observability::{log_event_with_fields, Event, ObservationScope};
//!
//! let scope = ObservationScope::for_key("INCREMENT", "SD_inc_balance");
//! log_event_with_fields(Event::IncrementConflict, &[("key", "SD_inc_balance")]);
//! scope.complete();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::ObservationScope;

/// Emit `event` at its built-in severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Emit `event` with extra key/value fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_without_fields() {
        log_event(Event::ConfigLoaded);
    }

    #[test]
    fn test_event_with_fields() {
        log_event_with_fields(Event::ReplicaFallback, &[("key", "airport_1"), ("kind", "timeout")]);
    }
}
