//! Caller-supplied cancellation
//!
//! A [`CancelSignal`] combines a cancellation token with an optional
//! deadline. Every suspension point of the access layer (engine calls and
//! backoff delays) races against it; when it fires, the pending future and
//! any timer are dropped and the operation resolves to
//! [`AccessError::Cancelled`].
//!
//! Components count and log a cancellation where they observe it, via
//! [`CancelSignal::run_for`] or [`record_cancellation`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

use super::errors::{AccessError, AccessResult};

#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelSignal {
    /// A signal that only fires when cancelled explicitly
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. a child of an application shutdown token
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Also fire at `deadline`
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Also fire once `timeout` has elapsed from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fire the signal
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Drive `fut` to completion unless the signal fires first
    pub async fn run<F: Future>(&self, fut: F) -> AccessResult<F::Output> {
        if self.is_cancelled() {
            return Err(AccessError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(AccessError::Cancelled),
            _ = expiry(self.deadline) => Err(AccessError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Cancellable sleep
    pub async fn sleep(&self, duration: Duration) -> AccessResult<()> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// [`run`](Self::run) on behalf of `key`, recording a cancellation
    pub(crate) async fn run_for<F: Future>(
        &self,
        key: &str,
        metrics: &MetricsRegistry,
        fut: F,
    ) -> AccessResult<F::Output> {
        let result = self.run(fut).await;
        if result.is_err() {
            record_cancellation(metrics, &[("key", key)]);
        }
        result
    }
}

/// Count a cancellation and emit `OPERATION_CANCELLED`
pub(crate) fn record_cancellation(metrics: &MetricsRegistry, fields: &[(&str, &str)]) {
    metrics.increment_cancellations();
    log_event_with_fields(Event::OperationCancelled, fields);
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_run_for_records_cancellation() {
        let metrics = MetricsRegistry::new();
        let signal = CancelSignal::new();

        assert_eq!(signal.run_for("k", &metrics, async { 1 }).await, Ok(1));
        assert_eq!(metrics.snapshot().cancellations, 0);

        signal.cancel();
        assert_eq!(
            signal.run_for("k", &metrics, async { 1 }).await,
            Err(AccessError::Cancelled)
        );
        assert_eq!(metrics.snapshot().cancellations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes() {
        let signal = CancelSignal::new();
        assert_eq!(signal.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_run() {
        let signal = CancelSignal::new();
        signal.cancel();
        assert!(signal.is_cancelled());
        assert_eq!(signal.run(async { 7 }).await, Err(AccessError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let signal = CancelSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = signal.sleep(Duration::from_secs(60)).await;
        assert_eq!(result, Err(AccessError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let signal = CancelSignal::new().with_timeout(Duration::from_millis(200));
        let result = signal.sleep(Duration::from_secs(5)).await;
        assert_eq!(result, Err(AccessError::Cancelled));
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_not_reached() {
        let signal = CancelSignal::new().with_timeout(Duration::from_secs(5));
        assert_eq!(signal.sleep(Duration::from_millis(10)).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_token() {
        let parent = CancellationToken::new();
        let signal = CancelSignal::from_token(parent.child_token());
        parent.cancel();
        assert!(signal.is_cancelled());
    }
}
