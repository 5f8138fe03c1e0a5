//! Execution context for query execution.
//!
//! The context carries the storage handle, query parameters, cancellation
//! channel and metrics sink through every `series` and `next` call.

use std::sync::Arc;

use common_error::{ParallaxError, ParallaxResult};
use parallax_storage::SeriesStorage;
use tokio::sync::watch;

use crate::metrics::{MetricsSink, OperatorMetrics};

/// Default lookback window for instant-vector selection: 5 minutes.
pub const DEFAULT_LOOKBACK_DELTA_MS: i64 = 300_000;

/// Default number of step vectors per batch.
pub const DEFAULT_STEPS_BATCH: usize = 10;

/// Query parameters.
#[derive(Debug, Clone)]
pub struct QueryOpts {
    /// Start of the query range, in ms.
    pub start_ms: i64,
    /// End of the query range, in ms.
    pub end_ms: i64,
    /// Step between evaluation instants, in ms; `0` for an instant query.
    pub step_ms: i64,
    /// Maximum age a sample may have to be current at an instant.
    pub lookback_delta_ms: i64,
    /// Maximum number of step vectors per batch.
    pub steps_batch: usize,
    /// Fan-out degree of the coalesce exchange over selectors.
    pub parallelism: usize,
    /// Whether the `@` modifier is accepted.
    pub enable_at_modifier: bool,
}

impl Default for QueryOpts {
    fn default() -> Self {
        Self {
            start_ms: 0,
            end_ms: 0,
            step_ms: 0,
            lookback_delta_ms: DEFAULT_LOOKBACK_DELTA_MS,
            steps_batch: DEFAULT_STEPS_BATCH,
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            enable_at_modifier: true,
        }
    }
}

impl QueryOpts {
    /// Options for a range query.
    pub fn range(start_ms: i64, end_ms: i64, step_ms: i64) -> Self {
        Self {
            start_ms,
            end_ms,
            step_ms,
            ..Self::default()
        }
    }

    /// Options for an instant query at `ts_ms`.
    pub fn instant(ts_ms: i64) -> Self {
        Self::range(ts_ms, ts_ms, 0)
    }

    /// Set the lookback delta.
    pub fn with_lookback_delta(mut self, lookback_ms: i64) -> Self {
        self.lookback_delta_ms = lookback_ms;
        self
    }

    /// Set the steps-batch size.
    pub fn with_steps_batch(mut self, steps_batch: usize) -> Self {
        self.steps_batch = steps_batch;
        self
    }

    /// Set the parallelism degree.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Enable or disable the `@` modifier.
    pub fn with_at_modifier(mut self, enabled: bool) -> Self {
        self.enable_at_modifier = enabled;
        self
    }

    /// Total number of evaluation instants.
    pub fn num_steps(&self) -> i64 {
        if self.step_ms == 0 {
            1
        } else {
            (self.end_ms - self.start_ms) / self.step_ms + 1
        }
    }

    /// Check the options are consistent.
    pub fn validate(&self) -> ParallaxResult<()> {
        if self.end_ms < self.start_ms {
            return Err(ParallaxError::invalid_parameter(
                "query end must not precede start",
            ));
        }
        if self.step_ms < 0 {
            return Err(ParallaxError::invalid_parameter("step must not be negative"));
        }
        if self.step_ms == 0 && self.end_ms != self.start_ms {
            return Err(ParallaxError::invalid_parameter(
                "a range query requires a positive step",
            ));
        }
        if self.steps_batch == 0 {
            return Err(ParallaxError::invalid_parameter("steps_batch must be positive"));
        }
        Ok(())
    }
}

/// Execution context passed to all operators.
///
/// The context is shared across the pipeline; operators treat it as
/// read-only. Cloning is cheap and workers of the coalesce exchange each hold
/// a clone.
#[derive(Clone)]
pub struct ExecutionContext {
    storage: Arc<dyn SeriesStorage>,
    opts: QueryOpts,
    cancel_rx: watch::Receiver<bool>,
    metrics: Option<MetricsSink>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("opts", &self.opts)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Create a new execution context.
    pub fn new(storage: Arc<dyn SeriesStorage>, opts: QueryOpts) -> Self {
        let (_, cancel_rx) = watch::channel(false);
        Self {
            storage,
            opts,
            cancel_rx,
            metrics: Some(MetricsSink::new()),
        }
    }

    /// Attach a cancellation receiver.
    pub fn with_cancellation(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = cancel_rx;
        self
    }

    /// Disable metrics collection.
    pub fn without_metrics(mut self) -> Self {
        self.metrics = None;
        self
    }

    /// The storage handle.
    pub fn storage(&self) -> Arc<dyn SeriesStorage> {
        Arc::clone(&self.storage)
    }

    /// The query parameters.
    pub fn opts(&self) -> &QueryOpts {
        &self.opts
    }

    /// The metrics sink, if enabled.
    pub fn metrics(&self) -> Option<&MetricsSink> {
        self.metrics.as_ref()
    }

    /// Whether the query has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Fail with `ParallaxError::Cancelled` if the query was cancelled.
    pub fn check_cancelled(&self) -> ParallaxResult<()> {
        if self.is_cancelled() {
            Err(ParallaxError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Update operator metrics.
    pub fn update_metrics<F>(&self, operator_id: &str, f: F)
    where
        F: FnOnce(&mut OperatorMetrics),
    {
        if let Some(sink) = &self.metrics {
            sink.update(operator_id, f);
        }
    }
}

/// Handle for cancelling query execution.
///
/// Separate from the execution context so embedders can signal cancellation
/// from outside the pipeline.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    /// Create a new cancellation handle and receiver.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancel_tx: Arc::new(tx),
            },
            rx,
        )
    }

    /// Cancel the query.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_storage::MemoryStorage;

    #[test]
    fn test_opts_num_steps() {
        let opts = QueryOpts::range(0, 60_000, 15_000);
        assert_eq!(opts.num_steps(), 5);
        assert_eq!(QueryOpts::instant(1000).num_steps(), 1);
    }

    #[test]
    fn test_opts_validation() {
        assert!(QueryOpts::range(0, 100, 10).validate().is_ok());
        assert!(QueryOpts::range(100, 0, 10).validate().is_err());
        assert!(QueryOpts::range(0, 100, 0).validate().is_err());
    }

    #[test]
    fn test_cancellation() {
        let (handle, rx) = CancellationHandle::new();
        let storage = Arc::new(MemoryStorage::new());
        let ctx = ExecutionContext::new(storage, QueryOpts::instant(0)).with_cancellation(rx);

        assert!(ctx.check_cancelled().is_ok());
        handle.cancel();
        assert!(ctx.check_cancelled().unwrap_err().is_cancelled());
    }
}
