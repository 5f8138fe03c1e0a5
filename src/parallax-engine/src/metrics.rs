//! Metrics collection for query execution.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Metrics for a single operator.
#[derive(Debug, Clone, Default)]
pub struct OperatorMetrics {
    /// Number of batches produced.
    pub batches: u64,
    /// Number of samples emitted.
    pub samples_out: u64,
    /// Total execution time.
    pub exec_time: Duration,
}

impl OperatorMetrics {
    /// Increment the batch count.
    pub fn add_batch(&mut self) {
        self.batches += 1;
    }

    /// Add emitted samples.
    pub fn add_samples(&mut self, count: usize) {
        self.samples_out += count as u64;
    }

    /// Add execution time.
    pub fn add_time(&mut self, duration: Duration) {
        self.exec_time += duration;
    }
}

impl std::fmt::Display for OperatorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batches={}, samples={}, time={:?}",
            self.batches, self.samples_out, self.exec_time
        )
    }
}

/// Sink for collecting operator metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsSink {
    metrics: Arc<RwLock<HashMap<String, OperatorMetrics>>>,
}

impl MetricsSink {
    /// Create a new metrics sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update metrics for an operator using a closure.
    pub fn update<F>(&self, operator_id: &str, f: F)
    where
        F: FnOnce(&mut OperatorMetrics),
    {
        let mut guard = self.metrics.write().expect("metrics lock poisoned");
        let metrics = guard.entry(operator_id.to_string()).or_default();
        f(metrics);
    }

    /// Get metrics for an operator.
    pub fn get(&self, operator_id: &str) -> Option<OperatorMetrics> {
        self.metrics
            .read()
            .expect("metrics lock poisoned")
            .get(operator_id)
            .cloned()
    }

    /// Get all metrics.
    pub fn all(&self) -> HashMap<String, OperatorMetrics> {
        self.metrics.read().expect("metrics lock poisoned").clone()
    }

    /// Total samples emitted across operators.
    pub fn total_samples(&self) -> u64 {
        self.metrics
            .read()
            .expect("metrics lock poisoned")
            .values()
            .map(|m| m.samples_out)
            .sum()
    }

    /// Format per-operator metrics for diagnostics.
    pub fn format_analyze(&self) -> String {
        let metrics = self.metrics.read().expect("metrics lock poisoned");
        let mut output = String::new();
        for (op, m) in metrics.iter() {
            let _ = writeln!(output, "{op}: {m}");
        }
        if output.is_empty() {
            output.push_str("No metrics collected.\n");
        }
        output
    }
}

/// Timer for measuring operator execution time.
#[derive(Debug)]
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Stop and return elapsed time.
    #[must_use]
    pub fn stop(self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for ExecutionTimer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_update() {
        let sink = MetricsSink::new();
        sink.update("engine", |m| {
            m.add_batch();
            m.add_samples(100);
        });
        sink.update("engine", |m| m.add_samples(50));

        let metrics = sink.get("engine").unwrap();
        assert_eq!(metrics.batches, 1);
        assert_eq!(metrics.samples_out, 150);
        assert_eq!(sink.total_samples(), 150);
    }

    #[test]
    fn test_timer() {
        let timer = ExecutionTimer::start();
        let elapsed = timer.stop();
        assert!(elapsed >= Duration::ZERO);
    }
}
