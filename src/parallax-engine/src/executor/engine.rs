//! The engine driver.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use common_error::ParallaxResult;
use parallax_core::Sample;
use parallax_logical::Expr;
use parallax_storage::SeriesStorage;

use crate::executor::{
    ExecutionContext, InstantSample, QueryOpts, QueryResult, QueryValue, SeriesResult,
};
use crate::metrics::ExecutionTimer;
use crate::physical::PhysicalPlan;

/// Engine-level defaults applied to every query.
#[derive(Debug, Clone)]
pub struct EngineOpts {
    /// Lookback window for instant-vector selection.
    pub lookback_delta_ms: i64,
    /// Maximum step vectors per batch.
    pub steps_batch: usize,
    /// Fan-out degree of the coalesce exchange.
    pub parallelism: usize,
    /// Whether the `@` modifier is accepted.
    pub enable_at_modifier: bool,
}

impl Default for EngineOpts {
    fn default() -> Self {
        let defaults = QueryOpts::default();
        Self {
            lookback_delta_ms: defaults.lookback_delta_ms,
            steps_batch: defaults.steps_batch,
            parallelism: defaults.parallelism,
            enable_at_modifier: defaults.enable_at_modifier,
        }
    }
}

/// The query engine.
///
/// Builds the physical plan for an expression, pumps the root operator to
/// end-of-stream and assembles the result matrix or vector. Step vectors are
/// returned to the root pool as soon as their samples are appended to the
/// result rows.
#[derive(Debug, Default)]
pub struct Engine {
    opts: EngineOpts,
}

impl Engine {
    /// Create an engine with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with custom options.
    pub fn with_opts(opts: EngineOpts) -> Self {
        Self { opts }
    }

    fn query_opts(&self, start_ms: i64, end_ms: i64, step_ms: i64) -> QueryOpts {
        QueryOpts {
            start_ms,
            end_ms,
            step_ms,
            lookback_delta_ms: self.opts.lookback_delta_ms,
            steps_batch: self.opts.steps_batch,
            parallelism: self.opts.parallelism,
            enable_at_modifier: self.opts.enable_at_modifier,
        }
    }

    /// Evaluate an expression over `[start_ms, end_ms]` at `step_ms` spacing.
    pub async fn range_query(
        &self,
        storage: Arc<dyn SeriesStorage>,
        expr: &Expr,
        start_ms: i64,
        end_ms: i64,
        step_ms: i64,
    ) -> ParallaxResult<QueryResult> {
        self.execute(storage, expr, self.query_opts(start_ms, end_ms, step_ms), None)
            .await
    }

    /// Evaluate an expression at a single instant.
    pub async fn instant_query(
        &self,
        storage: Arc<dyn SeriesStorage>,
        expr: &Expr,
        ts_ms: i64,
    ) -> ParallaxResult<QueryResult> {
        self.execute(storage, expr, self.query_opts(ts_ms, ts_ms, 0), None)
            .await
    }

    /// Blocking [`Engine::range_query`].
    pub fn range_query_sync(
        &self,
        storage: Arc<dyn SeriesStorage>,
        expr: &Expr,
        start_ms: i64,
        end_ms: i64,
        step_ms: i64,
    ) -> ParallaxResult<QueryResult> {
        common_runtime::block_on(self.range_query(storage, expr, start_ms, end_ms, step_ms))?
    }

    /// Execute with explicit options and an optional cancellation receiver.
    pub async fn execute(
        &self,
        storage: Arc<dyn SeriesStorage>,
        expr: &Expr,
        opts: QueryOpts,
        cancel_rx: Option<watch::Receiver<bool>>,
    ) -> ParallaxResult<QueryResult> {
        opts.validate()?;
        let instant = opts.step_ms == 0;

        let mut ctx = ExecutionContext::new(Arc::clone(&storage), opts.clone());
        if let Some(rx) = cancel_rx {
            ctx = ctx.with_cancellation(rx);
        }

        let mut plan = PhysicalPlan::new(expr, &storage, &opts)?;
        debug!(expr = %expr, num_steps = opts.num_steps(), "executing query");

        let timer = ExecutionTimer::start();
        let root = plan.root_mut();
        let series = root.series(&ctx).await?;
        let pool = root.pool();

        let mut rows: Vec<Vec<Sample>> = vec![Vec::new(); series.len()];
        loop {
            ctx.check_cancelled()?;
            let Some(mut batch) = root.next(&ctx).await? else {
                break;
            };
            let mut emitted = 0;
            for vector in batch.drain(..) {
                for (id, value) in vector.iter() {
                    rows[id as usize].push(Sample::new(vector.t, value));
                    emitted += 1;
                }
                pool.put_step_vector(vector);
            }
            pool.put_vectors(batch);
            ctx.update_metrics("Engine", |m| {
                m.add_batch();
                m.add_samples(emitted);
            });
        }
        let elapsed = timer.stop();

        // Series without any sample are dropped from the result.
        let value = if instant {
            let samples = series
                .iter()
                .zip(rows)
                .filter_map(|(labels, mut row)| {
                    row.pop().map(|sample| InstantSample {
                        labels: labels.clone(),
                        sample,
                    })
                })
                .collect();
            QueryValue::Vector(samples)
        } else {
            let matrix = series
                .iter()
                .zip(rows)
                .filter(|(_, row)| !row.is_empty())
                .map(|(labels, row)| SeriesResult {
                    labels: labels.clone(),
                    samples: row,
                })
                .collect();
            QueryValue::Matrix(matrix)
        };

        let metrics = ctx.metrics().cloned().unwrap_or_default();
        debug!(
            samples = value.total_samples(),
            elapsed_ms = elapsed.as_millis() as u64,
            "query complete"
        );
        Ok(QueryResult::new(value, metrics, elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CancellationHandle;
    use parallax_core::{labels, Sample};
    use parallax_logical::metric;
    use parallax_storage::MemoryStorage;

    fn storage() -> Arc<dyn SeriesStorage> {
        Arc::new(MemoryStorage::new().with_series(
            labels! {"__name__" => "m", "a" => "1"},
            vec![Sample::new(0, 1.0), Sample::new(1000, 2.0)],
        ))
    }

    #[tokio::test]
    async fn test_instant_query_shape() {
        let engine = Engine::new();
        let result = engine
            .instant_query(storage(), &metric("m").into(), 1000)
            .await
            .unwrap();

        let vector = result.value.as_vector().unwrap();
        assert_eq!(vector.len(), 1);
        assert_eq!(vector[0].sample, Sample::new(1000, 2.0));
    }

    #[tokio::test]
    async fn test_range_query_shape() {
        let engine = Engine::new();
        let result = engine
            .range_query(storage(), &metric("m").into(), 0, 2000, 1000)
            .await
            .unwrap();

        let matrix = result.value.as_matrix().unwrap();
        assert_eq!(matrix.len(), 1);
        assert_eq!(
            matrix[0].samples,
            vec![
                Sample::new(0, 1.0),
                Sample::new(1000, 2.0),
                Sample::new(2000, 2.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_selection() {
        let engine = Engine::new();
        let result = engine
            .instant_query(storage(), &metric("absent").into(), 1000)
            .await
            .unwrap();
        assert!(result.value.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_execution() {
        let engine = Engine::new();
        let (handle, rx) = CancellationHandle::new();
        handle.cancel();

        let err = engine
            .execute(storage(), &metric("m").into(), QueryOpts::instant(0), Some(rx))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_invalid_opts_rejected() {
        let engine = Engine::new();
        let err = engine
            .range_query(storage(), &metric("m").into(), 1000, 0, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, common_error::ParallaxError::InvalidParameter(_)));
    }
}
