//! Number-literal selector.

use std::sync::Arc;

use async_trait::async_trait;

use common_error::ParallaxResult;
use parallax_core::Labels;

use crate::executor::{ExecutionContext, QueryOpts};
use crate::model::{StepVector, VectorPool};
use crate::operators::PhysicalOperator;

/// A scalar function applied to the literal per step.
pub type ScalarCall = fn(f64) -> f64;

/// Produces a single synthetic series with the same value at every step.
///
/// Used when a scalar appears inside a vector context. If a wrapping function
/// call is supplied, the scalar is passed through it per step.
#[derive(Debug)]
pub struct NumberLiteralExec {
    pool: Arc<VectorPool>,

    mint: i64,
    maxt: i64,
    step: i64,
    current_step: i64,
    steps_batch: usize,

    value: f64,
    call: Option<ScalarCall>,
    series: Option<Arc<[Labels]>>,
}

impl NumberLiteralExec {
    /// Create a literal selector over the query's step range.
    pub fn new(opts: &QueryOpts, value: f64, call: Option<ScalarCall>) -> Self {
        let pool = Arc::new(VectorPool::new(opts.steps_batch));
        pool.set_step_size(1);
        Self {
            pool,
            mint: opts.start_ms,
            maxt: opts.end_ms,
            // Instant queries advance on a synthetic 1ms stride.
            step: opts.step_ms.max(1),
            current_step: opts.start_ms,
            steps_batch: opts.steps_batch,
            value,
            call,
            series: None,
        }
    }

    fn load_series(&mut self) -> Arc<[Labels]> {
        self.series
            .get_or_insert_with(|| Arc::from(vec![Labels::empty()]))
            .clone()
    }
}

#[async_trait]
impl PhysicalOperator for NumberLiteralExec {
    fn name(&self) -> &'static str {
        "NumberLiteralExec"
    }

    async fn series(&mut self, _ctx: &ExecutionContext) -> ParallaxResult<Arc<[Labels]>> {
        Ok(self.load_series())
    }

    async fn next(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Option<Vec<StepVector>>> {
        ctx.check_cancelled()?;
        if self.current_step > self.maxt {
            return Ok(None);
        }
        self.load_series();

        let total_steps = (self.maxt - self.mint) / self.step + 1;
        let num_steps = (self.steps_batch as i64).min(total_steps);

        let mut batch = self.pool.get_vector_batch();
        let mut ts = self.current_step;
        for _ in 0..num_steps {
            if ts > self.maxt {
                break;
            }
            let mut vector = self.pool.get_step_vector(ts);
            let value = match self.call {
                Some(call) => call(self.value),
                None => self.value,
            };
            vector.append_sample(0, value);
            batch.push(vector);
            ts += self.step;
        }
        self.current_step += self.step * num_steps;

        Ok(Some(batch))
    }

    fn pool(&self) -> Arc<VectorPool> {
        Arc::clone(&self.pool)
    }

    fn explain(&self) -> String {
        format!("NumberLiteralExec({})", self.value)
    }
}
