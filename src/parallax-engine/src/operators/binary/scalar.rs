//! Vector-scalar binary operator.

use std::sync::Arc;

use async_trait::async_trait;

use common_error::{ParallaxError, ParallaxResult};
use parallax_core::{Labels, LabelsBuilder, METRIC_NAME};
use parallax_logical::BinaryOp;

use crate::executor::ExecutionContext;
use crate::model::{StepVector, VectorPool};
use crate::operators::binary::apply_operation;
use crate::operators::{BoxedOperator, PhysicalOperator};

/// Evaluates `vector ⊕ scalar`, bypassing the join.
///
/// The scalar operand is an operator subtree (a number-literal selector) that
/// emits exactly one sample per step; its value is broadcast across every
/// sample of the vector side. Comparisons outside bool mode keep the vector
/// side's value, so a filter never emits the constant.
#[derive(Debug)]
pub struct ScalarBinaryExec {
    pool: Arc<VectorPool>,

    vector: BoxedOperator,
    scalar: BoxedOperator,
    operation: BinaryOp,
    /// Whether the scalar was the left operand in the source expression.
    scalar_on_left: bool,
    return_bool: bool,

    series: Option<Arc<[Labels]>>,
}

impl ScalarBinaryExec {
    /// Create a vector-scalar operator.
    pub fn new(
        vector: BoxedOperator,
        scalar: BoxedOperator,
        operation: BinaryOp,
        scalar_on_left: bool,
        return_bool: bool,
        steps_batch: usize,
    ) -> Self {
        Self {
            pool: Arc::new(VectorPool::new(steps_batch)),
            vector,
            scalar,
            operation,
            scalar_on_left,
            return_bool,
            series: None,
        }
    }

    async fn init_outputs(&mut self, ctx: &ExecutionContext) -> ParallaxResult<()> {
        if self.series.is_some() {
            return Ok(());
        }
        let input = self.vector.series(ctx).await?;
        let series: Vec<Labels> = input
            .iter()
            .map(|l| LabelsBuilder::new(l.clone()).del([METRIC_NAME]).labels())
            .collect();
        self.pool.set_step_size(series.len());
        self.series = Some(Arc::from(series));
        Ok(())
    }
}

#[async_trait]
impl PhysicalOperator for ScalarBinaryExec {
    fn name(&self) -> &'static str {
        "ScalarBinaryExec"
    }

    async fn series(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Arc<[Labels]>> {
        self.init_outputs(ctx).await?;
        Ok(self.series.as_ref().expect("initialized").clone())
    }

    async fn next(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Option<Vec<StepVector>>> {
        ctx.check_cancelled()?;
        let (vector_batch, scalar_batch) =
            futures::try_join!(self.vector.next(ctx), self.scalar.next(ctx))?;

        let (vector_batch, scalar_batch) = match (vector_batch, scalar_batch) {
            (Some(vector), Some(scalar)) => (vector, scalar),
            (Some(batch), None) => {
                self.vector.pool().put_vectors(batch);
                return Ok(None);
            }
            (None, Some(batch)) => {
                self.scalar.pool().put_vectors(batch);
                return Ok(None);
            }
            (None, None) => return Ok(None),
        };

        self.init_outputs(ctx).await?;

        let aligned = vector_batch.len() == scalar_batch.len()
            && vector_batch
                .iter()
                .zip(scalar_batch.iter())
                .all(|(v, s)| v.t == s.t);
        if !aligned {
            self.vector.pool().put_vectors(vector_batch);
            self.scalar.pool().put_vectors(scalar_batch);
            return Err(ParallaxError::matching(
                "step misalignment between binary operands",
            ));
        }

        if scalar_batch.iter().any(|s| s.samples.is_empty()) {
            self.vector.pool().put_vectors(vector_batch);
            self.scalar.pool().put_vectors(scalar_batch);
            return Err(ParallaxError::internal("scalar operand produced no sample"));
        }

        let mut batch = self.pool.get_vector_batch();
        for (vector, scalar) in vector_batch.iter().zip(scalar_batch.iter()) {
            let scalar_value = scalar.samples[0];
            let mut step = self.pool.get_step_vector(vector.t);
            for (id, value) in vector.iter() {
                let (lhs, rhs) = if self.scalar_on_left {
                    (scalar_value, value)
                } else {
                    (value, scalar_value)
                };
                if let Some(result) = apply_operation(self.operation, lhs, rhs, self.return_bool) {
                    // Filter-mode comparisons keep the vector side's value.
                    let emitted = if self.operation.is_comparison() && !self.return_bool {
                        value
                    } else {
                        result
                    };
                    step.append_sample(id, emitted);
                }
            }
            batch.push(step);
        }
        self.vector.pool().put_vectors(vector_batch);
        self.scalar.pool().put_vectors(scalar_batch);

        Ok(Some(batch))
    }

    fn pool(&self) -> Arc<VectorPool> {
        Arc::clone(&self.pool)
    }

    fn explain(&self) -> String {
        if self.scalar_on_left {
            format!(
                "ScalarBinaryExec({} {} {})",
                self.scalar.explain(),
                self.operation.symbol(),
                self.vector.explain()
            )
        } else {
            format!(
                "ScalarBinaryExec({} {} {})",
                self.vector.explain(),
                self.operation.symbol(),
                self.scalar.explain()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::QueryOpts;
    use crate::operators::literal::NumberLiteralExec;
    use crate::operators::testing::{sv, test_ctx, MockExec};
    use parallax_core::labels;

    fn vector_input() -> MockExec {
        MockExec::new(
            vec![
                labels! {"__name__" => "m", "job" => "a"},
                labels! {"__name__" => "m", "job" => "b"},
            ],
            vec![vec![sv(0, &[(0, 4.0), (1, 10.0)])]],
        )
    }

    fn literal(opts: &QueryOpts, value: f64) -> BoxedOperator {
        Box::new(NumberLiteralExec::new(opts, value, None))
    }

    #[tokio::test]
    async fn test_scalar_broadcast() {
        let opts = QueryOpts::instant(0);
        let ctx = test_ctx(&opts);
        let mut op = ScalarBinaryExec::new(
            Box::new(vector_input()),
            literal(&opts, 2.0),
            BinaryOp::Mul,
            false,
            false,
            10,
        );

        let series = op.series(&ctx).await.unwrap();
        assert_eq!(series.as_ref(), &[labels! {"job" => "a"}, labels! {"job" => "b"}]);

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].samples, vec![8.0, 20.0]);
        assert!(op.next(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scalar_on_left_preserves_operand_order() {
        let opts = QueryOpts::instant(0);
        let ctx = test_ctx(&opts);
        let mut op = ScalarBinaryExec::new(
            Box::new(vector_input()),
            literal(&opts, 100.0),
            BinaryOp::Sub,
            true,
            false,
            10,
        );

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].samples, vec![96.0, 90.0]);
    }

    #[tokio::test]
    async fn test_comparison_filter_keeps_vector_value() {
        let opts = QueryOpts::instant(0);
        let ctx = test_ctx(&opts);
        let mut op = ScalarBinaryExec::new(
            Box::new(vector_input()),
            literal(&opts, 5.0),
            BinaryOp::Gtr,
            false,
            false,
            10,
        );

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].sample_ids, vec![1]);
        assert_eq!(batch[0].samples, vec![10.0]);
    }

    #[tokio::test]
    async fn test_comparison_bool_mode() {
        let opts = QueryOpts::instant(0);
        let ctx = test_ctx(&opts);
        let mut op = ScalarBinaryExec::new(
            Box::new(vector_input()),
            literal(&opts, 5.0),
            BinaryOp::Gtr,
            false,
            true,
            10,
        );

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].samples, vec![0.0, 1.0]);
    }
}
