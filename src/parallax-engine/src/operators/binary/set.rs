//! Set operations on sample presence: `and`, `or`, `unless`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use common_error::{ParallaxError, ParallaxResult};
use parallax_core::Labels;
use parallax_logical::{BinaryOp, VectorMatching};

use crate::executor::ExecutionContext;
use crate::model::{StepVector, VectorPool};
use crate::operators::binary::join_signature;
use crate::operators::{BoxedOperator, PhysicalOperator};

/// Evaluates `and` / `or` / `unless` between two vectors.
///
/// Set operations work on presence rather than values: `and` keeps left
/// samples whose join signature is present on the right, `unless` keeps those
/// absent on the right, and `or` emits all left samples plus right samples
/// whose signature has no left sample at that step. Input label sets are kept
/// unmodified.
#[derive(Debug)]
pub struct SetOperationExec {
    pool: Arc<VectorPool>,

    lhs: BoxedOperator,
    rhs: BoxedOperator,
    operation: BinaryOp,
    matching: VectorMatching,

    state: Option<SetState>,
}

#[derive(Debug)]
struct SetState {
    series: Arc<[Labels]>,
    lhs_sigs: Vec<u64>,
    rhs_sigs: Vec<u64>,
    /// Output-id offset of the rhs series under `or`.
    lhs_count: u64,
    /// Per-step scratch set of present signatures.
    presence: HashSet<u64>,
}

impl SetOperationExec {
    /// Create a set operator. `operation` must be a set operator.
    pub fn new(
        lhs: BoxedOperator,
        rhs: BoxedOperator,
        operation: BinaryOp,
        matching: VectorMatching,
        steps_batch: usize,
    ) -> Self {
        debug_assert!(operation.is_set_operator());
        Self {
            pool: Arc::new(VectorPool::new(steps_batch)),
            lhs,
            rhs,
            operation,
            matching,
            state: None,
        }
    }

    async fn init_outputs(&mut self, ctx: &ExecutionContext) -> ParallaxResult<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let (lhs_series, rhs_series) =
            futures::try_join!(self.lhs.series(ctx), self.rhs.series(ctx))?;

        let lhs_sigs: Vec<u64> = lhs_series
            .iter()
            .map(|l| join_signature(l, &self.matching))
            .collect();
        let rhs_sigs: Vec<u64> = rhs_series
            .iter()
            .map(|l| join_signature(l, &self.matching))
            .collect();

        let series: Vec<Labels> = match self.operation {
            BinaryOp::Or => lhs_series.iter().chain(rhs_series.iter()).cloned().collect(),
            _ => lhs_series.to_vec(),
        };

        self.pool.set_step_size(series.len());
        self.state = Some(SetState {
            series: Arc::from(series),
            lhs_sigs,
            rhs_sigs,
            lhs_count: lhs_series.len() as u64,
            presence: HashSet::new(),
        });
        Ok(())
    }

    fn exec_set_operation(
        state: &mut SetState,
        pool: &VectorPool,
        operation: BinaryOp,
        lhs: &StepVector,
        rhs: &StepVector,
    ) -> StepVector {
        let mut step = pool.get_step_vector(lhs.t);
        state.presence.clear();
        match operation {
            BinaryOp::And | BinaryOp::Unless => {
                for (id, _) in rhs.iter() {
                    state.presence.insert(state.rhs_sigs[id as usize]);
                }
                let keep_present = operation == BinaryOp::And;
                for (id, value) in lhs.iter() {
                    if state.presence.contains(&state.lhs_sigs[id as usize]) == keep_present {
                        step.append_sample(id, value);
                    }
                }
            }
            BinaryOp::Or => {
                for (id, value) in lhs.iter() {
                    state.presence.insert(state.lhs_sigs[id as usize]);
                    step.append_sample(id, value);
                }
                for (id, value) in rhs.iter() {
                    if !state.presence.contains(&state.rhs_sigs[id as usize]) {
                        step.append_sample(state.lhs_count + id, value);
                    }
                }
            }
            _ => {}
        }
        step
    }
}

#[async_trait]
impl PhysicalOperator for SetOperationExec {
    fn name(&self) -> &'static str {
        "SetOperationExec"
    }

    async fn series(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Arc<[Labels]>> {
        self.init_outputs(ctx).await?;
        Ok(self.state.as_ref().expect("initialized").series.clone())
    }

    async fn next(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Option<Vec<StepVector>>> {
        ctx.check_cancelled()?;
        let (lhs_batch, rhs_batch) =
            futures::try_join!(self.lhs.next(ctx), self.rhs.next(ctx))?;

        let (lhs_batch, rhs_batch) = match (lhs_batch, rhs_batch) {
            (Some(lhs), Some(rhs)) => (lhs, rhs),
            (Some(batch), None) => {
                self.lhs.pool().put_vectors(batch);
                return Ok(None);
            }
            (None, Some(batch)) => {
                self.rhs.pool().put_vectors(batch);
                return Ok(None);
            }
            (None, None) => return Ok(None),
        };

        self.init_outputs(ctx).await?;

        let aligned = lhs_batch.len() == rhs_batch.len()
            && lhs_batch
                .iter()
                .zip(rhs_batch.iter())
                .all(|(lhs, rhs)| lhs.t == rhs.t);
        if !aligned {
            self.lhs.pool().put_vectors(lhs_batch);
            self.rhs.pool().put_vectors(rhs_batch);
            return Err(ParallaxError::matching(
                "step misalignment between binary operands",
            ));
        }

        let state = self.state.as_mut().expect("initialized");
        let mut batch = self.pool.get_vector_batch();
        for (lhs, rhs) in lhs_batch.iter().zip(rhs_batch.iter()) {
            batch.push(Self::exec_set_operation(
                state,
                &self.pool,
                self.operation,
                lhs,
                rhs,
            ));
        }
        self.lhs.pool().put_vectors(lhs_batch);
        self.rhs.pool().put_vectors(rhs_batch);

        Ok(Some(batch))
    }

    fn pool(&self) -> Arc<VectorPool> {
        Arc::clone(&self.pool)
    }

    fn explain(&self) -> String {
        format!(
            "SetOperationExec({} {} {})",
            self.lhs.explain(),
            self.operation.symbol(),
            self.rhs.explain()
        )
    }
}
