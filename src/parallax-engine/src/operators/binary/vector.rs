//! Vector-vector binary operator with a pre-computed join index.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use common_error::{ParallaxError, ParallaxResult};
use parallax_core::{Label, Labels, LabelsBuilder, METRIC_NAME};
use parallax_logical::{BinaryOp, VectorMatchCardinality, VectorMatching};

use crate::executor::ExecutionContext;
use crate::model::{StepVector, VectorPool};
use crate::operators::binary::{apply_operation, join_signature};
use crate::operators::{BoxedOperator, PhysicalOperator};

/// Evaluates `lhs ⊕ rhs` between two step vectors.
///
/// Initialization buckets both sides by join signature and builds two dense
/// indices from input series id to output series id, so per-step execution is
/// array indexing instead of hashmap lookups. High-cardinality samples are
/// cached into a generation-marked scratch buffer; low-cardinality samples
/// then enumerate their partner outputs and combine.
#[derive(Debug)]
pub struct VectorBinaryExec {
    pool: Arc<VectorPool>,

    lhs: BoxedOperator,
    rhs: BoxedOperator,
    matching: VectorMatching,
    operation: BinaryOp,
    return_bool: bool,

    state: Option<JoinState>,
}

#[derive(Debug)]
struct JoinState {
    /// The output series of the operator.
    series: Arc<[Labels]>,
    /// Whether the rhs is the high-cardinality side (`group_right`).
    swapped: bool,
    /// Mapping from high-cardinality input id to output id. `None` when the
    /// input series found no matching partner.
    high_card_output_index: Vec<Option<u64>>,
    /// Mapping from low-cardinality input id to the output ids it joins with.
    low_card_output_index: Vec<Vec<u64>>,
    /// Scratch buffer for the per-step join, keyed by output id.
    output_cache: Vec<CachedValue>,
    /// Marks which cache entries belong to the current step, avoiding a
    /// re-zeroing pass.
    generation: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct CachedValue {
    generation: u64,
    value: f64,
}

impl VectorBinaryExec {
    /// Create a binary operator over two vector children.
    pub fn new(
        lhs: BoxedOperator,
        rhs: BoxedOperator,
        matching: VectorMatching,
        operation: BinaryOp,
        return_bool: bool,
        steps_batch: usize,
    ) -> Self {
        Self {
            pool: Arc::new(VectorPool::new(steps_batch)),
            lhs,
            rhs,
            matching,
            operation,
            return_bool,
            state: None,
        }
    }

    async fn init_outputs(&mut self, ctx: &ExecutionContext) -> ParallaxResult<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let (lhs_series, rhs_series) =
            futures::try_join!(self.lhs.series(ctx), self.rhs.series(ctx))?;

        let swapped = self.matching.card == VectorMatchCardinality::OneToMany;
        let (high_side, low_side) = if swapped {
            (rhs_series, lhs_series)
        } else {
            (lhs_series, rhs_series)
        };

        let high_sigs: Vec<u64> = high_side
            .iter()
            .map(|l| join_signature(l, &self.matching))
            .collect();
        let low_sigs: Vec<u64> = low_side
            .iter()
            .map(|l| join_signature(l, &self.matching))
            .collect();

        let mut low_buckets: HashMap<u64, Vec<u64>> = HashMap::new();
        for (id, sig) in low_sigs.iter().enumerate() {
            low_buckets.entry(*sig).or_default().push(id as u64);
        }
        let mut high_bucket_sizes: HashMap<u64, usize> = HashMap::new();
        for sig in &high_sigs {
            *high_bucket_sizes.entry(*sig).or_default() += 1;
        }

        let one_to_one = self.matching.card == VectorMatchCardinality::OneToOne;
        let mut series = Vec::new();
        let mut high_card_output_index = vec![None; high_side.len()];
        let mut low_card_output_index = vec![Vec::new(); low_side.len()];

        // High-cardinality series without a matching low-cardinality bucket
        // are pruned; the rest get dense output ids in input order.
        for (high_id, sig) in high_sigs.iter().enumerate() {
            let Some(low_ids) = low_buckets.get(sig) else {
                continue;
            };
            if low_ids.len() > 1 {
                return Err(ParallaxError::matching(
                    "found duplicate series on the one-side of the match group",
                ));
            }
            if one_to_one && high_bucket_sizes[sig] > 1 {
                return Err(ParallaxError::matching(
                    "many-to-many matching not allowed: use group_left/group_right",
                ));
            }
            let low_id = low_ids[0] as usize;
            let output_id = series.len() as u64;
            series.push(output_labels(
                &high_side[high_id],
                &low_side[low_id],
                &self.matching,
            ));
            high_card_output_index[high_id] = Some(output_id);
            low_card_output_index[low_id].push(output_id);
        }

        self.pool.set_step_size(high_side.len());
        let output_cache = vec![CachedValue::default(); series.len()];
        self.state = Some(JoinState {
            series: Arc::from(series),
            swapped,
            high_card_output_index,
            low_card_output_index,
            output_cache,
            generation: 0,
        });
        Ok(())
    }

    fn exec_binary_operation(
        state: &mut JoinState,
        pool: &VectorPool,
        operation: BinaryOp,
        return_bool: bool,
        lhs: &StepVector,
        rhs: &StepVector,
    ) -> StepVector {
        let (high, low) = if state.swapped { (rhs, lhs) } else { (lhs, rhs) };
        state.generation += 1;
        let generation = state.generation;

        let mut step = pool.get_step_vector(lhs.t);
        for (id, value) in high.iter() {
            if let Some(output_id) = state.high_card_output_index[id as usize] {
                state.output_cache[output_id as usize] = CachedValue { generation, value };
            }
        }
        for (id, value) in low.iter() {
            for &output_id in &state.low_card_output_index[id as usize] {
                let cached = state.output_cache[output_id as usize];
                if cached.generation != generation {
                    continue;
                }
                let (lhs_value, rhs_value) = if state.swapped {
                    (value, cached.value)
                } else {
                    (cached.value, value)
                };
                if let Some(result) = apply_operation(operation, lhs_value, rhs_value, return_bool)
                {
                    step.append_sample(output_id, result);
                }
            }
        }
        step
    }
}

#[async_trait]
impl PhysicalOperator for VectorBinaryExec {
    fn name(&self) -> &'static str {
        "VectorBinaryExec"
    }

    async fn series(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Arc<[Labels]>> {
        self.init_outputs(ctx).await?;
        Ok(self.state.as_ref().expect("initialized").series.clone())
    }

    async fn next(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Option<Vec<StepVector>>> {
        ctx.check_cancelled()?;
        let (lhs_batch, rhs_batch) =
            futures::try_join!(self.lhs.next(ctx), self.rhs.next(ctx))?;

        // One side exhausted ends the stream; the sibling's in-flight batch
        // is drained back into its pool so nothing leaks.
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
            batch.push(Self::exec_binary_operation(
                state,
                &self.pool,
                self.operation,
                self.return_bool,
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
            "VectorBinaryExec({} {} {})",
            self.lhs.explain(),
            self.operation.symbol(),
            self.rhs.explain()
        )
    }
}

/// The label-retention rule for join outputs.
///
/// Outputs take the high-cardinality series labels with `__name__` removed.
/// One-to-one matchings additionally keep only the `on` names or drop the
/// `ignoring` names; group modifiers carry the listed extra labels over from
/// the low-cardinality partner.
fn output_labels(high: &Labels, low: &Labels, matching: &VectorMatching) -> Labels {
    let mut builder = LabelsBuilder::new(high.clone()).del([METRIC_NAME]);
    if matching.card == VectorMatchCardinality::OneToOne {
        if matching.on {
            builder = builder.keep(matching.matching_labels.clone());
        } else {
            builder = builder.del(matching.matching_labels.clone());
        }
    }
    let labels = builder.labels();
    if matching.include.is_empty() {
        return labels;
    }
    let mut pairs: Vec<Label> = labels.into_iter().collect();
    for name in &matching.include {
        pairs.retain(|l| l.name != *name);
        if let Some(value) = low.get(name) {
            pairs.push(Label::new(name.clone(), value));
        }
    }
    Labels::new(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::QueryOpts;
    use crate::operators::testing::{sv, test_ctx, MockExec};
    use parallax_core::labels;

    fn exec(
        lhs: MockExec,
        rhs: MockExec,
        matching: VectorMatching,
        op: BinaryOp,
    ) -> VectorBinaryExec {
        VectorBinaryExec::new(Box::new(lhs), Box::new(rhs), matching, op, false, 10)
    }

    #[tokio::test]
    async fn test_one_to_one_join() {
        let up = MockExec::new(
            vec![labels! {"__name__" => "up", "job" => "a", "instance" => "x"}],
            vec![vec![sv(1000, &[(0, 1.0)])]],
        );
        let down = MockExec::new(
            vec![labels! {"__name__" => "down", "job" => "a", "instance" => "x"}],
            vec![vec![sv(1000, &[(0, 2.0)])]],
        );
        let mut op = exec(
            up,
            down,
            VectorMatching::on(["job", "instance"]),
            BinaryOp::Add,
        );
        let ctx = test_ctx(&QueryOpts::instant(1000));

        let series = op.series(&ctx).await.unwrap();
        // on(): only the on-labels survive, no __name__.
        assert_eq!(series.as_ref(), &[labels! {"job" => "a", "instance" => "x"}]);

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].samples, vec![3.0]);
        assert!(op.next(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ignoring_drops_ignored_names() {
        let lhs = MockExec::new(
            vec![labels! {"__name__" => "a", "job" => "j", "extra" => "1"}],
            vec![vec![sv(0, &[(0, 10.0)])]],
        );
        let rhs = MockExec::new(
            vec![labels! {"__name__" => "b", "job" => "j", "extra" => "2"}],
            vec![vec![sv(0, &[(0, 4.0)])]],
        );
        let mut op = exec(lhs, rhs, VectorMatching::ignoring(["extra"]), BinaryOp::Sub);
        let ctx = test_ctx(&QueryOpts::instant(0));

        let series = op.series(&ctx).await.unwrap();
        assert_eq!(series.as_ref(), &[labels! {"job" => "j"}]);

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].samples, vec![6.0]);
    }

    #[tokio::test]
    async fn test_group_left_carries_include_labels() {
        let cpu = MockExec::new(
            vec![
                labels! {"__name__" => "node_cpu", "instance" => "i1", "cpu" => "0"},
                labels! {"__name__" => "node_cpu", "instance" => "i1", "cpu" => "1"},
            ],
            vec![vec![sv(0, &[(0, 1.0), (1, 2.0)])]],
        );
        let info = MockExec::new(
            vec![labels! {"__name__" => "machine_info", "instance" => "i1", "region" => "eu"}],
            vec![vec![sv(0, &[(0, 100.0)])]],
        );
        let mut op = exec(
            cpu,
            info,
            VectorMatching::on(["instance"]).group_left(["region"]),
            BinaryOp::Mul,
        );
        let ctx = test_ctx(&QueryOpts::instant(0));

        let series = op.series(&ctx).await.unwrap();
        assert_eq!(
            series.as_ref(),
            &[
                labels! {"instance" => "i1", "cpu" => "0", "region" => "eu"},
                labels! {"instance" => "i1", "cpu" => "1", "region" => "eu"},
            ]
        );

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].sample_ids, vec![0, 1]);
        assert_eq!(batch[0].samples, vec![100.0, 200.0]);
    }

    #[tokio::test]
    async fn test_many_to_many_is_an_error() {
        let lhs = MockExec::new(
            vec![
                labels! {"job" => "a", "cpu" => "0"},
                labels! {"job" => "a", "cpu" => "1"},
            ],
            vec![],
        );
        let rhs = MockExec::new(vec![labels! {"job" => "a", "mode" => "idle"}], vec![]);
        let mut op = exec(lhs, rhs, VectorMatching::on(["job"]), BinaryOp::Add);
        let ctx = test_ctx(&QueryOpts::instant(0));

        let err = op.series(&ctx).await.unwrap_err();
        assert!(matches!(err, ParallaxError::MatchingError(_)));
    }

    #[tokio::test]
    async fn test_unmatched_high_card_series_is_pruned() {
        let lhs = MockExec::new(
            vec![
                labels! {"job" => "a"},
                labels! {"job" => "b"},
            ],
            vec![vec![sv(0, &[(0, 1.0), (1, 2.0)])]],
        );
        let rhs = MockExec::new(
            vec![labels! {"job" => "a"}],
            vec![vec![sv(0, &[(0, 10.0)])]],
        );
        let mut op = exec(lhs, rhs, VectorMatching::on(["job"]), BinaryOp::Add);
        let ctx = test_ctx(&QueryOpts::instant(0));

        let series = op.series(&ctx).await.unwrap();
        assert_eq!(series.len(), 1);

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].samples, vec![11.0]);
    }

    #[tokio::test]
    async fn test_step_misalignment_is_an_error() {
        let lhs = MockExec::new(
            vec![labels! {"job" => "a"}],
            vec![vec![sv(1000, &[(0, 1.0)])]],
        );
        let rhs = MockExec::new(
            vec![labels! {"job" => "a"}],
            vec![vec![sv(2000, &[(0, 1.0)])]],
        );
        let mut op = exec(lhs, rhs, VectorMatching::default(), BinaryOp::Add);
        let ctx = test_ctx(&QueryOpts::instant(0));

        let err = op.next(&ctx).await.unwrap_err();
        assert!(matches!(err, ParallaxError::MatchingError(_)));
    }

    #[tokio::test]
    async fn test_either_side_empty_ends_stream() {
        let lhs = MockExec::new(
            vec![labels! {"job" => "a"}],
            vec![vec![sv(0, &[(0, 1.0)])], vec![sv(1000, &[(0, 1.0)])]],
        );
        let rhs = MockExec::new(vec![labels! {"job" => "a"}], vec![vec![sv(0, &[(0, 1.0)])]]);
        let mut op = exec(lhs, rhs, VectorMatching::default(), BinaryOp::Add);
        let ctx = test_ctx(&QueryOpts::instant(0));

        assert!(op.next(&ctx).await.unwrap().is_some());
        assert!(op.next(&ctx).await.unwrap().is_none());
        assert!(op.next(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_comparison_filter_emits_lhs_value() {
        let lhs = MockExec::new(
            vec![labels! {"job" => "a"}, labels! {"job" => "b"}],
            vec![vec![sv(0, &[(0, 5.0), (1, 1.0)])]],
        );
        let rhs = MockExec::new(
            vec![labels! {"job" => "a"}, labels! {"job" => "b"}],
            vec![vec![sv(0, &[(0, 3.0), (1, 3.0)])]],
        );
        let mut op = exec(lhs, rhs, VectorMatching::default(), BinaryOp::Gtr);
        let ctx = test_ctx(&QueryOpts::instant(0));

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].samples, vec![5.0]);
    }
}
