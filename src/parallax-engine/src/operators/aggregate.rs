//! Aggregation operator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use common_error::ParallaxResult;
use parallax_core::{Labels, LabelsBuilder, METRIC_NAME};
use parallax_logical::{AggregateFunc, Grouping};

use crate::executor::ExecutionContext;
use crate::model::{StepVector, VectorPool};
use crate::operators::{BoxedOperator, PhysicalOperator};

/// Group-wise reduction per step: `op by|without (labels) expr`.
///
/// Initialization hashes each input series into its group and builds a dense
/// `input id -> group id` map, so the per-step fold is array indexing. One
/// accumulator per group is reset at every step; a group emits a sample only
/// when at least one input sample contributed to it.
#[derive(Debug)]
pub struct AggregateExec {
    pool: Arc<VectorPool>,

    input: BoxedOperator,
    func: AggregateFunc,
    grouping: Grouping,

    state: Option<AggState>,
}

#[derive(Debug)]
struct AggState {
    series: Arc<[Labels]>,
    /// Dense mapping from input series id to group id.
    group_of: Vec<usize>,
    accumulators: Vec<Accumulator>,
}

impl AggregateExec {
    /// Create an aggregation over an input operator.
    pub fn new(
        input: BoxedOperator,
        func: AggregateFunc,
        grouping: Grouping,
        steps_batch: usize,
    ) -> Self {
        Self {
            pool: Arc::new(VectorPool::new(steps_batch)),
            input,
            func,
            grouping,
            state: None,
        }
    }

    async fn init_outputs(&mut self, ctx: &ExecutionContext) -> ParallaxResult<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let input_series = self.input.series(ctx).await?;

        let mut group_ids: HashMap<u64, usize> = HashMap::new();
        let mut series: Vec<Labels> = Vec::new();
        let mut group_of = Vec::with_capacity(input_series.len());

        for labels in input_series.iter() {
            let sig = if self.grouping.without {
                labels.hash_without(&self.grouping.labels)
            } else {
                labels.hash_for(&self.grouping.labels)
            };
            let next_id = series.len();
            let group_id = *group_ids.entry(sig).or_insert_with(|| {
                let builder = LabelsBuilder::new(labels.clone()).del([METRIC_NAME]);
                let group_labels = if self.grouping.without {
                    builder.del(self.grouping.labels.clone()).labels()
                } else {
                    builder.keep(self.grouping.labels.clone()).labels()
                };
                series.push(group_labels);
                next_id
            });
            group_of.push(group_id);
        }

        self.pool.set_step_size(series.len());
        let accumulators = vec![Accumulator::new(self.func); series.len()];
        self.state = Some(AggState {
            series: Arc::from(series),
            group_of,
            accumulators,
        });
        Ok(())
    }
}

#[async_trait]
impl PhysicalOperator for AggregateExec {
    fn name(&self) -> &'static str {
        "AggregateExec"
    }

    async fn series(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Arc<[Labels]>> {
        self.init_outputs(ctx).await?;
        Ok(self.state.as_ref().expect("initialized").series.clone())
    }

    async fn next(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Option<Vec<StepVector>>> {
        ctx.check_cancelled()?;
        let Some(input_batch) = self.input.next(ctx).await? else {
            return Ok(None);
        };
        self.init_outputs(ctx).await?;

        let state = self.state.as_mut().expect("initialized");
        let mut batch = self.pool.get_vector_batch();
        for vector in &input_batch {
            for accumulator in &mut state.accumulators {
                accumulator.reset();
            }
            for (id, value) in vector.iter() {
                state.accumulators[state.group_of[id as usize]].add(value);
            }
            let mut step = self.pool.get_step_vector(vector.t);
            for (group_id, accumulator) in state.accumulators.iter().enumerate() {
                if let Some(value) = accumulator.emit() {
                    step.append_sample(group_id as u64, value);
                }
            }
            batch.push(step);
        }
        self.input.pool().put_vectors(input_batch);

        Ok(Some(batch))
    }

    fn pool(&self) -> Arc<VectorPool> {
        Arc::clone(&self.pool)
    }

    fn explain(&self) -> String {
        let kw = if self.grouping.without { "without" } else { "by" };
        format!(
            "AggregateExec({} {kw} ({}) {})",
            self.func.name(),
            self.grouping.labels.join(","),
            self.input.explain()
        )
    }
}

/// Per-group, per-step accumulator.
///
/// `max`/`min` treat NaN as missing (`max(NaN, x) = x`), while `sum` and
/// `avg` propagate it; an intentional non-IEEE choice.
#[derive(Debug, Clone)]
struct Accumulator {
    func: AggregateFunc,
    value: f64,
    count: f64,
    seen: bool,
}

impl Accumulator {
    fn new(func: AggregateFunc) -> Self {
        Self {
            func,
            value: 0.0,
            count: 0.0,
            seen: false,
        }
    }

    fn reset(&mut self) {
        self.value = 0.0;
        self.count = 0.0;
        self.seen = false;
    }

    fn add(&mut self, v: f64) {
        match self.func {
            AggregateFunc::Sum => self.value = if self.seen { self.value + v } else { v },
            AggregateFunc::Max => {
                if !self.seen || self.value.is_nan() || v > self.value {
                    self.value = v;
                }
            }
            AggregateFunc::Min => {
                if !self.seen || self.value.is_nan() || v < self.value {
                    self.value = v;
                }
            }
            AggregateFunc::Avg => {
                self.value = if self.seen { self.value + v } else { v };
                self.count += 1.0;
            }
            AggregateFunc::Count => self.count += 1.0,
            AggregateFunc::Group => self.value = 1.0,
        }
        self.seen = true;
    }

    fn emit(&self) -> Option<f64> {
        if !self.seen {
            return None;
        }
        Some(match self.func {
            AggregateFunc::Sum | AggregateFunc::Max | AggregateFunc::Min | AggregateFunc::Group => {
                self.value
            }
            AggregateFunc::Avg => self.value / self.count,
            AggregateFunc::Count => self.count,
        })
    }
}
