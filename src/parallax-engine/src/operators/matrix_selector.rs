//! Matrix selector with an in-place range function.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use common_error::ParallaxResult;
use parallax_core::{Labels, LabelsBuilder, Sample, METRIC_NAME};
use parallax_logical::RangeFunc;
use parallax_storage::SampleIter;

use crate::executor::{ExecutionContext, QueryOpts};
use crate::model::{StepVector, VectorPool};
use crate::operators::functions::apply_range_func;
use crate::operators::PhysicalOperator;
use crate::selector::SeriesSelector;

/// Evaluates a range function over the window `[t - range, t]` per step.
///
/// Each series keeps a ring buffer of the samples still inside the window;
/// as steps advance, new samples are appended and expired samples dropped
/// from the front, so every sample is decoded exactly once.
pub struct MatrixSelectorExec {
    pool: Arc<VectorPool>,
    selector: Arc<SeriesSelector>,
    shard: usize,
    num_shards: usize,

    func: RangeFunc,
    range_ms: i64,
    offset_ms: i64,
    at_ms: Option<i64>,

    mint: i64,
    maxt: i64,
    step: i64,
    current_step: i64,
    steps_batch: usize,

    scanners: Option<Vec<RangeScanner>>,
    series: Option<Arc<[Labels]>>,
}

impl std::fmt::Debug for MatrixSelectorExec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixSelectorExec")
            .field("func", &self.func)
            .field("range_ms", &self.range_ms)
            .field("shard", &self.shard)
            .finish_non_exhaustive()
    }
}

impl MatrixSelectorExec {
    /// Create shard `shard` of `num_shards` over a cached selection.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        selector: Arc<SeriesSelector>,
        opts: &QueryOpts,
        func: RangeFunc,
        range_ms: i64,
        offset_ms: i64,
        at_ms: Option<i64>,
        shard: usize,
        num_shards: usize,
    ) -> Self {
        Self {
            pool: Arc::new(VectorPool::new(opts.steps_batch)),
            selector,
            shard,
            num_shards,
            func,
            range_ms,
            offset_ms,
            at_ms,
            mint: opts.start_ms,
            maxt: opts.end_ms,
            step: opts.step_ms.max(1),
            current_step: opts.start_ms,
            steps_batch: opts.steps_batch,
            scanners: None,
            series: None,
        }
    }

    fn lookup_ts(&self, ts: i64) -> i64 {
        self.at_ms.unwrap_or(ts) - self.offset_ms
    }

    async fn init(&mut self, _ctx: &ExecutionContext) -> ParallaxResult<()> {
        if self.series.is_some() {
            return Ok(());
        }
        let shard_series = self.selector.shard(self.shard, self.num_shards).await?;

        let data_mint = self.lookup_ts(self.mint) - self.range_ms;
        let data_maxt = self.lookup_ts(self.maxt);

        let mut labels = Vec::with_capacity(shard_series.len());
        let mut scanners = Vec::with_capacity(shard_series.len());
        for series in &shard_series {
            labels.push(
                LabelsBuilder::new(series.labels().clone())
                    .del([METRIC_NAME])
                    .labels(),
            );
            scanners.push(RangeScanner::new(series.sample_iterator(data_mint, data_maxt)));
        }

        self.pool.set_step_size(scanners.len());
        self.scanners = Some(scanners);
        self.series = Some(Arc::from(labels));
        Ok(())
    }
}

#[async_trait]
impl PhysicalOperator for MatrixSelectorExec {
    fn name(&self) -> &'static str {
        "MatrixSelectorExec"
    }

    async fn series(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Arc<[Labels]>> {
        self.init(ctx).await?;
        Ok(self.series.as_ref().expect("initialized").clone())
    }

    async fn next(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Option<Vec<StepVector>>> {
        ctx.check_cancelled()?;
        if self.current_step > self.maxt {
            return Ok(None);
        }
        self.init(ctx).await?;

        let total_steps = (self.maxt - self.mint) / self.step + 1;
        let num_steps = (self.steps_batch as i64).min(total_steps);
        let func = self.func;
        let range = self.range_ms;
        let offset = self.offset_ms;
        let at = self.at_ms;

        let mut batch = self.pool.get_vector_batch();
        let mut ts = self.current_step;
        for _ in 0..num_steps {
            if ts > self.maxt {
                break;
            }
            let mut vector = self.pool.get_step_vector(ts);
            let lookup = at.unwrap_or(ts) - offset;
            let scanners = self.scanners.as_mut().expect("initialized");
            for (id, scanner) in scanners.iter_mut().enumerate() {
                let window = scanner.window_at(lookup, range);
                if let Some(value) = apply_range_func(func, window, lookup, range) {
                    vector.append_sample(id as u64, value);
                }
            }
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
        format!(
            "MatrixSelectorExec({}[{}ms], shard={}/{})",
            self.func.name(),
            self.range_ms,
            self.shard,
            self.num_shards
        )
    }
}

/// Sliding window over one series' decoded samples.
struct RangeScanner {
    iter: SampleIter,
    buffered: Option<Sample>,
    window: VecDeque<Sample>,
}

impl RangeScanner {
    fn new(iter: SampleIter) -> Self {
        Self {
            iter,
            buffered: None,
            window: VecDeque::new(),
        }
    }

    /// The samples inside `[ts - range, ts]`. `ts` must not decrease between
    /// calls.
    fn window_at(&mut self, ts: i64, range: i64) -> &[Sample] {
        loop {
            if self.buffered.is_none() {
                self.buffered = self.iter.next();
            }
            match self.buffered {
                Some(sample) if sample.t <= ts => {
                    self.window.push_back(sample);
                    self.buffered = None;
                }
                _ => break,
            }
        }
        while self.window.front().is_some_and(|s| s.t < ts - range) {
            self.window.pop_front();
        }
        self.window.make_contiguous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::{labels, Matcher};
    use parallax_storage::MemoryStorage;

    fn ctx(opts: &QueryOpts) -> ExecutionContext {
        ExecutionContext::new(Arc::new(MemoryStorage::new()), opts.clone())
    }

    fn rate_op(storage: MemoryStorage, opts: &QueryOpts, range_ms: i64) -> MatrixSelectorExec {
        let selector = Arc::new(SeriesSelector::new(
            Arc::new(storage),
            vec![Matcher::equal("__name__", "m")],
            opts.start_ms - range_ms,
            opts.end_ms,
        ));
        MatrixSelectorExec::new(selector, opts, RangeFunc::Rate, range_ms, 0, None, 0, 1)
    }

    #[tokio::test]
    async fn test_rate_over_full_window() {
        let storage = MemoryStorage::new().with_series(
            labels! {"__name__" => "m", "a" => "1"},
            vec![
                Sample::new(0, 0.0),
                Sample::new(15_000, 5.0),
                Sample::new(30_000, 10.0),
                Sample::new(45_000, 15.0),
                Sample::new(60_000, 20.0),
            ],
        );
        let opts = QueryOpts::range(60_000, 60_000, 60_000);
        let mut op = rate_op(storage, &opts, 60_000);
        let ctx = ctx(&opts);

        let series = op.series(&ctx).await.unwrap();
        // Output labels drop the metric name.
        assert_eq!(series[0], labels! {"a" => "1"});

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert!((batch[0].samples[0] - 20.0 / 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_window_slides_across_steps() {
        let storage = MemoryStorage::new().with_series(
            labels! {"__name__" => "m"},
            vec![
                Sample::new(0, 0.0),
                Sample::new(10_000, 1.0),
                Sample::new(20_000, 2.0),
                Sample::new(30_000, 3.0),
                Sample::new(40_000, 4.0),
            ],
        );
        // Two steps with a 20s window: [0,20] then [20,40].
        let opts = QueryOpts::range(20_000, 40_000, 20_000);
        let mut op = rate_op(storage, &opts, 20_000);
        let ctx = ctx(&opts);

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert!((batch[0].samples[0] - 2.0 / 20.0).abs() < 1e-9);
        assert!((batch[1].samples[0] - 2.0 / 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_too_few_samples_emits_nothing() {
        let storage = MemoryStorage::new().with_series(
            labels! {"__name__" => "m"},
            vec![Sample::new(5_000, 1.0)],
        );
        let opts = QueryOpts::instant(10_000);
        let mut op = rate_op(storage, &opts, 10_000);
        let ctx = ctx(&opts);

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert!(batch[0].is_empty());
    }
}
