//! Instant-vector selector.

use std::sync::Arc;

use async_trait::async_trait;

use common_error::ParallaxResult;
use parallax_core::{Labels, Sample};
use parallax_storage::SampleIter;

use crate::executor::{ExecutionContext, QueryOpts};
use crate::model::{StepVector, VectorPool};
use crate::operators::PhysicalOperator;
use crate::selector::SeriesSelector;

/// Selects the most recent sample within the lookback window at each step.
///
/// One instance evaluates shard `shard` of `num_shards` of the matcher
/// selection; the planner wraps the shards in a coalesce exchange. Samples
/// are decoded through a forward-only scanner per series, so chunked storage
/// reads amortize across the monotonically increasing steps.
pub struct VectorSelectorExec {
    pool: Arc<VectorPool>,
    selector: Arc<SeriesSelector>,
    shard: usize,
    num_shards: usize,

    mint: i64,
    maxt: i64,
    step: i64,
    current_step: i64,
    steps_batch: usize,

    offset_ms: i64,
    at_ms: Option<i64>,
    lookback_ms: i64,

    scanners: Option<Vec<SeriesScanner>>,
    series: Option<Arc<[Labels]>>,
}

impl std::fmt::Debug for VectorSelectorExec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorSelectorExec")
            .field("shard", &self.shard)
            .field("num_shards", &self.num_shards)
            .finish_non_exhaustive()
    }
}

impl VectorSelectorExec {
    /// Create shard `shard` of `num_shards` over a cached selection.
    pub fn new(
        selector: Arc<SeriesSelector>,
        opts: &QueryOpts,
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
            mint: opts.start_ms,
            maxt: opts.end_ms,
            step: opts.step_ms.max(1),
            current_step: opts.start_ms,
            steps_batch: opts.steps_batch,
            offset_ms,
            at_ms,
            lookback_ms: opts.lookback_delta_ms,
            scanners: None,
            series: None,
        }
    }

    /// The storage timestamp looked up for a step at `ts`.
    fn lookup_ts(&self, ts: i64) -> i64 {
        self.at_ms.unwrap_or(ts) - self.offset_ms
    }

    async fn init(&mut self, _ctx: &ExecutionContext) -> ParallaxResult<()> {
        if self.series.is_some() {
            return Ok(());
        }
        let shard_series = self.selector.shard(self.shard, self.num_shards).await?;

        let data_mint = self.lookup_ts(self.mint) - self.lookback_ms;
        let data_maxt = self.lookup_ts(self.maxt);

        let mut labels = Vec::with_capacity(shard_series.len());
        let mut scanners = Vec::with_capacity(shard_series.len());
        for series in &shard_series {
            labels.push(series.labels().clone());
            scanners.push(SeriesScanner::new(series.sample_iterator(data_mint, data_maxt)));
        }

        self.pool.set_step_size(scanners.len());
        self.scanners = Some(scanners);
        self.series = Some(Arc::from(labels));
        Ok(())
    }
}

#[async_trait]
impl PhysicalOperator for VectorSelectorExec {
    fn name(&self) -> &'static str {
        "VectorSelectorExec"
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
        let lookback = self.lookback_ms;
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
                if let Some(value) = scanner.value_at(lookup, lookback) {
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
        format!("VectorSelectorExec(shard={}/{})", self.shard, self.num_shards)
    }
}

/// Forward-only scan over one series' decoded samples.
struct SeriesScanner {
    iter: SampleIter,
    buffered: Option<Sample>,
    last: Option<Sample>,
}

impl SeriesScanner {
    fn new(iter: SampleIter) -> Self {
        Self {
            iter,
            buffered: None,
            last: None,
        }
    }

    /// The most recent value at `ts`, no older than `ts - lookback`.
    ///
    /// `ts` must not decrease between calls.
    fn value_at(&mut self, ts: i64, lookback: i64) -> Option<f64> {
        loop {
            if self.buffered.is_none() {
                self.buffered = self.iter.next();
            }
            match self.buffered {
                Some(sample) if sample.t <= ts => {
                    self.last = self.buffered.take();
                }
                _ => break,
            }
        }
        self.last.filter(|s| s.t >= ts - lookback).map(|s| s.v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::{labels, Matcher};
    use parallax_storage::MemoryStorage;

    fn selector_for(storage: MemoryStorage, mint: i64, maxt: i64) -> Arc<SeriesSelector> {
        Arc::new(SeriesSelector::new(
            Arc::new(storage),
            vec![Matcher::equal("__name__", "m")],
            mint,
            maxt,
        ))
    }

    fn ctx(opts: &QueryOpts) -> ExecutionContext {
        ExecutionContext::new(Arc::new(MemoryStorage::new()), opts.clone())
    }

    #[tokio::test]
    async fn test_most_recent_within_lookback() {
        let storage = MemoryStorage::new().with_series(
            labels! {"__name__" => "m", "a" => "1"},
            vec![Sample::new(1000, 10.0), Sample::new(2000, 20.0)],
        );
        let opts = QueryOpts::range(0, 4000, 1000);
        let selector = selector_for(storage, -300_000, 4000);
        let mut op = VectorSelectorExec::new(selector, &opts, 0, None, 0, 1);
        let ctx = ctx(&opts);

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch.len(), 5);
        assert!(batch[0].is_empty()); // t=0: nothing yet
        assert_eq!(batch[1].samples, vec![10.0]); // t=1000
        assert_eq!(batch[2].samples, vec![20.0]); // t=2000
        assert_eq!(batch[3].samples, vec![20.0]); // t=3000: lookback
        assert!(op.next(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_at_modifier_pins_lookup() {
        let storage = MemoryStorage::new().with_series(
            labels! {"__name__" => "m", "a" => "1"},
            vec![Sample::new(1000, 10.0), Sample::new(2000, 20.0)],
        );
        let opts = QueryOpts::instant(2000);
        let selector = selector_for(storage, -298_000, 2000);
        let mut op = VectorSelectorExec::new(selector, &opts, 0, Some(2000), 0, 1);
        let ctx = ctx(&opts);

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].t, 2000);
        assert_eq!(batch[0].samples, vec![20.0]);
    }

    #[tokio::test]
    async fn test_offset_shifts_lookup() {
        let storage = MemoryStorage::new().with_series(
            labels! {"__name__" => "m"},
            vec![Sample::new(1000, 10.0), Sample::new(2000, 20.0)],
        );
        let opts = QueryOpts::instant(2000);
        let selector = selector_for(storage, -299_000, 1000);
        let mut op = VectorSelectorExec::new(selector, &opts, 1000, None, 0, 1);
        let ctx = ctx(&opts);

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].samples, vec![10.0]);
    }

    #[tokio::test]
    async fn test_sample_outside_lookback_is_stale() {
        let storage = MemoryStorage::new().with_series(
            labels! {"__name__" => "m"},
            vec![Sample::new(0, 1.0)],
        );
        let opts = QueryOpts::instant(400_000).with_lookback_delta(300_000);
        let selector = selector_for(storage, 100_000, 400_000);
        let mut op = VectorSelectorExec::new(selector, &opts, 0, None, 0, 1);
        let ctx = ctx(&opts);

        // The only sample is older than the lookback window; the selection
        // itself came up empty, so the shard holds no series at all.
        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert!(batch[0].is_empty());
    }

    #[tokio::test]
    async fn test_series_ids_are_shard_local() {
        let mut storage = MemoryStorage::new();
        for i in 0..4 {
            storage.add_series(
                labels! {"__name__" => "m", "i" => &i.to_string()},
                vec![Sample::new(1000, i as f64)],
            );
        }
        let opts = QueryOpts::instant(1000);
        let selector = selector_for(storage, -299_000, 1000);
        let mut op = VectorSelectorExec::new(selector, &opts, 0, None, 1, 2);
        let ctx = ctx(&opts);

        let series = op.series(&ctx).await.unwrap();
        assert_eq!(series.len(), 2); // series 1 and 3

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch[0].sample_ids, vec![0, 1]);
        assert_eq!(batch[0].samples, vec![1.0, 3.0]);
    }
}
