//! Cached series selection shared across selector shards.

use std::sync::Arc;

use common_error::ParallaxResult;
use parallax_core::Matcher;
use parallax_storage::{SeriesStorage, StorageSeries};
use tokio::sync::Mutex;

/// Resolves a matcher selection against storage once and hands out disjoint
/// shards of the result.
///
/// Every selector shard created by the planner holds the same
/// `SeriesSelector`; the first shard to initialize performs the storage
/// lookup, the rest reuse the cached selection. Shard `i` of `n` owns every
/// `n`-th series, which keeps the partitioning deterministic.
#[derive(Debug)]
pub struct SeriesSelector {
    storage: Arc<dyn SeriesStorage>,
    matchers: Vec<Matcher>,
    mint: i64,
    maxt: i64,
    loaded: Mutex<Option<Arc<Vec<Arc<dyn StorageSeries>>>>>,
}

impl SeriesSelector {
    /// Create a selector over `[mint, maxt]` (already widened by the caller
    /// for lookback, range and offset).
    pub fn new(storage: Arc<dyn SeriesStorage>, matchers: Vec<Matcher>, mint: i64, maxt: i64) -> Self {
        Self {
            storage,
            matchers,
            mint,
            maxt,
            loaded: Mutex::new(None),
        }
    }

    /// The series owned by shard `shard` of `num_shards`.
    pub async fn shard(
        &self,
        shard: usize,
        num_shards: usize,
    ) -> ParallaxResult<Vec<Arc<dyn StorageSeries>>> {
        let all = self.load().await?;
        Ok(all
            .iter()
            .enumerate()
            .filter(|(i, _)| i % num_shards == shard)
            .map(|(_, s)| Arc::clone(s))
            .collect())
    }

    async fn load(&self) -> ParallaxResult<Arc<Vec<Arc<dyn StorageSeries>>>> {
        let mut guard = self.loaded.lock().await;
        if let Some(series) = guard.as_ref() {
            return Ok(Arc::clone(series));
        }
        let series = Arc::new(
            self.storage
                .select(&self.matchers, self.mint, self.maxt)
                .await?,
        );
        *guard = Some(Arc::clone(&series));
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::{labels, Sample};
    use parallax_storage::MemoryStorage;

    fn storage_with(n: usize) -> Arc<MemoryStorage> {
        let mut storage = MemoryStorage::new();
        for i in 0..n {
            storage.add_series(
                labels! {"__name__" => "m", "i" => &i.to_string()},
                vec![Sample::new(1000, i as f64)],
            );
        }
        Arc::new(storage)
    }

    #[tokio::test]
    async fn test_shards_are_disjoint_and_complete() {
        let selector = SeriesSelector::new(
            storage_with(10),
            vec![Matcher::equal("__name__", "m")],
            0,
            10_000,
        );

        let mut seen = Vec::new();
        for shard in 0..4 {
            for series in selector.shard(shard, 4).await.unwrap() {
                seen.push(series.labels().get("i").unwrap().to_string());
            }
        }
        seen.sort_by_key(|i| i.parse::<usize>().unwrap());
        let expected: Vec<_> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_selection_is_loaded_once() {
        let selector = SeriesSelector::new(
            storage_with(4),
            vec![Matcher::equal("__name__", "m")],
            0,
            10_000,
        );
        let a = selector.shard(0, 2).await.unwrap();
        let b = selector.shard(0, 2).await.unwrap();
        assert_eq!(a.len(), b.len());
        assert!(Arc::ptr_eq(&a[0], &b[0]));
    }
}
