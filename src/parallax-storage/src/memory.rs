//! In-memory storage implementation.

use std::sync::Arc;

use async_trait::async_trait;
use common_error::ParallaxResult;
use parallax_core::{Labels, Matcher, Sample};

use crate::storage::{SampleIter, SeriesStorage, StorageSeries};

/// A single in-memory series with sorted samples.
#[derive(Debug)]
struct MemorySeries {
    labels: Labels,
    samples: Arc<Vec<Sample>>,
}

impl StorageSeries for MemorySeries {
    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn sample_iterator(&self, mint: i64, maxt: i64) -> SampleIter {
        let start = self.samples.partition_point(|s| s.t < mint);
        let end = self.samples.partition_point(|s| s.t <= maxt);
        Box::new(MemorySampleIter {
            samples: Arc::clone(&self.samples),
            pos: start,
            end,
        })
    }
}

struct MemorySampleIter {
    samples: Arc<Vec<Sample>>,
    pos: usize,
    end: usize,
}

impl Iterator for MemorySampleIter {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.pos >= self.end {
            return None;
        }
        let sample = self.samples[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

/// In-memory [`SeriesStorage`] used as the engine's test fixture.
///
/// Series are returned in insertion order, which keeps series ids and
/// partitioning deterministic across runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    series: Vec<Arc<MemorySeries>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a series, sorting its samples by timestamp.
    pub fn add_series(&mut self, labels: Labels, mut samples: Vec<Sample>) {
        samples.sort_by_key(|s| s.t);
        self.series.push(Arc::new(MemorySeries {
            labels,
            samples: Arc::new(samples),
        }));
    }

    /// Builder-style [`MemoryStorage::add_series`].
    pub fn with_series(mut self, labels: Labels, samples: Vec<Sample>) -> Self {
        self.add_series(labels, samples);
        self
    }

    /// Number of stored series.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Whether the storage holds no series.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[async_trait]
impl SeriesStorage for MemoryStorage {
    async fn select(
        &self,
        matchers: &[Matcher],
        mint: i64,
        maxt: i64,
    ) -> ParallaxResult<Vec<Arc<dyn StorageSeries>>> {
        let mut out: Vec<Arc<dyn StorageSeries>> = Vec::new();
        for series in &self.series {
            if !matchers.iter().all(|m| m.matches_labels(&series.labels)) {
                continue;
            }
            let in_range = series
                .samples
                .iter()
                .any(|s| s.t >= mint && s.t <= maxt);
            if in_range {
                out.push(Arc::clone(series) as Arc<dyn StorageSeries>);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::labels;

    fn storage() -> MemoryStorage {
        MemoryStorage::new()
            .with_series(
                labels! {"__name__" => "up", "job" => "api"},
                vec![Sample::new(1000, 1.0), Sample::new(2000, 0.0)],
            )
            .with_series(
                labels! {"__name__" => "up", "job" => "web"},
                vec![Sample::new(1500, 1.0)],
            )
    }

    #[tokio::test]
    async fn test_select_by_matcher() {
        let storage = storage();
        let matchers = vec![
            Matcher::equal("__name__", "up"),
            Matcher::equal("job", "api"),
        ];
        let series = storage.select(&matchers, 0, 10_000).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].labels().get("job"), Some("api"));
    }

    #[tokio::test]
    async fn test_select_filters_empty_range() {
        let storage = storage();
        let matchers = vec![Matcher::equal("__name__", "up")];
        let series = storage.select(&matchers, 5000, 10_000).await.unwrap();
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn test_sample_iterator_bounds() {
        let storage = storage();
        let matchers = vec![Matcher::equal("job", "api")];
        let series = storage.select(&matchers, 0, 10_000).await.unwrap();
        let samples: Vec<_> = series[0].sample_iterator(1500, 3000).collect();
        assert_eq!(samples, vec![Sample::new(2000, 0.0)]);
    }

    #[tokio::test]
    async fn test_unsorted_samples_are_sorted() {
        let storage = MemoryStorage::new().with_series(
            labels! {"__name__" => "m"},
            vec![Sample::new(2000, 2.0), Sample::new(1000, 1.0)],
        );
        let series = storage
            .select(&[Matcher::equal("__name__", "m")], 0, 10_000)
            .await
            .unwrap();
        let samples: Vec<_> = series[0].sample_iterator(0, 10_000).collect();
        assert_eq!(samples[0].t, 1000);
    }
}
