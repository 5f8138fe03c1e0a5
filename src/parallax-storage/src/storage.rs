//! Storage adaptor traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use common_error::ParallaxResult;
use parallax_core::{Labels, Matcher, Sample};

/// An owned iterator over decoded samples in timestamp order.
pub type SampleIter = Box<dyn Iterator<Item = Sample> + Send>;

/// One series selected from storage.
pub trait StorageSeries: Send + Sync + fmt::Debug {
    /// The series' label set.
    fn labels(&self) -> &Labels;

    /// Decode all samples with `mint <= t <= maxt`, in timestamp order.
    ///
    /// May be called more than once; each call returns a fresh iterator.
    fn sample_iterator(&self, mint: i64, maxt: i64) -> SampleIter;
}

/// Series discovery by label matchers.
///
/// Implementations must return series in a deterministic order for a given
/// set of matchers; the engine's series ids and partitioning depend on it.
#[async_trait]
pub trait SeriesStorage: Send + Sync + fmt::Debug {
    /// All series matching every matcher, restricted to those with at least
    /// one sample in `[mint, maxt]`.
    async fn select(
        &self,
        matchers: &[Matcher],
        mint: i64,
        maxt: i64,
    ) -> ParallaxResult<Vec<Arc<dyn StorageSeries>>>;
}
