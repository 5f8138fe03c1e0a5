//! Physical operator trait.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use common_error::ParallaxResult;
use parallax_core::Labels;

use crate::executor::ExecutionContext;
use crate::model::{StepVector, VectorPool};

/// Trait for physical operators in the execution plan.
///
/// Physical operators form a tree that processes data in a **pull-based**
/// fashion. Each call to `next()` returns the next batch of step vectors.
///
/// # Contract
///
/// - `series()` is idempotent; the first caller (whether `series` or the
///   first `next`) performs initialization and every later call observes the
///   cached result.
/// - `next()` returns `Ok(None)` at end-of-stream and keeps returning
///   `Ok(None)` on later calls.
/// - Step vectors and batches returned by `next()` come from [`Self::pool`];
///   the consumer returns them there after use.
/// - Operators check cancellation at least once per batch and propagate child
///   errors without retrying.
#[async_trait]
pub trait PhysicalOperator: Send + Debug {
    /// Stable operator name for explain/logging.
    fn name(&self) -> &'static str;

    /// The operator's output series. Series ids in emitted step vectors are
    /// indexes into this list.
    async fn series(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Arc<[Labels]>>;

    /// Get the next batch of step vectors.
    ///
    /// Returns `Ok(Some(batch))` while data is available and `Ok(None)` when
    /// exhausted. An error aborts the pipeline.
    async fn next(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Option<Vec<StepVector>>>;

    /// The pool the operator's output vectors are allocated from.
    fn pool(&self) -> Arc<VectorPool>;

    /// Display string for EXPLAIN.
    fn explain(&self) -> String {
        self.name().to_string()
    }
}

/// Boxed physical operator; plans are built per query, so operators own their
/// children exclusively.
pub type BoxedOperator = Box<dyn PhysicalOperator>;
