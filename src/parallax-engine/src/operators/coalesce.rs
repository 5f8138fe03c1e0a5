//! Parallel coalesce exchange.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use common_error::{ParallaxError, ParallaxResult};
use parallax_core::Labels;

use crate::executor::ExecutionContext;
use crate::model::{StepVector, VectorPool};
use crate::operators::{BoxedOperator, PhysicalOperator};

type BatchReceiver = mpsc::Receiver<ParallaxResult<Vec<StepVector>>>;

/// Fans a sub-plan out over worker tasks and merges their output step-aligned.
///
/// Each child covers a disjoint partition of the input series. On the first
/// `next()`, one producer task per child pulls batches in a loop and pushes
/// them into a bounded channel; the coordinator takes one batch per live
/// child per call, rewrites sample ids by the child's series offset and
/// merges by step. The merge is deterministic, so the exchange's output is
/// identical to a sequential execution of its children.
///
/// Backpressure: producers block once their channel holds `2 * steps_batch`
/// batches. When the exchange is dropped, the closed channels unblock the
/// producers, which then exit; producers also observe context cancellation
/// between pulls.
pub struct CoalesceExec {
    pool: Arc<VectorPool>,

    /// Children, present until the producer tasks take them.
    operators: Option<Vec<BoxedOperator>>,
    /// Pool handles of the children, kept for returning merged-out batches.
    child_pools: Vec<Arc<VectorPool>>,
    /// Sample-id offset of each child in the concatenated series list.
    offsets: Vec<u64>,
    series: Option<Arc<[Labels]>>,

    /// One receiver per child once producers run; `None` slots are exhausted.
    receivers: Option<Vec<Option<BatchReceiver>>>,
    /// Producer tasks; dropping the exchange aborts any still running.
    workers: common_runtime::JoinSet<()>,
    steps_batch: usize,
}

impl std::fmt::Debug for CoalesceExec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalesceExec")
            .field("children", &self.child_pools.len())
            .field("running", &self.receivers.is_some())
            .finish_non_exhaustive()
    }
}

impl CoalesceExec {
    /// Create an exchange over identically-stepped children.
    pub fn new(operators: Vec<BoxedOperator>, steps_batch: usize) -> Self {
        let child_pools = operators.iter().map(|op| op.pool()).collect();
        Self {
            pool: Arc::new(VectorPool::new(steps_batch)),
            operators: Some(operators),
            child_pools,
            offsets: Vec::new(),
            series: None,
            receivers: None,
            workers: common_runtime::JoinSet::new(),
            steps_batch,
        }
    }

    async fn init_series(&mut self, ctx: &ExecutionContext) -> ParallaxResult<()> {
        if self.series.is_some() {
            return Ok(());
        }
        let operators = self
            .operators
            .as_mut()
            .expect("series is initialized before the workers start");

        let mut series: Vec<Labels> = Vec::new();
        let mut offsets = Vec::with_capacity(operators.len());
        for operator in operators.iter_mut() {
            offsets.push(series.len() as u64);
            series.extend(operator.series(ctx).await?.iter().cloned());
        }

        self.pool.set_step_size(series.len());
        self.offsets = offsets;
        self.series = Some(Arc::from(series));
        Ok(())
    }

    fn start_workers(&mut self, ctx: &ExecutionContext) {
        let operators = self.operators.take().expect("workers start once");
        let mut receivers = Vec::with_capacity(operators.len());
        for (worker, mut operator) in operators.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(2 * self.steps_batch);
            let ctx = ctx.clone();
            self.workers.spawn(async move {
                tracing::trace!(worker, "coalesce producer started");
                loop {
                    if ctx.is_cancelled() {
                        break;
                    }
                    match operator.next(&ctx).await {
                        Ok(Some(batch)) => {
                            ctx.update_metrics("CoalesceExec", |m| m.add_batch());
                            if tx.send(Ok(batch)).await.is_err() {
                                // Consumer dropped; treat as cancellation.
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                    }
                }
                tracing::trace!(worker, "coalesce producer finished");
            });
            receivers.push(Some(rx));
        }
        self.receivers = Some(receivers);
    }
}

#[async_trait]
impl PhysicalOperator for CoalesceExec {
    fn name(&self) -> &'static str {
        "CoalesceExec"
    }

    async fn series(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Arc<[Labels]>> {
        self.init_series(ctx).await?;
        Ok(self.series.as_ref().expect("initialized").clone())
    }

    async fn next(&mut self, ctx: &ExecutionContext) -> ParallaxResult<Option<Vec<StepVector>>> {
        ctx.check_cancelled()?;
        if self.receivers.is_none() {
            self.init_series(ctx).await?;
            self.start_workers(ctx);
        }

        let mut merged = self.pool.get_vector_batch();
        let mut any_data = false;

        let receivers = self.receivers.as_mut().expect("workers running");
        for (child, slot) in receivers.iter_mut().enumerate() {
            let Some(rx) = slot else { continue };
            match rx.recv().await {
                None => *slot = None,
                Some(Err(e)) => {
                    self.pool.put_vectors(merged);
                    return Err(e);
                }
                Some(Ok(child_batch)) => {
                    any_data = true;
                    let mut misaligned = false;
                    for (step, vector) in child_batch.iter().enumerate() {
                        if merged.len() <= step {
                            merged.push(self.pool.get_step_vector(vector.t));
                        } else if merged[step].t != vector.t {
                            misaligned = true;
                            break;
                        }
                        for (id, value) in vector.iter() {
                            merged[step].append_sample(id + self.offsets[child], value);
                        }
                    }
                    self.child_pools[child].put_vectors(child_batch);
                    if misaligned {
                        self.pool.put_vectors(merged);
                        return Err(ParallaxError::internal(
                            "step misalignment across coalesce partitions",
                        ));
                    }
                }
            }
        }

        if !any_data {
            self.pool.put_vectors(merged);
            return Ok(None);
        }
        Ok(Some(merged))
    }

    fn pool(&self) -> Arc<VectorPool> {
        Arc::clone(&self.pool)
    }

    fn explain(&self) -> String {
        format!("CoalesceExec(children={})", self.child_pools.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CancellationHandle, ExecutionContext, QueryOpts};
    use crate::operators::testing::{sv, test_ctx, MockExec};
    use parallax_core::labels;
    use parallax_storage::MemoryStorage;

    #[tokio::test]
    async fn test_merge_rewrites_sample_ids() {
        let left = MockExec::new(
            vec![labels! {"i" => "0"}, labels! {"i" => "2"}],
            vec![vec![sv(0, &[(0, 0.0), (1, 2.0)]), sv(1000, &[(0, 0.5)])]],
        );
        let right = MockExec::new(
            vec![labels! {"i" => "1"}],
            vec![vec![sv(0, &[(0, 1.0)]), sv(1000, &[(0, 1.5)])]],
        );
        let mut op = CoalesceExec::new(vec![Box::new(left), Box::new(right)], 10);
        let ctx = test_ctx(&QueryOpts::range(0, 1000, 1000));

        let series = op.series(&ctx).await.unwrap();
        assert_eq!(
            series.as_ref(),
            &[labels! {"i" => "0"}, labels! {"i" => "2"}, labels! {"i" => "1"}]
        );

        let batch = op.next(&ctx).await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].sample_ids, vec![0, 1, 2]);
        assert_eq!(batch[0].samples, vec![0.0, 2.0, 1.0]);
        assert_eq!(batch[1].sample_ids, vec![0, 2]);
        assert_eq!(batch[1].samples, vec![0.5, 1.5]);

        assert!(op.next(&ctx).await.unwrap().is_none());
        assert!(op.next(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_child_error_propagates() {
        #[derive(Debug)]
        struct FailingExec {
            pool: Arc<VectorPool>,
        }

        #[async_trait]
        impl PhysicalOperator for FailingExec {
            fn name(&self) -> &'static str {
                "FailingExec"
            }

            async fn series(
                &mut self,
                _ctx: &ExecutionContext,
            ) -> ParallaxResult<Arc<[Labels]>> {
                Ok(Arc::from(Vec::<Labels>::new()))
            }

            async fn next(
                &mut self,
                _ctx: &ExecutionContext,
            ) -> ParallaxResult<Option<Vec<StepVector>>> {
                Err(ParallaxError::storage("chunk decode failed"))
            }

            fn pool(&self) -> Arc<VectorPool> {
                Arc::clone(&self.pool)
            }
        }

        let failing = FailingExec {
            pool: Arc::new(VectorPool::new(10)),
        };
        let mut op = CoalesceExec::new(vec![Box::new(failing)], 10);
        let ctx = test_ctx(&QueryOpts::instant(0));

        let err = op.next(&ctx).await.unwrap_err();
        assert!(matches!(err, ParallaxError::StorageError(_)));
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_exchange() {
        let child = MockExec::new(
            vec![labels! {"i" => "0"}],
            vec![vec![sv(0, &[(0, 1.0)])]],
        );
        let mut op = CoalesceExec::new(vec![Box::new(child)], 10);

        let (handle, rx) = CancellationHandle::new();
        let ctx = ExecutionContext::new(
            Arc::new(MemoryStorage::new()),
            QueryOpts::instant(0),
        )
        .with_cancellation(rx);

        handle.cancel();
        let err = op.next(&ctx).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
