//! Recycling pool for step vectors and batches.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::model::StepVector;

/// Maximum number of free vectors/batches a pool retains.
const MAX_RETAINED: usize = 64;

/// A thread-safe recycler for step vectors and batches.
///
/// Each operator owns the pool its output vectors come from. The consumer
/// returns every step vector (and the batch container) to the producer's pool
/// after use, so allocation is proportional to pipeline width rather than to
/// the query span. Returned vectors are cleared before reuse; a re-acquired
/// vector carries no residue from its prior use.
#[derive(Debug)]
pub struct VectorPool {
    batches: Mutex<Vec<Vec<StepVector>>>,
    vectors: Mutex<Vec<StepVector>>,
    /// Per-step sample capacity hint; set once during operator initialization.
    step_size: AtomicUsize,
    steps_batch: usize,
}

impl VectorPool {
    /// Create a pool for batches of up to `steps_batch` step vectors.
    pub fn new(steps_batch: usize) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            vectors: Mutex::new(Vec::new()),
            step_size: AtomicUsize::new(0),
            steps_batch,
        }
    }

    /// Set the per-step sample preallocation hint.
    pub fn set_step_size(&self, n: usize) {
        self.step_size.store(n, Ordering::Relaxed);
    }

    /// The current per-step sample preallocation hint.
    pub fn step_size(&self) -> usize {
        self.step_size.load(Ordering::Relaxed)
    }

    /// Get an empty batch with capacity for `steps_batch` step vectors.
    pub fn get_vector_batch(&self) -> Vec<StepVector> {
        let mut free = self.batches.lock().expect("pool lock poisoned");
        free.pop()
            .unwrap_or_else(|| Vec::with_capacity(self.steps_batch))
    }

    /// Return a batch, recycling any step vectors still inside it.
    pub fn put_vectors(&self, mut batch: Vec<StepVector>) {
        for vector in batch.drain(..) {
            self.put_step_vector(vector);
        }
        let mut free = self.batches.lock().expect("pool lock poisoned");
        if free.len() < MAX_RETAINED {
            free.push(batch);
        }
    }

    /// Get a cleared step vector for timestamp `t`, with sample capacity at
    /// least the configured step size.
    pub fn get_step_vector(&self, t: i64) -> StepVector {
        let recycled = self.vectors.lock().expect("pool lock poisoned").pop();
        let mut vector = recycled.unwrap_or_default();
        vector.reset(t);
        let step_size = self.step_size();
        if vector.sample_ids.capacity() < step_size {
            vector.sample_ids.reserve(step_size);
        }
        if vector.samples.capacity() < step_size {
            vector.samples.reserve(step_size);
        }
        vector
    }

    /// Return a step vector to the free list.
    pub fn put_step_vector(&self, mut vector: StepVector) {
        vector.reset(0);
        let mut free = self.vectors.lock().expect("pool lock poisoned");
        if free.len() < MAX_RETAINED {
            free.push(vector);
        }
    }
}
