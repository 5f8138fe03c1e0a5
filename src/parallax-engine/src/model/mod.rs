//! Step-vector data model and vector pool.

mod step_vector;
mod vector_pool;

pub use step_vector::StepVector;
pub use vector_pool::VectorPool;
