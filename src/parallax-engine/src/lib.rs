//! Physical execution engine for Parallax.
//!
//! The engine evaluates a [`parallax_logical::Expr`] over a time range by
//! pulling batches of step vectors through a tree of physical operators.
//!
//! # Execution Model
//!
//! Execution is pull-based: the driver calls `next()` on the root operator,
//! each operator calls `next()` on its children. Data flows upward as batches
//! of [`model::StepVector`]s, allocated from the producing operator's
//! [`model::VectorPool`] and returned to it by the consumer. Parallelism comes
//! from pipelining between producer and consumer stages and from the coalesce
//! exchange, which partitions selector series across worker tasks.
//!
//! # Modules
//!
//! - [`model`]: step vectors and the vector pool
//! - [`operators`]: the physical operators
//! - [`physical`]: expression-to-operator planning
//! - [`executor`]: the engine driver, execution context and results
//! - [`metrics`]: lightweight per-operator execution metrics

pub mod executor;
pub mod metrics;
pub mod model;
pub mod operators;
pub mod physical;
mod selector;

pub use executor::{
    CancellationHandle, Engine, EngineOpts, ExecutionContext, InstantSample, QueryOpts,
    QueryResult, QueryValue, SeriesResult,
};
pub use model::{StepVector, VectorPool};
pub use operators::{BoxedOperator, PhysicalOperator};
pub use physical::PhysicalPlan;
pub use selector::SeriesSelector;
