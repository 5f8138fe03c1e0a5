//! Physical execution operators.
//!
//! Each operator implements the [`PhysicalOperator`] trait and follows the
//! pull-based execution model: batches of step vectors flow from the leaves
//! (selectors) toward the root, and every consumed vector is returned to its
//! producer's pool.
//!
//! | Category | Operators |
//! |----------|-----------|
//! | Source | `NumberLiteralExec`, `VectorSelectorExec`, `MatrixSelectorExec` |
//! | Binary | `VectorBinaryExec`, `ScalarBinaryExec`, `SetOperationExec` |
//! | Aggregation | `AggregateExec` |
//! | Exchange | `CoalesceExec` |

mod aggregate;
pub mod binary;
mod coalesce;
mod functions;
mod literal;
mod matrix_selector;
mod traits;
mod vector_selector;

pub use aggregate::AggregateExec;
pub use binary::{ScalarBinaryExec, SetOperationExec, VectorBinaryExec};
pub use coalesce::CoalesceExec;
pub use literal::NumberLiteralExec;
pub use matrix_selector::MatrixSelectorExec;
pub use traits::{BoxedOperator, PhysicalOperator};
pub use vector_selector::VectorSelectorExec;
