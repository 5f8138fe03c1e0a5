//! Parallax - parallel, vectorized time-series query execution engine
//!
//! Parallax evaluates PromQL-like query expressions over a time range by
//! pulling batches of step vectors through a tree of physical operators.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

// Re-export core crates
pub use common_error as error;
pub use parallax_core as core;
pub use parallax_engine as engine;
pub use parallax_logical as logical;
pub use parallax_storage as storage;

/// Parallax version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
