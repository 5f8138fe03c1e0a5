//! Storage adaptor for Parallax.
//!
//! The engine consumes storage through two narrow surfaces: series discovery
//! by label matchers ([`SeriesStorage::select`]) and bulk sample decoding per
//! series ([`StorageSeries::sample_iterator`]). Everything else about the
//! storage layer is out of scope.
//!
//! [`MemoryStorage`] is the in-memory implementation used as the test fixture
//! throughout the engine.

mod memory;
mod storage;

pub use memory::MemoryStorage;
pub use storage::{SampleIter, SeriesStorage, StorageSeries};
