//! The engine driver, execution context and result types.

mod context;
mod engine;
mod result;

pub use context::{
    CancellationHandle, ExecutionContext, QueryOpts, DEFAULT_LOOKBACK_DELTA_MS,
    DEFAULT_STEPS_BATCH,
};
pub use engine::{Engine, EngineOpts};
pub use result::{InstantSample, QueryResult, QueryValue, SeriesResult};
