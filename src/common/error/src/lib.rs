//! Error handling for Parallax.

mod error;

pub use error::{GenericError, ParallaxError, ParallaxResult};
