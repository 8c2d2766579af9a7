pub mod errors;
pub mod logging;

pub use logging::{Component, Logger, LoggingContext};
