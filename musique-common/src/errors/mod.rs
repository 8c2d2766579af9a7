// Error utilities for musique_common

// Use standard error utilities from third-party libraries
pub use anyhow::{anyhow, Result};
pub use thiserror::Error;
