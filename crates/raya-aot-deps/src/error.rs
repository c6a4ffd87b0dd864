//! Error types

use std::collections::TryReserveError;
use thiserror::Error;

/// Failure to allocate from persistent memory
///
/// Never crosses the public API of the tables: the loader table drops the one
/// association that hit it, the dependency table deactivates itself.
#[derive(Debug, Error)]
pub enum PersistentAllocError {
    /// The persistent memory limit would be exceeded
    #[error("Persistent memory exhausted: requested {requested} bytes, {available} available")]
    Exhausted {
        /// Bytes requested
        requested: usize,
        /// Bytes left under the limit
        available: usize,
    },

    /// A hash container could not grow
    #[error("Container reservation failed: {0}")]
    Reserve(#[from] TryReserveError),
}

/// Invalid configuration
#[derive(Debug, Error)]
pub enum OptionsError {
    /// The loader table needs at least one bucket per index
    #[error("Loader table bucket count must be non-zero")]
    ZeroBuckets,

    /// The invocation counter nudge needs at least one attempt
    #[error("Counter nudge retry bound must be non-zero")]
    ZeroRetries,

    /// Malformed JSON options
    #[error("Invalid options: {0}")]
    Json(#[from] serde_json::Error),
}
