//! Configuration for the loader and dependency tables

use crate::defaults::{DEFAULT_COUNTER_NUDGE_RETRIES, DEFAULT_LOADER_TABLE_BUCKETS};
use crate::error::OptionsError;
use crate::memory::PersistentMemory;
use serde::{Deserialize, Serialize};

/// Options for the AOT dependency subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AotDepsOptions {
    /// A shared class cache is configured (default: true)
    pub shared_cache: bool,
    /// A remote AOT cache is in use (default: false).
    ///
    /// Enables the class name index of the loader table and accepts loaders
    /// whose first class has no validation chain.
    pub aot_cache: bool,
    /// Start the dependency table active (default: true)
    pub track_dependencies: bool,
    /// Persistent memory limit in bytes (default: unlimited)
    pub persistent_memory_limit: Option<usize>,
    /// Buckets per loader table index (default: 2053)
    pub loader_table_buckets: usize,
    /// Compare-and-set attempts when forcing a counter to zero (default: 8)
    pub counter_nudge_retries: u32,
}

impl Default for AotDepsOptions {
    fn default() -> Self {
        AotDepsOptions {
            shared_cache: true,
            aot_cache: false,
            track_dependencies: true,
            persistent_memory_limit: None,
            loader_table_buckets: DEFAULT_LOADER_TABLE_BUCKETS,
            counter_nudge_retries: DEFAULT_COUNTER_NUDGE_RETRIES,
        }
    }
}

impl AotDepsOptions {
    /// Parse and validate options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        let options: AotDepsOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Check option values
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.loader_table_buckets == 0 {
            return Err(OptionsError::ZeroBuckets);
        }
        if self.counter_nudge_retries == 0 {
            return Err(OptionsError::ZeroRetries);
        }
        Ok(())
    }

    /// Whether the loader table records anything at all
    pub fn loader_table_enabled(&self) -> bool {
        self.shared_cache || self.aot_cache
    }

    /// Whether the loader table keeps a class name index
    pub fn uses_name_index(&self) -> bool {
        self.aot_cache
    }

    /// Whether a loader may be recorded without a validation chain
    pub fn tolerates_chainless_entries(&self) -> bool {
        self.aot_cache
    }

    /// Build the persistent memory arena these options describe
    pub fn persistent_memory(&self) -> PersistentMemory {
        match self.persistent_memory_limit {
            Some(limit) => PersistentMemory::with_limit(limit),
            None => PersistentMemory::unlimited(),
        }
    }
}
