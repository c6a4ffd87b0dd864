//! Dependency table statistics

use serde::Serialize;
use std::fmt;

/// Snapshot of the dependency table contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    /// Whether the table is still active
    pub active: bool,
    /// Methods still waiting on dependencies
    pub tracked_methods: usize,
    /// Class offsets with an entry
    pub offsets: usize,
    /// Loaded classes across all offsets
    pub loaded_classes: usize,
    /// Registrations in load-waiting sets
    pub load_waiters: usize,
    /// Registrations in init-waiting sets
    pub init_waiters: usize,
    /// Methods queued for counter reset
    pub pending_loads: usize,
}

impl TableStats {
    /// Render as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} methods tracked, {} offsets, {} loaded classes, {} load / {} init waiters, {} pending",
            self.tracked_methods,
            self.offsets,
            self.loaded_classes,
            self.load_waiters,
            self.init_waiters,
            self.pending_loads,
        )?;
        if !self.active {
            write!(f, " (inactive)")?;
        }
        Ok(())
    }
}
