//! Entries of the dependency table

use crate::handles::{ClassId, ClassOffset, MethodId};
use rustc_hash::FxHashSet;

/// Classes loaded at one class offset and the methods waiting on them
#[derive(Debug, Default)]
pub(crate) struct OffsetEntry {
    /// Currently loaded classes whose cached descriptor is at this offset
    pub loaded_classes: FxHashSet<ClassId>,
    /// The loaded classes that have finished initialization (a subset of `loaded_classes`)
    pub initialized_classes: FxHashSet<ClassId>,
    /// Methods waiting for any class at this offset to be loaded
    pub waiting_load: FxHashSet<MethodId>,
    /// Methods waiting for any class at this offset to be initialized
    pub waiting_init: FxHashSet<MethodId>,
}

impl OffsetEntry {
    pub fn is_empty(&self) -> bool {
        self.loaded_classes.is_empty() && self.waiting_load.is_empty() && self.waiting_init.is_empty()
    }

    /// Whether a dependency on this offset currently holds
    pub fn satisfies(&self, needs_init: bool) -> bool {
        if needs_init {
            !self.initialized_classes.is_empty()
        } else {
            !self.loaded_classes.is_empty()
        }
    }

    pub fn waiting(&mut self, needs_init: bool) -> &mut FxHashSet<MethodId> {
        if needs_init {
            &mut self.waiting_init
        } else {
            &mut self.waiting_load
        }
    }
}

/// A method whose AOT body is waiting on class offsets
#[derive(Debug)]
pub(crate) struct MethodEntry {
    /// Dependencies not yet satisfied. A method in the pending set keeps its
    /// last dependency counted here until it is resolved or regresses.
    pub remaining: u32,
    /// Canonical, deduplicated dependencies
    pub dependencies: Box<[(ClassOffset, bool)]>,
}

impl MethodEntry {
    /// Bytes charged in persistent memory for this entry
    pub fn footprint(&self) -> usize {
        std::mem::size_of::<MethodEntry>()
            + self.dependencies.len() * std::mem::size_of::<(ClassOffset, bool)>()
    }
}

/// Bytes charged in persistent memory for one offset entry
pub(crate) const OFFSET_ENTRY_FOOTPRINT: usize = std::mem::size_of::<OffsetEntry>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_entry_satisfies() {
        let mut entry = OffsetEntry::default();
        assert!(entry.is_empty());
        assert!(!entry.satisfies(false));

        let class = ClassId::from_raw(0x100);
        entry.loaded_classes.insert(class);
        assert!(entry.satisfies(false));
        assert!(!entry.satisfies(true));

        entry.initialized_classes.insert(class);
        assert!(entry.satisfies(true));
    }

    #[test]
    fn test_waiting_sets() {
        let mut entry = OffsetEntry::default();
        entry.waiting(true).insert(MethodId::from_raw(8));
        assert!(entry.waiting_load.is_empty());
        assert_eq!(entry.waiting_init.len(), 1);
        assert!(!entry.is_empty());
    }
}
