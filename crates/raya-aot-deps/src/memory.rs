//! Persistent memory accounting
//!
//! Entries of both tables live for the whole process and are charged against
//! one arena. The arena only does byte accounting against an optional limit;
//! the entries themselves are ordinary heap allocations.

use crate::error::PersistentAllocError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Byte budget for persistent table entries
#[derive(Debug)]
pub struct PersistentMemory {
    /// Bytes currently charged
    allocated: AtomicUsize,
    /// Maximum bytes that may be charged at once
    limit: usize,
    /// Number of refused charges
    failures: AtomicUsize,
}

impl PersistentMemory {
    /// Create an arena with no limit
    pub fn unlimited() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Create an arena that refuses charges beyond `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        PersistentMemory {
            allocated: AtomicUsize::new(0),
            limit,
            failures: AtomicUsize::new(0),
        }
    }

    /// Charge `bytes` against the limit
    pub fn try_charge(&self, bytes: usize) -> Result<(), PersistentAllocError> {
        let limit = self.limit;
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(bytes).filter(|&total| total <= limit)
            })
            .map(|_| ())
            .map_err(|current| {
                self.failures.fetch_add(1, Ordering::Relaxed);
                PersistentAllocError::Exhausted {
                    requested: bytes,
                    available: limit.saturating_sub(current),
                }
            })
    }

    /// Return `bytes` previously charged
    pub fn release(&self, bytes: usize) {
        let previous = self.allocated.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(previous >= bytes, "released more persistent memory than charged");
    }

    /// Bytes currently charged
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Configured limit (`usize::MAX` when unlimited)
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of charges refused so far
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Default for PersistentMemory {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_and_release() {
        let memory = PersistentMemory::with_limit(100);
        assert!(memory.try_charge(60).is_ok());
        assert_eq!(memory.allocated(), 60);

        memory.release(20);
        assert_eq!(memory.allocated(), 40);
    }

    #[test]
    fn test_limit_exceeded() {
        let memory = PersistentMemory::with_limit(100);
        memory.try_charge(80).unwrap();

        match memory.try_charge(30) {
            Err(PersistentAllocError::Exhausted { requested, available }) => {
                assert_eq!(requested, 30);
                assert_eq!(available, 20);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        // A refused charge leaves the total untouched
        assert_eq!(memory.allocated(), 80);
        assert_eq!(memory.failures(), 1);

        // Exactly filling the budget is allowed
        assert!(memory.try_charge(20).is_ok());
    }

    #[test]
    fn test_unlimited() {
        let memory = PersistentMemory::default();
        assert!(memory.try_charge(1 << 40).is_ok());
        assert_eq!(memory.limit(), usize::MAX);
    }
}
