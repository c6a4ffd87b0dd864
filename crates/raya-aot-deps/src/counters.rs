//! Invocation counters
//!
//! The interpreter counts every method down from an initial value and asks
//! for a compiled (or AOT) body when the count reaches zero. When the last
//! dependency of an AOT body is satisfied, its counter is forced to zero so
//! the next call picks the body up.

use crate::env::InvocationCounters;
use crate::handles::MethodId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;

/// Force the invocation count of `method` to zero.
///
/// Best effort: gives up after `max_attempts` failed compare-and-set rounds,
/// and stops as soon as someone else has already brought the count to zero or
/// below. Returns true if this call set the count.
pub fn nudge_to_zero(counters: &dyn InvocationCounters, method: MethodId, max_attempts: u32) -> bool {
    for _ in 0..max_attempts {
        let count = counters.invocation_count(method);
        if count <= 0 {
            return false;
        }
        if counters.compare_and_set_invocation_count(method, count, 0) {
            debug!(method = %method, previous = count, "invocation count forced to zero");
            return true;
        }
    }
    debug!(method = %method, attempts = max_attempts, "gave up forcing invocation count");
    false
}

/// Concurrent per-method invocation counters
///
/// Counters are created on first use; an unknown method reads as zero.
pub struct InvocationCounterRegistry {
    counters: DashMap<MethodId, AtomicI32>,
}

impl InvocationCounterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Set the starting count for `method`
    pub fn set_initial(&self, method: MethodId, count: i32) {
        self.counters.insert(method, AtomicI32::new(count));
    }

    /// Record a call: count down by one without going below zero.
    /// Returns the new count (zero means "compile now").
    pub fn record_call(&self, method: MethodId) -> i32 {
        let Some(counter) = self.counters.get(&method) else {
            return 0;
        };
        match counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| (c > 0).then(|| c - 1)) {
            Ok(previous) => previous - 1,
            Err(current) => current,
        }
    }

    /// Drop the counter of `method` (when its class is unloaded)
    pub fn remove(&self, method: MethodId) -> bool {
        self.counters.remove(&method).is_some()
    }

    /// Number of methods with a counter
    pub fn count(&self) -> usize {
        self.counters.len()
    }
}

impl Default for InvocationCounterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationCounters for InvocationCounterRegistry {
    fn invocation_count(&self, method: MethodId) -> i32 {
        self.counters
            .get(&method)
            .map(|counter| counter.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn compare_and_set_invocation_count(&self, method: MethodId, expected: i32, new: i32) -> bool {
        self.counters
            .get(&method)
            .map(|counter| {
                counter
                    .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}
