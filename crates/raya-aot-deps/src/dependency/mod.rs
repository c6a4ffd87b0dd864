//! AOT dependency table
//!
//! An AOT body may only run once the classes it was compiled against are
//! loaded, and for some of them initialized. Each dependency names a
//! validation chain; the table keys everything by the offset of the class
//! descriptor the chain starts with, so different chains for the same class
//! share one entry.
//!
//! Per method the table keeps a count of open dependencies. Class events move
//! the counts; when a count hits zero the method's invocation counter is
//! forced to zero and the method stops being tracked:
//!
//! ```text
//! untracked -> tracking (remaining > 0) -> pending (all satisfied) -> untracked
//! ```
//!
//! All state sits behind one mutex. Any allocation failure while updating it
//! clears the table and deactivates it for good: a half-applied update could
//! leave counts wrong, and an inactive table just means no early AOT loads.

mod entries;

use crate::counters::nudge_to_zero;
use crate::env::{ClassRuntime, InvocationCounters, SharedCache};
use crate::error::PersistentAllocError;
use crate::handles::{CacheOffset, ClassId, ClassOffset, Dependency, MethodId};
use crate::loader_table::ClassLoaderTable;
use crate::memory::PersistentMemory;
use crate::options::AotDepsOptions;
use crate::stats::TableStats;
use entries::{MethodEntry, OffsetEntry, OFFSET_ENTRY_FOOTPRINT};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

type AllocResult<T> = Result<T, PersistentAllocError>;

/// Result of asking the table to track a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackOutcome {
    /// The table knows the method's dependencies (or there are none)
    pub accepted: bool,
    /// Every dependency already holds
    pub satisfied: bool,
}

impl TrackOutcome {
    /// Not tracked: no dependency information, or the table is inactive
    pub const REJECTED: TrackOutcome = TrackOutcome {
        accepted: false,
        satisfied: false,
    };

    /// Nothing left to wait for
    pub const SATISFIED: TrackOutcome = TrackOutcome {
        accepted: true,
        satisfied: true,
    };

    /// Tracked with dependencies still open
    pub const WAITING: TrackOutcome = TrackOutcome {
        accepted: true,
        satisfied: false,
    };
}

#[derive(Debug, Default)]
struct TableState {
    active: bool,
    offsets: FxHashMap<ClassOffset, OffsetEntry>,
    methods: FxHashMap<MethodId, MethodEntry>,
    /// Methods whose last dependency was satisfied but whose counter is not reset yet
    pending_loads: FxHashSet<MethodId>,
    /// Persistent memory charged for entries
    charged: usize,
}

/// Tracks which AOT bodies are waiting on which class offsets
pub struct AotDependencyTable {
    state: Mutex<TableState>,
    cache: Arc<dyn SharedCache>,
    runtime: Arc<dyn ClassRuntime>,
    counters: Arc<dyn InvocationCounters>,
    memory: Arc<PersistentMemory>,
    nudge_attempts: u32,
}

impl AotDependencyTable {
    /// Create a table; it starts inactive unless `options.track_dependencies` is set
    pub fn new(
        options: &AotDepsOptions,
        cache: Arc<dyn SharedCache>,
        runtime: Arc<dyn ClassRuntime>,
        counters: Arc<dyn InvocationCounters>,
        memory: Arc<PersistentMemory>,
    ) -> Self {
        AotDependencyTable {
            state: Mutex::new(TableState {
                active: options.track_dependencies,
                ..Default::default()
            }),
            cache,
            runtime,
            counters,
            memory,
            nudge_attempts: options.counter_nudge_retries,
        }
    }

    /// Whether the table still tracks anything
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Whether `method` is waiting on dependencies
    pub fn is_tracked(&self, method: MethodId) -> bool {
        self.state.lock().methods.contains_key(&method)
    }

    /// Number of open dependencies of a tracked method
    pub fn remaining_dependencies(&self, method: MethodId) -> Option<u32> {
        let state = self.state.lock();
        let entry = state.methods.get(&method)?;
        let pending = state.pending_loads.contains(&method) as u32;
        Some(entry.remaining - pending)
    }

    // ========================================================================
    // Tracking
    // ========================================================================

    /// Start tracking the AOT body of `method`.
    ///
    /// Dependencies that already hold are counted as satisfied right away, so
    /// no class event that happened before this call is missed.
    pub fn track_method(&self, method: MethodId) -> TrackOutcome {
        let Some(dependencies) = self.cache.method_dependencies(method) else {
            return TrackOutcome::REJECTED;
        };
        if dependencies.is_empty() {
            return TrackOutcome::SATISFIED;
        }
        let Some(dependencies) = self.canonicalize(&dependencies) else {
            debug!(method = %method, "unresolvable dependency chain");
            return TrackOutcome::REJECTED;
        };

        let mut state = self.state.lock();
        if !state.active {
            return TrackOutcome::REJECTED;
        }
        if state.methods.contains_key(&method) {
            return TrackOutcome::WAITING;
        }

        match self.track_locked(&mut state, method, dependencies) {
            Ok(true) => TrackOutcome::SATISFIED,
            Ok(false) => TrackOutcome::WAITING,
            Err(err) => {
                self.deactivate(&mut state, &err);
                TrackOutcome::REJECTED
            }
        }
    }

    /// Stop tracking `method` without treating it as satisfied.
    /// Returns false if it was not tracked.
    pub fn stop_tracking(&self, method: MethodId) -> bool {
        let mut state = self.state.lock();
        self.stop_tracking_locked(&mut state, method)
    }

    /// Resolve dependencies to deduplicated `(class offset, needs init)` pairs
    fn canonicalize(&self, dependencies: &[Dependency]) -> Option<Box<[(ClassOffset, bool)]>> {
        let mut resolved = dependencies
            .iter()
            .map(|dependency| {
                let (chain, needs_init) = dependency.decode();
                Some((self.canonical_offset(chain)?, needs_init))
            })
            .collect::<Option<Vec<_>>>()?;
        resolved.sort_unstable();
        resolved.dedup();
        Some(resolved.into_boxed_slice())
    }

    fn canonical_offset(&self, chain: CacheOffset) -> Option<ClassOffset> {
        let pointer = self.cache.pointer_from_offset(chain)?;
        self.cache.starting_offset_of_chain(pointer)
    }

    fn track_locked(
        &self,
        state: &mut TableState,
        method: MethodId,
        dependencies: Box<[(ClassOffset, bool)]>,
    ) -> AllocResult<bool> {
        let entry = MethodEntry {
            remaining: dependencies.len() as u32,
            dependencies: dependencies.clone(),
        };
        self.charge(state, entry.footprint())?;
        state.methods.try_reserve(1)?;
        state.methods.insert(method, entry);

        let mut remaining = dependencies.len() as u32;
        for &(offset, needs_init) in dependencies.iter() {
            self.ensure_offset_entry(state, offset)?;
            let Some(offset_entry) = state.offsets.get_mut(&offset) else {
                continue;
            };
            let waiting = offset_entry.waiting(needs_init);
            waiting.try_reserve(1)?;
            waiting.insert(method);
            if offset_entry.satisfies(needs_init) {
                remaining -= 1;
            }
        }

        if remaining == 0 {
            self.stop_tracking_locked(state, method);
            debug!(method = %method, "AOT dependencies already satisfied");
            return Ok(true);
        }
        if let Some(entry) = state.methods.get_mut(&method) {
            entry.remaining = remaining;
        }
        debug!(method = %method, remaining, "tracking AOT dependencies");
        Ok(false)
    }

    fn stop_tracking_locked(&self, state: &mut TableState, method: MethodId) -> bool {
        let Some(entry) = state.methods.remove(&method) else {
            return false;
        };
        for &(offset, needs_init) in entry.dependencies.iter() {
            let Some(offset_entry) = state.offsets.get_mut(&offset) else {
                continue;
            };
            offset_entry.waiting(needs_init).remove(&method);
            if offset_entry.is_empty() {
                state.offsets.remove(&offset);
                self.release(state, OFFSET_ENTRY_FOOTPRINT);
            }
        }
        state.pending_loads.remove(&method);
        self.release(state, entry.footprint());
        true
    }

    // ========================================================================
    // Class events
    // ========================================================================

    /// A class was loaded and/or finished initialization
    pub fn class_load_event(&self, class: ClassId, is_load: bool, is_init: bool) {
        let Some(offset) = self.cache.class_offset(class) else {
            return;
        };
        if is_load && !self.cache.class_matches_cached_version(class) {
            return;
        }

        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        let result = self.class_load_event_at_offset(&mut state, class, offset, is_load, is_init);
        self.finish_update(&mut state, result);
    }

    fn class_load_event_at_offset(
        &self,
        state: &mut TableState,
        class: ClassId,
        offset: ClassOffset,
        is_load: bool,
        is_init: bool,
    ) -> AllocResult<()> {
        // Only a load may create the entry: a class cannot initialize at an
        // offset where no load was ever seen
        if is_load {
            self.ensure_offset_entry(state, offset)?;
        }
        let TableState {
            offsets,
            methods,
            pending_loads,
            ..
        } = &mut *state;
        let Some(entry) = offsets.get_mut(&offset) else {
            return Ok(());
        };

        if is_load && !entry.loaded_classes.contains(&class) {
            if entry.loaded_classes.is_empty() {
                register_satisfaction(methods, pending_loads, &entry.waiting_load)?;
            }
            entry.loaded_classes.try_reserve(1)?;
            entry.loaded_classes.insert(class);
        }

        if is_init && entry.loaded_classes.contains(&class) && !entry.initialized_classes.contains(&class) {
            if entry.initialized_classes.is_empty() {
                register_satisfaction(methods, pending_loads, &entry.waiting_init)?;
            }
            entry.initialized_classes.try_reserve(1)?;
            entry.initialized_classes.insert(class);
        }
        Ok(())
    }

    /// A class is being unloaded
    pub fn invalidate_unloaded_class(&self, class: ClassId) {
        let offset = self.cache.class_offset(class);
        let methods = self.runtime.class_methods(class);

        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        if let Some(offset) = offset {
            self.invalidate_class_at_offset(&mut state, class, offset);
        }
        for method in methods {
            if self.stop_tracking_locked(&mut state, method) {
                debug!(method = %method, class = %class, "stopped tracking method of unloaded class");
            }
        }
    }

    fn invalidate_class_at_offset(&self, state: &mut TableState, class: ClassId, offset: ClassOffset) {
        let TableState {
            offsets,
            methods,
            pending_loads,
            ..
        } = &mut *state;
        let Some(entry) = offsets.get_mut(&offset) else {
            return;
        };
        if !entry.loaded_classes.remove(&class) {
            return;
        }
        let was_initialized = entry.initialized_classes.remove(&class);

        if entry.loaded_classes.is_empty() {
            register_dissatisfaction(methods, pending_loads, &entry.waiting_load);
        }
        if was_initialized && entry.initialized_classes.is_empty() {
            register_dissatisfaction(methods, pending_loads, &entry.waiting_init);
        }

        if entry.is_empty() {
            offsets.remove(&offset);
            self.release(state, OFFSET_ENTRY_FOOTPRINT);
        }
    }

    /// `old_class` was redefined as `fresh_class`.
    ///
    /// `subclasses` are the loaded classes whose validation chains pass
    /// through `old_class`; they are only consulted when the redefinition
    /// moved the class to a different cache offset.
    pub fn invalidate_redefined_class(&self, old_class: ClassId, fresh_class: ClassId, subclasses: &[ClassId]) {
        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        let result = self.redefine_locked(&mut state, old_class, fresh_class, subclasses);
        self.finish_update(&mut state, result);
    }

    fn redefine_locked(
        &self,
        state: &mut TableState,
        old_class: ClassId,
        fresh_class: ClassId,
        subclasses: &[ClassId],
    ) -> AllocResult<()> {
        let fresh_offset = self
            .cache
            .class_offset(fresh_class)
            .filter(|_| self.cache.class_matches_cached_version(fresh_class));
        let old_offset = self.cache.class_offset(old_class);

        // Same descriptor: the fresh class inherits the old one's chain validity
        if let Some(offset) = self.shared_offset(old_class, fresh_class) {
            self.invalidate_class_at_offset(state, old_class, offset);
            let initialized = self.runtime.is_initialized(fresh_class);
            self.class_load_event_at_offset(state, fresh_class, offset, true, initialized)?;
            return Ok(());
        }

        for method in self.runtime.class_methods(old_class) {
            self.stop_tracking_locked(state, method);
        }
        if let Some(old) = old_offset {
            self.invalidate_class_at_offset(state, old_class, old);
        }

        // Already-loaded subclasses never see another load event, so they are
        // re-registered here if their chains are still valid
        for &subclass in subclasses {
            let Some(offset) = self.cache.class_offset(subclass) else {
                continue;
            };
            self.invalidate_class_at_offset(state, subclass, offset);
            if fresh_offset.is_some() && self.cache.class_matches_cached_version(subclass) {
                let initialized = self.runtime.is_initialized(subclass);
                self.class_load_event_at_offset(state, subclass, offset, true, initialized)?;
            }
        }

        if let Some(fresh) = fresh_offset {
            let initialized = self.runtime.is_initialized(fresh_class);
            self.class_load_event_at_offset(state, fresh_class, fresh, true, initialized)?;
        }
        Ok(())
    }

    /// Whether redefining `old_class` as `fresh_class` keeps the cached
    /// descriptor offset. Subclasses only matter when it does not.
    pub fn redefinition_keeps_offset(&self, old_class: ClassId, fresh_class: ClassId) -> bool {
        self.shared_offset(old_class, fresh_class).is_some()
    }

    fn shared_offset(&self, old_class: ClassId, fresh_class: ClassId) -> Option<ClassOffset> {
        let old = self.cache.class_offset(old_class)?;
        (self.cache.class_offset(fresh_class)? == old).then_some(old)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Find a loaded class for the chain at `chain` whose loader is identified
    /// by `loader_chain` and whose initialization has not failed
    pub fn find_candidate(
        &self,
        chain: CacheOffset,
        loader_chain: CacheOffset,
        loaders: &ClassLoaderTable,
    ) -> Option<ClassId> {
        let offset = self.canonical_offset(chain)?;
        let state = self.state.lock();
        if !state.active {
            return None;
        }
        state
            .offsets
            .get(&offset)?
            .loaded_classes
            .iter()
            .copied()
            .find(|&class| {
                !self.runtime.initialization_failed(class)
                    && loaders.lookup_by_loader(self.runtime.class_loader(class)) == Some(loader_chain)
            })
    }

    /// Snapshot of the table contents
    pub fn stats(&self) -> TableStats {
        collect_stats(&self.state.lock())
    }

    /// Log the table contents, then stop tracking every remaining method.
    ///
    /// Meant for shutdown diagnostics; tracking is abandoned afterwards.
    pub fn print_stats(&self) -> TableStats {
        let mut state = self.state.lock();
        let stats = collect_stats(&state);
        info!(
            active = stats.active,
            tracked_methods = stats.tracked_methods,
            offsets = stats.offsets,
            loaded_classes = stats.loaded_classes,
            pending_loads = stats.pending_loads,
            "AOT dependency table: {}",
            stats
        );
        let methods: Vec<MethodId> = state.methods.keys().copied().collect();
        for method in methods {
            self.stop_tracking_locked(&mut state, method);
        }
        stats
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_offset_entry(&self, state: &mut TableState, offset: ClassOffset) -> AllocResult<()> {
        if state.offsets.contains_key(&offset) {
            return Ok(());
        }
        self.charge(state, OFFSET_ENTRY_FOOTPRINT)?;
        state.offsets.try_reserve(1)?;
        state.offsets.insert(offset, OffsetEntry::default());
        Ok(())
    }

    fn finish_update(&self, state: &mut TableState, result: AllocResult<()>) {
        match result {
            Ok(()) => self.resolve_pending_loads(state),
            Err(err) => self.deactivate(state, &err),
        }
    }

    /// Force the counters of fully satisfied methods to zero and stop tracking them
    fn resolve_pending_loads(&self, state: &mut TableState) {
        if state.pending_loads.is_empty() {
            return;
        }
        let pending: Vec<MethodId> = state.pending_loads.drain().collect();
        for method in pending {
            nudge_to_zero(self.counters.as_ref(), method, self.nudge_attempts);
            self.stop_tracking_locked(state, method);
            debug!(method = %method, "AOT dependencies satisfied");
        }
    }

    fn deactivate(&self, state: &mut TableState, err: &PersistentAllocError) {
        warn!(error = %err, tracked_methods = state.methods.len(), "deactivating AOT dependency table");
        state.active = false;
        state.offsets = FxHashMap::default();
        state.methods = FxHashMap::default();
        state.pending_loads = FxHashSet::default();
        self.memory.release(state.charged);
        state.charged = 0;
    }

    fn charge(&self, state: &mut TableState, bytes: usize) -> AllocResult<()> {
        self.memory.try_charge(bytes)?;
        state.charged += bytes;
        Ok(())
    }

    fn release(&self, state: &mut TableState, bytes: usize) {
        self.memory.release(bytes);
        state.charged -= bytes;
    }
}

/// One dependency of every method in `waiting` now holds
fn register_satisfaction(
    methods: &mut FxHashMap<MethodId, MethodEntry>,
    pending_loads: &mut FxHashSet<MethodId>,
    waiting: &FxHashSet<MethodId>,
) -> AllocResult<()> {
    for method in waiting {
        let Some(entry) = methods.get_mut(method) else {
            continue;
        };
        debug_assert!(entry.remaining > 0);
        if entry.remaining == 1 {
            pending_loads.try_reserve(1)?;
            pending_loads.insert(*method);
        } else {
            entry.remaining -= 1;
        }
    }
    Ok(())
}

/// One dependency of every method in `waiting` no longer holds
fn register_dissatisfaction(
    methods: &mut FxHashMap<MethodId, MethodEntry>,
    pending_loads: &mut FxHashSet<MethodId>,
    waiting: &FxHashSet<MethodId>,
) {
    for method in waiting {
        // A pending method still has its last dependency counted
        if pending_loads.remove(method) {
            continue;
        }
        if let Some(entry) = methods.get_mut(method) {
            debug_assert!((entry.remaining as usize) < entry.dependencies.len());
            entry.remaining += 1;
        }
    }
}

fn collect_stats(state: &TableState) -> TableStats {
    let mut stats = TableStats {
        active: state.active,
        tracked_methods: state.methods.len(),
        offsets: state.offsets.len(),
        pending_loads: state.pending_loads.len(),
        ..Default::default()
    };
    for entry in state.offsets.values() {
        stats.loaded_classes += entry.loaded_classes.len();
        stats.load_waiters += entry.waiting_load.len();
        stats.init_waiters += entry.waiting_init.len();
    }
    stats
}
