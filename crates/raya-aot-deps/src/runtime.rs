//! Runtime glue
//!
//! `AotRuntime` owns both tables and turns VM class events into the calls
//! each table expects. The loader table sits behind a read-write lock: the
//! read side is the VM's shared access (lookups, associations), the write side
//! its exclusive access (removing an unloaded loader).

use crate::dependency::{AotDependencyTable, TrackOutcome};
use crate::env::{ClassHierarchy, ClassRuntime, InvocationCounters, SharedCache};
use crate::error::OptionsError;
use crate::handles::{CacheOffset, ClassId, LoaderId, MethodId};
use crate::loader_table::ClassLoaderTable;
use crate::memory::PersistentMemory;
use crate::options::AotDepsOptions;
use crate::stats::TableStats;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

/// The collaborators the tables consult
#[derive(Clone)]
pub struct AotEnvironment {
    /// Shared class cache
    pub cache: Arc<dyn SharedCache>,
    /// VM class state
    pub runtime: Arc<dyn ClassRuntime>,
    /// Interpreter invocation counters
    pub counters: Arc<dyn InvocationCounters>,
    /// Class hierarchy index
    pub hierarchy: Arc<dyn ClassHierarchy>,
}

impl AotEnvironment {
    /// Use one object for every collaborator
    pub fn from_vm<V>(vm: Arc<V>) -> Self
    where
        V: SharedCache + ClassRuntime + InvocationCounters + ClassHierarchy + 'static,
    {
        AotEnvironment {
            cache: vm.clone(),
            runtime: vm.clone(),
            counters: vm.clone(),
            hierarchy: vm,
        }
    }
}

/// Process-wide AOT dependency state
pub struct AotRuntime {
    options: AotDepsOptions,
    memory: Arc<PersistentMemory>,
    loaders: RwLock<ClassLoaderTable>,
    dependencies: AotDependencyTable,
    runtime: Arc<dyn ClassRuntime>,
    hierarchy: Arc<dyn ClassHierarchy>,
}

impl AotRuntime {
    /// Create both tables
    pub fn new(options: AotDepsOptions, env: AotEnvironment) -> Result<Self, OptionsError> {
        options.validate()?;
        let memory = Arc::new(options.persistent_memory());
        let loaders = ClassLoaderTable::new(&options, env.cache.clone(), env.runtime.clone(), memory.clone());
        let dependencies = AotDependencyTable::new(
            &options,
            env.cache,
            env.runtime.clone(),
            env.counters,
            memory.clone(),
        );
        Ok(AotRuntime {
            options,
            memory,
            loaders: RwLock::new(loaders),
            dependencies,
            runtime: env.runtime,
            hierarchy: env.hierarchy,
        })
    }

    /// Options in effect
    pub fn options(&self) -> &AotDepsOptions {
        &self.options
    }

    /// Persistent memory shared by both tables
    pub fn memory(&self) -> &PersistentMemory {
        &self.memory
    }

    /// Shared access to the loader table
    pub fn loaders(&self) -> RwLockReadGuard<'_, ClassLoaderTable> {
        self.loaders.read()
    }

    /// The dependency table
    pub fn dependencies(&self) -> &AotDependencyTable {
        &self.dependencies
    }

    /// A class finished loading. The first class of each loader becomes its identity.
    pub fn on_class_loaded(&self, class: ClassId) {
        let loader = self.runtime.class_loader(class);
        self.loaders.read().associate(loader, class);
        self.dependencies
            .class_load_event(class, true, self.runtime.is_initialized(class));
    }

    /// A class finished initialization
    pub fn on_class_initialized(&self, class: ClassId) {
        self.dependencies.class_load_event(class, false, true);
    }

    /// A class is being unloaded
    pub fn on_class_unloaded(&self, class: ClassId) {
        self.dependencies.invalidate_unloaded_class(class);
    }

    /// A loader is being unloaded; waits for exclusive access to the loader table
    pub fn on_loader_unloaded(&self, loader: LoaderId) {
        self.loaders.write().remove(loader);
    }

    /// `old_class` was redefined as `fresh_class`
    pub fn on_class_redefined(&self, old_class: ClassId, fresh_class: ClassId) {
        let subclasses = if self.dependencies.redefinition_keeps_offset(old_class, fresh_class) {
            Vec::new()
        } else {
            self.hierarchy.collect_all_subclasses(old_class)
        };
        self.dependencies
            .invalidate_redefined_class(old_class, fresh_class, &subclasses);
    }

    /// A method with a cached AOT body was loaded
    pub fn on_method_loaded(&self, method: MethodId) -> TrackOutcome {
        self.dependencies.track_method(method)
    }

    /// A loaded class for `chain` defined by the loader identified by `loader_chain`
    pub fn find_candidate(&self, chain: CacheOffset, loader_chain: CacheOffset) -> Option<ClassId> {
        let loaders = self.loaders.read();
        self.dependencies.find_candidate(chain, loader_chain, &loaders)
    }

    /// Log dependency table statistics and abandon all remaining tracking
    pub fn print_stats(&self) -> TableStats {
        self.dependencies.print_stats()
    }
}
