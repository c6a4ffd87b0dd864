//! In-memory fakes of the collaborator traits for unit tests

use crate::env::{ClassHierarchy, ClassName, ClassRuntime, InvocationCounters, SharedCache};
use crate::handles::{CacheOffset, CachePointer, ClassId, ClassOffset, Dependency, LoaderId, MethodId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Address the fake cache is "mapped" at
const CACHE_BASE: usize = 0x4000_0000;

/// A class as the fake VM sees it
#[derive(Debug, Clone)]
pub(crate) struct FakeClass {
    pub loader: LoaderId,
    pub name: &'static [u8],
    pub name_in_cache: bool,
    pub offset: Option<ClassOffset>,
    pub chain: Option<CacheOffset>,
    pub matches_cache: bool,
    pub initialized: bool,
    pub init_failed: bool,
    pub methods: Vec<MethodId>,
    pub subclasses: Vec<ClassId>,
}

impl FakeClass {
    pub fn new(loader: usize) -> Self {
        FakeClass {
            loader: LoaderId::from_raw(loader),
            name: b"",
            name_in_cache: false,
            offset: None,
            chain: None,
            matches_cache: true,
            initialized: false,
            init_failed: false,
            methods: Vec::new(),
            subclasses: Vec::new(),
        }
    }

    /// Cached at `offset`
    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(ClassOffset::from_raw(offset));
        self
    }

    /// `remember_class` returns `chain`
    pub fn with_chain(mut self, chain: usize) -> Self {
        self.chain = Some(CacheOffset::from_raw(chain));
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Box::leak(name.as_bytes().to_vec().into_boxed_slice());
        self
    }

    pub fn name_in_cache(mut self) -> Self {
        self.name_in_cache = true;
        self
    }

    pub fn with_methods(mut self, methods: &[usize]) -> Self {
        self.methods = methods.iter().map(|&m| MethodId::from_raw(m)).collect();
        self
    }
}

#[derive(Default)]
struct FakeState {
    classes: FxHashMap<ClassId, FakeClass>,
    chains: FxHashMap<CacheOffset, ClassOffset>,
    dependencies: FxHashMap<MethodId, Option<Vec<Dependency>>>,
    counters: FxHashMap<MethodId, i32>,
    /// Compare-and-set calls that fail (after the interpreter "counts" once)
    contended_sets: u32,
    subclass_queries: usize,
}

/// A fake VM implementing every collaborator trait
#[derive(Default)]
pub(crate) struct FakeVm {
    state: Mutex<FakeState>,
}

impl FakeVm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&self, class: usize, info: FakeClass) -> ClassId {
        let id = ClassId::from_raw(class);
        self.state.lock().classes.insert(id, info);
        id
    }

    /// Chain at `chain` starts with the class descriptor at `start`
    pub fn define_chain(&self, chain: usize, start: usize) -> CacheOffset {
        let offset = CacheOffset::from_raw(chain);
        self.state.lock().chains.insert(offset, ClassOffset::from_raw(start));
        offset
    }

    pub fn set_dependencies(&self, method: usize, deps: Option<Vec<Dependency>>) -> MethodId {
        let id = MethodId::from_raw(method);
        self.state.lock().dependencies.insert(id, deps);
        id
    }

    pub fn set_initialized(&self, class: ClassId, initialized: bool) {
        if let Some(info) = self.state.lock().classes.get_mut(&class) {
            info.initialized = initialized;
        }
    }

    pub fn set_init_failed(&self, class: ClassId) {
        if let Some(info) = self.state.lock().classes.get_mut(&class) {
            info.init_failed = true;
        }
    }

    pub fn set_matches_cache(&self, class: ClassId, matches: bool) {
        if let Some(info) = self.state.lock().classes.get_mut(&class) {
            info.matches_cache = matches;
        }
    }

    pub fn set_subclasses(&self, class: ClassId, subclasses: Vec<ClassId>) {
        if let Some(info) = self.state.lock().classes.get_mut(&class) {
            info.subclasses = subclasses;
        }
    }

    pub fn set_count(&self, method: MethodId, count: i32) {
        self.state.lock().counters.insert(method, count);
    }

    pub fn count(&self, method: MethodId) -> i32 {
        self.state.lock().counters.get(&method).copied().unwrap_or(0)
    }

    pub fn set_contended_sets(&self, failures: u32) {
        self.state.lock().contended_sets = failures;
    }

    /// Number of `collect_all_subclasses` calls so far
    pub fn subclass_queries(&self) -> usize {
        self.state.lock().subclass_queries
    }
}

impl SharedCache for FakeVm {
    fn remember_class(&self, class: ClassId) -> Option<CacheOffset> {
        self.state.lock().classes.get(&class).and_then(|info| info.chain)
    }

    fn pointer_from_offset(&self, offset: CacheOffset) -> Option<CachePointer> {
        Some(CachePointer::from_raw(CACHE_BASE + offset.as_raw()))
    }

    fn starting_offset_of_chain(&self, chain: CachePointer) -> Option<ClassOffset> {
        let offset = CacheOffset::from_raw(chain.as_raw() - CACHE_BASE);
        self.state.lock().chains.get(&offset).copied()
    }

    fn class_offset(&self, class: ClassId) -> Option<ClassOffset> {
        self.state.lock().classes.get(&class).and_then(|info| info.offset)
    }

    fn class_matches_cached_version(&self, class: ClassId) -> bool {
        self.state
            .lock()
            .classes
            .get(&class)
            .map(|info| info.matches_cache)
            .unwrap_or(false)
    }

    fn method_dependencies(&self, method: MethodId) -> Option<Vec<Dependency>> {
        self.state.lock().dependencies.get(&method).cloned().flatten()
    }
}

impl ClassRuntime for FakeVm {
    fn class_loader(&self, class: ClassId) -> LoaderId {
        self.state.lock().classes[&class].loader
    }

    fn class_name(&self, class: ClassId) -> ClassName<'_> {
        let state = self.state.lock();
        let info = &state.classes[&class];
        if info.name_in_cache {
            ClassName::Cached(info.name)
        } else {
            ClassName::Transient(info.name)
        }
    }

    fn is_initialized(&self, class: ClassId) -> bool {
        self.state.lock().classes.get(&class).map(|info| info.initialized).unwrap_or(false)
    }

    fn initialization_failed(&self, class: ClassId) -> bool {
        self.state.lock().classes.get(&class).map(|info| info.init_failed).unwrap_or(false)
    }

    fn class_methods(&self, class: ClassId) -> Vec<MethodId> {
        self.state
            .lock()
            .classes
            .get(&class)
            .map(|info| info.methods.clone())
            .unwrap_or_default()
    }
}

impl InvocationCounters for FakeVm {
    fn invocation_count(&self, method: MethodId) -> i32 {
        self.count(method)
    }

    fn compare_and_set_invocation_count(&self, method: MethodId, expected: i32, new: i32) -> bool {
        let mut state = self.state.lock();
        if state.contended_sets > 0 {
            state.contended_sets -= 1;
            if let Some(count) = state.counters.get_mut(&method) {
                *count -= 1;
            }
            return false;
        }
        match state.counters.get_mut(&method) {
            Some(count) if *count == expected => {
                *count = new;
                true
            }
            _ => false,
        }
    }
}

impl ClassHierarchy for FakeVm {
    fn collect_all_subclasses(&self, class: ClassId) -> Vec<ClassId> {
        let mut state = self.state.lock();
        state.subclass_queries += 1;
        state
            .classes
            .get(&class)
            .map(|info| info.subclasses.clone())
            .unwrap_or_default()
    }
}
