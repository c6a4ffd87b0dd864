//! A small simulated VM for integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use raya_aot_deps::{
    CacheOffset, CachePointer, ClassHierarchy, ClassId, ClassName, ClassOffset, ClassRuntime, Dependency,
    InvocationCounterRegistry, InvocationCounters, LoaderId, MethodId, SharedCache,
};
use rustc_hash::FxHashMap;

#[derive(Clone)]
struct SimClass {
    loader: LoaderId,
    name: &'static [u8],
    offset: Option<ClassOffset>,
    chain: Option<CacheOffset>,
    matches: bool,
    initialized: bool,
    methods: Vec<MethodId>,
    subclasses: Vec<ClassId>,
}

#[derive(Default)]
struct SimState {
    classes: FxHashMap<ClassId, SimClass>,
    chains: FxHashMap<CacheOffset, ClassOffset>,
    bodies: FxHashMap<MethodId, Vec<Dependency>>,
    next_class: usize,
}

/// Simulated VM: classes, a shared cache of chains, AOT bodies and counters
pub struct SimVm {
    state: Mutex<SimState>,
    pub counters: InvocationCounterRegistry,
}

impl SimVm {
    pub fn new() -> Self {
        SimVm {
            state: Mutex::new(SimState {
                next_class: 0x10_0000,
                ..Default::default()
            }),
            counters: InvocationCounterRegistry::new(),
        }
    }

    /// Publish a chain in the cache that starts with the descriptor at `start`
    pub fn cache_chain(&self, chain: usize, start: usize) -> CacheOffset {
        let chain = CacheOffset::from_raw(chain);
        self.state.lock().chains.insert(chain, ClassOffset::from_raw(start));
        chain
    }

    /// Define a class of `loader` whose descriptor is cached at `offset`.
    /// Remembering the class yields the chain `chain`.
    pub fn define_class(&self, loader: usize, name: &str, offset: Option<usize>, chain: Option<usize>) -> ClassId {
        let mut state = self.state.lock();
        let id = ClassId::from_raw(state.next_class);
        state.next_class += 0x40;
        state.classes.insert(
            id,
            SimClass {
                loader: LoaderId::from_raw(loader),
                name: Box::leak(name.as_bytes().to_vec().into_boxed_slice()),
                offset: offset.map(ClassOffset::from_raw),
                chain: chain.map(CacheOffset::from_raw),
                matches: true,
                initialized: false,
                methods: Vec::new(),
                subclasses: Vec::new(),
            },
        );
        id
    }

    /// Give `class` a method with an AOT body depending on `deps`
    pub fn add_aot_method(&self, class: ClassId, method: usize, deps: Vec<Dependency>, count: i32) -> MethodId {
        let method = MethodId::from_raw(method);
        let mut state = self.state.lock();
        if let Some(info) = state.classes.get_mut(&class) {
            info.methods.push(method);
        }
        state.bodies.insert(method, deps);
        self.counters.set_initial(method, count);
        method
    }

    pub fn mark_initialized(&self, class: ClassId) {
        if let Some(info) = self.state.lock().classes.get_mut(&class) {
            info.initialized = true;
        }
    }

    pub fn mark_stale(&self, class: ClassId) {
        if let Some(info) = self.state.lock().classes.get_mut(&class) {
            info.matches = false;
        }
    }

    pub fn add_subclass(&self, class: ClassId, subclass: ClassId) {
        if let Some(info) = self.state.lock().classes.get_mut(&class) {
            info.subclasses.push(subclass);
        }
    }
}

impl SharedCache for SimVm {
    fn remember_class(&self, class: ClassId) -> Option<CacheOffset> {
        self.state.lock().classes.get(&class)?.chain
    }

    fn pointer_from_offset(&self, offset: CacheOffset) -> Option<CachePointer> {
        Some(CachePointer::from_raw(offset.as_raw()))
    }

    fn starting_offset_of_chain(&self, chain: CachePointer) -> Option<ClassOffset> {
        self.state.lock().chains.get(&CacheOffset::from_raw(chain.as_raw())).copied()
    }

    fn class_offset(&self, class: ClassId) -> Option<ClassOffset> {
        self.state.lock().classes.get(&class)?.offset
    }

    fn class_matches_cached_version(&self, class: ClassId) -> bool {
        self.state.lock().classes.get(&class).map_or(false, |info| info.matches)
    }

    fn method_dependencies(&self, method: MethodId) -> Option<Vec<Dependency>> {
        self.state.lock().bodies.get(&method).cloned()
    }
}

impl ClassRuntime for SimVm {
    fn class_loader(&self, class: ClassId) -> LoaderId {
        self.state
            .lock()
            .classes
            .get(&class)
            .map_or(LoaderId::from_raw(0), |info| info.loader)
    }

    fn class_name(&self, class: ClassId) -> ClassName<'_> {
        ClassName::Transient(self.state.lock().classes.get(&class).map_or(&b""[..], |info| info.name))
    }

    fn is_initialized(&self, class: ClassId) -> bool {
        self.state.lock().classes.get(&class).map_or(false, |info| info.initialized)
    }

    fn initialization_failed(&self, _class: ClassId) -> bool {
        false
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

impl InvocationCounters for SimVm {
    fn invocation_count(&self, method: MethodId) -> i32 {
        self.counters.invocation_count(method)
    }

    fn compare_and_set_invocation_count(&self, method: MethodId, expected: i32, new: i32) -> bool {
        self.counters.compare_and_set_invocation_count(method, expected, new)
    }
}

impl ClassHierarchy for SimVm {
    fn collect_all_subclasses(&self, class: ClassId) -> Vec<ClassId> {
        self.state
            .lock()
            .classes
            .get(&class)
            .map(|info| info.subclasses.clone())
            .unwrap_or_default()
    }
}

pub fn load_dep(chain: CacheOffset) -> Dependency {
    Dependency::new(chain, false)
}

pub fn init_dep(chain: CacheOffset) -> Dependency {
    Dependency::new(chain, true)
}
