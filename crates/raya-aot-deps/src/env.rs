//! Collaborator interfaces
//!
//! The tables do not own class metadata. Everything they need to know about
//! the shared cache, the VM's class state, invocation counters and the class
//! hierarchy comes through these traits.

use crate::handles::{CacheOffset, CachePointer, ClassId, ClassOffset, Dependency, LoaderId, MethodId};

/// Name bytes of a class, tagged with where they live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassName<'a> {
    /// Bytes inside the mapped shared cache; they never move or go away, so
    /// the loader table may alias them instead of copying
    Cached(&'static [u8]),
    /// Bytes owned by the VM that may be freed with the class
    Transient(&'a [u8]),
}

impl<'a> ClassName<'a> {
    /// The raw name bytes
    pub fn bytes(&self) -> &'a [u8] {
        match *self {
            ClassName::Cached(bytes) => bytes,
            ClassName::Transient(bytes) => bytes,
        }
    }
}

/// The persistent shared class cache
pub trait SharedCache: Send + Sync {
    /// Store the validation chain of `class` (if not already stored) and
    /// return its offset. `None` if the chain cannot be stored.
    fn remember_class(&self, class: ClassId) -> Option<CacheOffset>;

    /// Resolve a chain offset to an address inside the cache
    fn pointer_from_offset(&self, offset: CacheOffset) -> Option<CachePointer>;

    /// Offset of the class descriptor a validation chain starts with
    fn starting_offset_of_chain(&self, chain: CachePointer) -> Option<ClassOffset>;

    /// Offset of the cached descriptor for `class`, if the class is in the cache
    fn class_offset(&self, class: ClassId) -> Option<ClassOffset>;

    /// Whether the runtime shape of `class` still matches its cached descriptor
    fn class_matches_cached_version(&self, class: ClassId) -> bool;

    /// Dependencies of the AOT body stored for `method`.
    ///
    /// `None` if the method has no AOT body or the body carries no dependency
    /// list; an empty vector if the body has no dependencies at all.
    fn method_dependencies(&self, method: MethodId) -> Option<Vec<Dependency>>;
}

/// Class state owned by the VM
pub trait ClassRuntime: Send + Sync {
    /// The loader that defined `class`
    fn class_loader(&self, class: ClassId) -> LoaderId;

    /// The class name
    fn class_name(&self, class: ClassId) -> ClassName<'_>;

    /// Whether the class has finished initialization
    fn is_initialized(&self, class: ClassId) -> bool;

    /// Whether initialization of the class has definitely failed
    fn initialization_failed(&self, class: ClassId) -> bool;

    /// Methods declared by the class
    fn class_methods(&self, class: ClassId) -> Vec<MethodId>;
}

/// Per-method invocation counters of the interpreter
pub trait InvocationCounters: Send + Sync {
    /// Current count; zero or negative means the method is no longer counting down
    fn invocation_count(&self, method: MethodId) -> i32;

    /// Replace `expected` with `new`. Returns false if the count was not `expected`.
    fn compare_and_set_invocation_count(&self, method: MethodId, expected: i32, new: i32) -> bool;
}

/// Class hierarchy index, used only for redefinition
pub trait ClassHierarchy: Send + Sync {
    /// All classes that (transitively) extend or implement `class`
    fn collect_all_subclasses(&self, class: ClassId) -> Vec<ClassId>;
}
