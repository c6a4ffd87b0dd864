//! Raya AOT dependency tracking
//!
//! This crate provides the two persistent indexes the JIT consults before it
//! redirects a method to a cached AOT body:
//! - **Loader table**: a stable identity for each class loader, derived from
//!   the validation chain of the first class it loads (`loader_table` module)
//! - **Dependency table**: which classes each AOT body needs loaded (or
//!   initialized) and how many of those needs are still open (`dependency` module)
//! - **Runtime glue**: routing of VM class events into both (`runtime` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use raya_aot_deps::{AotDepsOptions, AotRuntime};
//!
//! let runtime = AotRuntime::new(AotDepsOptions::default(), env)?;
//! runtime.on_class_loaded(class);
//! let outcome = runtime.on_method_loaded(method);
//! if outcome.satisfied {
//!     // the AOT body may run right away
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Opaque handles for loaders, classes, methods and shared cache offsets
pub mod handles;

/// Collaborator interfaces implemented by the VM and the shared cache
pub mod env;

/// Persistent memory arena shared by both tables
pub mod memory;

/// Configuration
pub mod options;

/// Error types
pub mod error;

/// Default constants
pub mod defaults;

/// Persistent class loader identity table
pub mod loader_table;

/// AOT dependency table
pub mod dependency;

/// Invocation counter registry and nudging
pub mod counters;

/// Diagnostic snapshots
pub mod stats;

/// Glue between VM class events and both tables
pub mod runtime;

#[cfg(test)]
pub(crate) mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

pub use counters::InvocationCounterRegistry;
pub use dependency::{AotDependencyTable, TrackOutcome};
pub use env::{ClassHierarchy, ClassName, ClassRuntime, InvocationCounters, SharedCache};
pub use error::{OptionsError, PersistentAllocError};
pub use handles::{CacheOffset, CachePointer, ClassId, ClassOffset, Dependency, LoaderId, MethodId};
pub use loader_table::ClassLoaderTable;
pub use memory::PersistentMemory;
pub use options::AotDepsOptions;
pub use runtime::{AotEnvironment, AotRuntime};
pub use stats::TableStats;
