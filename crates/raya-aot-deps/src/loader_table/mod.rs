//! Persistent class loader table
//!
//! Gives each class loader an identity that survives across runs: the
//! validation chain of the first class it loads. The table relates loaders,
//! chains and (with a remote AOT cache) class names in three indexes over one
//! set of entries.
//!
//! The first successful association of a loader is permanent until the loader
//! is removed. When a second loader produces a chain (or name) that is already
//! taken, it is still recorded in the loader index, so repeated attempts stay
//! cheap, but the existing chain and name mappings are left alone. Two loaders
//! with identical first-class chains are a known limitation: the later one
//! simply cannot be found by chain, which costs AOT hits, never correctness.

mod index;

use crate::env::{ClassName, ClassRuntime, SharedCache};
use crate::handles::{CacheOffset, ClassId, LoaderId};
use crate::memory::PersistentMemory;
use crate::options::AotDepsOptions;
use index::{BucketIndex, ByChain, ByLoader, ByName, LoaderEntry};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Three-way index between loaders, validation chains and class names
///
/// Lookups and `associate` take `&self` and never block readers. `remove`
/// takes `&mut self`: unlinking must not race with readers walking a bucket.
pub struct ClassLoaderTable {
    by_loader: BucketIndex<ByLoader>,
    by_chain: BucketIndex<ByChain>,
    by_name: Option<BucketIndex<ByName>>,
    /// Set when a shared cache is configured
    cache: Option<Arc<dyn SharedCache>>,
    runtime: Arc<dyn ClassRuntime>,
    memory: Arc<PersistentMemory>,
    enabled: bool,
    tolerates_chainless: bool,
    /// Serializes `associate` calls; readers never take it
    writers: Mutex<()>,
    len: AtomicUsize,
}

impl ClassLoaderTable {
    /// Create a table configured by `options`
    pub fn new(
        options: &AotDepsOptions,
        cache: Arc<dyn SharedCache>,
        runtime: Arc<dyn ClassRuntime>,
        memory: Arc<PersistentMemory>,
    ) -> Self {
        let buckets = options.loader_table_buckets;
        ClassLoaderTable {
            by_loader: BucketIndex::new(buckets),
            by_chain: BucketIndex::new(buckets),
            by_name: options.uses_name_index().then(|| BucketIndex::new(buckets)),
            cache: options.shared_cache.then_some(cache),
            runtime,
            memory,
            enabled: options.loader_table_enabled(),
            tolerates_chainless: options.tolerates_chainless_entries(),
            writers: Mutex::new(()),
            len: AtomicUsize::new(0),
        }
    }

    /// Whether the table records anything
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the table keeps a class name index
    pub fn uses_name_index(&self) -> bool {
        self.by_name.is_some()
    }

    /// Number of loaders recorded
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether no loader is recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record `class` as the identifying class of `loader`.
    ///
    /// Does nothing if the loader already has an entry. Class loading for
    /// `loader` must not race with this call.
    pub fn associate(&self, loader: LoaderId, class: ClassId) {
        if !self.enabled {
            return;
        }
        if self.by_loader.find(&loader).is_some() {
            return;
        }

        let _writer = self.writers.lock();
        // Another writer may have published this loader while we waited
        if self.by_loader.find(&loader).is_some() {
            return;
        }

        let chain = self.cache.as_ref().and_then(|cache| cache.remember_class(class));
        if chain.is_none() && !self.tolerates_chainless {
            debug!(loader = %loader, class = %class, "no validation chain for first loaded class");
            return;
        }

        let name = self.by_name.as_ref().map(|_| match self.runtime.class_name(class) {
            ClassName::Cached(bytes) => Cow::Borrowed(bytes),
            ClassName::Transient(bytes) => Cow::Owned(bytes.to_vec()),
        });

        let entry = LoaderEntry::new(loader, chain, name);
        if let Err(err) = self.memory.try_charge(entry.footprint()) {
            warn!(loader = %loader, error = %err, "failed to allocate class loader table entry");
            return;
        }
        let entry = NonNull::from(Box::leak(Box::new(entry)));
        // Safety: the entry is only reachable through our own pointer
        let entry_ref = unsafe { entry.as_ref() };

        // Safety (all publishes): fresh entry, not linked anywhere yet, freed
        // only by `remove` or `drop`; publishes are serialized by `writers`
        unsafe { self.by_loader.publish(entry) };
        self.len.fetch_add(1, Ordering::Relaxed);

        if let Some(chain) = entry_ref.chain {
            match self.by_chain.find(&chain) {
                Some(existing) => {
                    // Safety: linked entries stay allocated while `&self` lives
                    let owner = unsafe { existing.as_ref() }.loader;
                    debug!(loader = %loader, owner = %owner, chain = %chain, "validation chain already claimed");
                }
                None => unsafe { self.by_chain.publish(entry) },
            }
        }

        if let (Some(by_name), Some(name)) = (&self.by_name, entry_ref.name.as_deref()) {
            match by_name.find(name) {
                Some(existing) => {
                    let owner = unsafe { existing.as_ref() }.loader;
                    debug!(
                        loader = %loader,
                        owner = %owner,
                        name = %String::from_utf8_lossy(name),
                        "class name already claimed"
                    );
                }
                None => unsafe { by_name.publish(entry) },
            }
        }
    }

    fn entry_for_loader(&self, loader: LoaderId) -> Option<&LoaderEntry> {
        // Safety: entries are freed only through `&mut self`
        self.by_loader.find(&loader).map(|entry| unsafe { &*entry.as_ptr() })
    }

    /// Validation chain identifying `loader`
    pub fn lookup_by_loader(&self, loader: LoaderId) -> Option<CacheOffset> {
        self.cache.as_ref()?;
        self.entry_for_loader(loader)?.chain
    }

    /// Loader identified by `chain`
    pub fn lookup_by_chain(&self, chain: CacheOffset) -> Option<LoaderId> {
        self.cache.as_ref()?;
        self.by_chain
            .find(&chain)
            .map(|entry| unsafe { &*entry.as_ptr() }.loader)
    }

    /// Name of the first class `loader` loaded
    pub fn lookup_name_by_loader(&self, loader: LoaderId) -> Option<&[u8]> {
        self.by_name.as_ref()?;
        self.entry_for_loader(loader)?.name.as_deref()
    }

    /// Loader whose first class has this name
    pub fn lookup_loader_by_name(&self, name: &[u8]) -> Option<LoaderId> {
        self.lookup_by_name(name).map(|(loader, _)| loader)
    }

    /// Loader and chain recorded for a first-class name
    pub fn lookup_by_name(&self, name: &[u8]) -> Option<(LoaderId, Option<CacheOffset>)> {
        let entry = self.by_name.as_ref()?.find(name)?;
        // Safety: entries are freed only through `&mut self`
        let entry = unsafe { entry.as_ref() };
        Some((entry.loader, entry.chain))
    }

    /// Forget `loader` (called when it is unloaded)
    pub fn remove(&mut self, loader: LoaderId) {
        if !self.enabled {
            return;
        }
        let Some(entry) = self.by_loader.find(&loader) else {
            return;
        };
        self.by_loader.unlink(entry);
        // A colliding loader may own the chain or name slot; unlinking by
        // identity leaves that mapping in place
        self.by_chain.unlink(entry);
        if let Some(by_name) = self.by_name.as_mut() {
            by_name.unlink(entry);
        }
        self.free_entry(entry);
        self.len.fetch_sub(1, Ordering::Relaxed);
    }

    fn free_entry(&self, entry: NonNull<LoaderEntry>) {
        // Safety: the entry is unlinked from every index, so this is the last reference
        let entry = unsafe { Box::from_raw(entry.as_ptr()) };
        self.memory.release(entry.footprint());
    }
}

impl Drop for ClassLoaderTable {
    fn drop(&mut self) {
        // Every entry is in the loader index, whatever else it is linked into
        let entries = self.by_loader.drain();
        for entry in entries {
            self.free_entry(entry);
        }
    }
}
