//! Intrusive hash indexes over loader entries
//!
//! Every entry carries one link per index, so a single allocation can sit in
//! the loader, chain and name buckets at once. `BucketIndex<I>` is the same
//! chained hash table for all three; the `IndexKey` strategy picks the link
//! field, the key and the hash.
//!
//! Readers walk buckets without locking. Writers prepend with a publish
//! pattern: the new entry's link is written first, then the bucket head is
//! stored with `Release`, so a reader that loads the head with `Acquire` only
//! ever sees fully initialized entries. Unlinking requires `&mut self`.

use crate::defaults::HANDLE_ALIGNMENT_SHIFT;
use crate::handles::{CacheOffset, LoaderId};
use std::borrow::Cow;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// One loader's identity record
#[derive(Debug)]
pub(crate) struct LoaderEntry {
    pub(crate) loader: LoaderId,
    pub(crate) chain: Option<CacheOffset>,
    pub(crate) name: Option<Cow<'static, [u8]>>,
    next_by_loader: AtomicPtr<LoaderEntry>,
    next_by_chain: AtomicPtr<LoaderEntry>,
    next_by_name: AtomicPtr<LoaderEntry>,
}

impl LoaderEntry {
    pub(crate) fn new(
        loader: LoaderId,
        chain: Option<CacheOffset>,
        name: Option<Cow<'static, [u8]>>,
    ) -> Self {
        LoaderEntry {
            loader,
            chain,
            name,
            next_by_loader: AtomicPtr::new(ptr::null_mut()),
            next_by_chain: AtomicPtr::new(ptr::null_mut()),
            next_by_name: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Bytes this entry was charged in persistent memory
    pub(crate) fn footprint(&self) -> usize {
        let owned_name = match &self.name {
            Some(Cow::Owned(bytes)) => bytes.len(),
            _ => 0,
        };
        std::mem::size_of::<LoaderEntry>() + owned_name
    }
}

/// Strategy for one of the three indexes
pub(crate) trait IndexKey {
    /// Key type looked up in this index
    type Key: ?Sized + PartialEq;

    /// The link field this index threads through
    fn link(entry: &LoaderEntry) -> &AtomicPtr<LoaderEntry>;

    /// The entry's key, if it has one for this index
    fn key(entry: &LoaderEntry) -> Option<&Self::Key>;

    /// Hash of a key
    fn hash(key: &Self::Key) -> usize;
}

/// Index by loader handle
pub(crate) struct ByLoader;

/// Index by validation chain offset
pub(crate) struct ByChain;

/// Index by class name bytes
pub(crate) struct ByName;

impl IndexKey for ByLoader {
    type Key = LoaderId;

    fn link(entry: &LoaderEntry) -> &AtomicPtr<LoaderEntry> {
        &entry.next_by_loader
    }

    fn key(entry: &LoaderEntry) -> Option<&LoaderId> {
        Some(&entry.loader)
    }

    fn hash(key: &LoaderId) -> usize {
        key.as_raw() >> HANDLE_ALIGNMENT_SHIFT
    }
}

impl IndexKey for ByChain {
    type Key = CacheOffset;

    fn link(entry: &LoaderEntry) -> &AtomicPtr<LoaderEntry> {
        &entry.next_by_chain
    }

    fn key(entry: &LoaderEntry) -> Option<&CacheOffset> {
        entry.chain.as_ref()
    }

    fn hash(key: &CacheOffset) -> usize {
        key.as_raw() >> HANDLE_ALIGNMENT_SHIFT
    }
}

impl IndexKey for ByName {
    type Key = [u8];

    fn link(entry: &LoaderEntry) -> &AtomicPtr<LoaderEntry> {
        &entry.next_by_name
    }

    fn key(entry: &LoaderEntry) -> Option<&[u8]> {
        entry.name.as_deref()
    }

    fn hash(key: &[u8]) -> usize {
        name_hash(key)
    }
}

/// Rolling hash over name bytes (`h * 31 + b`)
pub(crate) fn name_hash(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .fold(0usize, |h, &b| (h << 5).wrapping_sub(h).wrapping_add(b as usize))
}

/// Chained hash table threading entries through the link chosen by `I`
pub(crate) struct BucketIndex<I> {
    buckets: Box<[AtomicPtr<LoaderEntry>]>,
    _kind: PhantomData<I>,
}

impl<I: IndexKey> BucketIndex<I> {
    pub(crate) fn new(bucket_count: usize) -> Self {
        let buckets = (0..bucket_count.max(1))
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        BucketIndex {
            buckets,
            _kind: PhantomData,
        }
    }

    fn bucket(&self, key: &I::Key) -> &AtomicPtr<LoaderEntry> {
        &self.buckets[I::hash(key) % self.buckets.len()]
    }

    /// Find the entry for `key`
    pub(crate) fn find(&self, key: &I::Key) -> Option<NonNull<LoaderEntry>> {
        let mut current = self.bucket(key).load(Ordering::Acquire);
        while let Some(entry) = NonNull::new(current) {
            // Safety: published entries stay allocated until unlinked, and
            // unlinking needs `&mut self`
            let entry_ref = unsafe { entry.as_ref() };
            if I::key(entry_ref) == Some(key) {
                return Some(entry);
            }
            current = I::link(entry_ref).load(Ordering::Acquire);
        }
        None
    }

    /// Prepend `entry` to its bucket.
    ///
    /// # Safety
    ///
    /// `entry` must have a key for this index, must not already be linked in
    /// it, and must stay allocated until unlinked. Callers must serialize
    /// publishes against each other.
    pub(crate) unsafe fn publish(&self, entry: NonNull<LoaderEntry>) {
        let entry_ref = entry.as_ref();
        let Some(key) = I::key(entry_ref) else {
            debug_assert!(false, "published entry without a key for this index");
            return;
        };
        let head = self.bucket(key);
        I::link(entry_ref).store(head.load(Ordering::Relaxed), Ordering::Relaxed);
        head.store(entry.as_ptr(), Ordering::Release);
    }

    /// Unlink exactly `entry` (by identity). Returns false if it was not linked here.
    pub(crate) fn unlink(&mut self, entry: NonNull<LoaderEntry>) -> bool {
        // Safety: the caller owns `entry`, which is still allocated
        let Some(key) = I::key(unsafe { entry.as_ref() }) else {
            return false;
        };
        let mut link = self.bucket(key);
        loop {
            let current = link.load(Ordering::Relaxed);
            let Some(current) = NonNull::new(current) else {
                return false;
            };
            // Safety: linked entries are allocated
            let current_ref = unsafe { current.as_ref() };
            if current == entry {
                link.store(I::link(current_ref).load(Ordering::Relaxed), Ordering::Relaxed);
                I::link(current_ref).store(ptr::null_mut(), Ordering::Relaxed);
                return true;
            }
            link = I::link(current_ref);
        }
    }

    /// Detach every bucket and return all entries that were linked
    pub(crate) fn drain(&mut self) -> Vec<NonNull<LoaderEntry>> {
        let mut entries = Vec::new();
        for head in self.buckets.iter_mut() {
            let mut current = std::mem::replace(head.get_mut(), ptr::null_mut());
            while let Some(entry) = NonNull::new(current) {
                // Safety: linked entries are allocated
                current = I::link(unsafe { entry.as_ref() }).load(Ordering::Relaxed);
                entries.push(entry);
            }
        }
        entries
    }
}
