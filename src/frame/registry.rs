use std::collections::btree_map;
use std::collections::BTreeMap;

use super::handle::FrameHandle;

/// Pending animation frame callbacks for one context, in registration order.
///
/// Handles come from a monotonic allocator, so ordering by handle is ordering by
/// registration.
pub struct CallbackRegistry<C> {
    entries: BTreeMap<FrameHandle, C>,
}

impl<C> Default for CallbackRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CallbackRegistry<C> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Panics if `handle` is already registered.
    pub fn insert(&mut self, handle: FrameHandle, callback: C) {
        if self.entries.contains_key(&handle) {
            panic!("animation frame handle {handle} registered twice");
        }
        if let Some(last) = self.entries.keys().next_back() {
            debug_assert!(
                handle > *last,
                "handle {handle} registered after newer handle {last}"
            );
        }
        self.entries.insert(handle, callback);
    }

    /// Returns whether the handle was pending. Unknown handles are not an error.
    pub fn remove(&mut self, handle: FrameHandle) -> bool {
        self.entries.remove(&handle).is_some()
    }

    pub fn contains(&self, handle: FrameHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every pending entry, leaving an empty registry behind.
    ///
    /// Entries inserted after this call land in the fresh collection and are never
    /// part of the returned batch.
    pub fn drain(&mut self) -> FrameBatch<C> {
        FrameBatch {
            inner: std::mem::take(&mut self.entries).into_iter(),
        }
    }
}

/// Callbacks captured by [`CallbackRegistry::drain`], yielded in firing order.
pub struct FrameBatch<C> {
    inner: btree_map::IntoIter<FrameHandle, C>,
}

impl<C> Iterator for FrameBatch<C> {
    type Item = (FrameHandle, C);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<C> ExactSizeIterator for FrameBatch<C> {}
