use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use crate::sys::message::WindowHandle;
use crate::sys::run_loop::MessageHook;

/// Maps host window handles to the object that owns the window.
///
/// Insertions and lookups both happen on the affine thread in practice, but the
/// map is shared with every view handle, so it is thread-safe regardless.
#[derive(Clone, Default)]
pub struct ViewRegistry(Arc<DashMap<WindowHandle, Arc<dyn MessageHook>>>);

impl ViewRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, handle: WindowHandle, hook: Arc<dyn MessageHook>) {
        match self.0.entry(handle) {
            Entry::Occupied(mut entry) => {
                warn!(%handle, "window handle reused while still registered");
                entry.insert(hook);
            }
            Entry::Vacant(entry) => {
                debug!(%handle, "view registered");
                entry.insert(hook);
            }
        }
    }

    /// The returned hook is detached from the map, so it may re-enter the
    /// registry (e.g. remove itself) while handling a message.
    pub fn get(&self, handle: WindowHandle) -> Option<Arc<dyn MessageHook>> {
        self.0.get(&handle).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, handle: WindowHandle) -> Option<Arc<dyn MessageHook>> {
        self.0.remove(&handle).map(|(_, hook)| hook)
    }

    pub fn contains(&self, handle: WindowHandle) -> bool { self.0.contains_key(&handle) }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Point-in-time copy of all entries, for teardown.
    pub fn snapshot(&self) -> Vec<(WindowHandle, Arc<dyn MessageHook>)> {
        self.0.iter().map(|entry| (*entry.key(), entry.value().clone())).collect()
    }
}
