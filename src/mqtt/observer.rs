//! Ordered listener registry with identity-based deduplication

use std::sync::{Arc, PoisonError, RwLock};

use super::listener::MqttListener;

/// Registered listeners in insertion order
///
/// Two handles count as the same listener when they point at the same
/// allocation; structurally equal listeners behind different `Arc`s are
/// distinct entries.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn MqttListener>>>,
}

fn same_listener(a: &Arc<dyn MqttListener>, b: &Arc<dyn MqttListener>) -> bool {
    // compare data pointers only, vtable pointers may differ per codegen unit
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener` unless it is already registered
    pub fn add_listener(&self, listener: Arc<dyn MqttListener>) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return;
        }
        listeners.push(listener);
    }

    /// Removes `listener`; unknown listeners are ignored
    pub fn remove_listener(&self, listener: &Arc<dyn MqttListener>) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = listeners.iter().position(|l| same_listener(l, listener)) {
            listeners.remove(index);
        }
    }

    /// Snapshot of the current listeners
    ///
    /// Dispatch iterates the snapshot, so listeners added or removed from
    /// inside a callback only see later events.
    pub fn listeners(&self) -> Vec<Arc<dyn MqttListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `f` for every listener of a fresh snapshot
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&dyn MqttListener),
    {
        for listener in self.listeners() {
            f(listener.as_ref());
        }
    }
}
