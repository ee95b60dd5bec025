use plugin_bridge::{GroupRequest, PluginBridge};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// One active plugin instance: the thread blocked in its dispatch loop and
/// the bridge it is running.
pub struct PluginSlot {
    pub dispatch: JoinHandle<()>,
    pub bridge: Arc<dyn PluginBridge>,
}

/// The single source of truth for which plugins this process is hosting.
///
/// Locking contract: every operation takes the one exclusive lock for the
/// duration of that call only; callers never hold a reference into the map
/// across a blocking operation. Slots are inserted and removed exclusively
/// from the event-processing thread; dispatch threads request removal by
/// posting back to it rather than touching the registry themselves.
#[derive(Default)]
pub struct PluginRegistry {
    active: Mutex<HashMap<GroupRequest, PluginSlot>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly constructed plugin under its request identity.
    ///
    /// Request identities are generated collision-free on the client side,
    /// so a key that is already present means a broken invariant upstream,
    /// not a condition to recover from.
    pub fn insert(&self, key: GroupRequest, slot: PluginSlot) {
        let previous = self.active.lock().unwrap().insert(key, slot);
        assert!(
            previous.is_none(),
            "a group request was registered more than once"
        );
    }

    pub fn remove(&self, key: &GroupRequest) -> Option<PluginSlot> {
        self.active.lock().unwrap().remove(key)
    }

    /// Visit every active slot under the lock. Visitors must not block.
    pub fn for_each(&self, mut visit: impl FnMut(&GroupRequest, &PluginSlot)) {
        for (key, slot) in self.active.lock().unwrap().iter() {
            visit(key, slot);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Take every remaining slot out of the registry; used at teardown to
    /// join dispatch threads that are still in flight.
    pub fn drain(&self) -> Vec<(GroupRequest, PluginSlot)> {
        self.active.lock().unwrap().drain().collect()
    }
}
