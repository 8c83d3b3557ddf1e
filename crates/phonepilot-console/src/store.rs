//! Copy-on-write per-device state store.
//!
//! The current mapping lives in a `watch` channel as an immutable
//! snapshot. Every update clones the map, swaps in a new record for one
//! device and publishes the result, so:
//! - updates are serialized by the channel's write lock and always start
//!   from the latest snapshot (no lost updates from stale closures),
//! - readers holding a snapshot keep a complete, consistent view,
//! - records of other devices are carried over by reference.

use crate::state::{DeviceState, DeviceStatePatch};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// An immutable view of every device's state.
pub type StoreSnapshot = Arc<HashMap<String, Arc<DeviceState>>>;

/// Shared handle to the device state store. Cheap to clone.
#[derive(Clone)]
pub struct DeviceStore {
    tx: Arc<watch::Sender<StoreSnapshot>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(HashMap::new()));
        Self { tx: Arc::new(tx) }
    }

    /// State of `device_id`; a default record if the device was never touched.
    pub fn get(&self, device_id: &str) -> Arc<DeviceState> {
        self.tx
            .borrow()
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The current snapshot of all devices.
    pub fn snapshot(&self) -> StoreSnapshot {
        Arc::clone(&self.tx.borrow())
    }

    /// Receive a notification after every published update.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.tx.subscribe()
    }

    /// Merge `patch` into the device's record.
    pub fn update(&self, device_id: &str, patch: DeviceStatePatch) {
        self.update_if(device_id, |state| {
            patch.apply(state);
            true
        });
    }

    /// Edit a copy of the device's record and publish it.
    pub fn update_with(&self, device_id: &str, f: impl FnOnce(&mut DeviceState)) {
        self.update_if(device_id, |state| {
            f(state);
            true
        });
    }

    /// Edit a copy of the device's record; publish only if `f` returns true.
    ///
    /// `f` runs while the store is locked against other writers, so the
    /// decision it makes is atomic with the write. It must not call back
    /// into the store.
    pub fn update_if(&self, device_id: &str, f: impl FnOnce(&mut DeviceState) -> bool) -> bool {
        self.tx.send_if_modified(|snapshot| {
            let mut state = snapshot
                .get(device_id)
                .map(|s| DeviceState::clone(s))
                .unwrap_or_default();
            if !f(&mut state) {
                return false;
            }
            let mut next = HashMap::clone(snapshot);
            next.insert(device_id.to_string(), Arc::new(state));
            *snapshot = Arc::new(next);
            true
        })
    }

    /// Number of devices with a record.
    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
