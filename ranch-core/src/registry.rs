//! The resource registry: the authoritative in-memory view of all
//! resources and DRLCs, guarded by one writer-preferring mutex so that
//! state-transition decisions and their storage writes commit atomically.
//!
//! Grounded on the teacher's `service/registry.rs` `ServiceRegistry`
//! (a `DashMap`-backed registry of long-lived services) and its
//! `storage/record_store.rs` orchestration layer, generalized here to a
//! single `parking_lot::Mutex` because -- unlike a sharded map -- Ranch
//! needs every verb's read-decide-write sequence to be linearizable, not
//! just each individual map operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::model::{Drlc, Resource};
use crate::queue::RequestQueues;
use crate::storage::Storage;

/// Everything the registry lock protects.
pub(crate) struct RanchState {
    pub(crate) resources: BTreeMap<String, Resource>,
    pub(crate) drlcs: BTreeMap<String, Drlc>,
    pub(crate) queues: RequestQueues,
}

impl RanchState {
    fn new() -> Self {
        Self {
            resources: BTreeMap::new(),
            drlcs: BTreeMap::new(),
            queues: RequestQueues::new(),
        }
    }
}

/// The Ranch: owns the registry lock, the storage adapter, and the clock.
/// This is the crate's single public entry point -- every verb clients can
/// call is a method on this type.
pub struct Ranch {
    pub(crate) state: Mutex<RanchState>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Ranch {
    /// Builds an empty Ranch over the given storage and clock. Call
    /// [`crate::reconciler::bootstrap`] (or run a config reconciliation) to
    /// load the declared pool before serving traffic.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(RanchState::new()),
            storage,
            clock,
        }
    }

    /// Loads the registry's in-memory view from whatever the storage
    /// adapter currently holds, discarding anything already in memory.
    /// Used at startup and whenever a watch subscription needs to recover
    /// from a lagged/dropped channel.
    pub fn reload_from_storage(&self) {
        use crate::storage::ObjectKind;

        let resources = self.storage.list(ObjectKind::Resource);
        let drlcs = self.storage.list(ObjectKind::Drlc);

        let mut state = self.state.lock();
        state.resources = resources
            .into_iter()
            .filter_map(|o| o.into_resource())
            .map(|r| (r.name.clone(), r))
            .collect();
        state.drlcs = drlcs
            .into_iter()
            .filter_map(|o| o.into_drlc())
            .map(|d| (d.resource_type.clone(), d))
            .collect();
    }

    /// Point-in-time snapshot of all resources, for tests and metrics.
    #[must_use]
    pub fn snapshot_resources(&self) -> Vec<Resource> {
        self.state.lock().resources.values().cloned().collect()
    }

    /// Point-in-time snapshot of all DRLCs.
    #[must_use]
    pub fn snapshot_drlcs(&self) -> Vec<Drlc> {
        self.state.lock().drlcs.values().cloned().collect()
    }

    #[must_use]
    pub fn get_resource(&self, name: &str) -> Option<Resource> {
        self.state.lock().resources.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::memory::MemoryStorage;

    fn ranch() -> Ranch {
        Ranch::new(Arc::new(MemoryStorage::new()), Arc::new(SystemClock))
    }

    #[test]
    fn new_ranch_is_empty() {
        let ranch = ranch();
        assert!(ranch.snapshot_resources().is_empty());
        assert!(ranch.snapshot_drlcs().is_empty());
    }

    #[test]
    fn reload_picks_up_storage_contents() {
        use crate::model::Resource;
        use crate::storage::StoredObject;
        use chrono::Utc;

        let ranch = ranch();
        ranch
            .storage
            .create(StoredObject::Resource(Resource::new(
                "r1",
                "t",
                "free",
                Utc::now(),
            )))
            .unwrap();

        ranch.reload_from_storage();
        assert_eq!(ranch.snapshot_resources().len(), 1);
        assert_eq!(ranch.get_resource("r1").unwrap().name, "r1");
    }
}
