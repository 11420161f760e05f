//! In-memory [`Storage`] implementation backed by [`DashMap`], the one
//! concrete storage backend this repository ships (see module docs on why a
//! durable backend is out of scope but trait-compatible).

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{ObjectKind, Storage, StoredObject, WatchEvent};
use crate::error::StorageError;
use crate::model::ObjectVersion;

const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// In-memory storage backed by [`DashMap`] for concurrent read access,
/// mirroring the teacher's `HashMapStorage` (`storage/engines/hashmap.rs`).
pub struct MemoryStorage {
    resources: DashMap<String, StoredObject>,
    drlcs: DashMap<String, StoredObject>,
    resource_watch: broadcast::Sender<WatchEvent>,
    drlc_watch: broadcast::Sender<WatchEvent>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        let (resource_watch, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        let (drlc_watch, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            resources: DashMap::new(),
            drlcs: DashMap::new(),
            resource_watch,
            drlc_watch,
        }
    }

    fn map(&self, kind: ObjectKind) -> &DashMap<String, StoredObject> {
        match kind {
            ObjectKind::Resource => &self.resources,
            ObjectKind::Drlc => &self.drlcs,
        }
    }

    fn watch_channel(&self, kind: ObjectKind) -> &broadcast::Sender<WatchEvent> {
        match kind {
            ObjectKind::Resource => &self.resource_watch,
            ObjectKind::Drlc => &self.drlc_watch,
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, kind: ObjectKind, name: &str) -> Option<StoredObject> {
        self.map(kind).get(name).map(|r| r.clone())
    }

    fn list(&self, kind: ObjectKind) -> Vec<StoredObject> {
        self.map(kind).iter().map(|e| e.value().clone()).collect()
    }

    fn create(&self, object: StoredObject) -> Result<ObjectVersion, StorageError> {
        let kind = object.kind();
        let name = object.name().to_string();
        let map = self.map(kind);

        if map.contains_key(&name) {
            return Err(StorageError::Conflict(name));
        }

        let version = 1;
        let object = set_version(object, version);
        map.insert(name, object.clone());
        let _ = self.watch_channel(kind).send(WatchEvent::Created(object));
        Ok(version)
    }

    fn update(
        &self,
        object: StoredObject,
        expected_version: ObjectVersion,
    ) -> Result<ObjectVersion, StorageError> {
        let kind = object.kind();
        let name = object.name().to_string();
        let map = self.map(kind);

        let mut entry = map
            .get_mut(&name)
            .ok_or_else(|| StorageError::NotFound(name.clone()))?;

        if entry.version() != expected_version {
            return Err(StorageError::Conflict(name));
        }

        let next_version = expected_version + 1;
        let object = set_version(object, next_version);
        *entry = object.clone();
        drop(entry);
        let _ = self.watch_channel(kind).send(WatchEvent::Updated(object));
        Ok(next_version)
    }

    fn delete(
        &self,
        kind: ObjectKind,
        name: &str,
        expected_version: ObjectVersion,
    ) -> Result<(), StorageError> {
        let map = self.map(kind);
        let Some((_, existing)) = map.remove_if(name, |_, v| v.version() == expected_version)
        else {
            return if map.contains_key(name) {
                Err(StorageError::Conflict(name.to_string()))
            } else {
                Err(StorageError::NotFound(name.to_string()))
            };
        };
        let _ = existing;
        let _ = self.watch_channel(kind).send(WatchEvent::Deleted {
            kind,
            name: name.to_string(),
        });
        Ok(())
    }

    fn watch(&self, kind: ObjectKind) -> broadcast::Receiver<WatchEvent> {
        self.watch_channel(kind).subscribe()
    }
}

fn set_version(object: StoredObject, version: ObjectVersion) -> StoredObject {
    match object {
        StoredObject::Resource(mut r) => {
            r.version = version;
            StoredObject::Resource(r)
        }
        StoredObject::Drlc(mut d) => {
            d.version = version;
            StoredObject::Drlc(d)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Resource;
    use chrono::Utc;

    fn make_resource(name: &str) -> StoredObject {
        StoredObject::Resource(Resource::new(name, "t", "free", Utc::now()))
    }

    #[test]
    fn create_then_get_round_trip() {
        let storage = MemoryStorage::new();
        let version = storage.create(make_resource("r1")).unwrap();
        assert_eq!(version, 1);

        let fetched = storage.get(ObjectKind::Resource, "r1").unwrap();
        assert_eq!(fetched.version(), 1);
    }

    #[test]
    fn create_twice_conflicts() {
        let storage = MemoryStorage::new();
        storage.create(make_resource("r1")).unwrap();
        let err = storage.create(make_resource("r1")).unwrap_err();
        assert_eq!(err, StorageError::Conflict("r1".to_string()));
    }

    #[test]
    fn update_with_stale_version_conflicts() {
        let storage = MemoryStorage::new();
        storage.create(make_resource("r1")).unwrap();

        let err = storage.update(make_resource("r1"), 99).unwrap_err();
        assert_eq!(err, StorageError::Conflict("r1".to_string()));
    }

    #[test]
    fn update_bumps_version() {
        let storage = MemoryStorage::new();
        storage.create(make_resource("r1")).unwrap();
        let version = storage.update(make_resource("r1"), 1).unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn delete_requires_matching_version() {
        let storage = MemoryStorage::new();
        storage.create(make_resource("r1")).unwrap();

        let err = storage.delete(ObjectKind::Resource, "r1", 99).unwrap_err();
        assert_eq!(err, StorageError::Conflict("r1".to_string()));

        storage.delete(ObjectKind::Resource, "r1", 1).unwrap();
        assert!(storage.get(ObjectKind::Resource, "r1").is_none());
    }

    #[test]
    fn watch_receives_lifecycle_events() {
        let storage = MemoryStorage::new();
        let mut rx = storage.watch(ObjectKind::Resource);

        storage.create(make_resource("r1")).unwrap();
        match rx.try_recv().unwrap() {
            WatchEvent::Created(obj) => assert_eq!(obj.name(), "r1"),
            other => panic!("unexpected event: {other:?}"),
        }

        storage.update(make_resource("r1"), 1).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), WatchEvent::Updated(_)));

        storage.delete(ObjectKind::Resource, "r1", 2).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), WatchEvent::Deleted { .. }));
    }
}
