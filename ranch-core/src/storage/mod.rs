//! The storage adapter: typed CRUD with optimistic concurrency over two
//! object kinds, plus a watch stream.
//!
//! Mirrors the teacher's layered storage design (`StorageEngine` as the
//! innermost trait, a `DashMap`-backed in-memory implementation) but
//! collapsed to one layer, since Ranch does not need the teacher's
//! eviction/expiry/mutation-observer machinery: leases already carry their
//! own expiration, and [`crate::reaper`] plays the role a `MutationObserver`
//! would.

pub mod memory;

use crate::error::StorageError;
use crate::model::{Drlc, ObjectVersion, Resource};
use tokio::sync::broadcast;

/// The two entity kinds the storage backend knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Resource,
    Drlc,
}

/// Either stored entity, returned from reads so `get`/`list`/`watch` can
/// share one signature across both kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredObject {
    Resource(Resource),
    Drlc(Drlc),
}

impl StoredObject {
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            StoredObject::Resource(_) => ObjectKind::Resource,
            StoredObject::Drlc(_) => ObjectKind::Drlc,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            StoredObject::Resource(r) => &r.name,
            StoredObject::Drlc(d) => &d.resource_type,
        }
    }

    #[must_use]
    pub fn version(&self) -> ObjectVersion {
        match self {
            StoredObject::Resource(r) => r.version,
            StoredObject::Drlc(d) => d.version,
        }
    }

    #[must_use]
    pub fn into_resource(self) -> Option<Resource> {
        match self {
            StoredObject::Resource(r) => Some(r),
            StoredObject::Drlc(_) => None,
        }
    }

    #[must_use]
    pub fn into_drlc(self) -> Option<Drlc> {
        match self {
            StoredObject::Drlc(d) => Some(d),
            StoredObject::Resource(_) => None,
        }
    }
}

/// An event emitted by the storage adapter's watch stream. Named after
/// `kube_runtime::watcher::Event`'s `Applied`/`Deleted` split -- there is no
/// `Restarted` analogue here because Ranch's in-memory registry is always
/// the process that owns the watched store; it never reconnects to it.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Created(StoredObject),
    Updated(StoredObject),
    Deleted { kind: ObjectKind, name: String },
}

/// Typed CRUD with optimistic concurrency over [`ObjectKind::Resource`] and
/// [`ObjectKind::Drlc`] objects, plus a watch stream.
///
/// Implementations abstract over any store providing these semantics (an
/// in-memory map here; an etcd/SQL/cloud-object-store table in production,
/// which is explicitly out of scope per the purpose statement but is a
/// drop-in against this trait).
pub trait Storage: Send + Sync {
    fn get(&self, kind: ObjectKind, name: &str) -> Option<StoredObject>;

    fn list(&self, kind: ObjectKind) -> Vec<StoredObject>;

    /// Creates a brand-new object. Fails if `name` already exists.
    fn create(&self, object: StoredObject) -> Result<ObjectVersion, StorageError>;

    /// Replaces an existing object iff its stored version matches
    /// `expected_version`. On mismatch, returns `Conflict` -- the caller
    /// must re-read and retry.
    fn update(
        &self,
        object: StoredObject,
        expected_version: ObjectVersion,
    ) -> Result<ObjectVersion, StorageError>;

    /// Deletes an object iff its stored version matches `expected_version`.
    fn delete(
        &self,
        kind: ObjectKind,
        name: &str,
        expected_version: ObjectVersion,
    ) -> Result<(), StorageError>;

    /// Subscribes to change events for a kind. Lagging subscribers miss
    /// events (per [`broadcast::Receiver`] semantics); the config reconciler
    /// treats a lag as "re-bootstrap from a full `list`", same as it would
    /// treat a `kube_runtime::watcher::Event::Restarted`.
    fn watch(&self, kind: ObjectKind) -> broadcast::Receiver<WatchEvent>;
}
