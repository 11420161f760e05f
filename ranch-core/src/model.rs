//! Data model for the two entity kinds Ranch owns: [`Resource`] and
//! [`Drlc`] (dynamic resource life cycle), plus the in-memory-only
//! [`QueuedRequest`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic version token handed out by the storage adapter. Compared by
/// `update`/`delete` to detect a concurrent write (optimistic concurrency).
pub type ObjectVersion = u64;

/// `tombstone` is the one state the lifecycle engine treats specially; every
/// other state name is an opaque string chosen by the operator's config.
pub const TOMBSTONE: &str = "tombstone";

/// A leasable unit: the thing clients acquire, heartbeat, and release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique primary key.
    pub name: String,
    /// Class label (matches a [`Drlc::resource_type`] for dynamic resources,
    /// or an arbitrary operator-chosen string for statically configured ones).
    pub resource_type: String,
    /// Current lifecycle state. Opaque except for [`TOMBSTONE`].
    pub state: String,
    /// Free text; non-empty iff the resource is currently leased.
    pub owner: String,
    /// Wall-clock time of the last state/owner/user_data mutation.
    pub last_update: DateTime<Utc>,
    /// Wall-clock time the resource was first created.
    pub created_at: DateTime<Utc>,
    /// Arbitrary caller-supplied metadata.
    pub user_data: BTreeMap<String, String>,
    /// Set iff `owner` is non-empty and the lease has a bounded term.
    pub expiration: Option<DateTime<Utc>>,
    /// The lease term requested at acquire time. `update` extends
    /// `expiration` by this amount each time it's called, so a client that
    /// keeps heartbeating never loses its lease even under a short initial
    /// term.
    pub lease_duration: Option<Duration>,
    /// Storage version for optimistic concurrency.
    pub version: ObjectVersion,
}

impl Resource {
    /// A brand-new, unleased resource in `initial_state`.
    pub fn new(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        state: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            state: state.into(),
            owner: String::new(),
            last_update: now,
            created_at: now,
            user_data: BTreeMap::new(),
            expiration: None,
            lease_duration: None,
            version: 0,
        }
    }

    /// `owner` is non-empty iff the resource is under lease.
    #[must_use]
    pub fn is_leased(&self) -> bool {
        !self.owner.is_empty()
    }

    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.state == TOMBSTONE
    }
}

/// A declarative class record describing a dynamically sized population of
/// resources sharing a `resource_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drlc {
    /// Unique primary key, shared with the `resource_type` of the resources
    /// it materializes.
    pub resource_type: String,
    /// State newly synthesized resources start in.
    pub initial_state: String,
    /// Lower bound on live population.
    pub min_count: u32,
    /// Upper bound on live population.
    pub max_count: u32,
    /// Optional bounded lifetime applied to synthesized resources.
    pub lifespan: Option<Duration>,
    /// Sub-resources (by type) consumed to create one instance of this class.
    pub needs: BTreeMap<String, u32>,
    /// Opaque construction spec, passed through untouched.
    pub config: serde_json::Value,
    /// State the reaper moves an overdue lease of this type to. Defaults to
    /// `"dirty"` when unset (see [`crate::reaper`]).
    pub dirty_state: Option<String>,
    /// Storage version for optimistic concurrency.
    pub version: ObjectVersion,
}

impl Drlc {
    /// `0 <= min_count <= max_count` is the one structural invariant.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min_count <= self.max_count
    }
}

/// An in-memory-only entry in a request queue. Never persisted: a broker
/// restart empties all queues and clients re-submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    pub request_id: String,
    pub resource_type: String,
    /// The state this request is waiting to acquire a resource *from* (the
    /// acquire call's `from_state`), paired with `resource_type` to form the
    /// queue's identity.
    pub requested_state: String,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_resource_is_unleased() {
        let r = Resource::new("r1", "t", "free", Utc::now());
        assert!(!r.is_leased());
        assert!(r.owner.is_empty());
        assert!(r.expiration.is_none());
    }

    #[test]
    fn tombstone_detection() {
        let mut r = Resource::new("r1", "t", "free", Utc::now());
        assert!(!r.is_tombstoned());
        r.state = TOMBSTONE.to_string();
        assert!(r.is_tombstoned());
    }

    #[test]
    fn drlc_validity() {
        let mut d = Drlc {
            resource_type: "t".into(),
            initial_state: "free".into(),
            min_count: 2,
            max_count: 4,
            lifespan: None,
            needs: BTreeMap::new(),
            config: serde_json::Value::Null,
            dirty_state: None,
            version: 0,
        };
        assert!(d.is_valid());
        d.min_count = 5;
        assert!(!d.is_valid());
    }
}
