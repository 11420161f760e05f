//! Snapshot types for the `metric` verb and the server's telemetry exporter.
//! `Ranch::metric` returns the raw per-state counts this module's
//! [`PoolSnapshot`] wraps; kept as a separate, serializable type so the HTTP
//! layer and a metrics exporter can both consume it without reaching into
//! `ranch-core`'s internals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::Ranch;

/// Per-state resource counts for one resource type, as returned by the
/// `GET /metric/:type` route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub resource_type: String,
    pub counts: BTreeMap<String, usize>,
}

impl Ranch {
    /// All resource types currently known to the registry (from live
    /// resources and declared DRLCs), each with its [`PoolSnapshot`].
    #[must_use]
    pub fn metric_snapshot(&self, resource_type: &str) -> PoolSnapshot {
        PoolSnapshot {
            resource_type: resource_type.to_string(),
            counts: self.metric(resource_type),
        }
    }

    /// A snapshot for every resource type currently populated, for the
    /// Prometheus exporter's periodic scrape.
    #[must_use]
    pub fn all_metric_snapshots(&self) -> Vec<PoolSnapshot> {
        let types: std::collections::BTreeSet<String> = self
            .snapshot_resources()
            .into_iter()
            .map(|r| r.resource_type)
            .collect();
        types
            .into_iter()
            .map(|t| self.metric_snapshot(&t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::model::Resource;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::StoredObject;
    use std::sync::Arc;

    #[test]
    fn snapshot_counts_by_state_excludes_tombstones() {
        let ranch = Ranch::new(Arc::new(MemoryStorage::new()), Arc::new(SystemClock));
        for (name, state) in [
            ("r1", "free"),
            ("r2", "free"),
            ("r3", "busy"),
            ("r4", "tombstone"),
        ] {
            ranch
                .storage
                .create(StoredObject::Resource(Resource::new(
                    name,
                    "t",
                    state,
                    chrono::Utc::now(),
                )))
                .unwrap();
        }
        ranch.reload_from_storage();

        let snapshot = ranch.metric_snapshot("t");
        assert_eq!(snapshot.counts.get("free"), Some(&2));
        assert_eq!(snapshot.counts.get("busy"), Some(&1));
        assert_eq!(snapshot.counts.get("tombstone"), None);
    }
}
