//! The dynamic class manager: materializes and retires resources to keep a
//! DRLC's live population within `[min_count, max_count]`.
//!
//! Grounded on the desired-vs-actual diffing shape of the teacher's
//! `cluster::assignment::plan_rebalance` (diff a target assignment against
//! the current partition table and emit the minimal migration set), here
//! specialized from partition migrations to resource creation/retirement.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{Drlc, ObjectVersion, Resource, TOMBSTONE};
use crate::registry::{Ranch, RanchState};
use crate::storage::StoredObject;

impl Ranch {
    /// Brings the live population of `drlc.resource_type` into
    /// `[min_count, max_count]`:
    ///
    /// - any unleased member past its class's `lifespan` is retired first,
    ///   since it was never under lease and so the reaper never sees it.
    /// - below `min_count`: synthesizes new unleased resources named
    ///   `{type}-{uuid}` in `initial_state`; when the class has a bounded
    ///   `lifespan`, the new resource's `expiration` is set to `now +
    ///   lifespan` so it is retired in turn once it elapses.
    /// - above `max_count` (e.g. after an operator lowers `max_count`):
    ///   retires unleased excess immediately by deleting them outright, and
    ///   tombstones leased excess so the current lease finishes naturally
    ///   before the resource is deleted on release -- an in-flight lease is
    ///   never preempted to shrink the pool.
    ///
    /// Returns the number of resources created and retired, for logging.
    pub(crate) fn resize_dynamic_class(
        &self,
        state: &mut RanchState,
        drlc: &Drlc,
        now: DateTime<Utc>,
    ) -> (usize, usize) {
        let mut members: Vec<Resource> = state
            .resources
            .values()
            .filter(|r| r.resource_type == drlc.resource_type && !r.is_tombstoned())
            .cloned()
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));

        // Unleased members whose class lifespan has elapsed are retired
        // outright (never leased, so never reclaimed by the lease reaper);
        // the materialize pass below replenishes the population back up to
        // min_count in their place.
        let expired: Vec<Resource> = members
            .iter()
            .filter(|r| !r.is_leased() && r.expiration.is_some_and(|exp| exp < now))
            .cloned()
            .collect();
        let mut retired = 0;
        for resource in expired {
            if self
                .storage
                .delete(
                    crate::storage::ObjectKind::Resource,
                    &resource.name,
                    resource.version,
                )
                .is_ok()
            {
                state.resources.remove(&resource.name);
                members.retain(|r| r.name != resource.name);
                retired += 1;
            }
        }
        let lifespan_retired = retired;

        let mut created = 0;
        while members.len() < drlc.min_count as usize {
            let name = format!("{}-{}", drlc.resource_type, Uuid::new_v4());
            let mut resource = Resource::new(&name, &drlc.resource_type, &drlc.initial_state, now);
            if let Some(lifespan) = drlc.lifespan.filter(|d| !d.is_zero()) {
                resource.lease_duration = Some(lifespan);
                resource.expiration = Some(
                    now + chrono::Duration::from_std(lifespan).unwrap_or(chrono::Duration::zero()),
                );
            }
            match self
                .storage
                .create(StoredObject::Resource(resource.clone()))
            {
                Ok(version) => {
                    let mut stored = resource;
                    stored.version = version;
                    state.resources.insert(stored.name.clone(), stored.clone());
                    members.push(stored);
                    created += 1;
                }
                Err(err) => {
                    debug!(%name, %err, "dynamic class materialize failed, retrying next pass");
                    break;
                }
            }
        }

        let mut retired = lifespan_retired;
        if members.len() > drlc.max_count as usize {
            let excess = members.len() - drlc.max_count as usize;
            // Prefer retiring unleased members first so no active lease is disturbed
            // unless the whole class must shrink below its leased count.
            members.sort_by_key(|r| r.is_leased());
            for resource in members.into_iter().take(excess) {
                if resource.is_leased() {
                    if self.tombstone_resource(state, &resource.name, now).is_ok() {
                        retired += 1;
                    }
                } else if self
                    .storage
                    .delete(
                        crate::storage::ObjectKind::Resource,
                        &resource.name,
                        resource.version,
                    )
                    .is_ok()
                {
                    state.resources.remove(&resource.name);
                    retired += 1;
                }
            }
        }

        if created > 0 || retired > 0 {
            info!(resource_type = %drlc.resource_type, created, retired, "resized dynamic class");
        }
        (created, retired)
    }

    /// Marks a resource tombstoned in place without touching its
    /// owner/state/expiration. A tombstoned resource currently under lease
    /// is deleted outright by [`Self::release`]'s caller once released --
    /// see [`crate::reconciler`].
    pub(crate) fn tombstone_resource(
        &self,
        state: &mut RanchState,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), crate::error::RanchError> {
        let Some(resource) = state.resources.get(name).cloned() else {
            return Ok(());
        };
        if resource.is_tombstoned() {
            return Ok(());
        }
        let mut next = resource.clone();
        next.state = TOMBSTONE.to_string();
        next.last_update = now;
        match self
            .storage
            .update(StoredObject::Resource(next.clone()), resource.version)
        {
            Ok(version) => {
                next.version = version as ObjectVersion;
                state.resources.insert(name.to_string(), next);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
