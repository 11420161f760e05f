//! The lifecycle engine: `acquire`, `acquire_by_state`, `release`, `update`,
//! `reset`, plus the metric snapshot verb. Implemented as methods on
//! [`Ranch`] so each verb's registry-lock-plus-storage-write happens in one
//! place.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::error::RanchError;
use crate::model::{Resource, TOMBSTONE};
use crate::registry::{Ranch, RanchState};
use crate::storage::{ObjectKind, StoredObject};

/// A bound on how many times a single verb re-reads and retries a storage
/// write after a `Conflict` before giving up and surfacing the error to the
/// caller.
const MAX_CONFLICT_RETRIES: u32 = 5;

/// Default destination state the lease reaper demotes an overdue resource
/// to, when its DRLC does not declare a `dirty_state`.
pub const DEFAULT_DIRTY_STATE: &str = "dirty";

/// The non-error result of [`Ranch::acquire`]: either a resource was leased
/// immediately, or the caller's request was parked in the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    Leased(Resource),
    Queued,
}

impl Ranch {
    /// Commits a transition to the resource named `name`: reads the current
    /// value, applies `transition`, writes it through storage with
    /// optimistic concurrency, and updates the in-memory view. Retries
    /// (re-reading and re-validating) up to [`MAX_CONFLICT_RETRIES`] times
    /// on a version conflict.
    fn commit_resource<F>(
        &self,
        state: &mut RanchState,
        name: &str,
        mut transition: F,
    ) -> Result<Resource, RanchError>
    where
        F: FnMut(&Resource) -> Result<Resource, RanchError>,
    {
        let mut current = state
            .resources
            .get(name)
            .cloned()
            .ok_or(RanchError::NotFound)?;

        for _ in 0..MAX_CONFLICT_RETRIES {
            let next = transition(&current)?;
            match self
                .storage
                .update(StoredObject::Resource(next.clone()), current.version)
            {
                Ok(version) => {
                    let mut committed = next;
                    committed.version = version;
                    state
                        .resources
                        .insert(committed.name.clone(), committed.clone());
                    return Ok(committed);
                }
                Err(_conflict) => match self.storage.get(ObjectKind::Resource, name) {
                    Some(StoredObject::Resource(fresh)) => {
                        state.resources.insert(name.to_string(), fresh.clone());
                        current = fresh;
                    }
                    _ => return Err(RanchError::NotFound),
                },
            }
        }
        Err(RanchError::Conflict(name.to_string()))
    }

    fn dirty_state_for(&self, state: &RanchState, resource_type: &str) -> String {
        state
            .drlcs
            .get(resource_type)
            .and_then(|d| d.dirty_state.clone())
            .unwrap_or_else(|| DEFAULT_DIRTY_STATE.to_string())
    }

    /// Scans for a free candidate matching `(resource_type, from_state,
    /// owner="")`, choosing the smallest name lexicographically for
    /// reproducibility, and leases it to `owner`.
    fn try_fulfill(
        &self,
        state: &mut RanchState,
        resource_type: &str,
        from_state: &str,
        to_state: &str,
        owner: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Option<Resource> {
        let candidate = state
            .resources
            .values()
            .filter(|r| {
                r.resource_type == resource_type && r.state == from_state && r.owner.is_empty()
            })
            .map(|r| r.name.clone())
            .min()?;

        let to_state = to_state.to_string();
        let owner = owner.to_string();
        self.commit_resource(state, &candidate, move |cur| {
            if cur.state != from_state || !cur.owner.is_empty() {
                return Err(RanchError::StateMismatch(cur.name.clone()));
            }
            let mut next = cur.clone();
            next.state = to_state.clone();
            next.owner = owner.clone();
            next.last_update = now;
            next.lease_duration = Some(lease_duration);
            next.expiration = Some(
                now + chrono::Duration::from_std(lease_duration)
                    .unwrap_or(chrono::Duration::zero()),
            );
            Ok(next)
        })
        .ok()
    }

    /// Leases one resource of `resource_type` currently in `from_state`,
    /// moving it to `to_state` under `owner` for `lease_duration`.
    ///
    /// Honors the request queue's priority rule: a fresh, older request for
    /// `(resource_type, from_state)` blocks a newer or anonymous caller,
    /// which is queued (or rejected with `NotFound` if it supplied no
    /// `request_id` -- the queue-less fast path never creates an entry).
    pub fn acquire(
        &self,
        resource_type: &str,
        from_state: &str,
        to_state: &str,
        owner: &str,
        lease_duration: Duration,
        request_id: Option<&str>,
        request_ttl: chrono::Duration,
    ) -> Result<AcquireOutcome, RanchError> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        // A request_id'd caller always enrolls in the queue first -- even on
        // its very first call, even if a resource is sitting free -- and is
        // only granted one once it is the queue's head. This is what makes
        // the FIFO ordering hold across repeated polls rather than just on
        // the first contended call.
        if let Some(rid) = request_id {
            let first_submission = state.queues.enqueue(resource_type, from_state, rid, now);
            if first_submission {
                // The very first call for a request_id only enrolls it; the
                // caller must re-poll to actually claim a resource, even if
                // one is sitting free right now.
                trace!(resource_type, from_state, rid, "enrolled new request");
                return Ok(AcquireOutcome::Queued);
            }

            let head_id = state
                .queues
                .head(resource_type, from_state, now, request_ttl)
                .map(|r| r.request_id.clone());

            if head_id.as_deref() != Some(rid) {
                trace!(
                    resource_type,
                    from_state,
                    rid,
                    "queued behind fresher request"
                );
                return Ok(AcquireOutcome::Queued);
            }

            return match self.try_fulfill(
                &mut state,
                resource_type,
                from_state,
                to_state,
                owner,
                lease_duration,
                now,
            ) {
                Some(resource) => {
                    state.queues.remove(resource_type, from_state, rid);
                    debug!(resource = %resource.name, owner, "acquired");
                    Ok(AcquireOutcome::Leased(resource))
                }
                None => Ok(AcquireOutcome::Queued),
            };
        }

        // Queue-less fast path: no request_id means no queue entry is ever
        // created. It competes only against currently-available resources,
        // deferring to any fresh queued request for the same (type, state)
        // rather than displacing it.
        if state
            .queues
            .head(resource_type, from_state, now, request_ttl)
            .is_some()
        {
            return Err(RanchError::NotFound);
        }

        match self.try_fulfill(
            &mut state,
            resource_type,
            from_state,
            to_state,
            owner,
            lease_duration,
            now,
        ) {
            Some(resource) => {
                debug!(resource = %resource.name, owner, "acquired");
                Ok(AcquireOutcome::Leased(resource))
            }
            None => Err(RanchError::NotFound),
        }
    }

    /// Atomically transitions exactly the named resources from `state_name`
    /// to `new_state` under `owner`, all or nothing. All preconditions are
    /// validated before any write, and all writes happen while holding the
    /// registry lock, so no other verb can observe a partial transition.
    pub fn acquire_by_state(
        &self,
        state_name: &str,
        new_state: &str,
        owner: &str,
        names: &[String],
    ) -> Result<Vec<Resource>, RanchError> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        for name in names {
            let resource = state.resources.get(name).ok_or(RanchError::NotFound)?;
            if resource.state != state_name || !resource.owner.is_empty() {
                return Err(RanchError::Conflict(name.clone()));
            }
        }

        let mut leased = Vec::with_capacity(names.len());
        for name in names {
            let new_state = new_state.to_string();
            let owner = owner.to_string();
            let resource = self.commit_resource(&mut state, name, move |cur| {
                let mut next = cur.clone();
                next.state = new_state.clone();
                next.owner = owner.clone();
                next.last_update = now;
                Ok(next)
            })?;
            leased.push(resource);
        }
        Ok(leased)
    }

    /// Ends a lease: clears `owner`/`expiration`/`lease_duration` and moves
    /// the resource to `dest_state`, provided `owner` matches the current
    /// holder.
    pub fn release(
        &self,
        name: &str,
        owner: &str,
        dest_state: &str,
    ) -> Result<Resource, RanchError> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let dest_state = dest_state.to_string();
        let owner_owned = owner.to_string();
        let result = self.commit_resource(&mut state, name, move |cur| {
            if cur.owner != owner_owned {
                return Err(RanchError::OwnerMismatch(cur.name.clone()));
            }
            let mut next = cur.clone();
            next.state = dest_state.clone();
            next.owner.clear();
            next.expiration = None;
            next.lease_duration = None;
            next.last_update = now;
            Ok(next)
        });

        if result.is_ok() {
            trace!(name, "released, waking request queue");
        }
        result
    }

    /// A lease heartbeat: refreshes a leased resource's `user_data` and, if
    /// it has a bounded `lease_duration`, extends `expiration` by that same
    /// duration from now -- each heartbeat renews the lease for its original
    /// term rather than a fixed global constant.
    pub fn update(
        &self,
        name: &str,
        owner: &str,
        expected_state: &str,
        user_data: BTreeMap<String, String>,
    ) -> Result<Resource, RanchError> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let expected_state = expected_state.to_string();
        let owner_owned = owner.to_string();
        self.commit_resource(&mut state, name, move |cur| {
            if cur.owner != owner_owned {
                return Err(RanchError::OwnerMismatch(cur.name.clone()));
            }
            if cur.state != expected_state {
                return Err(RanchError::StateMismatch(cur.name.clone()));
            }
            let mut next = cur.clone();
            next.user_data = user_data.clone();
            next.last_update = now;
            if let Some(duration) = cur.lease_duration {
                next.expiration = Some(
                    now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero()),
                );
            }
            Ok(next)
        })
    }

    /// An operator-triggered equivalent of the reaper sweep: moves every
    /// leased resource of `resource_type` in `from_state` whose `expiration`
    /// falls before `expire_before` to `dest_state`, parameterized
    /// explicitly rather than keyed off "now".
    pub fn reset(
        &self,
        resource_type: &str,
        from_state: &str,
        expire_before: DateTime<Utc>,
        dest_state: &str,
    ) -> Result<Vec<Resource>, RanchError> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let names: Vec<String> = state
            .resources
            .values()
            .filter(|r| {
                r.resource_type == resource_type
                    && r.state == from_state
                    && !r.owner.is_empty()
                    && r.expiration.is_some_and(|exp| exp < expire_before)
            })
            .map(|r| r.name.clone())
            .collect();

        let mut reset_resources = Vec::with_capacity(names.len());
        for name in names {
            let dest_state = dest_state.to_string();
            let resource = self.commit_resource(&mut state, &name, move |cur| {
                let mut next = cur.clone();
                next.state = dest_state.clone();
                next.owner.clear();
                next.expiration = None;
                next.lease_duration = None;
                next.last_update = now;
                Ok(next)
            })?;
            reset_resources.push(resource);
        }
        Ok(reset_resources)
    }

    /// The lease reaper's sweep: every resource whose `expiration` has
    /// passed and whose `owner` is non-empty is demoted to its class's
    /// configured dirty state and its owner cleared. Never returns an error
    /// -- a resource that fails to
    /// persist (shouldn't happen; see `commit_resource`) is skipped and
    /// logged, so one bad object cannot halt the sweep.
    pub fn expire_overdue_leases(&self, now: DateTime<Utc>) -> Vec<Resource> {
        let mut state = self.state.lock();

        let overdue: Vec<(String, String)> = state
            .resources
            .values()
            .filter(|r| !r.owner.is_empty() && r.expiration.is_some_and(|exp| exp < now))
            .map(|r| (r.name.clone(), r.resource_type.clone()))
            .collect();

        let mut reset_resources = Vec::with_capacity(overdue.len());
        for (name, resource_type) in overdue {
            let dirty_state = self.dirty_state_for(&state, &resource_type);
            let result = self.commit_resource(&mut state, &name, move |cur| {
                let mut next = cur.clone();
                next.state = dirty_state.clone();
                next.owner.clear();
                next.expiration = None;
                next.lease_duration = None;
                next.last_update = now;
                Ok(next)
            });
            match result {
                Ok(resource) => reset_resources.push(resource),
                Err(err) => warn!(name, %err, "reaper failed to demote overdue resource"),
            }
        }
        reset_resources
    }

    /// Per-state resource counts for one resource type.
    #[must_use]
    pub fn metric(&self, resource_type: &str) -> BTreeMap<String, usize> {
        let state = self.state.lock();
        let mut counts = BTreeMap::new();
        for resource in state.resources.values() {
            if resource.resource_type == resource_type && resource.state != TOMBSTONE {
                *counts.entry(resource.state.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use crate::clock::Clock;
    use crate::storage::memory::MemoryStorage;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn seed_ranch(clock: Arc<FixedClock>) -> Ranch {
        let storage = Arc::new(MemoryStorage::new());
        let ranch = Ranch::new(storage, clock);
        ranch
    }

    fn create_resource(ranch: &Ranch, name: &str, resource_type: &str, state: &str) {
        use crate::storage::StoredObject;
        ranch
            .storage
            .create(StoredObject::Resource(Resource::new(
                name,
                resource_type,
                state,
                ranch.clock.now(),
            )))
            .unwrap();
        ranch.reload_from_storage();
    }

    fn ttl30() -> ChronoDuration {
        ChronoDuration::seconds(30)
    }

    #[test]
    fn single_acquire_release_round_trip() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let ranch = seed_ranch(clock.clone());
        create_resource(&ranch, "r1", "t", "free");

        let outcome = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "A",
                Duration::from_secs(30),
                None,
                ttl30(),
            )
            .unwrap();
        let resource = match outcome {
            AcquireOutcome::Leased(r) => r,
            AcquireOutcome::Queued => panic!("expected immediate lease"),
        };
        assert_eq!(resource.name, "r1");
        assert_eq!(resource.state, "busy");
        assert_eq!(resource.owner, "A");

        let released = ranch.release("r1", "A", "dirty").unwrap();
        assert_eq!(released.state, "dirty");
        assert!(released.owner.is_empty());
    }

    #[test]
    fn fifo_under_contention() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let ranch = seed_ranch(clock.clone());
        create_resource(&ranch, "r1", "t", "free");

        // B queues at t=0.
        let outcome = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "B",
                Duration::from_secs(30),
                Some("B"),
                ttl30(),
            )
            .unwrap();
        assert_eq!(outcome, AcquireOutcome::Queued);

        // C queues at t=1.
        clock.advance(ChronoDuration::seconds(1));
        let outcome = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "C",
                Duration::from_secs(30),
                Some("C"),
                ttl30(),
            )
            .unwrap();
        assert_eq!(outcome, AcquireOutcome::Queued);

        assert_eq!(ranch.get_resource("r1").unwrap().state, "free");

        // B re-polls at t=2 -> succeeds.
        clock.advance(ChronoDuration::seconds(1));
        let outcome = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "B",
                Duration::from_secs(30),
                Some("B"),
                ttl30(),
            )
            .unwrap();
        assert!(matches!(outcome, AcquireOutcome::Leased(_)));

        // C re-polls at t=3 -> still queued, no resource available.
        clock.advance(ChronoDuration::seconds(1));
        let outcome = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "C",
                Duration::from_secs(30),
                Some("C"),
                ttl30(),
            )
            .unwrap();
        assert_eq!(outcome, AcquireOutcome::Queued);

        // B releases at t=4, then C re-polls -> succeeds.
        clock.advance(ChronoDuration::seconds(1));
        ranch.release("r1", "B", "free").unwrap();
        let outcome = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "C",
                Duration::from_secs(30),
                Some("C"),
                ttl30(),
            )
            .unwrap();
        assert!(matches!(outcome, AcquireOutcome::Leased(_)));
    }

    #[test]
    fn ttl_demotes_silent_requester() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let ranch = seed_ranch(clock.clone());
        create_resource(&ranch, "r1", "t", "free");

        // A queues at t=0 and goes silent.
        let outcome = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "A",
                Duration::from_secs(30),
                Some("A"),
                ttl30(),
            )
            .unwrap();
        assert_eq!(outcome, AcquireOutcome::Queued);

        // B queues at t=5.
        clock.advance(ChronoDuration::seconds(5));
        let outcome = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "B",
                Duration::from_secs(30),
                Some("B"),
                ttl30(),
            )
            .unwrap();
        assert_eq!(outcome, AcquireOutcome::Queued);

        // At t=31 (A's TTL of 30s from t=0 has lapsed), B polls and succeeds.
        clock.advance(ChronoDuration::seconds(26));
        let outcome = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "B",
                Duration::from_secs(30),
                Some("B"),
                ttl30(),
            )
            .unwrap();
        assert!(matches!(outcome, AcquireOutcome::Leased(_)));
    }

    #[test]
    fn lease_expiry_then_reaper_then_reacquire() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let ranch = seed_ranch(clock.clone());
        create_resource(&ranch, "r1", "t", "free");

        let outcome = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "A",
                Duration::from_secs(1),
                None,
                ttl30(),
            )
            .unwrap();
        assert!(matches!(outcome, AcquireOutcome::Leased(_)));

        // A never releases. At t=2 the reaper runs.
        clock.advance(ChronoDuration::seconds(2));
        let demoted = ranch.expire_overdue_leases(clock.now());
        assert_eq!(demoted.len(), 1);
        assert_eq!(demoted[0].state, DEFAULT_DIRTY_STATE);
        assert!(demoted[0].owner.is_empty());

        let outcome = ranch
            .acquire(
                "t",
                DEFAULT_DIRTY_STATE,
                "cleaning",
                "janitor",
                Duration::from_secs(60),
                None,
                ttl30(),
            )
            .unwrap();
        assert!(matches!(outcome, AcquireOutcome::Leased(_)));
    }

    #[test]
    fn update_rejects_owner_mismatch_and_state_mismatch() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let ranch = seed_ranch(clock.clone());
        create_resource(&ranch, "r1", "t", "free");
        ranch
            .acquire(
                "t",
                "free",
                "busy",
                "A",
                Duration::from_secs(30),
                None,
                ttl30(),
            )
            .unwrap();

        let err = ranch
            .update("r1", "someone-else", "busy", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RanchError::OwnerMismatch(_)));

        let err = ranch
            .update("r1", "A", "free", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RanchError::StateMismatch(_)));

        let mut data = BTreeMap::new();
        data.insert("k".to_string(), "v".to_string());
        let updated = ranch.update("r1", "A", "busy", data.clone()).unwrap();
        assert_eq!(updated.user_data, data);
    }

    #[test]
    fn update_extends_expiration_by_original_lease_duration() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let ranch = seed_ranch(clock.clone());
        create_resource(&ranch, "r1", "t", "free");
        ranch
            .acquire(
                "t",
                "free",
                "busy",
                "A",
                Duration::from_secs(30),
                None,
                ttl30(),
            )
            .unwrap();

        clock.advance(ChronoDuration::seconds(20));
        let updated = ranch.update("r1", "A", "busy", BTreeMap::new()).unwrap();
        assert_eq!(
            updated.expiration.unwrap(),
            clock.now() + ChronoDuration::seconds(30)
        );
    }

    #[test]
    fn acquire_by_state_is_all_or_nothing() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let ranch = seed_ranch(clock.clone());
        create_resource(&ranch, "r1", "t", "free");
        create_resource(&ranch, "r2", "t", "busy"); // already leased state mismatch

        let err = ranch
            .acquire_by_state("free", "busy", "A", &["r1".to_string(), "r2".to_string()])
            .unwrap_err();
        assert!(matches!(err, RanchError::Conflict(_)));

        // r1 must not have been mutated by the failed all-or-nothing call.
        assert_eq!(ranch.get_resource("r1").unwrap().state, "free");
    }

    #[test]
    fn queue_less_fast_path_never_blocks_or_queues() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let ranch = seed_ranch(clock.clone());
        // No resources at all: anonymous caller gets NotFound, not Queued.
        let err = ranch
            .acquire(
                "t",
                "free",
                "busy",
                "scrubber",
                Duration::from_secs(30),
                None,
                ttl30(),
            )
            .unwrap_err();
        assert!(matches!(err, RanchError::NotFound));
    }
}
