//! The config reconciler: diffs a [`RanchConfig`] document against the live
//! registry and applies the minimal set of changes -- creating missing
//! static resources, tombstoning ones no longer declared, and upserting
//! DRLCs (which in turn drives [`crate::dynamic`]'s materialize/retire
//! pass).
//!
//! Grounded on the same desired-vs-actual diffing shape as
//! `crate::dynamic` -- the teacher's `cluster::assignment::plan_rebalance`
//! diffs a target partition assignment against the current table to emit
//! the minimal migration set; here the diff is between a declared config
//! document and the live registry instead. File watching itself lives in
//! the server crate; this module only knows how to apply an already-parsed
//! document.

use tracing::{info, warn};

use crate::config::RanchConfig;
use crate::error::RanchError;
use crate::model::{Drlc, Resource};
use crate::registry::Ranch;
use crate::storage::{ObjectKind, StoredObject};

/// Outcome of one reconciliation pass, for logging/metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub static_created: usize,
    pub static_tombstoned: usize,
    pub drlcs_upserted: usize,
    pub dynamic_created: usize,
    pub dynamic_retired: usize,
}

impl Ranch {
    /// Applies `config` to the registry. Validates every `DrlcSpec` before
    /// making any change -- a single invalid class rejects the whole pass
    /// and leaves the prior pool untouched; a rejected config document must
    /// never partially apply.
    pub fn reconcile(&self, config: &RanchConfig) -> Result<ReconcileReport, RanchError> {
        for drlc in &config.dynamic_resources {
            if drlc.min_count > drlc.max_count {
                return Err(RanchError::ConfigInvalid(format!(
                    "resource_type {}: min_count {} exceeds max_count {}",
                    drlc.resource_type, drlc.min_count, drlc.max_count
                )));
            }
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        let mut report = ReconcileReport::default();

        let declared_static: std::collections::BTreeSet<&str> =
            config.resources.iter().map(|r| r.name.as_str()).collect();
        let declared_dynamic_types: std::collections::BTreeSet<&str> = config
            .dynamic_resources
            .iter()
            .map(|d| d.resource_type.as_str())
            .collect();
        // Resources of any *currently recorded* dynamic class -- kept or about
        // to be removed -- are always handled by the resize/removal path below,
        // never by the static-orphan sweep.
        let existing_dynamic_types: std::collections::BTreeSet<String> =
            state.drlcs.keys().cloned().collect();

        for spec in &config.resources {
            if !state.resources.contains_key(&spec.name) {
                let resource =
                    Resource::new(&spec.name, &spec.resource_type, &spec.initial_state, now);
                match self
                    .storage
                    .create(StoredObject::Resource(resource.clone()))
                {
                    Ok(version) => {
                        let mut stored = resource;
                        stored.version = version;
                        state.resources.insert(stored.name.clone(), stored);
                        report.static_created += 1;
                    }
                    Err(err) => {
                        warn!(name = %spec.name, %err, "reconciler failed to create static resource")
                    }
                }
            }
        }

        // Tombstone statically-declared resources dropped from the config.
        // Resources belonging to a dynamic class are handled by resize below,
        // not here -- only resources with no declaring spec at all.
        let orphaned: Vec<String> = state
            .resources
            .values()
            .filter(|r| {
                !r.is_tombstoned()
                    && !declared_static.contains(r.name.as_str())
                    && !declared_dynamic_types.contains(r.resource_type.as_str())
                    && !existing_dynamic_types.contains(&r.resource_type)
            })
            .map(|r| r.name.clone())
            .collect();
        for name in orphaned {
            if self.tombstone_resource(&mut state, &name, now).is_ok() {
                report.static_tombstoned += 1;
            }
        }

        // Released tombstoned resources with no remaining owner are swept away
        // entirely -- the only point this crate ever deletes a resource outright
        // outside of dynamic-class shrink.
        let deletable: Vec<(String, crate::model::ObjectVersion)> = state
            .resources
            .values()
            .filter(|r| r.is_tombstoned() && r.owner.is_empty())
            .map(|r| (r.name.clone(), r.version))
            .collect();
        for (name, version) in deletable {
            if self
                .storage
                .delete(ObjectKind::Resource, &name, version)
                .is_ok()
            {
                state.resources.remove(&name);
            }
        }

        for spec in &config.dynamic_resources {
            let drlc = Drlc {
                resource_type: spec.resource_type.clone(),
                initial_state: spec.initial_state.clone(),
                min_count: spec.min_count,
                max_count: spec.max_count,
                lifespan: spec.lifespan,
                needs: spec.needs.clone(),
                config: spec.config.clone(),
                dirty_state: spec.dirty_state.clone(),
                version: 0,
            };
            self.upsert_drlc(&mut state, drlc.clone())?;
            report.drlcs_upserted += 1;

            let (created, retired) = self.resize_dynamic_class(&mut state, &drlc, now);
            report.dynamic_created += created;
            report.dynamic_retired += retired;
        }

        // DRLCs dropped from the config: shrink their class to zero so
        // resize_dynamic_class retires every member, then drop the DRLC record.
        let declared_types_owned: std::collections::BTreeSet<String> = declared_dynamic_types
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let removed_drlcs: Vec<Drlc> = state
            .drlcs
            .values()
            .filter(|d| !declared_types_owned.contains(&d.resource_type))
            .cloned()
            .collect();
        for mut drlc in removed_drlcs {
            drlc.min_count = 0;
            drlc.max_count = 0;
            let (_, retired) = self.resize_dynamic_class(&mut state, &drlc, now);
            report.dynamic_retired += retired;
            if self
                .storage
                .delete(ObjectKind::Drlc, &drlc.resource_type, drlc.version)
                .is_ok()
            {
                state.drlcs.remove(&drlc.resource_type);
            }
        }

        info!(
            static_created = report.static_created,
            static_tombstoned = report.static_tombstoned,
            drlcs_upserted = report.drlcs_upserted,
            dynamic_created = report.dynamic_created,
            dynamic_retired = report.dynamic_retired,
            "config reconciled"
        );
        Ok(report)
    }

    fn upsert_drlc(
        &self,
        state: &mut crate::registry::RanchState,
        drlc: Drlc,
    ) -> Result<(), RanchError> {
        match state.drlcs.get(&drlc.resource_type) {
            Some(existing) => {
                let mut next = drlc;
                match self
                    .storage
                    .update(StoredObject::Drlc(next.clone()), existing.version)
                {
                    Ok(version) => {
                        next.version = version;
                        state.drlcs.insert(next.resource_type.clone(), next);
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            }
            None => match self.storage.create(StoredObject::Drlc(drlc.clone())) {
                Ok(version) => {
                    let mut stored = drlc;
                    stored.version = version;
                    state.drlcs.insert(stored.resource_type.clone(), stored);
                    Ok(())
                }
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Bootstrap reconciliation at startup: identical to [`Self::reconcile`]
    /// but loads from storage first. The caller (the server crate's `main`)
    /// is expected to abort the process on `Err` -- a broker must never
    /// start serving traffic with a pool it failed to reconcile.
    pub fn bootstrap(&self, config: &RanchConfig) -> Result<ReconcileReport, RanchError> {
        self.reload_from_storage();
        self.reconcile(config)
    }
}
