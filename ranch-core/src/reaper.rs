//! Periodic background sweep driving [`Ranch::expire_overdue_leases`]: every
//! tick, any resource whose lease has expired is demoted to its class's
//! dirty state and its owner cleared, so the pool keeps reclaiming
//! abandoned leases without an operator having to intervene.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{debug, info};

use crate::registry::Ranch;

/// Runs [`Ranch::expire_overdue_leases`] once per `interval` until the
/// process shuts down. Intended to be spawned as a background task by the
/// server crate; exposed here so `ranch-core` stays free of a runtime
/// dependency on any particular executor beyond `tokio::time`.
pub async fn run(ranch: Arc<Ranch>, interval: StdDuration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let now = ranch.clock.now();
        let demoted = ranch.expire_overdue_leases(now);
        if demoted.is_empty() {
            debug!("reaper sweep: nothing overdue");
        } else {
            info!(count = demoted.len(), "reaper demoted overdue leases");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use crate::clock::Clock;
    use crate::model::Resource;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::StoredObject;
    use chrono::DateTime;

    #[tokio::test(start_paused = true)]
    async fn sweep_runs_on_interval_and_demotes_overdue() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let ranch = Arc::new(Ranch::new(Arc::new(MemoryStorage::new()), clock.clone()));
        ranch
            .storage
            .create(StoredObject::Resource(Resource::new(
                "r1",
                "t",
                "free",
                clock.now(),
            )))
            .unwrap();
        ranch.reload_from_storage();
        ranch
            .acquire(
                "t",
                "free",
                "busy",
                "A",
                std::time::Duration::from_secs(1),
                None,
                chrono::Duration::seconds(30),
            )
            .unwrap();

        let handle = tokio::spawn({
            let ranch = ranch.clone();
            async move { run(ranch, StdDuration::from_secs(5)).await }
        });

        clock.advance(chrono::Duration::seconds(10));
        tokio::time::advance(StdDuration::from_secs(10)).await;
        tokio::task::yield_now().await;

        assert_eq!(
            ranch.get_resource("r1").unwrap().state,
            crate::lifecycle::DEFAULT_DIRTY_STATE
        );
        handle.abort();
    }
}
