//! Periodic request-queue garbage collection: purges queue entries past
//! their TTL so abandoned requests do not accumulate in memory forever.
//! Shares the interval-loop shape with [`crate::reaper`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{debug, info};

use crate::registry::Ranch;

/// Runs [`RequestQueues::evict_stale`](crate::queue::RequestQueues::evict_stale)
/// once per `interval`, using `ttl` as the same staleness window `acquire`
/// uses to judge queue priority.
pub async fn run(ranch: Arc<Ranch>, interval: StdDuration, ttl: chrono::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let now = ranch.clock.now();
        let removed = {
            let mut state = ranch.state.lock();
            state.queues.evict_stale(now, ttl)
        };
        if removed == 0 {
            debug!("request queue GC: nothing stale");
        } else {
            info!(removed, "request queue GC purged stale requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use crate::clock::Clock;
    use crate::storage::memory::MemoryStorage;
    use chrono::DateTime;

    #[tokio::test(start_paused = true)]
    async fn sweep_purges_requests_past_ttl() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let ranch = Arc::new(Ranch::new(Arc::new(MemoryStorage::new()), clock.clone()));
        {
            let mut state = ranch.state.lock();
            state.queues.enqueue("t", "free", "stale-one", clock.now());
        }

        let handle = tokio::spawn({
            let ranch = ranch.clone();
            async move {
                run(
                    ranch,
                    StdDuration::from_secs(5),
                    chrono::Duration::seconds(30),
                )
                .await
            }
        });

        clock.advance(chrono::Duration::seconds(40));
        tokio::time::advance(StdDuration::from_secs(40)).await;
        tokio::task::yield_now().await;

        assert_eq!(ranch.state.lock().queues.pending_count("t", "free"), 0);
        handle.abort();
    }
}
