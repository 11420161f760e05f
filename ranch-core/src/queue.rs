//! The per-`(resource_type, requested_state)` request queue: a FIFO of
//! unmet acquisitions with TTL-based aging.
//!
//! All mutation happens under the registry's lock (`crate::registry`); this
//! module holds only the data structure and the pure logic around it.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::model::QueuedRequest;

/// Key identifying one queue: the `(resource_type, requested_state)` pair.
pub type QueueKey = (String, String);

/// The full set of per-`(type, state)` FIFOs.
#[derive(Default)]
pub struct RequestQueues {
    queues: HashMap<QueueKey, VecDeque<QueuedRequest>>,
}

impl RequestQueues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(resource_type: &str, requested_state: &str) -> QueueKey {
        (resource_type.to_string(), requested_state.to_string())
    }

    /// Enqueues a request at the tail of its queue unless a request with the
    /// same id is already present anywhere in it. Returns `true` if a new
    /// entry was inserted, `false` if the id was already enrolled (i.e. this
    /// call is a re-poll, not a first submission).
    pub fn enqueue(
        &mut self,
        resource_type: &str,
        requested_state: &str,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let key = Self::key(resource_type, requested_state);
        let queue = self.queues.entry(key).or_default();
        if queue.iter().any(|r| r.request_id == request_id) {
            return false;
        }
        queue.push_back(QueuedRequest {
            request_id: request_id.to_string(),
            resource_type: resource_type.to_string(),
            requested_state: requested_state.to_string(),
            submitted_at: now,
        });
        true
    }

    /// Returns the oldest fresh (non-expired) request in a queue, skipping
    /// but not removing any stale entries ahead of it: a stale request loses
    /// priority immediately but stays enrolled until the next GC sweep.
    #[must_use]
    pub fn head(
        &self,
        resource_type: &str,
        requested_state: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Option<&QueuedRequest> {
        let key = Self::key(resource_type, requested_state);
        self.queues
            .get(&key)?
            .iter()
            .find(|r| now - r.submitted_at < ttl)
    }

    /// Removes a specific request (by id) from its queue, e.g. once it has
    /// been fulfilled.
    pub fn remove(&mut self, resource_type: &str, requested_state: &str, request_id: &str) {
        let key = Self::key(resource_type, requested_state);
        if let Some(queue) = self.queues.get_mut(&key) {
            queue.retain(|r| r.request_id != request_id);
        }
    }

    /// Request GC: drops every request older than `ttl`, across all queues.
    /// Returns the number removed, for metrics/logging.
    pub fn evict_stale(&mut self, now: DateTime<Utc>, ttl: chrono::Duration) -> usize {
        let mut removed = 0;
        self.queues.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|r| now - r.submitted_at < ttl);
            removed += before - queue.len();
            !queue.is_empty()
        });
        removed
    }

    #[must_use]
    pub fn pending_count(&self, resource_type: &str, requested_state: &str) -> usize {
        let key = Self::key(resource_type, requested_state);
        self.queues.get(&key).map_or(0, VecDeque::len)
    }
}
