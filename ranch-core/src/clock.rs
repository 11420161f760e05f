//! Abstraction over wall-clock time for dependency injection.
//!
//! Allows deterministic testing of TTL- and lease-expiry-sensitive logic
//! (the reaper, the request queue's staleness check) by substituting a
//! [`FixedClock`] for [`SystemClock`].

use chrono::{DateTime, Utc};

/// Source of the current time, injected into the Ranch so tests can control it.
pub trait Clock: Send + Sync {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Delegates to the operating system's clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test doubles for [`Clock`]. Public so integration tests (which compile
/// against the crate as an external consumer) can reach them too.
pub mod testing {
    use super::Clock;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;

    /// A clock whose value is advanced manually, for deterministic tests.
    pub struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self(Mutex::new(start))
        }

        pub fn advance(&self, delta: chrono::Duration) {
            let mut guard = self.0.lock();
            *guard += delta;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }
}
