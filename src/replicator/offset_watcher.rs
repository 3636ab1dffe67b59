use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// The beginning offset of the topic has not been resolved yet.
pub const OFFSET_UNINITIALIZED: i64 = -2;

/// Nothing has been consumed yet.
pub const OFFSET_EMPTY: i64 = -1;

/// Tracks the greatest offset applied to the store and wakes waiters.
///
/// `Mutex` + `Condvar`: waiters sleep until the offset they need has been
/// seen, their timeout elapses, or someone interrupts them. Offsets only
/// move forward.
pub struct OffsetWatcher {
    marks: Mutex<Marks>,
    wake: Condvar,
}

struct Marks {
    greatest: i64,
    interrupts: u64,
}

impl OffsetWatcher {
    pub fn new() -> Self {
        Self {
            marks: Mutex::new(Marks {
                greatest: OFFSET_EMPTY,
                interrupts: 0,
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Marks> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that `offset` has been applied.
    pub fn offset_seen(&self, offset: u64) {
        let mut marks = self.lock();
        let offset = offset as i64;
        if offset > marks.greatest {
            marks.greatest = offset;
            self.wake.notify_all();
        }
    }

    pub fn greatest_offset(&self) -> i64 {
        self.lock().greatest
    }

    /// Wake every waiter whose offset will not arrive, e.g. because the
    /// replicator stopped.
    pub fn interrupt(&self) {
        let mut marks = self.lock();
        marks.interrupts += 1;
        self.wake.notify_all();
    }

    /// Number of interrupts so far; pass it to `wait_for_offset_since`.
    pub fn interrupts(&self) -> u64 {
        self.lock().interrupts
    }

    /// Block until `offset` has been seen. Returns false on timeout.
    pub fn wait_for_offset(&self, offset: u64, timeout: Duration) -> bool {
        self.wait(offset, timeout, None)
    }

    /// Like `wait_for_offset`, but also returns false as soon as the
    /// interrupt count moves past `interrupts`.
    pub fn wait_for_offset_since(&self, offset: u64, timeout: Duration, interrupts: u64) -> bool {
        self.wait(offset, timeout, Some(interrupts))
    }

    fn wait(&self, offset: u64, timeout: Duration, interrupts: Option<u64>) -> bool {
        let deadline = Instant::now() + timeout;
        let target = offset as i64;
        let mut marks = self.lock();
        while marks.greatest < target {
            if interrupts.is_some_and(|seen| marks.interrupts != seen) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .wake
                .wait_timeout(marks, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            marks = guard;
        }
        true
    }
}

impl Default for OffsetWatcher {
    fn default() -> Self {
        Self::new()
    }
}
