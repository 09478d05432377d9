// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Relative timestamp correlation between the FPGA's hardware sample
//! counter and host wall-clock time.
//!
//! Grounded on the original driver's `RelativeTimestamp` (a spinlock with a
//! try-lock-skip strategy so a busy RX hot path never blocks on the writer).
//! The skip budget is preserved; the lock itself is a safe
//! [`parking_lot::Mutex`] since this is not a hot enough path on the host
//! side to justify a hand-rolled spinlock.

use std::time::Instant;

use parking_lot::Mutex;

const SKIP_LIMIT: u32 = 3;

struct Sample {
    hw: u64,
    host: Instant,
}

/// Tracks the most recent (hardware timestamp, host instant) correlation,
/// updated by the RX worker and read by any caller thread.
pub struct RelativeTimestampTracker {
    inner: Mutex<Sample>,
    skip: Mutex<u32>,
}

impl Default for RelativeTimestampTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RelativeTimestampTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Sample { hw: 0, host: Instant::now() }),
            skip: Mutex::new(SKIP_LIMIT),
        }
    }

    /// Updates the correlation. If the lock is contended, skips the update
    /// up to `SKIP_LIMIT` consecutive times rather than blocking the RX
    /// worker; after `SKIP_LIMIT` skips it waits once to avoid starving
    /// readers entirely.
    pub fn set(&self, hw: u64, host: Instant) {
        let sample = Sample { hw, host };
        match self.inner.try_lock() {
            Some(mut guard) => {
                *guard = sample;
                *self.skip.lock() = 0;
            }
            None => {
                let mut skip = self.skip.lock();
                *skip += 1;
                if *skip < SKIP_LIMIT {
                    return;
                }
                drop(skip);
                *self.inner.lock() = sample;
                *self.skip.lock() = 0;
            }
        }
    }

    /// Reads the last correlation.
    #[must_use]
    pub fn get(&self) -> (u64, Instant) {
        let guard = self.inner.lock();
        (guard.hw, guard.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let tracker = RelativeTimestampTracker::new();
        let now = Instant::now();
        tracker.set(42, now);
        let (hw, host) = tracker.get();
        assert_eq!(hw, 42);
        assert_eq!(host, now);
    }
}
