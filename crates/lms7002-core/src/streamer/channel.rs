// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `StreamChannel` — one direction's worth of a stream: its `RingFifo`,
//! configuration, and health counters (spec.md §3).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::fifo::RingFifo;
use crate::streamer::config::{resolve_buffer_length, StreamConfig, StreamStatus};

/// Opaque handle returned by `Streamer::setup_stream`, identifying a channel
/// slot for every later call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamChannelHandle(pub(crate) usize);

/// One channel's `RingFifo`, `StreamConfig`, and counters. Exclusively owned
/// by its `Streamer`.
pub struct StreamChannel {
    pub config: StreamConfig,
    pub fifo: Arc<RingFifo>,
    active: AtomicBool,
    underrun: AtomicU64,
    pkt_lost: AtomicU64,
    /// Next `FpgaDataPacket.counter` the RX worker expects for this channel;
    /// used to detect gaps (spec.md §4.5.3 step 3).
    pub(crate) expected_counter: AtomicU64,
    late_timestamp: AtomicBool,
    end_of_burst: AtomicBool,
    last_timestamp: AtomicU64,
}

impl StreamChannel {
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        let (capacity_packets, resolved_samples) = resolve_buffer_length(config.buffer_length);
        let mut config = config;
        config.buffer_length = resolved_samples;
        Self {
            config,
            fifo: Arc::new(RingFifo::new(capacity_packets)),
            active: AtomicBool::new(false),
            underrun: AtomicU64::new(0),
            pkt_lost: AtomicU64::new(0),
            expected_counter: AtomicU64::new(0),
            late_timestamp: AtomicBool::new(false),
            end_of_burst: AtomicBool::new(false),
            last_timestamp: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_tx(&self) -> bool {
        self.config.is_tx
    }

    pub fn record_underrun(&self) {
        self.underrun.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pkt_lost(&self, n: u64) {
        self.pkt_lost.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_late_timestamp(&self, late: bool) {
        self.late_timestamp.store(late, Ordering::Relaxed);
    }

    pub fn set_end_of_burst(&self, eob: bool) {
        self.end_of_burst.store(eob, Ordering::Relaxed);
    }

    pub fn set_last_timestamp(&self, ts: u64) {
        self.last_timestamp.store(ts, Ordering::SeqCst);
    }

    #[must_use]
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        let info = self.fifo.info();
        StreamStatus {
            fifo_size: info.size,
            fifo_items_filled: info.items_filled,
            overrun: self.fifo.overflow_count(),
            underrun: self.underrun.load(Ordering::Relaxed),
            dropped_packets: self.pkt_lost.load(Ordering::Relaxed),
            active: self.is_active(),
            link_rate_bps: 0,
            timestamp: self.last_timestamp(),
            late_timestamp: self.late_timestamp.load(Ordering::Relaxed),
            end_of_burst: self.end_of_burst.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_resolves_default_buffer_length() {
        let ch = StreamChannel::new(StreamConfig { buffer_length: 0, ..StreamConfig::default() });
        assert_eq!(ch.config.buffer_length, 8192 * crate::config::MAX_SAMPLES_PER_PACKET);
    }

    #[test]
    fn counters_start_at_zero() {
        let ch = StreamChannel::new(StreamConfig::default());
        let status = ch.status();
        assert_eq!(status.overrun, 0);
        assert_eq!(status.underrun, 0);
        assert_eq!(status.dropped_packets, 0);
        assert!(!status.active);
    }
}
