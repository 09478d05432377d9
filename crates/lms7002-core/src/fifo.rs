// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Sample FIFO — a bounded, timed, blocking single-producer/single-consumer
//! ring of fixed-size [`SamplePacket`]s (spec.md §4.4).
//!
//! Guarded by one [`parking_lot::Mutex`] plus two [`parking_lot::Condvar`]s
//! (space-available, item-available) — the same shape as
//! `hdds::reliability::history_cache::HistoryCache`'s mutex-guarded ring
//! rather than a fully lock-free SPSC design; correctness over the last
//! percent of throughput, since this ring is refilled once per USB transfer
//! completion, not once per sample.
//!
//! `push_samples`/`pop_samples` each transfer exactly one packet's worth of
//! samples — the natural unit the RX/TX workers produce and consume one
//! FPGA packet at a time.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::MAX_SAMPLES_PER_PACKET;

/// One complex 16-bit sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComplexI16 {
    pub i: i16,
    pub q: i16,
}

/// `SamplePacket::flags` bits.
pub mod flags {
    /// Packet timestamp should be honored for TX scheduling / RX alignment.
    pub const SYNC_TIMESTAMP: u32 = 0x01;
    /// Final sample of a timed TX burst.
    pub const END_OF_BURST: u32 = 0x02;
    /// Producer may clobber an unconsumed slot silently instead of waiting.
    pub const OVERWRITE: u32 = 0x04;
}

/// Fixed-size ring element: one packet's worth of complex samples plus the
/// metadata the streamer and caller exchange alongside them.
#[derive(Debug, Clone, Copy)]
pub struct SamplePacket {
    pub timestamp: u64,
    pub flags: u32,
    pub samples: [ComplexI16; MAX_SAMPLES_PER_PACKET],
    pub valid: u32,
}

impl Default for SamplePacket {
    fn default() -> Self {
        Self {
            timestamp: 0,
            flags: 0,
            samples: [ComplexI16::default(); MAX_SAMPLES_PER_PACKET],
            valid: 0,
        }
    }
}

/// Snapshot returned by [`RingFifo::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingFifoInfo {
    pub size: usize,
    pub items_filled: usize,
}

struct RingState {
    slots: Box<[SamplePacket]>,
    head: usize,
    tail: usize,
    count: usize,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Bounded ring of [`SamplePacket`]s with timed blocking push/pop.
pub struct RingFifo {
    state: Mutex<RingState>,
    not_full: Condvar,
    not_empty: Condvar,
    overflow: std::sync::atomic::AtomicU64,
}

impl RingFifo {
    /// Creates a ring with room for `capacity` packets. `capacity` must be
    /// nonzero; the streamer is responsible for rounding a requested sample
    /// buffer length up to a whole number of packet slots before calling
    /// this (spec.md §3's `StreamConfig::bufferLength` invariant).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingFifo capacity must be nonzero");
        Self {
            state: Mutex::new(RingState {
                slots: vec![SamplePacket::default(); capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                count: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            overflow: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Number of packets dropped because the ring was full and the producer
    /// was not told to overwrite silently.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Copies up to `count` samples (read with the given `stride` from
    /// `samples`) into the next packet slot, blocking up to `timeout` for
    /// room if the ring is full.
    ///
    /// If the ring is still full when `timeout` elapses, the oldest
    /// unconsumed packet is dropped and the overflow counter is
    /// incremented — a real-time producer must never silently lose the
    /// newest sample. `flags & OVERWRITE` skips the wait entirely and
    /// clobbers the oldest slot without counting it.
    pub fn push_samples(
        &self,
        samples: &[ComplexI16],
        count: usize,
        stride: usize,
        timestamp: u64,
        timeout: Duration,
        packet_flags: u32,
    ) -> usize {
        let deadline = Instant::now() + timeout;
        let overwrite = packet_flags & flags::OVERWRITE != 0;
        let mut state = self.state.lock();

        while state.count >= state.capacity() {
            if overwrite {
                Self::drop_oldest_locked(&mut state);
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                Self::drop_oldest_locked(&mut state);
                self.overflow.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                break;
            }
            let remaining = deadline - now;
            self.not_full.wait_for(&mut state, remaining);
        }

        let n = count.min(MAX_SAMPLES_PER_PACKET).min(samples.len() / stride.max(1));
        let idx = state.head;
        {
            let packet = &mut state.slots[idx];
            packet.timestamp = timestamp;
            packet.flags = packet_flags;
            packet.valid = n as u32;
            for (slot_i, sample_i) in (0..n).zip((0..n * stride.max(1)).step_by(stride.max(1))) {
                packet.samples[slot_i] = samples[sample_i];
            }
        }
        state.head = (state.head + 1) % state.capacity();
        state.count += 1;
        drop(state);
        self.not_empty.notify_one();
        n
    }

    fn drop_oldest_locked(state: &mut RingState) {
        if state.count > 0 {
            state.tail = (state.tail + 1) % state.capacity();
            state.count -= 1;
        }
    }

    /// Pops the oldest packet, copying up to `count` of its valid samples
    /// (written with the given `stride`) into `out`, and writing its
    /// timestamp/flags into the out-parameters. Blocks up to `timeout` for
    /// an item to arrive; returns 0 if none arrives before the deadline.
    pub fn pop_samples(
        &self,
        out: &mut [ComplexI16],
        count: usize,
        stride: usize,
        timestamp: &mut u64,
        timeout: Duration,
        packet_flags: &mut u32,
    ) -> usize {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        while state.count == 0 {
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            let remaining = deadline - now;
            let result = self.not_empty.wait_for(&mut state, remaining);
            if result.timed_out() && state.count == 0 {
                return 0;
            }
        }

        let idx = state.tail;
        let n;
        {
            let packet = &state.slots[idx];
            n = count.min(packet.valid as usize).min(out.len() / stride.max(1));
            *timestamp = packet.timestamp;
            *packet_flags = packet.flags;
            for (slot_i, out_i) in (0..n).zip((0..n * stride.max(1)).step_by(stride.max(1))) {
                out[out_i] = packet.samples[slot_i];
            }
        }
        state.tail = (state.tail + 1) % state.capacity();
        state.count -= 1;
        drop(state);
        self.not_full.notify_one();
        n
    }

    /// Discards every queued packet without signaling either side's counter.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.head = 0;
        state.tail = 0;
        state.count = 0;
    }

    /// Snapshot of ring occupancy.
    pub fn info(&self) -> RingFifoInfo {
        let state = self.state.lock();
        RingFifoInfo { size: state.capacity(), items_filled: state.count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(vals: &[i16]) -> Vec<ComplexI16> {
        vals.iter().map(|&v| ComplexI16 { i: v, q: -v }).collect()
    }

    #[test]
    fn single_producer_single_consumer_preserves_order() {
        let fifo = RingFifo::new(4);
        for ts in 0..4u64 {
            let data = samples(&[ts as i16]);
            let pushed = fifo.push_samples(&data, 1, 1, ts, Duration::from_millis(10), 0);
            assert_eq!(pushed, 1);
        }
        for ts in 0..4u64 {
            let mut out = [ComplexI16::default()];
            let mut got_ts = 0;
            let mut got_flags = 0;
            let popped = fifo.pop_samples(&mut out, 1, 1, &mut got_ts, Duration::from_millis(10), &mut got_flags);
            assert_eq!(popped, 1);
            assert_eq!(got_ts, ts);
            assert_eq!(out[0].i, ts as i16);
        }
    }

    #[test]
    fn pop_on_empty_times_out_with_zero() {
        let fifo = RingFifo::new(2);
        let mut out = [ComplexI16::default()];
        let mut ts = 0;
        let mut fl = 0;
        let popped = fifo.pop_samples(&mut out, 1, 1, &mut ts, Duration::from_millis(5), &mut fl);
        assert_eq!(popped, 0);
    }

    #[test]
    fn push_on_full_without_overwrite_flag_drops_oldest_and_counts_overflow() {
        let fifo = RingFifo::new(2);
        for ts in 0..2u64 {
            let data = samples(&[ts as i16]);
            fifo.push_samples(&data, 1, 1, ts, Duration::from_millis(5), 0);
        }
        let data = samples(&[99]);
        let pushed = fifo.push_samples(&data, 1, 1, 99, Duration::from_millis(5), 0);
        assert_eq!(pushed, 1);
        assert_eq!(fifo.overflow_count(), 1);
        assert_eq!(fifo.info().items_filled, 2);

        // Oldest (ts=0) was dropped; remaining order is ts=1 then ts=99.
        let mut out = [ComplexI16::default()];
        let mut ts_out = 0;
        let mut fl = 0;
        fifo.pop_samples(&mut out, 1, 1, &mut ts_out, Duration::from_millis(5), &mut fl);
        assert_eq!(ts_out, 1);
    }

    #[test]
    fn push_with_overwrite_flag_skips_wait_and_does_not_count() {
        let fifo = RingFifo::new(1);
        let first = samples(&[1]);
        fifo.push_samples(&first, 1, 1, 1, Duration::from_millis(5), 0);
        let second = samples(&[2]);
        let pushed = fifo.push_samples(&second, 1, 1, 2, Duration::from_millis(5), flags::OVERWRITE);
        assert_eq!(pushed, 1);
        assert_eq!(fifo.overflow_count(), 0);
    }

    #[test]
    fn stride_copies_every_nth_sample() {
        let fifo = RingFifo::new(2);
        let interleaved = samples(&[10, 20, 30, 40]);
        fifo.push_samples(&interleaved, 2, 2, 0, Duration::from_millis(5), 0);
        let mut out = [ComplexI16::default(); 2];
        let mut ts = 0;
        let mut fl = 0;
        fifo.pop_samples(&mut out, 2, 1, &mut ts, Duration::from_millis(5), &mut fl);
        assert_eq!(out[0].i, 10);
        assert_eq!(out[1].i, 30);
    }

    #[test]
    fn clear_empties_ring() {
        let fifo = RingFifo::new(4);
        let data = samples(&[1]);
        fifo.push_samples(&data, 1, 1, 0, Duration::from_millis(5), 0);
        fifo.clear();
        assert_eq!(fifo.info().items_filled, 0);
    }

    #[test]
    fn info_reports_size_and_fill() {
        let fifo = RingFifo::new(8);
        assert_eq!(fifo.info(), RingFifoInfo { size: 8, items_filled: 0 });
    }
}
