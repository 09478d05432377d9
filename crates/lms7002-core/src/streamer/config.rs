// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stream configuration and the small value types the public contract moves
//! around (spec.md §3's `StreamConfig`, §4.5.1's `Metadata`/status).

use crate::config::{DEFAULT_BUFFER_LENGTH_PACKETS, MAX_SAMPLES_PER_PACKET};

/// Sample representation presented to the caller through `read_stream`/`write_stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    I16,
    I12,
    F32,
}

/// Sample representation carried over the wire between host and FPGA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFormat {
    Packed12,
    I12InI16,
}

/// One channel's stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub is_tx: bool,
    /// 0..=3
    pub channel_id: u8,
    /// Requested buffer length in samples; 0 selects the default.
    pub buffer_length: usize,
    pub format: StreamFormat,
    pub link_format: LinkFormat,
    /// 0.0 (lowest latency) ..= 1.0 (highest throughput).
    pub performance_latency: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            is_tx: false,
            channel_id: 0,
            buffer_length: 0,
            format: StreamFormat::I16,
            link_format: LinkFormat::I12InI16,
            performance_latency: 0.5,
        }
    }
}

/// Resolves a requested `StreamConfig::buffer_length` into the ring's packet
/// capacity and the buffer length actually reported back to the caller
/// (spec.md §3's invariant, §8 scenario 4): 0 selects
/// `DEFAULT_BUFFER_LENGTH_PACKETS` packets; otherwise the requested sample
/// count is rounded up to a whole number of packets, then up again to the
/// next power of two.
#[must_use]
pub fn resolve_buffer_length(requested_samples: usize) -> (usize, usize) {
    let capacity_packets = if requested_samples == 0 {
        DEFAULT_BUFFER_LENGTH_PACKETS
    } else {
        requested_samples.div_ceil(MAX_SAMPLES_PER_PACKET).next_power_of_two()
    };
    (capacity_packets, capacity_packets * MAX_SAMPLES_PER_PACKET)
}

/// Per-transfer metadata accompanying `read_stream`/`write_stream`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metadata {
    pub timestamp: u64,
    pub flags: u32,
}

/// Snapshot returned by `read_stream_status` (spec.md's `StreamChannel::Info`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStatus {
    pub fifo_size: usize,
    pub fifo_items_filled: usize,
    pub overrun: u64,
    pub underrun: u64,
    pub dropped_packets: u64,
    pub active: bool,
    pub link_rate_bps: u64,
    pub timestamp: u64,
    pub late_timestamp: bool,
    pub end_of_burst: bool,
}
