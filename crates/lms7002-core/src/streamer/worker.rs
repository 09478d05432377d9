// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RX and TX worker loops (spec.md §4.5.3, §4.5.4). Each runs on its own
//! dedicated thread, spawned and joined by `Streamer::update_threads`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::{BULK_TRANSFER_CONTEXT_POOL_SIZE, FPGA_FLAG_END_OF_BURST, FPGA_PACKET_HEADER_BYTES, FPGA_PACKET_MAX_PAYLOAD_BYTES, MAX_SAMPLES_PER_PACKET};
use crate::fifo::{flags as packet_flags, ComplexI16};
use crate::streamer::bulk::{BulkTransport, Completion};
use crate::streamer::channel::StreamChannel;
use crate::streamer::codec::{decode_i12_in_i16, decode_packed12, encode_i12_in_i16, encode_packed12, FpgaDataPacket, FpgaPacketHeader};
use crate::streamer::config::LinkFormat;
use crate::streamer::timestamp::RelativeTimestampTracker;

type ChannelSlots = Arc<Mutex<Vec<Option<Arc<StreamChannel>>>>>;

/// RX worker: polls bulk completions, decodes `FpgaDataPacket`s, and pushes
/// decoded samples into each active RX channel's FIFO.
#[allow(clippy::too_many_arguments)]
pub(crate) fn rx_loop<B: BulkTransport>(
    bulk: Arc<B>,
    channels: ChannelSlots,
    generate_data: Arc<AtomicBool>,
    terminate: Arc<AtomicBool>,
    rx_last_timestamp: Arc<AtomicU64>,
    rx_data_rate_bps: Arc<AtomicU64>,
    rel_timestamp: Arc<RelativeTimestampTracker>,
    state: Arc<(Mutex<()>, Condvar)>,
) {
    log::info!("rx worker starting");
    let mut window_start = Instant::now();
    let mut window_bytes: u64 = 0;
    let push_timeout = Duration::from_millis(50);
    let mut in_flight = 0usize;

    while !terminate.load(Ordering::SeqCst) {
        if generate_data.load(Ordering::SeqCst) {
            let snapshot = channels.lock();
            for ch in snapshot.iter().flatten() {
                if !ch.is_tx() && ch.is_active() {
                    let zero = vec![ComplexI16::default(); MAX_SAMPLES_PER_PACKET];
                    ch.fifo.push_samples(&zero, zero.len(), 1, ch.last_timestamp(), push_timeout, 0);
                }
            }
            drop(snapshot);
            let (lock, cv) = &*state;
            let _guard = lock.lock();
            cv.notify_all();
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }

        while in_flight < BULK_TRANSFER_CONTEXT_POOL_SIZE {
            bulk.submit_rx(FPGA_PACKET_HEADER_BYTES + FPGA_PACKET_MAX_PAYLOAD_BYTES);
            in_flight += 1;
        }

        match bulk.wait_any(Duration::from_millis(100)) {
            Some(Completion::Rx { data, .. }) => {
                in_flight = in_flight.saturating_sub(1);
                window_bytes += data.len() as u64;
                let mut offset = 0;
                while offset < data.len() {
                    let Some((packet, consumed)) = FpgaDataPacket::parse(&data[offset..]) else { break };
                    if consumed == 0 {
                        break;
                    }
                    offset += consumed;
                    dispatch_rx_packet(&channels, &packet, &rx_last_timestamp, &rel_timestamp);
                }
            }
            Some(Completion::Tx { .. }) => {}
            None => {}
        }

        let elapsed = window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            rx_data_rate_bps.store((window_bytes as f64 / elapsed.as_secs_f64()) as u64, Ordering::Relaxed);
            window_bytes = 0;
            window_start = Instant::now();
        }
    }

    bulk.cancel_all();
    log::info!("rx worker stopped");
}

fn dispatch_rx_packet(
    channels: &Mutex<Vec<Option<Arc<StreamChannel>>>>,
    packet: &FpgaDataPacket,
    rx_last_timestamp: &AtomicU64,
    rel_timestamp: &RelativeTimestampTracker,
) {
    let snapshot = channels.lock();
    let rx_channels: Vec<Arc<StreamChannel>> = snapshot.iter().flatten().filter(|c| !c.is_tx() && c.is_active()).cloned().collect();
    drop(snapshot);
    if rx_channels.is_empty() {
        return;
    }

    for ch in &rx_channels {
        let expected = ch.expected_counter.load(Ordering::SeqCst);
        if expected != 0 && packet.header.counter > expected {
            ch.record_pkt_lost(packet.header.counter - expected);
            log::warn!("rx gap: expected counter {expected}, saw {}", packet.header.counter);
        }
        ch.expected_counter.store(packet.header.counter + 1, Ordering::SeqCst);
    }

    let link_format = rx_channels[0].config.link_format;
    let decoded = match link_format {
        LinkFormat::Packed12 => decode_packed12(&packet.payload),
        LinkFormat::I12InI16 => decode_i12_in_i16(&packet.payload),
    };

    let n = rx_channels.len();
    for (idx, ch) in rx_channels.iter().enumerate() {
        let per_channel: Vec<ComplexI16> = decoded.iter().skip(idx).step_by(n).copied().collect();
        if per_channel.is_empty() {
            continue;
        }
        let pushed = ch.fifo.push_samples(&per_channel, per_channel.len(), 1, packet.header.counter, Duration::from_millis(50), 0);
        if pushed == 0 {
            log::warn!("rx fifo push timed out, samples dropped");
        }
        ch.set_last_timestamp(packet.header.counter);
        ch.set_end_of_burst(packet.header.end_of_burst());
    }

    rx_last_timestamp.fetch_max(packet.header.counter, Ordering::SeqCst);
    rel_timestamp.set(packet.header.counter, Instant::now());
}

/// TX worker: pops queued packets from each active TX channel, gates them
/// against the current hardware timestamp, packs the enabled channels into
/// one `FpgaDataPacket`, and submits it.
#[allow(clippy::too_many_arguments)]
pub(crate) fn tx_loop<B: BulkTransport>(
    bulk: Arc<B>,
    channels: ChannelSlots,
    terminate: Arc<AtomicBool>,
    tx_data_rate_bps: Arc<AtomicU64>,
    current_hw_timestamp: Arc<AtomicU64>,
    saw_end_of_burst: Arc<AtomicBool>,
    tx_last_late_time: Arc<AtomicU64>,
) {
    log::info!("tx worker starting");
    let mut window_start = Instant::now();
    let mut window_bytes: u64 = 0;
    let pop_timeout = Duration::from_millis(50);

    while !terminate.load(Ordering::SeqCst) {
        let snapshot = channels.lock();
        let tx_channels: Vec<Arc<StreamChannel>> = snapshot.iter().flatten().filter(|c| c.is_tx() && c.is_active()).cloned().collect();
        drop(snapshot);
        if tx_channels.is_empty() {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }

        let mut channel_payloads: Vec<(Arc<StreamChannel>, Vec<ComplexI16>, u32)> = Vec::new();
        let mut aggregated_timestamp = 0u64;

        for ch in &tx_channels {
            let mut buf = vec![ComplexI16::default(); MAX_SAMPLES_PER_PACKET];
            let mut ts = 0u64;
            let mut flags = 0u32;
            let buf_len = buf.len();
            let popped = ch.fifo.pop_samples(&mut buf, buf_len, 1, &mut ts, pop_timeout, &mut flags);
            if popped == 0 {
                ch.record_underrun();
                continue;
            }
            buf.truncate(popped);

            if flags & packet_flags::SYNC_TIMESTAMP != 0 {
                let hw_now = current_hw_timestamp.load(Ordering::SeqCst);
                if ts <= hw_now {
                    ch.record_pkt_lost(1);
                    ch.set_late_timestamp(true);
                    tx_last_late_time.store(ts, Ordering::SeqCst);
                    continue;
                }
            }
            ch.set_late_timestamp(false);
            if flags & packet_flags::END_OF_BURST != 0 {
                ch.set_end_of_burst(true);
                saw_end_of_burst.store(true, Ordering::SeqCst);
            }
            aggregated_timestamp = ts;
            channel_payloads.push((Arc::clone(ch), buf, flags));
        }

        if channel_payloads.is_empty() {
            continue;
        }

        let link_format = tx_channels[0].config.link_format;
        let max_len = channel_payloads.iter().map(|(_, buf, _)| buf.len()).max().unwrap_or(0);
        let mut interleaved = Vec::with_capacity(max_len * channel_payloads.len());
        for i in 0..max_len {
            for (_, buf, _) in &channel_payloads {
                if let Some(sample) = buf.get(i) {
                    interleaved.push(*sample);
                }
            }
        }
        let payload = match link_format {
            LinkFormat::Packed12 => encode_packed12(&interleaved),
            LinkFormat::I12InI16 => encode_i12_in_i16(&interleaved),
        };
        let flags_byte = if channel_payloads.iter().any(|(_, _, f)| f & packet_flags::END_OF_BURST != 0) {
            FPGA_FLAG_END_OF_BURST
        } else {
            0
        };
        let packet = FpgaDataPacket {
            header: FpgaPacketHeader { counter: aggregated_timestamp, flags: flags_byte, wfm_payload_len: 0 },
            payload,
        };
        let bytes = packet.to_bytes();
        window_bytes += bytes.len() as u64;
        bulk.submit_tx(bytes);

        let elapsed = window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            tx_data_rate_bps.store((window_bytes as f64 / elapsed.as_secs_f64()) as u64, Ordering::Relaxed);
            window_bytes = 0;
            window_start = Instant::now();
        }
    }

    bulk.cancel_all();
    log::info!("tx worker stopped");
}
