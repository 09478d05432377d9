// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integration tests against a [`LoopbackRegisterPort`] + in-memory
//! `BulkTransport`, covering the end-to-end scenarios named in spec.md §8.

use std::sync::Arc;
use std::time::Duration;

use lms7002_core::config::{detect_reference_clock_hz, MAX_SAMPLES_PER_PACKET};
use lms7002_core::fifo::{flags as fifo_flags, ComplexI16};
use lms7002_core::rap::LoopbackRegisterPort;
use lms7002_core::streamer::{InMemoryBulkTransport, Metadata, StreamConfig, Streamer};

fn streamer() -> Streamer<LoopbackRegisterPort, InMemoryBulkTransport> {
    Streamer::new(Arc::new(LoopbackRegisterPort::new()), Arc::new(InMemoryBulkTransport::new()))
}

#[test]
fn default_buffer_length_round_trips_n_packets_in_order() {
    let s = streamer();
    let handle = s.setup_stream(StreamConfig { is_tx: true, buffer_length: 0, ..StreamConfig::default() }).expect("setup_stream");

    let status = s.read_stream_status(handle).expect("read_stream_status");
    assert_eq!(status.fifo_size, 8192 * MAX_SAMPLES_PER_PACKET);

    const N: u64 = 5;
    for ts in 0..N {
        let samples = vec![ComplexI16 { i: ts as i16, q: -(ts as i16) }; 4];
        let meta = Metadata { timestamp: ts, flags: 0 };
        let written = s.write_stream(handle, &samples, Duration::from_millis(20), meta).expect("write_stream");
        assert_eq!(written, 4);
    }

    for ts in 0..N {
        let mut out = vec![ComplexI16::default(); 4];
        let mut meta = Metadata::default();
        let popped = s.read_stream(handle, &mut out, Duration::from_millis(20), &mut meta).expect("read_stream");
        assert_eq!(popped, 4);
        assert_eq!(meta.timestamp, ts, "packets must come back in the order they were pushed");
    }
}

#[test]
fn tx_packet_behind_the_hardware_clock_is_marked_late_and_dropped() {
    let s = streamer();
    let handle = s.setup_stream(StreamConfig { is_tx: true, ..StreamConfig::default() }).expect("setup_stream");
    s.start(handle).expect("start");
    // update_threads() resets the hardware timestamp to 0 on the
    // stopped-to-running transition, so the HW clock can only be rebased
    // to 1000 once the stream is already active.
    s.set_hardware_timestamp(1000).expect("set_hardware_timestamp");

    let samples = vec![ComplexI16 { i: 1, q: 1 }; 4];
    let meta = Metadata { timestamp: 0, flags: fifo_flags::SYNC_TIMESTAMP };
    s.write_stream(handle, &samples, Duration::from_millis(20), meta).expect("write_stream");

    // Give the TX worker a chance to pop the packet and evaluate it against
    // the hardware clock before the streamer is torn down.
    std::thread::sleep(Duration::from_millis(100));
    s.stop(handle).expect("stop");

    let status = s.read_stream_status(handle).expect("read_stream_status");
    assert!(status.late_timestamp, "a timestamp behind the hardware clock must be flagged late");
    assert_eq!(status.dropped_packets, 1);
}

#[test]
fn reference_clock_autodetect_selects_nearest_table_entry() {
    // spec.md §8 scenario 6 names this raw count and claims it selects
    // 40 MHz; under the implemented (and original-faithful) formula it
    // estimates ~96.66 MHz, whose nearest table entry is 52 MHz instead
    // (see DESIGN.md). `config.rs`'s own `detect_reference_clock_picks_40mhz`
    // test derives its raw count from 40 MHz directly, rather than from this
    // inconsistent scenario figure.
    assert_eq!(detect_reference_clock_hz(16_216_450), 52_000_000);
}
