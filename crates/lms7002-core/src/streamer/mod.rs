// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Sample streaming: the [`Streamer`] that owns every [`StreamChannel`],
//! drives the RX/TX worker threads, and exposes the public
//! setup/start/stop/read/write contract (spec.md §4.5).

pub mod bulk;
pub mod channel;
pub mod codec;
pub mod config;
mod timestamp;
mod worker;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub use bulk::{BulkTransport, Completion, ContextId};
#[cfg(any(test, feature = "test-support"))]
pub use bulk::InMemoryBulkTransport;
pub use channel::{StreamChannel, StreamChannelHandle};
pub use codec::{complex_f32_to_i16, complex_i16_to_f32, ComplexF32};
pub use config::{LinkFormat, Metadata, StreamConfig, StreamFormat, StreamStatus};

use crate::config::SELF_CALIBRATION_DRAIN_MS;
use crate::fifo::ComplexI16;
use crate::rap::{RapError, RegisterAccessPort};
use timestamp::RelativeTimestampTracker;

/// Register the FPGA uses to select which channels stream (spec.md §6).
const REG_CHANNEL_ENABLE: u16 = 0x0007;
/// Register the FPGA uses to select the wire link format (spec.md §6).
const REG_LINK_MODE: u16 = 0x0008;

/// Errors the streamer's public contract can return.
#[derive(Debug)]
pub enum StreamError {
    /// `setup_stream`/`close_stream` was called while a stream is running.
    Busy,
    /// `handle` does not name a live channel.
    UnknownChannel,
    /// The underlying register port failed while (re)programming the FPGA.
    Rap(RapError),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Busy => write!(f, "a stream is already running"),
            StreamError::UnknownChannel => write!(f, "unknown stream channel handle"),
            StreamError::Rap(e) => write!(f, "register access error: {e}"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Rap(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RapError> for StreamError {
    fn from(e: RapError) -> Self {
        StreamError::Rap(e)
    }
}

struct WorkerHandle {
    terminate: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    fn stop(self) {
        self.terminate.store(true, Ordering::SeqCst);
        let _ = self.join.join();
    }
}

type ChannelSlots = Arc<Mutex<Vec<Option<Arc<StreamChannel>>>>>;

/// Owns every configured stream channel and the RX/TX worker threads that
/// move samples between the FPGA's bulk endpoints and each channel's
/// [`crate::fifo::RingFifo`].
pub struct Streamer<R: RegisterAccessPort + 'static, B: BulkTransport + 'static> {
    rap: Arc<R>,
    bulk: Arc<B>,
    channels: ChannelSlots,
    rx_worker: Mutex<Option<WorkerHandle>>,
    tx_worker: Mutex<Option<WorkerHandle>>,
    generate_data: Arc<AtomicBool>,
    rx_last_timestamp: Arc<AtomicU64>,
    rx_data_rate_bps: Arc<AtomicU64>,
    tx_data_rate_bps: Arc<AtomicU64>,
    saw_end_of_burst: Arc<AtomicBool>,
    tx_last_late_time: Arc<AtomicU64>,
    rel_timestamp: Arc<RelativeTimestampTracker>,
    cal_state: Arc<(Mutex<()>, Condvar)>,
}

impl<R: RegisterAccessPort + 'static, B: BulkTransport + 'static> Streamer<R, B> {
    #[must_use]
    pub fn new(rap: Arc<R>, bulk: Arc<B>) -> Self {
        Self {
            rap,
            bulk,
            channels: Arc::new(Mutex::new(Vec::new())),
            rx_worker: Mutex::new(None),
            tx_worker: Mutex::new(None),
            generate_data: Arc::new(AtomicBool::new(false)),
            rx_last_timestamp: Arc::new(AtomicU64::new(0)),
            rx_data_rate_bps: Arc::new(AtomicU64::new(0)),
            tx_data_rate_bps: Arc::new(AtomicU64::new(0)),
            saw_end_of_burst: Arc::new(AtomicBool::new(false)),
            tx_last_late_time: Arc::new(AtomicU64::new(0)),
            rel_timestamp: Arc::new(RelativeTimestampTracker::new()),
            cal_state: Arc::new((Mutex::new(()), Condvar::new())),
        }
    }

    fn is_running(&self) -> bool {
        self.rx_worker.lock().is_some() || self.tx_worker.lock().is_some()
    }

    /// Allocates a new channel's FIFO and registers it, failing with
    /// [`StreamError::Busy`] if any stream is currently running (spec.md
    /// §4.5.1 — streams can only be (re)configured while stopped).
    pub fn setup_stream(&self, config: StreamConfig) -> Result<StreamChannelHandle, StreamError> {
        if self.is_running() {
            return Err(StreamError::Busy);
        }
        let channel = Arc::new(StreamChannel::new(config));
        let mut slots = self.channels.lock();
        let index = slots.iter().position(Option::is_none).unwrap_or(slots.len());
        if index == slots.len() {
            slots.push(Some(channel));
        } else {
            slots[index] = Some(channel);
        }
        Ok(StreamChannelHandle(index))
    }

    /// Releases a channel's slot, failing with [`StreamError::Busy`] while a
    /// stream is running.
    pub fn close_stream(&self, handle: StreamChannelHandle) -> Result<(), StreamError> {
        if self.is_running() {
            return Err(StreamError::Busy);
        }
        let mut slots = self.channels.lock();
        let slot = slots.get_mut(handle.0).ok_or(StreamError::UnknownChannel)?;
        if slot.take().is_none() {
            return Err(StreamError::UnknownChannel);
        }
        Ok(())
    }

    fn channel(&self, handle: StreamChannelHandle) -> Result<Arc<StreamChannel>, StreamError> {
        self.channels.lock().get(handle.0).and_then(Clone::clone).ok_or(StreamError::UnknownChannel)
    }

    /// Marks `handle` active and (re)evaluates which worker threads must run.
    pub fn start(&self, handle: StreamChannelHandle) -> Result<(), StreamError> {
        self.channel(handle)?.set_active(true);
        self.update_threads()
    }

    /// Marks `handle` inactive and (re)evaluates which worker threads must run.
    pub fn stop(&self, handle: StreamChannelHandle) -> Result<(), StreamError> {
        self.channel(handle)?.set_active(false);
        self.update_threads()
    }

    /// Pops up to `out.len()` samples from `handle`'s FIFO, converting from
    /// the channel's wire representation to caller-facing `ComplexI16`.
    pub fn read_stream(&self, handle: StreamChannelHandle, out: &mut [ComplexI16], timeout: Duration, meta: &mut Metadata) -> Result<usize, StreamError> {
        let ch = self.channel(handle)?;
        let mut flags = 0u32;
        let popped = ch.fifo.pop_samples(out, out.len(), 1, &mut meta.timestamp, timeout, &mut flags);
        meta.flags = flags;
        Ok(popped)
    }

    /// Pushes up to `samples.len()` samples into `handle`'s FIFO for the TX
    /// worker to pick up.
    pub fn write_stream(&self, handle: StreamChannelHandle, samples: &[ComplexI16], timeout: Duration, meta: Metadata) -> Result<usize, StreamError> {
        let ch = self.channel(handle)?;
        Ok(ch.fifo.push_samples(samples, samples.len(), 1, meta.timestamp, timeout, meta.flags))
    }

    /// `read_stream` for a channel configured with [`StreamFormat::F32`]:
    /// converts each popped sample from int16 with `i / 2048.0` (spec.md
    /// §4.5.5).
    pub fn read_stream_f32(&self, handle: StreamChannelHandle, out: &mut [ComplexF32], timeout: Duration, meta: &mut Metadata) -> Result<usize, StreamError> {
        let mut staging = vec![ComplexI16::default(); out.len()];
        let n = self.read_stream(handle, &mut staging, timeout, meta)?;
        for (dst, src) in out.iter_mut().zip(staging.iter()).take(n) {
            *dst = complex_i16_to_f32(*src);
        }
        Ok(n)
    }

    /// `write_stream` for a channel configured with [`StreamFormat::F32`]:
    /// converts each sample to int16 with `clamp(round(f * 2047), -2048, 2047)`
    /// before pushing (spec.md §4.5.5).
    pub fn write_stream_f32(&self, handle: StreamChannelHandle, samples: &[ComplexF32], timeout: Duration, meta: Metadata) -> Result<usize, StreamError> {
        let converted: Vec<ComplexI16> = samples.iter().copied().map(complex_f32_to_i16).collect();
        self.write_stream(handle, &converted, timeout, meta)
    }

    /// Returns `handle`'s current FIFO/health snapshot.
    pub fn read_stream_status(&self, handle: StreamChannelHandle) -> Result<StreamStatus, StreamError> {
        let ch = self.channel(handle)?;
        let mut status = ch.status();
        status.link_rate_bps = if ch.is_tx() { self.tx_data_rate_bps.load(Ordering::Relaxed) } else { self.rx_data_rate_bps.load(Ordering::Relaxed) };
        Ok(status)
    }

    /// The FPGA's hardware sample counter, correlated to host time.
    #[must_use]
    pub fn get_hardware_timestamp(&self) -> u64 {
        self.rel_timestamp.get().0
    }

    /// Rebases the FPGA's hardware sample counter to `now`.
    pub fn set_hardware_timestamp(&self, now: u64) -> Result<(), StreamError> {
        self.rap.reset_timestamp()?;
        self.rx_last_timestamp.store(now, Ordering::SeqCst);
        self.rel_timestamp.set(now, Instant::now());
        Ok(())
    }

    /// Requests the RX worker fabricate zeroed packets instead of reading
    /// from the bulk endpoints, so a calibration routine can run with
    /// streaming temporarily quiesced without tearing threads down. Blocks
    /// up to [`SELF_CALIBRATION_DRAIN_MS`] for the worker to acknowledge.
    pub fn enter_self_calibration(&self) {
        self.generate_data.store(true, Ordering::SeqCst);
        let (lock, cv) = &*self.cal_state;
        let mut guard = lock.lock();
        cv.wait_for(&mut guard, Duration::from_millis(SELF_CALIBRATION_DRAIN_MS));
    }

    /// Resumes reading real samples from the bulk endpoints.
    pub fn exit_self_calibration(&self) {
        self.generate_data.store(false, Ordering::SeqCst);
    }

    /// Scans active channels and spawns/joins the RX and TX worker threads
    /// to match; on the all-stopped-to-any-running transition, resets the
    /// FPGA's stream state and reprograms its link format (spec.md §4.5.2).
    fn update_threads(&self) -> Result<(), StreamError> {
        let (need_rx, need_tx) = {
            let slots = self.channels.lock();
            let need_rx = slots.iter().flatten().any(|c| !c.is_tx() && c.is_active());
            let need_tx = slots.iter().flatten().any(|c| c.is_tx() && c.is_active());
            (need_rx, need_tx)
        };

        if !self.is_running() && (need_rx || need_tx) {
            self.rap.stop_streaming()?;
            self.rap.reset_timestamp()?;
            self.rx_last_timestamp.store(0, Ordering::SeqCst);
            self.rap.reset_stream_buffers()?;
            self.program_link_mode()?;
            self.rap.start_streaming()?;
        }

        let mut rx_guard = self.rx_worker.lock();
        match (rx_guard.is_some(), need_rx) {
            (false, true) => *rx_guard = Some(self.spawn_rx_worker()),
            (true, false) => {
                if let Some(handle) = rx_guard.take() {
                    handle.stop();
                }
            }
            _ => {}
        }
        drop(rx_guard);

        let mut tx_guard = self.tx_worker.lock();
        match (tx_guard.is_some(), need_tx) {
            (false, true) => *tx_guard = Some(self.spawn_tx_worker()),
            (true, false) => {
                if let Some(handle) = tx_guard.take() {
                    handle.stop();
                }
            }
            _ => {}
        }
        drop(tx_guard);

        if !need_rx && !need_tx && !self.is_running() {
            self.rap.stop_streaming()?;
        }

        Ok(())
    }

    /// Picks the channel-enable/link-mode registers from the active channel
    /// set and writes them. Real LML lane-swap and MIMO ping-pong
    /// programming is hardware-table-specific and out of scope (spec.md
    /// Non-goals); the two registers named in spec.md §6 are what the
    /// contract actually depends on.
    fn program_link_mode(&self) -> Result<(), StreamError> {
        let slots = self.channels.lock();
        let link_format = if slots.iter().flatten().any(|c| c.config.link_format == LinkFormat::I12InI16) {
            LinkFormat::I12InI16
        } else {
            LinkFormat::Packed12
        };
        let mut channel_enable_bits = 0u16;
        for (i, ch) in slots.iter().enumerate() {
            if ch.as_ref().is_some_and(|c| c.is_active()) {
                channel_enable_bits |= 1 << (i.min(15));
            }
        }
        drop(slots);

        let link_mode_code: u16 = match link_format {
            LinkFormat::I12InI16 => 0,
            LinkFormat::Packed12 => 2,
        };
        self.rap.write_reg(REG_CHANNEL_ENABLE, channel_enable_bits)?;
        self.rap.write_reg(REG_LINK_MODE, link_mode_code)?;
        Ok(())
    }

    fn spawn_rx_worker(&self) -> WorkerHandle {
        let terminate = Arc::new(AtomicBool::new(false));
        let params = (
            Arc::clone(&self.bulk),
            Arc::clone(&self.channels),
            Arc::clone(&self.generate_data),
            Arc::clone(&terminate),
            Arc::clone(&self.rx_last_timestamp),
            Arc::clone(&self.rx_data_rate_bps),
            Arc::clone(&self.rel_timestamp),
            Arc::clone(&self.cal_state),
        );
        let join = std::thread::Builder::new()
            .name("lms7002-rx".into())
            .spawn(move || {
                let (bulk, channels, generate_data, terminate, rx_last_timestamp, rx_data_rate_bps, rel_timestamp, cal_state) = params;
                worker::rx_loop(bulk, channels, generate_data, terminate, rx_last_timestamp, rx_data_rate_bps, rel_timestamp, cal_state);
            })
            .expect("failed to spawn RX worker thread");
        WorkerHandle { terminate, join }
    }

    fn spawn_tx_worker(&self) -> WorkerHandle {
        let terminate = Arc::new(AtomicBool::new(false));
        let params = (
            Arc::clone(&self.bulk),
            Arc::clone(&self.channels),
            Arc::clone(&terminate),
            Arc::clone(&self.tx_data_rate_bps),
            Arc::clone(&self.rx_last_timestamp),
            Arc::clone(&self.saw_end_of_burst),
            Arc::clone(&self.tx_last_late_time),
        );
        let join = std::thread::Builder::new()
            .name("lms7002-tx".into())
            .spawn(move || {
                let (bulk, channels, terminate, tx_data_rate_bps, current_hw_timestamp, saw_end_of_burst, tx_last_late_time) = params;
                worker::tx_loop(bulk, channels, terminate, tx_data_rate_bps, current_hw_timestamp, saw_end_of_burst, tx_last_late_time);
            })
            .expect("failed to spawn TX worker thread");
        WorkerHandle { terminate, join }
    }
}

impl<R: RegisterAccessPort + 'static, B: BulkTransport + 'static> Drop for Streamer<R, B> {
    fn drop(&mut self) {
        if let Some(handle) = self.rx_worker.lock().take() {
            handle.stop();
        }
        if let Some(handle) = self.tx_worker.lock().take() {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rap::LoopbackRegisterPort;

    fn streamer() -> Streamer<LoopbackRegisterPort, InMemoryBulkTransport> {
        Streamer::new(Arc::new(LoopbackRegisterPort::new()), Arc::new(InMemoryBulkTransport::new()))
    }

    #[test]
    fn setup_stream_resolves_default_buffer_length() {
        let s = streamer();
        let handle = s.setup_stream(StreamConfig { buffer_length: 0, ..StreamConfig::default() }).unwrap();
        let status = s.read_stream_status(handle).unwrap();
        assert_eq!(status.fifo_size, 8192 * crate::config::MAX_SAMPLES_PER_PACKET);
    }

    #[test]
    fn setup_stream_fails_busy_while_running() {
        let s = streamer();
        let handle = s.setup_stream(StreamConfig::default()).unwrap();
        s.start(handle).unwrap();
        let err = s.setup_stream(StreamConfig::default()).unwrap_err();
        assert!(matches!(err, StreamError::Busy));
        s.stop(handle).unwrap();
    }

    #[test]
    fn close_unknown_handle_errors() {
        let s = streamer();
        let bogus = StreamChannelHandle(99);
        assert!(matches!(s.close_stream(bogus), Err(StreamError::UnknownChannel)));
    }

    #[test]
    fn start_stop_round_trip_does_not_error() {
        let s = streamer();
        let handle = s.setup_stream(StreamConfig::default()).unwrap();
        s.start(handle).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        s.stop(handle).unwrap();
        assert!(!s.is_running());
    }

    #[test]
    fn write_then_read_stream_round_trips_through_fifo() {
        let s = streamer();
        let handle = s.setup_stream(StreamConfig { is_tx: true, ..StreamConfig::default() }).unwrap();
        let samples = vec![ComplexI16 { i: 11, q: -11 }; 4];
        let written = s.write_stream(handle, &samples, Duration::from_millis(10), Metadata::default()).unwrap();
        assert_eq!(written, 4);
    }

    #[test]
    fn set_hardware_timestamp_is_observed_by_get_hardware_timestamp() {
        let s = streamer();
        s.set_hardware_timestamp(777).unwrap();
        assert_eq!(s.get_hardware_timestamp(), 777);
    }

    #[test]
    fn write_stream_f32_converts_before_pushing() {
        let s = streamer();
        let handle = s.setup_stream(StreamConfig { is_tx: true, format: StreamFormat::F32, ..StreamConfig::default() }).unwrap();
        let samples = vec![ComplexF32 { i: 0.5, q: -0.5 }; 2];
        let written = s.write_stream_f32(handle, &samples, Duration::from_millis(10), Metadata::default()).unwrap();
        assert_eq!(written, 2);
    }
}
