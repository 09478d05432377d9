// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # lms7002-core
//!
//! Host-side driver core for a dual-channel direct-conversion radio
//! transceiver: two independent RX/TX analog paths sharing one digital
//! baseband and one FPGA-mediated sample link.
//!
//! This crate covers exactly two tightly coupled subsystems:
//!
//! 1. **RF front-end filter calibration** — closed-loop searches that trim
//!    the receive (RBB/TIA) and transmit (TBB) low-pass filter analog codes
//!    against an on-chip RSSI reading ([`calibration`]).
//! 2. **Real-time sample streaming** — per-channel sample FIFOs, an RX/TX
//!    worker-thread pair, and the wire format that carries compressed I/Q
//!    samples between host and FPGA ([`streamer`]).
//!
//! Everything else a full radio driver needs — device enumeration, GUI
//! panels, the concrete USB/PCIe byte transport — lives outside this crate.
//! Two traits mark the seams: [`rap::RegisterAccessPort`] for control-plane
//! register I/O and [`streamer::bulk::BulkTransport`] for the RX/TX bulk
//! data endpoints.
//!
//! ## Modules Overview
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`rap`] | Serialized register read/write/batch over an opaque transport |
//! | [`chip`] | Named bit-field parameters, section defaults, PLL/CGEN, chip-state snapshots |
//! | [`calibration`] | RX-LPF and TX-LPF bandwidth tuning state machines |
//! | [`fifo`] | Bounded, timed, blocking single-producer/single-consumer sample ring |
//! | [`streamer`] | RX/TX worker threads, stream channel lifecycle, wire codec |
//!
//! ## Lock hierarchy
//!
//! RAP mutex < Streamer state lock < per-channel FIFO wait condition. No
//! component acquires an outer lock while holding an inner one.

/// Crate-wide configuration constants (packet sizes, reference-clock table).
pub mod config;
/// Crate-wide error types.
pub mod error;
/// Register Access Port: the abstract, serialized register I/O contract.
pub mod rap;
/// Chip Control: named bit-field parameters, section defaults, PLL/CGEN, state snapshots.
pub mod chip;
/// Filter Calibrator: RX-LPF and TX-LPF tuning state machines.
pub mod calibration;
/// Sample FIFO: bounded, timed, blocking single-producer/single-consumer ring.
pub mod fifo;
/// Streamer: RX/TX worker threads, stream channel lifecycle, wire codec.
pub mod streamer;

pub use error::{Error, Result};
