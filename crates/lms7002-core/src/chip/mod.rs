// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chip Control — a thin layer over [`crate::rap::RegisterAccessPort`] that
//! knows named bit-field parameters, section default loads, synthesizer
//! (SX) and clock-generator (CGEN) frequency programming, and chip-state
//! snapshot/restore.
//!
//! This is the one module every calibration routine and the streamer both
//! depend on; it never depends on either of them.

pub mod defaults;
pub mod params;
pub mod state;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

pub use defaults::Section;
pub use params::{BitField, Param};
pub use state::ChipStateGuard;

use crate::rap::{RapError, RegisterAccessPort};

/// Number of consecutive registers tracked by a chip-state snapshot,
/// starting at [`STATE_BASE_ADDR`] — spec.md §3 calls this "~1 KiB"; at two
/// bytes per register that is 512 registers.
const STATE_REGISTER_COUNT: usize = 512;
const STATE_BASE_ADDR: u16 = 0x0000;

/// Register carrying the 16-bit linear RSSI accumulator. Exposed so test
/// doubles can intercept it without reaching into this module's privates.
pub const RSSI_REG: u16 = 0x0040;

/// CGEN integer/fractional tuning word registers.
const CGEN_INT_REG: u16 = 0x00D1;
const CGEN_FRAC_REG: u16 = 0x00D2;

/// SXR/SXT integer/fractional tuning word registers.
const SXR_INT_REG: u16 = 0x0111;
const SXR_FRAC_REG: u16 = 0x0112;
const SXT_INT_REG: u16 = 0x0114;
const SXT_FRAC_REG: u16 = 0x0115;

/// RX/TX NCO frequency-word table base, one register per index (0 or 1).
const RX_NCO_BASE_REG: u16 = 0x0120;
const TX_NCO_BASE_REG: u16 = 0x0130;

/// TX DC I/Q offset registers, written by `load_dc_reg_tx_iq`.
const TX_DC_I_REG: u16 = 0x0200;
const TX_DC_Q_REG: u16 = 0x0201;

/// Valid VCO range for either synthesizer; frequencies are reached by
/// doubling until the VCO lands in range, matching the usual divide-by-2^n
/// PLL topology. Not a transcription of any specific chip's PLL block —
/// this crate does not claim bit-exact register encodings for the
/// synthesizer.
const SX_VCO_MIN_HZ: f64 = 2.5e9;
const SX_VCO_MAX_HZ: f64 = 3.8e9;
const SX_MAX_DOUBLINGS: u32 = 7;

/// RSSI settling cycles at the current CGEN rate; `update_rssi_delay`
/// recomputes the settling [`Duration`] from this and the last CGEN rate set.
const RSSI_SETTLE_CYCLES: u64 = 256;
const RSSI_MIN_SETTLE_NS: u64 = 10_000;

/// Synthesizer or NCO direction selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

/// Errors surfaced by [`ChipControl`].
#[derive(Debug)]
pub enum ChipError {
    /// The underlying register port failed.
    Rap(RapError),
    /// `set_frequency_sx` could not reach a VCO frequency in its valid range.
    PllLockError,
    /// `restore_chip_state` was called on a slot never captured.
    StateSlotEmpty(state::Slot),
}

impl fmt::Display for ChipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipError::Rap(e) => write!(f, "{e}"),
            ChipError::PllLockError => write!(f, "synthesizer did not lock"),
            ChipError::StateSlotEmpty(slot) => write!(f, "chip state slot {slot} was never captured"),
        }
    }
}

impl std::error::Error for ChipError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChipError::Rap(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RapError> for ChipError {
    fn from(e: RapError) -> Self {
        ChipError::Rap(e)
    }
}

type ChipResult<T> = Result<T, ChipError>;

/// A captured register snapshot for one state slot.
type StateSnapshot = [u16; STATE_REGISTER_COUNT];

/// Chip Control: named bit-field access, section defaults, SX/CGEN/NCO
/// programming, RSSI reads, and chip-state snapshot/restore, all layered
/// over a shared [`RegisterAccessPort`].
pub struct ChipControl<R: RegisterAccessPort> {
    rap: Arc<R>,
    slots: Mutex<[Option<StateSnapshot>; 2]>,
    cgen_hz: AtomicU64,
    rssi_settle_ns: AtomicU64,
}

impl<R: RegisterAccessPort> ChipControl<R> {
    /// Wraps a shared register port. The same `Arc<R>` is typically also
    /// handed to the streamer so both serialize through the port's own lock.
    #[must_use]
    pub fn new(rap: Arc<R>) -> Self {
        Self {
            rap,
            slots: Mutex::new([None, None]),
            cgen_hz: AtomicU64::new(0),
            rssi_settle_ns: AtomicU64::new(RSSI_MIN_SETTLE_NS),
        }
    }

    /// The underlying register port, shared with other owners via `Arc`.
    #[must_use]
    pub fn rap(&self) -> &R {
        &self.rap
    }

    /// Clones the shared register port handle.
    #[must_use]
    pub fn rap_handle(&self) -> Arc<R> {
        Arc::clone(&self.rap)
    }

    /// Reads a named bit-field parameter's current value.
    pub fn get_bits(&self, param: Param) -> ChipResult<u16> {
        let bits = param.bits();
        let reg = self.rap.read_reg(bits.addr)?;
        Ok(bits.extract(reg))
    }

    /// Writes a named bit-field parameter, clamped to its declared width,
    /// leaving every other bit of its register untouched.
    pub fn modify_bits(&self, param: Param, value: u16) -> ChipResult<()> {
        let bits = param.bits();
        let reg = self.rap.read_reg(bits.addr)?;
        self.rap.write_reg(bits.addr, bits.insert(reg, value))?;
        Ok(())
    }

    /// Loads a logical chip block's default register set.
    pub fn set_section_defaults(&self, section: Section) -> ChipResult<()> {
        self.rap.write_masked_batch(&defaults::batch_for(section))?;
        Ok(())
    }

    /// Programs the named synthesizer. Fails with [`ChipError::PllLockError`]
    /// if no integer VCO doubling lands the target frequency in the valid
    /// range.
    pub fn set_frequency_sx(&self, direction: Direction, hz: f64) -> ChipResult<()> {
        let (int_reg, frac_reg) = match direction {
            Direction::Rx => (SXR_INT_REG, SXR_FRAC_REG),
            Direction::Tx => (SXT_INT_REG, SXT_FRAC_REG),
        };
        let (int_word, frac_word) = solve_sx_divider(hz).ok_or(ChipError::PllLockError)?;
        self.rap.write_reg(int_reg, int_word)?;
        self.rap.write_reg(frac_reg, frac_word)?;
        log::debug!("set_frequency_sx({direction:?}, {hz} Hz) -> int={int_word:#06x} frac={frac_word:#06x}");
        Ok(())
    }

    /// Programs one of the two NCO frequency-word slots (`index` 0 or 1) for
    /// the named direction's digital TSP chain.
    pub fn set_nco_frequency(&self, direction: Direction, hz: f64, index: u8) -> ChipResult<()> {
        let base = match direction {
            Direction::Rx => RX_NCO_BASE_REG,
            Direction::Tx => TX_NCO_BASE_REG,
        };
        let addr = base + u16::from(index);
        let word = nco_word(hz);
        self.rap.write_reg(addr, word)?;
        Ok(())
    }

    /// Programs the CGEN master clock.
    pub fn set_frequency_cgen(&self, hz: f64) -> ChipResult<()> {
        let (int_word, frac_word) = solve_sx_divider(hz).unwrap_or((0, nco_word(hz)));
        self.rap.write_reg(CGEN_INT_REG, int_word)?;
        self.rap.write_reg(CGEN_FRAC_REG, frac_word)?;
        self.cgen_hz.store(hz.max(1.0) as u64, Ordering::SeqCst);
        self.update_rssi_delay()
    }

    /// Writes the fixed TX DC I/Q offset registers used as the calibration
    /// tone's DC reference.
    pub fn load_dc_reg_tx_iq(&self) -> ChipResult<()> {
        self.rap.write_regs(&[(TX_DC_I_REG, 0x0000), (TX_DC_Q_REG, 0x0000)])?;
        Ok(())
    }

    /// Snapshots every tracked register into `slot`.
    pub fn save_chip_state(&self, slot: state::Slot) -> ChipResult<()> {
        let mut snapshot = [0u16; STATE_REGISTER_COUNT];
        for (i, value) in snapshot.iter_mut().enumerate() {
            *value = self.rap.read_reg(STATE_BASE_ADDR + i as u16)?;
        }
        self.slots.lock()[usize::from(slot)] = Some(snapshot);
        Ok(())
    }

    /// Writes back the registers captured into `slot` by a prior
    /// `save_chip_state`.
    pub fn restore_chip_state(&self, slot: state::Slot) -> ChipResult<()> {
        let snapshot = self.slots.lock()[usize::from(slot)].ok_or(ChipError::StateSlotEmpty(slot))?;
        for (i, &value) in snapshot.iter().enumerate() {
            self.rap.write_reg(STATE_BASE_ADDR + i as u16, value)?;
        }
        Ok(())
    }

    /// Blocks for the current RSSI settling delay, then returns the 16-bit
    /// linear RSSI reading. Never batch a `modify_bits` immediately before
    /// this call — the settling delay exists precisely to let that prior
    /// write take effect (Design Notes §9).
    pub fn get_rssi(&self) -> ChipResult<u16> {
        let settle = Duration::from_nanos(self.rssi_settle_ns.load(Ordering::SeqCst));
        std::thread::sleep(settle);
        Ok(self.rap.read_reg(RSSI_REG)?)
    }

    /// Recomputes the RSSI settling delay from the current CGEN rate: a
    /// fixed number of sample clocks, floored at a minimum settle time.
    pub fn update_rssi_delay(&self) -> ChipResult<()> {
        let hz = self.cgen_hz.load(Ordering::SeqCst).max(1);
        let ns = (u128::from(RSSI_SETTLE_CYCLES) * 1_000_000_000u128 / u128::from(hz)) as u64;
        self.rssi_settle_ns.store(ns.max(RSSI_MIN_SETTLE_NS), Ordering::SeqCst);
        Ok(())
    }
}

/// Finds an integer VCO doubling that lands `hz` in `[SX_VCO_MIN_HZ,
/// SX_VCO_MAX_HZ]`, returning `(high_word, low_word)` of the resulting VCO
/// frequency rounded to the nearest Hz.
fn solve_sx_divider(hz: f64) -> Option<(u16, u16)> {
    if !(hz.is_finite()) || hz <= 0.0 {
        return None;
    }
    let mut vco = hz;
    let mut doublings = 0;
    while vco < SX_VCO_MIN_HZ && doublings < SX_MAX_DOUBLINGS {
        vco *= 2.0;
        doublings += 1;
    }
    if !(SX_VCO_MIN_HZ..=SX_VCO_MAX_HZ).contains(&vco) {
        return None;
    }
    let word = vco.round() as u32;
    Some(((word >> 16) as u16, (word & 0xFFFF) as u16))
}

/// Quantizes a frequency into a 16-bit NCO tuning word (`hz` mapped linearly
/// across the word's range against a fixed reference span).
fn nco_word(hz: f64) -> u16 {
    const NCO_REFERENCE_HZ: f64 = 100.0e6;
    let fraction = (hz / NCO_REFERENCE_HZ).clamp(0.0, 1.0);
    (fraction * f64::from(u16::MAX)).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rap::LoopbackRegisterPort;

    fn chip() -> ChipControl<LoopbackRegisterPort> {
        ChipControl::new(Arc::new(LoopbackRegisterPort::new()))
    }

    #[test]
    fn modify_then_get_bits_round_trips() {
        let cc = chip();
        for v in 0..=Param::C_CTL_LPFH_RBB.max_value() {
            cc.modify_bits(Param::C_CTL_LPFH_RBB, v).unwrap();
            assert_eq!(cc.get_bits(Param::C_CTL_LPFH_RBB).unwrap(), v);
        }
    }

    #[test]
    fn modify_bits_clamps_above_max() {
        let cc = chip();
        cc.modify_bits(Param::R_CTL_LPF_RBB, 9999).unwrap();
        assert_eq!(cc.get_bits(Param::R_CTL_LPF_RBB).unwrap(), Param::R_CTL_LPF_RBB.max_value());
    }

    #[test]
    fn modify_bits_leaves_sibling_field_in_same_register_untouched() {
        let cc = chip();
        cc.modify_bits(Param::G_RXLOOPB_RFE, 7).unwrap();
        cc.modify_bits(Param::G_TIA_RFE, 2).unwrap();
        assert_eq!(cc.get_bits(Param::G_RXLOOPB_RFE).unwrap(), 7);
        assert_eq!(cc.get_bits(Param::G_TIA_RFE).unwrap(), 2);
    }

    #[test]
    fn set_section_defaults_applies_batch() {
        let cc = chip();
        cc.set_section_defaults(Section::Rbb).unwrap();
        assert_eq!(cc.rap().read_reg(0x0090).unwrap() & 0x0001, 0x0001);
    }

    #[test]
    fn save_and_restore_chip_state_round_trips() {
        let cc = chip();
        cc.modify_bits(Param::C_CTL_LPFL_RBB, 123).unwrap();
        cc.save_chip_state(0).unwrap();
        cc.modify_bits(Param::C_CTL_LPFL_RBB, 456).unwrap();
        assert_eq!(cc.get_bits(Param::C_CTL_LPFL_RBB).unwrap(), 456);
        cc.restore_chip_state(0).unwrap();
        assert_eq!(cc.get_bits(Param::C_CTL_LPFL_RBB).unwrap(), 123);
    }

    #[test]
    fn restore_without_capture_fails() {
        let cc = chip();
        let err = cc.restore_chip_state(1).unwrap_err();
        assert!(matches!(err, ChipError::StateSlotEmpty(1)));
    }

    #[test]
    fn set_frequency_sx_locks_in_range() {
        let cc = chip();
        assert!(cc.set_frequency_sx(Direction::Rx, 539.9e6).is_ok());
        assert!(cc.set_frequency_sx(Direction::Tx, 550.0e6).is_ok());
    }

    #[test]
    fn set_frequency_sx_rejects_unreachable_frequency() {
        let cc = chip();
        // Too low to ever reach the VCO band within the doubling budget.
        let err = cc.set_frequency_sx(Direction::Rx, 1.0).unwrap_err();
        assert!(matches!(err, ChipError::PllLockError));
    }

    #[test]
    fn set_frequency_cgen_updates_rssi_settle() {
        let cc = chip();
        cc.set_frequency_cgen(61.44e6).unwrap();
        assert!(cc.rssi_settle_ns.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn get_rssi_reads_register() {
        let cc = chip();
        cc.rap().write_reg(RSSI_REG, 0x2700).unwrap();
        assert_eq!(cc.get_rssi().unwrap(), 0x2700);
    }
}
