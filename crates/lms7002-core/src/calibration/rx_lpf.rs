// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RX-LPF bandwidth tuning (spec.md §4.3, RX-LPF Tuning).

use crate::calibration::filter_search::{filter_search, SearchOutcome};
use crate::calibration::{round_u16, CalResult, CalibrationError, FilterCalibrator, TONE_INJECTION_RSSI_TARGET};
use crate::chip::{ChipStateGuard, Direction, Param, Section};
use crate::rap::{RegisterAccessPort, RegisterBatch};

const RX_LPF_RF_RANGE_HZ: std::ops::RangeInclusive<f64> = 1.4e6..=130e6;
const SXR_FREQUENCY_PLAN_HZ: f64 = 539.9e6;
const SXT_FREQUENCY_PLAN_HZ: f64 = 550.0e6;
const CGEN_STEP_HZ: f64 = 46.08e6;
const CGEN_OFFSET_HZ: f64 = 10.0e6;
const RCC_LPFL_BANDS_HZ: [f64; 5] = [2.5e6, 5.0e6, 7.5e6, 10.0e6, 14.0e6];
const MAX_RANGE_RETRIES: u32 = 8;

/// Fixed RX calibration preamble (spec.md §4.3 step 2): enables the TX->RX
/// loopback through the auxiliary TX pad and configures both TSPs for tone
/// generation / AGC-mode RSSI.
fn rx_calibration_preamble() -> RegisterBatch {
    RegisterBatch::builder()
        .masked(0x0081, 0x0010, 0x0010) // enable TX->RX loopback path
        .masked(0x00F0, 0x0001, 0x0001) // TX TSP: tone generator on
        .masked(0x00E0, 0x0001, 0x0001) // RX TSP: AGC-mode RSSI on
        .build()
}

fn rcc_ctl_lpfl_for_if(if_hz: f64) -> u16 {
    RCC_LPFL_BANDS_HZ
        .iter()
        .position(|&threshold| if_hz <= threshold)
        .unwrap_or(RCC_LPFL_BANDS_HZ.len()) as u16
}

enum RxBranch {
    Lpfl,
    Lpfh,
    Bypass,
}

impl<R: RegisterAccessPort> FilterCalibrator<R> {
    /// Tunes the RX baseband low-pass filter so its −3 dB corner tracks
    /// `rx_lpf_rf_hz`. On any failure, the chip's register state at entry is
    /// restored before returning; on success the winning trim codes stay
    /// live.
    pub fn tune_rx_filter(&self, rx_lpf_rf_hz: f64) -> CalResult<()> {
        if !RX_LPF_RF_RANGE_HZ.contains(&rx_lpf_rf_hz) {
            return Err(CalibrationError::OutOfRange);
        }
        let if_hz = rx_lpf_rf_hz / 2.0;
        let chip = self.chip_arc();

        let guard = ChipStateGuard::capture(&chip, 0)?;

        chip.set_section_defaults(Section::Rfe)?;
        chip.set_section_defaults(Section::Rbb)?;
        chip.set_section_defaults(Section::Trf)?;
        chip.set_section_defaults(Section::Tbb)?;
        chip.set_section_defaults(Section::Afe)?;
        chip.set_section_defaults(Section::Cgen)?;
        chip.set_section_defaults(Section::RxTsp)?;
        chip.set_section_defaults(Section::TxTsp)?;
        chip.rap().write_masked_batch(&rx_calibration_preamble())?;
        chip.set_frequency_sx(Direction::Rx, SXR_FREQUENCY_PLAN_HZ)?;
        chip.set_frequency_sx(Direction::Tx, SXT_FREQUENCY_PLAN_HZ)?;

        // Step 3: CGEN bracketing the target IF.
        let n = (if_hz * 20.0 / CGEN_STEP_HZ).round().clamp(2.0, 13.0);
        chip.set_frequency_cgen(n * CGEN_STEP_HZ + CGEN_OFFSET_HZ)?;

        // Step 4: TIA feedback/compensation polynomials.
        let g_tia_rfe = chip.get_bits(Param::G_TIA_RFE)?;
        let (cfb, ccomp) = match g_tia_rfe {
            2 | 3 => {
                let cfb = 1680e6 / if_hz - 10.0;
                (cfb, cfb / 100.0)
            }
            1 => {
                let cfb = 5400e6 / if_hz - 15.0;
                (cfb, cfb / 100.0 + 1.0)
            }
            _ => return Err(CalibrationError::InvalidTiaGain),
        };
        let rcomp = (15.0 - cfb / 100.0).clamp(0.0, 15.0);
        chip.modify_bits(Param::CFB_TIA_RFE, round_u16(cfb))?;
        chip.modify_bits(Param::CCOMP_TIA_RFE, round_u16(ccomp))?;
        chip.modify_bits(Param::RCOMP_TIA_RFE, round_u16(rcomp))?;

        // Step 5: RBB low-pass branch selection.
        let branch = if if_hz < 18e6 {
            let c = (2160e6 / (1.3 * if_hz) - 103.0).clamp(0.0, 2047.0);
            chip.modify_bits(Param::C_CTL_LPFL_RBB, round_u16(c))?;
            chip.modify_bits(Param::RCC_CTL_LPFL_RBB, rcc_ctl_lpfl_for_if(if_hz))?;
            RxBranch::Lpfl
        } else if if_hz <= 54e6 {
            let c = (6000e6 / (1.3 * if_hz) - 50.0).clamp(0.0, 255.0);
            let rcc = (1.3 * if_hz / 10.0 - 3.0).clamp(0.0, 8.0);
            chip.modify_bits(Param::C_CTL_LPFH_RBB, round_u16(c))?;
            chip.modify_bits(Param::RCC_CTL_LPFH_RBB, round_u16(rcc))?;
            RxBranch::Lpfh
        } else {
            RxBranch::Bypass
        };

        // Step 6: inject the calibration tone.
        step_until_rssi(&chip, Param::G_RXLOOPB_RFE, 2, 14)?;
        step_until_rssi(&chip, Param::CG_IAMP_TBB, 2, 30)?;

        // Step 7: -3 dB target.
        let base_rssi = f64::from(chip.get_rssi()?);
        let if_mhz = if_hz / 1.0e6;
        let rssi_3db = round_u16(base_rssi * 0.7071 * 10f64.powf(-0.0018 * if_mhz / 20.0));

        // Step 8: binary-search the analog codes.
        match branch {
            RxBranch::Lpfl => search_with_resistor_retry_lpfl(&chip, Param::C_CTL_LPFL_RBB, rssi_3db, 2048)?,
            RxBranch::Lpfh => search_with_resistor_retry_lpfh(&chip, Param::C_CTL_LPFH_RBB, rssi_3db, 256)?,
            RxBranch::Bypass => {}
        }
        filter_search(&chip, Param::CFB_TIA_RFE, rssi_3db, 4096, |c| c.get_rssi())?;

        log::info!("tune_rx_filter({rx_lpf_rf_hz} Hz) converged");
        guard.commit();
        Ok(())
    }
}


fn step_until_rssi<R: RegisterAccessPort>(
    chip: &crate::chip::ChipControl<R>,
    param: Param,
    step: u16,
    max: u16,
) -> CalResult<()> {
    let mut v = 0u16;
    chip.modify_bits(param, v)?;
    let mut rssi = chip.get_rssi()?;
    while rssi < TONE_INJECTION_RSSI_TARGET && v < max {
        v = (v + step).min(max);
        chip.modify_bits(param, v)?;
        rssi = chip.get_rssi()?;
    }
    Ok(())
}

/// LPFL-branch resistor retry (spec.md §4.3 step 8): re-runs `filter_search`
/// on `param` after each `R_CTL_LPF_RBB` adjustment, halving on `DecreaseR`
/// and stepping by 4 on `IncreaseR`, matching the original's LPFL resistor
/// policy (`RxFilterSearch` LPFL branch).
fn search_with_resistor_retry_lpfl<R: RegisterAccessPort>(
    chip: &crate::chip::ChipControl<R>,
    param: Param,
    rssi_3db: u16,
    step_limit: u16,
) -> CalResult<()> {
    for _ in 0..MAX_RANGE_RETRIES {
        match filter_search(chip, param, rssi_3db, step_limit, |c| c.get_rssi())? {
            SearchOutcome::Converged => return Ok(()),
            SearchOutcome::DecreaseR => {
                let r = chip.get_bits(Param::R_CTL_LPF_RBB)?;
                chip.modify_bits(Param::R_CTL_LPF_RBB, r / 2)?;
            }
            SearchOutcome::IncreaseR => {
                let r = chip.get_bits(Param::R_CTL_LPF_RBB)?;
                chip.modify_bits(Param::R_CTL_LPF_RBB, (r + 4).min(Param::R_CTL_LPF_RBB.max_value()))?;
            }
        }
    }
    Err(CalibrationError::SearchDidNotConverge)
}

/// LPFH-branch resistor retry: steps `R_CTL_LPF_RBB` by ±1, checking RSSI
/// directly against `rssi_3db` after each step rather than re-running the
/// full search — the original's LPFH branch (`RxFilterSearch` LPFH branch)
/// compares `GetRSSI()` inline instead of re-invoking its search routine.
fn search_with_resistor_retry_lpfh<R: RegisterAccessPort>(
    chip: &crate::chip::ChipControl<R>,
    param: Param,
    rssi_3db: u16,
    step_limit: u16,
) -> CalResult<()> {
    match filter_search(chip, param, rssi_3db, step_limit, |c| c.get_rssi())? {
        SearchOutcome::Converged => Ok(()),
        SearchOutcome::DecreaseR => {
            let mut r = chip.get_bits(Param::R_CTL_LPF_RBB)?;
            while r > 0 {
                r -= 1;
                chip.modify_bits(Param::R_CTL_LPF_RBB, r)?;
                if chip.get_rssi()? < rssi_3db {
                    return Ok(());
                }
            }
            Err(CalibrationError::SearchDidNotConverge)
        }
        SearchOutcome::IncreaseR => {
            let mut r = chip.get_bits(Param::R_CTL_LPF_RBB)?;
            while r < Param::R_CTL_LPF_RBB.max_value() {
                r += 1;
                chip.modify_bits(Param::R_CTL_LPF_RBB, r)?;
                if chip.get_rssi()? > rssi_3db {
                    return Ok(());
                }
            }
            Err(CalibrationError::SearchDidNotConverge)
        }
    }
}
