// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-section default register loads.
//!
//! Each logical chip block (RFE, RBB, TRF, TBB, AFE, CGEN, RxTSP, TxTSP,
//! SXR, SXT) has a fixed set of power-up/enable bits that must be loaded
//! before calibration or streaming touches it. These are declared as small
//! literal tables here, one masked `(addr, data, mask)` triple per enable
//! bit — the same shape as a calibration preamble, just scoped to one
//! section instead of the whole RX-LPF setup.

use crate::rap::RegisterBatch;

/// A logical chip block addressed by [`crate::chip::ChipControl::set_section_defaults`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Rfe,
    Rbb,
    Trf,
    Tbb,
    Afe,
    Cgen,
    RxTsp,
    TxTsp,
    Sxr,
    Sxt,
}

/// Builds the immutable default-load batch for one section.
#[must_use]
pub fn batch_for(section: Section) -> RegisterBatch {
    let mut b = RegisterBatch::builder();
    b = match section {
        Section::Rfe => b
            .masked(0x0080, 0x0001, 0x0001) // power up RFE front end
            .masked(0x0081, 0x0000, 0x0030), // loopback paths disabled by default
        Section::Rbb => b
            .masked(0x0090, 0x0001, 0x0001) // power up RBB
            .masked(0x0091, 0x0003, 0x0003), // both LPF branches enabled
        Section::Trf => b.masked(0x00A0, 0x0001, 0x0001), // power up TRF
        Section::Tbb => b
            .masked(0x00B0, 0x0001, 0x0001) // power up TBB
            .masked(0x00B1, 0x0000, 0x0020), // LPFS5 bypass cleared
        Section::Afe => b.masked(0x00C0, 0x000F, 0x000F), // power up all four ADC/DAC halves
        Section::Cgen => b.masked(0x00D0, 0x0001, 0x0001), // power up CGEN PLL
        Section::RxTsp => b
            .masked(0x00E0, 0x0000, 0x0001) // disable AGC bypass
            .masked(0x00E1, 0x0001, 0x0001), // enable RSSI accumulator
        Section::TxTsp => b.masked(0x00F0, 0x0001, 0x0001), // enable tone generator path
        Section::Sxr => b.masked(0x0110, 0x0001, 0x0001),   // power up RX synthesizer
        Section::Sxt => b.masked(0x0113, 0x0001, 0x0001),   // power up TX synthesizer
    };
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_section_has_a_nonempty_batch() {
        for section in [
            Section::Rfe,
            Section::Rbb,
            Section::Trf,
            Section::Tbb,
            Section::Afe,
            Section::Cgen,
            Section::RxTsp,
            Section::TxTsp,
            Section::Sxr,
            Section::Sxt,
        ] {
            assert!(!batch_for(section).masked_writes().is_empty());
        }
    }
}
