// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `ChipStateGuard` — RAII replacement for the implicit dual-slot
//! save/restore convention (Design Notes §9).
//!
//! Capturing a guard snapshots the live register set into one of two slots;
//! dropping the guard restores that slot unless [`ChipStateGuard::commit`]
//! was called first. Calibration routines hold exactly one guard across
//! their whole run; on the success path they take a second, independent
//! guard rather than reusing the first, so there is no implicit "slot 1 on
//! exit" round-trip to misread.

use crate::chip::{ChipControl, ChipError};
use crate::rap::RegisterAccessPort;

/// Snapshot slot index. The port tracks exactly two, matching the source
/// convention (`0` = entry, `1` = exit) without attaching meaning to either.
pub type Slot = u8;

/// Captures chip state on construction, restores it on drop unless
/// [`commit`](ChipStateGuard::commit) consumed the guard first.
pub struct ChipStateGuard<'a, R: RegisterAccessPort> {
    chip: &'a ChipControl<R>,
    slot: Slot,
    committed: bool,
}

impl<'a, R: RegisterAccessPort> ChipStateGuard<'a, R> {
    /// Snapshots every tracked register into `slot`.
    pub fn capture(chip: &'a ChipControl<R>, slot: Slot) -> Result<Self, ChipError> {
        chip.save_chip_state(slot)?;
        Ok(Self { chip, slot, committed: false })
    }

    /// Cancels the pending restore. The snapshot in `slot` is left in place
    /// but will no longer be written back to the live registers on drop.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl<R: RegisterAccessPort> Drop for ChipStateGuard<'_, R> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.chip.restore_chip_state(self.slot) {
                log::error!("ChipStateGuard: restore of slot {} failed: {e}", self.slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rap::LoopbackRegisterPort;

    #[test]
    fn drop_without_commit_restores_prior_value() {
        let port = std::sync::Arc::new(LoopbackRegisterPort::new());
        let chip = ChipControl::new(port);
        chip.rap().write_reg(0x0080, 0x1111).unwrap();
        {
            let _guard = ChipStateGuard::capture(&chip, 0).unwrap();
            chip.rap().write_reg(0x0080, 0x2222).unwrap();
        }
        assert_eq!(chip.rap().read_reg(0x0080).unwrap(), 0x1111);
    }

    #[test]
    fn commit_cancels_restore() {
        let port = std::sync::Arc::new(LoopbackRegisterPort::new());
        let chip = ChipControl::new(port);
        chip.rap().write_reg(0x0080, 0x1111).unwrap();
        {
            let guard = ChipStateGuard::capture(&chip, 0).unwrap();
            chip.rap().write_reg(0x0080, 0x2222).unwrap();
            guard.commit();
        }
        assert_eq!(chip.rap().read_reg(0x0080).unwrap(), 0x2222);
    }
}
