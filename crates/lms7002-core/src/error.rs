// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Crate-wide error types.
//!
//! Each subsystem owns its own error enum ([`crate::rap::RapError`],
//! [`crate::chip::ChipError`], [`crate::calibration::CalibrationError`],
//! [`crate::streamer::StreamError`]); this module aggregates them behind one
//! [`Error`] so callers that cross subsystem boundaries (for example a
//! calibration routine that both talks to the chip and fails with its own
//! precondition errors) can use a single `?`-friendly `Result`.

use std::fmt;

use crate::calibration::CalibrationError;
use crate::chip::ChipError;
use crate::rap::RapError;
use crate::streamer::StreamError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Aggregated error type spanning all subsystems.
#[derive(Debug)]
pub enum Error {
    /// Register Access Port failure (transport I/O, timeout).
    Rap(RapError),
    /// Chip Control failure (PLL lock, invalid bit-field value).
    Chip(ChipError),
    /// Filter Calibrator failure (out-of-range input, invalid precondition).
    Calibration(CalibrationError),
    /// Streamer failure (setup/close while running).
    Stream(StreamError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Rap(e) => write!(f, "register access port error: {e}"),
            Error::Chip(e) => write!(f, "chip control error: {e}"),
            Error::Calibration(e) => write!(f, "calibration error: {e}"),
            Error::Stream(e) => write!(f, "streamer error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Rap(e) => Some(e),
            Error::Chip(e) => Some(e),
            Error::Calibration(e) => Some(e),
            Error::Stream(e) => Some(e),
        }
    }
}

impl From<RapError> for Error {
    fn from(e: RapError) -> Self {
        Error::Rap(e)
    }
}

impl From<ChipError> for Error {
    fn from(e: ChipError) -> Self {
        Error::Chip(e)
    }
}

impl From<CalibrationError> for Error {
    fn from(e: CalibrationError) -> Self {
        Error::Calibration(e)
    }
}

impl From<StreamError> for Error {
    fn from(e: StreamError) -> Self {
        Error::Stream(e)
    }
}
