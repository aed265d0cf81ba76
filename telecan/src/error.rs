//! Driver errors

use crate::config::{BitTimingError, CanSpeed};
use telecan_core::{BindError, PinError};

/// Errors returned by the bus backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The controller has no timing configuration for the speed
    UnsupportedSpeed(CanSpeed),
    /// Bit timing registers could not be derived
    BitTiming(BitTimingError),
    /// A pin could not be configured
    Pin(PinError),
    /// The interrupt handler could not be bound
    Interrupt(BindError),
    /// Frames can only be written in active mode
    NotActive,
    /// The transmit path stayed occupied
    TxBusy,
    /// The controller did not enter the requested operation mode
    ModeChangeTimeout(u8),
    /// A register did not read back the written value
    RegisterVerify {
        /// Register address
        address: u8,
        /// Value written
        expected: u8,
        /// Last value read
        actual: u8,
    },
    /// Bit timing registers did not read back the configured values
    ConfigurationMismatch,
}

impl From<BitTimingError> for Error {
    fn from(value: BitTimingError) -> Self {
        match value {
            BitTimingError::UnsupportedSpeed(speed) => Self::UnsupportedSpeed(speed),
            other => Self::BitTiming(other),
        }
    }
}

impl From<PinError> for Error {
    fn from(value: PinError) -> Self {
        Self::Pin(value)
    }
}

impl From<BindError> for Error {
    fn from(value: BindError) -> Self {
        Self::Interrupt(value)
    }
}

impl embedded_can::Error for Error {
    fn kind(&self) -> embedded_can::ErrorKind {
        match self {
            Self::TxBusy => embedded_can::ErrorKind::Overrun,
            _ => embedded_can::ErrorKind::Other,
        }
    }
}
