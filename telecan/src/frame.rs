//! Handling of CAN frames

use crate::bus::BusHandle;
use core::cmp::min;
use embedded_can::{Frame, Id};

/// Largest payload of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Identifier format of a frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameFormat {
    /// 11-bit identifier
    Standard,
    /// 29-bit identifier
    Extended,
}

/// Classic CAN 2.0 frame
///
/// Besides the on-wire content, a frame carries the [`BusHandle`] of the bus
/// it was received from, or that it is meant to be transmitted on. The handle
/// is only an identity; it keeps nothing alive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: Id,
    remote: bool,
    dlc: u8,
    data: [u8; MAX_DATA_LEN],
    origin: Option<BusHandle>,
}

impl CanFrame {
    /// Assemble a frame from decoded register content.
    ///
    /// Data length codes 9 to 15 are valid on the wire and mean 8 bytes.
    pub(crate) fn from_parts(id: Id, remote: bool, dlc: u8, data: [u8; MAX_DATA_LEN]) -> Self {
        Self {
            id,
            remote,
            dlc: min(dlc, MAX_DATA_LEN as u8),
            data,
            origin: None,
        }
    }

    /// Identifier format
    pub fn format(&self) -> FrameFormat {
        match self.id {
            Id::Standard(_) => FrameFormat::Standard,
            Id::Extended(_) => FrameFormat::Extended,
        }
    }

    /// Identifier as a plain integer
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => id.as_raw().into(),
            Id::Extended(id) => id.as_raw(),
        }
    }

    /// Bus the frame came from or is addressed to
    pub fn origin(&self) -> Option<BusHandle> {
        self.origin
    }

    /// Tag the frame with a bus identity
    pub fn with_origin(mut self, origin: BusHandle) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Full data buffer, including bytes past the DLC
    pub(crate) fn raw_data(&self) -> &[u8; MAX_DATA_LEN] {
        &self.data
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATA_LEN {
            return None;
        }
        let mut buf = [0; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);
        Some(Self::from_parts(id.into(), false, data.len() as u8, buf))
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DATA_LEN {
            return None;
        }
        Some(Self::from_parts(id.into(), true, dlc as u8, [0; MAX_DATA_LEN]))
    }

    fn is_extended(&self) -> bool {
        self.format() == FrameFormat::Extended
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc.into()
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..usize::from(self.dlc)]
        }
    }
}
