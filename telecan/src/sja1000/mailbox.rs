//! Frame layout of the integrated controller's transmit/receive buffer
//!
//! ```text
//! byte    0     1..=2 / 1..=4     3..=10 / 5..=12
//!        FIR    identifier         data
//! ```
//! The identifier is left aligned: a standard id occupies the upper 11 bits
//! of two bytes, an extended id the upper 29 bits of four bytes.

use crate::frame::{CanFrame, FrameFormat, MAX_DATA_LEN};
use bitfield::bitfield;
use embedded_can::{ExtendedId, Frame, Id, StandardId};

/// Number of registers spanned by the buffer
pub const MAILBOX_LEN: usize = 13;

bitfield! {
    /// Frame information byte (FIR)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FrameInfo(u8);
    impl Debug;
    /// Frame format: extended identifier
    pub extended, set_extended: 7;
    /// Remote transmission request
    pub remote, set_remote: 6;
    /// Data length code
    pub u8, dlc, set_dlc: 3, 0;
}

/// Pack a standard identifier into its two buffer bytes
pub fn pack_standard(id: StandardId) -> [u8; 2] {
    let raw = id.as_raw();
    [(raw >> 3) as u8, ((raw << 5) & 0xe0) as u8]
}

/// Pack an extended identifier into its four buffer bytes
pub fn pack_extended(id: ExtendedId) -> [u8; 4] {
    (id.as_raw() << 3).to_be_bytes()
}

/// Inverse of [`pack_standard`]
pub fn unpack_standard(bytes: [u8; 2]) -> StandardId {
    let raw = (u16::from(bytes[0]) << 3) | (u16::from(bytes[1]) >> 5);
    // The shifts leave at most 11 significant bits
    unsafe { StandardId::new_unchecked(raw) }
}

/// Inverse of [`pack_extended`]
pub fn unpack_extended(bytes: [u8; 4]) -> ExtendedId {
    let raw = u32::from_be_bytes(bytes) >> 3;
    // The shift leaves at most 29 significant bits
    unsafe { ExtendedId::new_unchecked(raw) }
}

/// Image of the controller's frame buffer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Mailbox {
    bytes: [u8; MAILBOX_LEN],
}

impl Mailbox {
    /// Buffer content as read from the registers
    pub fn from_bytes(bytes: [u8; MAILBOX_LEN]) -> Self {
        Self { bytes }
    }

    /// Lay out `frame` for transmission
    pub fn encode(frame: &CanFrame) -> Self {
        let mut bytes = [0; MAILBOX_LEN];
        let mut info = FrameInfo(0);
        info.set_extended(frame.is_extended());
        info.set_remote(frame.is_remote_frame());
        info.set_dlc(frame.dlc() as u8);
        bytes[0] = info.0;

        let data_start = match frame.id() {
            Id::Standard(id) => {
                bytes[1..3].copy_from_slice(&pack_standard(id));
                3
            }
            Id::Extended(id) => {
                bytes[1..5].copy_from_slice(&pack_extended(id));
                5
            }
        };
        let data = frame.data();
        bytes[data_start..data_start + data.len()].copy_from_slice(data);
        Self { bytes }
    }

    /// Frame information byte
    pub fn info(&self) -> FrameInfo {
        FrameInfo(self.bytes[0])
    }

    fn format(&self) -> FrameFormat {
        if self.info().extended() {
            FrameFormat::Extended
        } else {
            FrameFormat::Standard
        }
    }

    fn data_start(&self) -> usize {
        match self.format() {
            FrameFormat::Standard => 3,
            FrameFormat::Extended => 5,
        }
    }

    fn data_len(&self) -> usize {
        let info = self.info();
        if info.remote() {
            0
        } else {
            usize::from(info.dlc()).min(MAX_DATA_LEN)
        }
    }

    /// Registers that carry the frame, in write order
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.data_start() + self.data_len()]
    }

    /// Decode the buffer into a frame
    pub fn decode(&self) -> CanFrame {
        let info = self.info();
        let b = &self.bytes;
        let id = match self.format() {
            FrameFormat::Standard => Id::Standard(unpack_standard([b[1], b[2]])),
            FrameFormat::Extended => Id::Extended(unpack_extended([b[1], b[2], b[3], b[4]])),
        };
        let start = self.data_start();
        let mut data = [0; MAX_DATA_LEN];
        let len = self.data_len();
        data[..len].copy_from_slice(&b[start..start + len]);
        CanFrame::from_parts(id, info.remote(), info.dlc(), data)
    }
}
