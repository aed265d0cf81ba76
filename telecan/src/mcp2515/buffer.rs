//! Frame layout of the SPI-attached controller's buffers
//!
//! LOAD TX BUFFER and READ RX BUFFER both transfer the same 13 bytes:
//! `SIDH SIDL EID8 EID0 DLC D0..D7`.

use crate::frame::{CanFrame, MAX_DATA_LEN};
use embedded_can::{ExtendedId, Frame, Id, StandardId};

/// Bytes moved per buffer transfer
pub const BUFFER_LEN: usize = 13;

/// SIDL: extended identifier enable
const SIDL_EXIDE: u8 = 0x08;
/// SIDL: substitute remote request, flags a received standard remote frame
const SIDL_SRR: u8 = 0x10;
/// DLC: remote transmission request
const DLC_RTR: u8 = 0x40;

/// Pack a standard identifier into SIDH and SIDL
pub fn pack_standard(id: StandardId) -> [u8; 2] {
    let raw = id.as_raw();
    [(raw >> 3) as u8, ((raw << 5) & 0xe0) as u8]
}

/// Pack an extended identifier into SIDH, SIDL, EID8 and EID0
pub fn pack_extended(id: ExtendedId) -> [u8; 4] {
    let raw = id.as_raw();
    [
        (raw >> 21) as u8,
        ((raw >> 13) & 0xe0) as u8 | SIDL_EXIDE | ((raw >> 16) & 0x03) as u8,
        (raw >> 8) as u8,
        raw as u8,
    ]
}

/// Inverse of [`pack_standard`] and [`pack_extended`], keyed on EXIDE
pub fn unpack(id: [u8; 4]) -> Id {
    let [sidh, sidl, eid8, eid0] = id.map(u32::from);
    if sidl & u32::from(SIDL_EXIDE) != 0 {
        let raw = sidh << 21 | (sidl & 0xe0) << 13 | (sidl & 0x03) << 16 | eid8 << 8 | eid0;
        // The shifts leave at most 29 significant bits
        Id::Extended(unsafe { ExtendedId::new_unchecked(raw) })
    } else {
        let raw = (sidh << 3 | sidl >> 5) as u16;
        // The shifts leave at most 11 significant bits
        Id::Standard(unsafe { StandardId::new_unchecked(raw) })
    }
}

/// Lay out `frame` for LOAD TX BUFFER
pub fn encode(frame: &CanFrame) -> [u8; BUFFER_LEN] {
    let mut bytes = [0; BUFFER_LEN];
    match frame.id() {
        Id::Standard(id) => bytes[..2].copy_from_slice(&pack_standard(id)),
        Id::Extended(id) => bytes[..4].copy_from_slice(&pack_extended(id)),
    }
    bytes[4] = frame.dlc() as u8;
    if frame.is_remote_frame() {
        bytes[4] |= DLC_RTR;
    }
    bytes[5..].copy_from_slice(frame.raw_data());
    bytes
}

/// Decode the result of READ RX BUFFER
pub fn decode(bytes: &[u8; BUFFER_LEN]) -> CanFrame {
    let id = unpack([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let remote = bytes[4] & DLC_RTR != 0
        || (matches!(id, Id::Standard(_)) && bytes[1] & SIDL_SRR != 0);
    let dlc = bytes[4] & 0x0f;
    let mut data = [0; MAX_DATA_LEN];
    if !remote {
        let len = usize::from(dlc).min(MAX_DATA_LEN);
        data[..len].copy_from_slice(&bytes[5..5 + len]);
    }
    CanFrame::from_parts(id, remote, dlc, data)
}
