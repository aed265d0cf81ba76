//! Single-frame transmit backpressure

use crate::frame::CanFrame;
use core::convert::Infallible;

/// Holds at most one frame waiting for a free transmit buffer
///
/// A parked frame is never replaced; it leaves the slot only when it is
/// taken for transmission.
#[derive(Debug, Default)]
pub struct TxSlot {
    frame: Option<CanFrame>,
}

impl TxSlot {
    /// Empty slot
    pub const fn new() -> Self {
        Self { frame: None }
    }

    /// True while a frame is parked
    pub fn is_occupied(&self) -> bool {
        self.frame.is_some()
    }

    /// Park `frame`, or [`nb::Error::WouldBlock`] if the slot is taken
    pub fn park(&mut self, frame: CanFrame) -> nb::Result<(), Infallible> {
        if self.frame.is_some() {
            return Err(nb::Error::WouldBlock);
        }
        self.frame = Some(frame);
        Ok(())
    }

    /// Remove the parked frame
    pub fn take(&mut self) -> Option<CanFrame> {
        self.frame.take()
    }

    /// The parked frame
    pub fn peek(&self) -> Option<&CanFrame> {
        self.frame.as_ref()
    }
}
