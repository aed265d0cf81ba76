//! Hand-off from the drivers to the frame dispatcher
//!
//! The dispatcher owns a queue of [`BusMessage`]s and drains it from thread
//! context. Drivers push into it from interrupt context, so pushing never
//! blocks: when the queue is full the message is handed back and the driver
//! counts the loss.

use crate::bus::BusHandle;
use crate::frame::CanFrame;
use heapless::mpmc::MpMcQueue;

/// Message passed from a driver to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// A frame was received
    Frame(CanFrame),
    /// The bus needs a deferred interrupt pass
    /// ([`Mcp2515::rx_callback`](crate::mcp2515::Mcp2515::rx_callback))
    Service(BusHandle),
    /// The bus recorded an error interrupt; its status is worth logging
    ErrorStatus(BusHandle),
}

/// Non-blocking sink for [`BusMessage`]s
pub trait DeliveryQueue {
    /// Push `msg` or hand it back immediately if there is no room
    fn try_deliver(&self, msg: BusMessage) -> Result<(), BusMessage>;
}

impl<const N: usize> DeliveryQueue for MpMcQueue<BusMessage, N> {
    fn try_deliver(&self, msg: BusMessage) -> Result<(), BusMessage> {
        self.enqueue(msg)
    }
}
