#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//! # telecan
//!
//! ## Overview
//! CAN controller drivers for a vehicle telemetry device.
//!
//! Two controller families sit behind the common [`CanBus`] contract:
//!
//! - [`sja1000`]: an integrated, memory-mapped SJA1000-compatible
//!   controller. All receive work runs in its interrupt handler.
//! - [`mcp2515`]: an external MCP2515-compatible controller on an SPI bus.
//!   Its interrupt handler only signals; register access is deferred to
//!   thread context.
//!
//! Both backends put identical frames on the wire for the same [`CanFrame`].
//!
//! Each backend is split into an interrupt half, which is bound to an
//! [`InterruptLine`] for as long as the driver lives, and a thread half that
//! owns the hardware resources and implements [`CanBus`]. The halves share a
//! [`BusContext`] holding the bus [`Status`] and a reference to the
//! dispatcher's [`DeliveryQueue`].
//!
//! ## Dispatching
//!
//! Received frames and service requests are pushed into a queue owned by the
//! application without ever blocking:
//!
//! ```no_run
//! use heapless::mpmc::Q16;
//! use telecan::dispatch::BusMessage;
//! use telecan::frame::CanFrame;
//!
//! // `service` runs the deferred pass of the SPI-attached bus,
//! // `Mcp2515::rx_callback`
//! fn dispatch(
//!     queue: &Q16<BusMessage>,
//!     mut service: impl FnMut() -> Option<CanFrame>,
//!     mut handle: impl FnMut(CanFrame),
//! ) {
//!     while let Some(msg) = queue.dequeue() {
//!         match msg {
//!             BusMessage::Frame(frame) => handle(frame),
//!             BusMessage::Service(_) => {
//!                 if let Some(frame) = service() {
//!                     handle(frame);
//!                 }
//!             }
//!             BusMessage::ErrorStatus(bus) => log::info!("bus {} reported errors", bus.0),
//!         }
//!     }
//! }
//! ```
//!
//! [`InterruptLine`]: telecan_core::InterruptLine
//! [`CanBus`]: bus::CanBus
//! [`BusContext`]: bus::BusContext
//! [`Status`]: bus::Status
//! [`DeliveryQueue`]: dispatch::DeliveryQueue
//! [`CanFrame`]: frame::CanFrame

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod interrupt;
pub mod mcp2515;
pub mod sja1000;

#[cfg(test)]
mod testing;

pub use embedded_can;
pub use fugit;
pub use telecan_core as core;
