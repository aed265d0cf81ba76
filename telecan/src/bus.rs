//! Common contract of the CAN bus backends

use crate::config::CanSpeed;
use crate::dispatch::{BusMessage, DeliveryQueue};
use crate::error::Error;
use crate::frame::CanFrame;
use core::cell::Cell;
use critical_section::Mutex;
use fugit::MillisDurationU32;

/// Identity of one physical bus
///
/// Frames carry it as their origin. It is a plain tag and owns nothing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BusHandle(pub u8);

/// Operating mode of a bus
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CanMode {
    /// Controller held in reset / sleep
    #[default]
    Off,
    /// Receive only, never acknowledge or transmit
    Listen,
    /// Full participant
    Active,
}

/// Power state requested by the system
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum PowerMode {
    /// Running with the last configured mode and speed
    On,
    /// Light sleep
    Sleep,
    /// Deep sleep
    DeepSleep,
    /// Powered down
    #[default]
    Off,
}

/// Counters and error state of a bus
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Status {
    /// Interrupts taken
    pub interrupts: u32,
    /// Frames received and handed to the dispatcher
    pub packets_rx: u32,
    /// Frames handed to the controller for transmission
    pub packets_tx: u32,
    /// Frames that had to wait in the transmit backpressure slot
    pub txbuf_delay: u32,
    /// Frames lost inside the controller
    pub rxbuf_overflow: u16,
    /// Writes refused because the transmit path stayed occupied
    pub txbuf_overflow: u16,
    /// Received frames dropped because the delivery queue was full
    pub rx_dropped: u32,
    /// Driver specific snapshot of the last error interrupt
    pub error_flags: u32,
    /// Receive error counter
    pub errors_rx: u16,
    /// Transmit error counter
    pub errors_tx: u16,
}

impl Status {
    /// All counters zero
    pub const fn new() -> Self {
        Self {
            interrupts: 0,
            packets_rx: 0,
            packets_tx: 0,
            txbuf_delay: 0,
            rxbuf_overflow: 0,
            txbuf_overflow: 0,
            rx_dropped: 0,
            error_flags: 0,
            errors_rx: 0,
            errors_tx: 0,
        }
    }
}

/// State a bus shares between its interrupt handler and thread context
///
/// Everything in here may be touched from interrupt context, so every access
/// goes through a critical section and nothing blocks.
pub struct BusContext<'a, Q> {
    handle: BusHandle,
    queue: &'a Q,
    status: Mutex<Cell<Status>>,
    service_requested: Mutex<Cell<bool>>,
}

impl<'a, Q: DeliveryQueue> BusContext<'a, Q> {
    /// Create the context of bus `handle` delivering into `queue`
    pub const fn new(handle: BusHandle, queue: &'a Q) -> Self {
        Self {
            handle,
            queue,
            status: Mutex::new(Cell::new(Status::new())),
            service_requested: Mutex::new(Cell::new(false)),
        }
    }

    /// Identity of the bus
    pub fn handle(&self) -> BusHandle {
        self.handle
    }

    /// Snapshot of the counters
    pub fn status(&self) -> Status {
        critical_section::with(|cs| self.status.borrow(cs).get())
    }

    pub(crate) fn update_status(&self, f: impl FnOnce(&mut Status)) {
        critical_section::with(|cs| {
            let cell = self.status.borrow(cs);
            let mut status = cell.get();
            f(&mut status);
            cell.set(status);
        })
    }

    pub(crate) fn clear_status(&self) {
        critical_section::with(|cs| self.status.borrow(cs).set(Status::new()))
    }

    /// Hand a received frame to the dispatcher, tagged with this bus.
    ///
    /// Returns `false` if the frame was dropped.
    pub(crate) fn deliver_frame(&self, frame: CanFrame) -> bool {
        let delivered = self
            .queue
            .try_deliver(BusMessage::Frame(frame.with_origin(self.handle)))
            .is_ok();
        self.update_status(|s| {
            if delivered {
                s.packets_rx = s.packets_rx.wrapping_add(1);
            } else {
                s.rx_dropped = s.rx_dropped.wrapping_add(1);
            }
        });
        delivered
    }

    pub(crate) fn report_error(&self) -> bool {
        self.queue
            .try_deliver(BusMessage::ErrorStatus(self.handle))
            .is_ok()
    }

    /// Ask the dispatcher for a deferred interrupt pass.
    ///
    /// At most one request is outstanding at a time. If the queue is full the
    /// request is forgotten so the next call tries again.
    pub(crate) fn request_service(&self) -> bool {
        let pending = critical_section::with(|cs| self.service_requested.borrow(cs).replace(true));
        if pending {
            return false;
        }
        if self
            .queue
            .try_deliver(BusMessage::Service(self.handle))
            .is_err()
        {
            critical_section::with(|cs| self.service_requested.borrow(cs).set(false));
            return false;
        }
        true
    }

    /// Called by the deferred pass before it reads the controller, so that
    /// interrupts arriving while it runs request a new pass.
    pub(crate) fn take_service_request(&self) {
        critical_section::with(|cs| self.service_requested.borrow(cs).set(false));
    }
}

/// Common CAN bus functionality
///
/// Implemented by every backend and consumed by the dispatcher. Received
/// frames do not come out of this trait; they are pushed into the
/// [`DeliveryQueue`] given to the backend's [`BusContext`].
pub trait CanBus {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Identity of the bus
    fn handle(&self) -> BusHandle;

    /// Current operating mode
    fn mode(&self) -> CanMode;

    /// Speed of the last successful start
    fn speed(&self) -> Option<CanSpeed>;

    /// Configure the controller for `speed` and bring it up in `mode`.
    ///
    /// [`CanMode::Off`] is equivalent to [`CanBus::stop`].
    fn start(&mut self, mode: CanMode, speed: CanSpeed) -> Result<(), Error>;

    /// Take the controller off the bus. Calling it repeatedly has no effect
    /// beyond the first call.
    fn stop(&mut self) -> Result<(), Error>;

    /// Queue `frame` for transmission.
    ///
    /// Returns once the frame is handed to the controller or parked; it does
    /// not wait for the frame to be on the wire. `wait` bounds how long a
    /// backend may wait for room on its transmit path.
    fn write(&mut self, frame: &CanFrame, wait: MillisDurationU32) -> Result<(), Error>;

    /// Current power state
    fn power_mode(&self) -> PowerMode;

    /// Change the power state.
    ///
    /// [`PowerMode::On`] restarts the bus with the last mode and speed,
    /// every other state stops it.
    fn set_power_mode(&mut self, power: PowerMode);

    /// Snapshot of the counters
    fn status(&self) -> Status;

    /// Reset all counters
    fn clear_status(&mut self);

    /// Write the counters to the log
    fn log_status(&self) {
        log_counters(self.name(), &self.status());
    }
}

pub(crate) fn log_counters(name: &str, s: &Status) {
    log::info!(
        "{}: intr={} rxpkt={} txpkt={} errflags={:#x} rxerr={} txerr={} rxovr={} txovr={} txdelay={} rxdrop={}",
        name,
        s.interrupts,
        s.packets_rx,
        s.packets_tx,
        s.error_flags,
        s.errors_rx,
        s.errors_tx,
        s.rxbuf_overflow,
        s.txbuf_overflow,
        s.txbuf_delay,
        s.rx_dropped,
    );
}

/// Shared implementation of [`CanBus::set_power_mode`]
pub(crate) fn apply_power_mode<B: CanBus + ?Sized>(bus: &mut B, power: PowerMode) {
    let result = match power {
        PowerMode::On => match (bus.mode(), bus.speed()) {
            (CanMode::Off, _) | (_, None) => Ok(()),
            (mode, Some(speed)) => bus.start(mode, speed),
        },
        PowerMode::Sleep | PowerMode::DeepSleep | PowerMode::Off => bus.stop(),
    };
    if let Err(e) = result {
        log::error!("{}: power mode {:?} failed: {:?}", bus.name(), power, e);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_can::{Frame, StandardId};
    use heapless::mpmc::Q2;

    fn frame() -> CanFrame {
        CanFrame::new(StandardId::new(0x100).unwrap(), &[1, 2]).unwrap()
    }

    #[test]
    fn delivered_frames_are_tagged_and_counted() {
        let queue: Q2<BusMessage> = Q2::new();
        let ctx = BusContext::new(BusHandle(3), &queue);
        assert!(ctx.deliver_frame(frame()));
        assert!(ctx.deliver_frame(frame()));
        assert!(!ctx.deliver_frame(frame()));
        let status = ctx.status();
        assert_eq!(status.packets_rx, 2);
        assert_eq!(status.rx_dropped, 1);
        match queue.dequeue() {
            Some(BusMessage::Frame(f)) => assert_eq!(f.origin(), Some(BusHandle(3))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn service_requests_are_coalesced() {
        let queue: Q2<BusMessage> = Q2::new();
        let ctx = BusContext::new(BusHandle(1), &queue);
        assert!(ctx.request_service());
        assert!(!ctx.request_service());
        assert!(!ctx.request_service());
        assert_eq!(queue.dequeue(), Some(BusMessage::Service(BusHandle(1))));
        assert_eq!(queue.dequeue(), None);
        ctx.take_service_request();
        assert!(ctx.request_service());
    }

    #[test]
    fn failed_service_request_is_retried() {
        let queue: Q2<BusMessage> = Q2::new();
        queue.enqueue(BusMessage::ErrorStatus(BusHandle(9))).unwrap();
        queue.enqueue(BusMessage::ErrorStatus(BusHandle(9))).unwrap();
        let ctx = BusContext::new(BusHandle(1), &queue);
        assert!(!ctx.request_service());
        queue.dequeue();
        assert!(ctx.request_service());
    }
}
