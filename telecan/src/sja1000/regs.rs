//! Register map of the integrated controller
//!
//! The controller is an SJA1000 in PeliCAN mode whose 8-bit registers sit on
//! a 32-bit stride; only the low byte of each word is implemented.

use super::mailbox::{Mailbox, MAILBOX_LEN};
use crate::config::BitTiming;
use bitfield::bitfield;
use vcell::VolatileCell;

/// Memory-mapped registers, in address order
#[repr(C)]
pub struct RegisterBlock {
    /// MOD
    pub mode: VolatileCell<u32>,
    /// CMR (write only)
    pub command: VolatileCell<u32>,
    /// SR
    pub status: VolatileCell<u32>,
    /// IR (cleared by reading)
    pub interrupt: VolatileCell<u32>,
    /// IER
    pub interrupt_enable: VolatileCell<u32>,
    _reserved0: VolatileCell<u32>,
    /// BTR0
    pub bus_timing_0: VolatileCell<u32>,
    /// BTR1
    pub bus_timing_1: VolatileCell<u32>,
    /// OCR
    pub output_control: VolatileCell<u32>,
    _reserved1: [VolatileCell<u32>; 2],
    /// ALC
    pub arbitration_lost: VolatileCell<u32>,
    /// ECC (cleared by reading)
    pub error_code: VolatileCell<u32>,
    /// EWLR
    pub error_warning_limit: VolatileCell<u32>,
    /// RXERR
    pub rx_error_counter: VolatileCell<u32>,
    /// TXERR
    pub tx_error_counter: VolatileCell<u32>,
    /// TX/RX buffer in operating mode, acceptance code and mask in reset mode
    pub mailbox: [VolatileCell<u32>; MAILBOX_LEN],
    /// RMC
    pub rx_message_counter: VolatileCell<u32>,
    /// RBSA
    pub rx_buffer_start: VolatileCell<u32>,
    /// CDR
    pub clock_divider: VolatileCell<u32>,
}

// Safety: thread-side writes run inside critical sections and the interrupt
// handler only touches the receive path and read-to-clear registers.
unsafe impl Sync for RegisterBlock {}

bitfield! {
    /// MOD
    #[derive(Copy, Clone)]
    pub struct Mode(u32);
    impl Debug;
    /// Sleep
    pub sleep, set_sleep: 4;
    /// Single acceptance filter
    pub acceptance_filter, set_acceptance_filter: 3;
    /// Self test
    pub self_test, set_self_test: 2;
    /// Listen only
    pub listen_only, set_listen_only: 1;
    /// Reset mode
    pub reset, set_reset: 0;
}

bitfield! {
    /// CMR
    #[derive(Copy, Clone)]
    pub struct Command(u32);
    impl Debug;
    /// Self reception request
    pub self_rx_request, set_self_rx_request: 4;
    /// Clear data overrun
    pub clear_overrun, set_clear_overrun: 3;
    /// Release receive buffer
    pub release_rx_buffer, set_release_rx_buffer: 2;
    /// Abort transmission
    pub abort_tx, set_abort_tx: 1;
    /// Transmission request
    pub tx_request, set_tx_request: 0;
}

bitfield! {
    /// SR
    #[derive(Copy, Clone)]
    pub struct Status(u32);
    impl Debug;
    /// Bus off
    pub bus_off, _: 7;
    /// Error status (a counter reached the warning limit)
    pub error, _: 6;
    /// Transmitting
    pub transmitting, _: 5;
    /// Receiving
    pub receiving, _: 4;
    /// Transmission complete
    pub tx_complete, _: 3;
    /// Transmit buffer released
    pub tx_buffer_free, _: 2;
    /// Data overrun
    pub data_overrun, _: 1;
    /// Receive buffer holds a frame
    pub rx_buffer_full, _: 0;
}

bitfield! {
    /// BTR0
    #[derive(Copy, Clone)]
    pub struct BusTiming0(u32);
    impl Debug;
    /// Synchronization jump width
    pub u8, sjw, set_sjw: 7, 6;
    /// Baud rate prescaler
    pub u8, brp, set_brp: 5, 0;
}

bitfield! {
    /// BTR1
    #[derive(Copy, Clone)]
    pub struct BusTiming1(u32);
    impl Debug;
    /// Triple sampling
    pub sam, set_sam: 7;
    /// Time segment 2
    pub u8, tseg2, set_tseg2: 6, 4;
    /// Time segment 1
    pub u8, tseg1, set_tseg1: 3, 0;
}

bitfield! {
    /// CDR
    #[derive(Copy, Clone)]
    pub struct ClockDivider(u32);
    impl Debug;
    /// PeliCAN register layout
    pub pelican, set_pelican: 7;
    /// Disable CLKOUT
    pub clock_off, set_clock_off: 3;
}

/// OCR output mode selecting normal bus drive
const OUTPUT_MODE_NORMAL: u32 = 0b10;

impl RegisterBlock {
    /// Register block at `address`
    ///
    /// # Safety
    /// `address` must be the start of the controller's register block, and the
    /// returned reference must be the only way the block is accessed.
    pub unsafe fn from_address(address: usize) -> &'static Self {
        &*(address as *const Self)
    }

    /// Read-modify-write of MOD
    pub fn modify_mode(&self, f: impl FnOnce(&mut Mode)) {
        let mut mode = Mode(self.mode.get());
        f(&mut mode);
        self.mode.set(mode.0);
    }

    /// Issue a command
    pub fn command(&self, f: impl FnOnce(&mut Command)) {
        let mut cmd = Command(0);
        f(&mut cmd);
        self.command.set(cmd.0);
    }

    /// Read SR
    pub fn status(&self) -> Status {
        Status(self.status.get())
    }

    /// Program BTR0 and BTR1. Only effective in reset mode.
    pub fn set_bit_timing(&self, timing: &BitTiming) {
        let mut btr0 = BusTiming0(0);
        btr0.set_sjw(timing.sjw);
        btr0.set_brp(timing.prescaler);
        self.bus_timing_0.set(btr0.0);

        let mut btr1 = BusTiming1(0);
        btr1.set_tseg1(timing.tseg1);
        btr1.set_tseg2(timing.tseg2);
        btr1.set_sam(timing.triple_sampling);
        self.bus_timing_1.set(btr1.0);
    }

    /// Accept every frame. Only effective in reset mode.
    pub fn accept_all(&self) {
        let (code, mask) = self.mailbox.split_at(4);
        for reg in code {
            reg.set(0);
        }
        for reg in &mask[..4] {
            reg.set(0xff);
        }
    }

    /// Drive the bus in normal output mode
    pub fn set_normal_output(&self) {
        self.output_control.set(OUTPUT_MODE_NORMAL);
    }

    /// Select the PeliCAN register layout
    pub fn select_pelican(&self) {
        let mut cdr = ClockDivider(self.clock_divider.get());
        cdr.set_pelican(true);
        self.clock_divider.set(cdr.0);
    }

    /// Copy a frame into the transmit buffer
    pub fn write_mailbox(&self, mailbox: &Mailbox) {
        for (reg, byte) in self.mailbox.iter().zip(mailbox.as_bytes()) {
            reg.set(u32::from(*byte));
        }
    }

    /// Copy the receive buffer out
    pub fn read_mailbox(&self) -> Mailbox {
        let mut bytes = [0; MAILBOX_LEN];
        for (byte, reg) in bytes.iter_mut().zip(&self.mailbox) {
            *byte = reg.get() as u8;
        }
        Mailbox::from_bytes(bytes)
    }

    /// Receive error counter
    pub fn rx_errors(&self) -> u16 {
        (self.rx_error_counter.get() & 0xff) as u16
    }

    /// Transmit error counter
    pub fn tx_errors(&self) -> u16 {
        (self.tx_error_counter.get() & 0xff) as u16
    }
}

#[cfg(test)]
impl RegisterBlock {
    /// All registers zero, backed by plain memory
    pub(crate) fn zeroed() -> Self {
        Self {
            mode: VolatileCell::new(0),
            command: VolatileCell::new(0),
            status: VolatileCell::new(0),
            interrupt: VolatileCell::new(0),
            interrupt_enable: VolatileCell::new(0),
            _reserved0: VolatileCell::new(0),
            bus_timing_0: VolatileCell::new(0),
            bus_timing_1: VolatileCell::new(0),
            output_control: VolatileCell::new(0),
            _reserved1: core::array::from_fn(|_| VolatileCell::new(0)),
            arbitration_lost: VolatileCell::new(0),
            error_code: VolatileCell::new(0),
            error_warning_limit: VolatileCell::new(0),
            rx_error_counter: VolatileCell::new(0),
            tx_error_counter: VolatileCell::new(0),
            mailbox: core::array::from_fn(|_| VolatileCell::new(0)),
            rx_message_counter: VolatileCell::new(0),
            rx_buffer_start: VolatileCell::new(0),
            clock_divider: VolatileCell::new(0),
        }
    }
}
