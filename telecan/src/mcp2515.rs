//! SPI-attached MCP2515-compatible controller
//!
//! Register access needs a bus transaction, which cannot run in interrupt
//! context, so servicing is split in two:
//! - [`Mcp2515Irq`] runs on the falling edge of the controller's INT line and
//!   only asks the dispatcher for a deferred pass
//!   ([`BusMessage::Service`](crate::dispatch::BusMessage::Service))
//! - the dispatcher then calls [`Mcp2515::rx_callback`] from thread context,
//!   which reads the interrupt flags, drains a receive buffer, refills the
//!   transmit buffer and records errors
//!
//! Only transmit buffer 0 is used. A frame written while it is busy waits in
//! a single-frame [`TxSlot`] until the buffer frees up.

pub mod buffer;
pub mod regs;
mod slot;

pub use slot::TxSlot;

use crate::bus::{apply_power_mode, BusContext, BusHandle, CanBus, CanMode, PowerMode, Status};
use crate::config::{CanSpeed, Cnf, Mcp2515Config};
use crate::dispatch::DeliveryQueue;
use crate::error::Error;
use crate::frame::CanFrame;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use fugit::MillisDurationU32;
use regs::{
    Eflg, Instruction, Intf, OpMode, ReadStatus, Register, TxbCtrl, BFPCTRL_RUNNING,
    BFPCTRL_STOPPED,
    CANCTRL_ABAT, CANCTRL_OSM, OP_MODE_MASK, RXB0CTRL_ANY_ROLLOVER, RXB0CTRL_VERIFY_MASK,
};
use telecan_core::{Direction, Edge, InterruptHandler, InterruptLine, PinConfig};

/// Largest single transaction: instruction, address and a full buffer
const MAX_TRANSFER: usize = 2 + buffer::BUFFER_LEN;

/// `error_flags` markers of a deferred pass, below the CANINTF and EFLG bytes
const SERVICED_TX: u32 = 0x0100;
const RXB1_OVERFLOW: u32 = 0x0200;
const RXB0_OVERFLOW: u32 = 0x0400;
const OVERFLOW_CLEARED: u32 = 0x0800;
const ERRORS_CLEARED: u32 = 0x1000;

/// Error counters of a bus-off controller carry this bit
const BUS_OFF_COUNTER: u16 = 0x100;
/// Transmit error count at which the controller turns error passive
const TX_ERROR_PASSIVE: u16 = 128;

/// Interrupt half of the SPI-attached backend
///
/// Bound to the host pin wired to the controller's INT output.
pub struct Mcp2515Irq<'a, Q> {
    bus: BusContext<'a, Q>,
}

impl<'a, Q: DeliveryQueue> Mcp2515Irq<'a, Q> {
    /// Create the handler of bus `handle`, signalling into `queue`
    pub const fn new(handle: BusHandle, queue: &'a Q) -> Self {
        Self {
            bus: BusContext::new(handle, queue),
        }
    }

    /// State shared with the thread half
    pub fn context(&self) -> &BusContext<'a, Q> {
        &self.bus
    }
}

impl<Q: DeliveryQueue + Sync> InterruptHandler for Mcp2515Irq<'_, Q> {
    fn on_interrupt(&self) {
        self.bus
            .update_status(|s| s.interrupts = s.interrupts.wrapping_add(1));
        self.bus.request_service();
    }
}

/// Thread half of the SPI-attached backend
pub struct Mcp2515<'a, SPI, P, L: InterruptLine<'a>, D, Q> {
    name: &'static str,
    irq: &'a Mcp2515Irq<'a, Q>,
    spi: SPI,
    pins: P,
    line: L,
    delay: D,
    config: Mcp2515Config,
    mode: CanMode,
    speed: Option<CanSpeed>,
    power: PowerMode,
    bound: bool,
    tx_slot: TxSlot,
    last_errflag: u8,
}

impl<'a, SPI, P, L, D, Q> Mcp2515<'a, SPI, P, L, D, Q>
where
    SPI: SpiDevice,
    P: PinConfig,
    L: InterruptLine<'a>,
    D: DelayNs,
    Q: DeliveryQueue + Sync,
{
    /// Create a powered down instance
    ///
    /// Nothing is sent to the controller until [`CanBus::start`].
    pub fn new(
        name: &'static str,
        irq: &'a Mcp2515Irq<'a, Q>,
        spi: SPI,
        pins: P,
        line: L,
        delay: D,
        config: Mcp2515Config,
    ) -> Self {
        Self {
            name,
            irq,
            spi,
            pins,
            line,
            delay,
            config,
            mode: CanMode::Off,
            speed: None,
            power: PowerMode::Off,
            bound: false,
            tx_slot: TxSlot::new(),
            last_errflag: 0,
        }
    }

    /// Frame waiting for the transmit buffer
    pub fn parked_frame(&self) -> Option<&CanFrame> {
        self.tx_slot.peek()
    }

    /// Deferred interrupt pass, run by the dispatcher on
    /// [`BusMessage::Service`](crate::dispatch::BusMessage::Service).
    ///
    /// Handles at most one received frame per pass, RXB0 first. Returns the
    /// frame, tagged with this bus, if one was received. If the INT line is
    /// still asserted afterwards another pass is requested.
    ///
    /// A message error while TXB0 still requests transmission and the
    /// transmit error counter is at least 128 aborts that transmission.
    pub fn rx_callback(&mut self) -> Option<CanFrame> {
        self.irq.bus.take_service_request();

        // CANINTF, EFLG, CANSTAT, CANCTRL, TXB0CTRL
        let mut flags = [0; 5];
        self.read_registers(Register::Canintf, &mut flags);
        let intstat = Intf(flags[0]);
        let errflag = Eflg(flags[1]);
        let txb0ctrl = TxbCtrl(flags[4]);
        if intstat.0 == 0 {
            self.drain_slot();
            return None;
        }

        let (rx, serviced) = if intstat.rx0if() {
            (Some(Instruction::ReadRx0), 0x01)
        } else if intstat.rx1if() {
            (Some(Instruction::ReadRx1), 0x02)
        } else {
            (None, intstat.0)
        };
        let mut error_flags =
            u32::from(intstat.0) << 24 | u32::from(errflag.0) << 16 | u32::from(serviced);

        let frame = rx.map(|instruction| {
            let frame = self.read_rx_buffer(instruction);
            frame.with_origin(self.irq.bus.handle())
        });

        if intstat.tx() != 0 {
            self.modify_register(Register::Canintf, intstat.tx(), 0);
            error_flags |= SERVICED_TX;
        }

        let previous = self.irq.bus.status();
        let mut rx_overflow = false;
        let mut log_status = false;
        let mut counters = None;
        if intstat.errors() != 0 {
            if errflag.rx1ovr() {
                rx_overflow = true;
                error_flags |= RXB1_OVERFLOW;
            }
            if errflag.rx0ovr() {
                // The frame went on into RXB1
                error_flags |= RXB0_OVERFLOW;
            }
            let (tx, rx) = self.read_error_counters(errflag);
            counters = Some((tx, rx));
            if intstat.merrf() && txb0ctrl.txreq() && tx >= TX_ERROR_PASSIVE {
                // The controller keeps retrying a frame nobody acknowledges
                if self.abort_transmission() {
                    log::warn!("{}: transmission aborted, TEC {}", self.name, tx);
                }
            } else {
                log_status = true;
            }
        } else if previous.errors_tx != 0 || previous.errors_rx != 0 {
            // Follow the recovery of the error counters
            let (tx, rx) = self.read_error_counters(errflag);
            if tx == 0 && rx == 0 {
                error_flags = 0;
            }
            counters = Some((tx, rx));
        }

        if errflag.0 & Eflg::RX_OVERFLOW != 0 {
            error_flags |= OVERFLOW_CLEARED;
            self.modify_register(Register::Eflg, errflag.0 & Eflg::RX_OVERFLOW, 0);
        }

        let state = errflag.0 & !Eflg::RX_OVERFLOW;
        let last_state = self.last_errflag & !Eflg::RX_OVERFLOW;
        if state != 0 && state != last_state {
            log::warn!("{}: EFLG {:?}", self.name, Eflg(state));
        }
        if state == 0 && last_state != 0 {
            log::info!("{}: error state recovered", self.name);
            log_status = true;
        }
        self.last_errflag = errflag.0;

        if intstat.errors() != 0 {
            error_flags |= ERRORS_CLEARED;
            self.modify_register(Register::Canintf, intstat.errors(), 0);
        }

        // A failed or aborted frame frees TXB0 without raising TXnIF
        self.drain_slot();

        let received = frame.is_some();
        self.irq.bus.update_status(|s| {
            s.error_flags = error_flags;
            if let Some((tx, rx)) = counters {
                s.errors_tx = tx;
                s.errors_rx = rx;
            }
            if rx_overflow {
                s.rxbuf_overflow = s.rxbuf_overflow.wrapping_add(1);
            }
            if received {
                s.packets_rx = s.packets_rx.wrapping_add(1);
            }
        });
        if log_status {
            self.log_status();
        }

        // The line is level driven; with flags left there is no new edge
        if let Ok(false) = self.pins.is_high(self.config.int_pin) {
            self.irq.bus.request_service();
        }
        frame
    }

    /// Log the configuration, interrupt and error registers
    pub fn view_registers(&mut self) {
        let mut regs = [0; 9];
        self.read_registers(Register::Cnf3, &mut regs);
        log::info!(
            "{}: CNF {:#04x} {:#04x} {:#04x}",
            self.name,
            regs[2],
            regs[1],
            regs[0]
        );
        log::info!(
            "{}: CANINTE {:#04x} CANINTF {:#04x} EFLG {:#04x} CANSTAT {:#04x} CANCTRL {:#04x} TXB0CTRL {:#04x}",
            self.name,
            regs[3],
            regs[4],
            regs[5],
            regs[6],
            regs[7],
            regs[8]
        );
        let mut counters = [0; 2];
        self.read_registers(Register::Tec, &mut counters);
        log::info!(
            "{}: TEC {:#04x} REC {:#04x}",
            self.name,
            counters[0],
            counters[1]
        );
        let bfpctrl = self.read_register(Register::Bfpctrl);
        log::info!("{}: BFPCTRL {:#04x}", self.name, bfpctrl);
    }

    fn transfer(&mut self, buf: &mut [u8]) {
        // Bus transaction failures are unrecoverable
        if let Err(e) = self.spi.transfer_in_place(buf) {
            panic!("{}: SPI transaction failed: {:?}", self.name, e);
        }
    }

    fn read_registers(&mut self, start: Register, out: &mut [u8]) {
        let mut buf = [0; MAX_TRANSFER];
        let len = 2 + out.len();
        buf[0] = Instruction::Read as u8;
        buf[1] = start as u8;
        self.transfer(&mut buf[..len]);
        out.copy_from_slice(&buf[2..len]);
    }

    fn read_register(&mut self, reg: Register) -> u8 {
        let mut value = [0];
        self.read_registers(reg, &mut value);
        value[0]
    }

    fn write_registers(&mut self, start: Register, data: &[u8]) {
        let mut buf = [0; MAX_TRANSFER];
        let len = 2 + data.len();
        buf[0] = Instruction::Write as u8;
        buf[1] = start as u8;
        buf[2..len].copy_from_slice(data);
        self.transfer(&mut buf[..len]);
    }

    fn write_register(&mut self, reg: Register, value: u8) {
        self.write_registers(reg, &[value]);
    }

    fn modify_register(&mut self, reg: Register, mask: u8, value: u8) {
        self.transfer(&mut [Instruction::BitModify as u8, reg as u8, mask, value]);
    }

    fn read_status(&mut self) -> ReadStatus {
        let mut buf = [Instruction::ReadStatus as u8, 0];
        self.transfer(&mut buf);
        ReadStatus(buf[1])
    }

    fn reset(&mut self) {
        self.transfer(&mut [Instruction::Reset as u8]);
        self.delay.delay_ms(self.config.reset_settle.to_millis());
    }

    /// Write `value` and poll until the bits in `mask` read back
    fn write_register_verified(&mut self, reg: Register, value: u8, mask: u8) -> Result<(), Error> {
        self.write_register(reg, value);
        let timeout = self.config.verify_timeout.to_millis();
        let poll = self.config.verify_poll.to_millis().max(1);
        let mut waited = 0;
        loop {
            let actual = self.read_register(reg);
            if actual & mask == value & mask {
                return Ok(());
            }
            if waited >= timeout {
                log::error!(
                    "{}: register {:#04x} reads {:#04x}, wrote {:#04x}",
                    self.name,
                    reg as u8,
                    actual,
                    value
                );
                return Err(Error::RegisterVerify {
                    address: reg as u8,
                    expected: value,
                    actual,
                });
            }
            self.delay.delay_ms(poll);
            waited += poll;
        }
    }

    fn change_mode(&mut self, mode: OpMode) -> Result<(), Error> {
        log::debug!("{}: change op mode to {:?}", self.name, mode);
        self.modify_register(Register::Canctrl, OP_MODE_MASK, mode as u8);
        let timeout = self.config.mode_timeout.to_millis();
        let poll = self.config.mode_poll.to_millis().max(1);
        let mut waited = 0;
        loop {
            self.delay.delay_ms(poll);
            waited += poll;
            if self.read_register(Register::Canstat) & OP_MODE_MASK == mode as u8 {
                return Ok(());
            }
            if waited >= timeout {
                log::error!("{}: could not change op mode to {:?}", self.name, mode);
                return Err(Error::ModeChangeTimeout(mode as u8));
            }
        }
    }

    fn read_error_counters(&mut self, errflag: Eflg) -> (u16, u16) {
        let mut counters = [0; 2];
        self.read_registers(Register::Tec, &mut counters);
        let (mut tx, mut rx) = (u16::from(counters[0]), u16::from(counters[1]));
        if errflag.txbo() {
            tx |= BUS_OFF_COUNTER;
            rx |= BUS_OFF_COUNTER;
        }
        (tx, rx)
    }

    /// Abort the pending transmission of TXB0.
    ///
    /// Returns true if the frame did not go out.
    fn abort_transmission(&mut self) -> bool {
        self.modify_register(Register::Canctrl, CANCTRL_ABAT, CANCTRL_ABAT);
        let timeout = self.config.mode_timeout.to_millis();
        let mut waited = 0;
        while self.read_status().tx_pending() {
            if waited >= timeout {
                log::error!("{}: transmit request stuck after abort", self.name);
                break;
            }
            self.delay.delay_ms(1);
            waited += 1;
        }
        self.modify_register(Register::Canctrl, CANCTRL_ABAT, 0);
        let txb0ctrl = TxbCtrl(self.read_register(Register::Txb0ctrl));
        self.modify_register(Register::Canintf, Intf::TX, 0);
        txb0ctrl.failed()
    }

    /// Load TXB0 and request its transmission
    fn write_frame(&mut self, frame: &CanFrame) {
        let mut buf = [0; 1 + buffer::BUFFER_LEN];
        buf[0] = Instruction::LoadTx0 as u8;
        buf[1..].copy_from_slice(&buffer::encode(frame));
        self.transfer(&mut buf);
        self.transfer(&mut [Instruction::Rts0 as u8]);
        self.irq
            .bus
            .update_status(|s| s.packets_tx = s.packets_tx.wrapping_add(1));
    }

    /// Move the parked frame into the transmit buffer if it is free
    fn drain_slot(&mut self) -> bool {
        if !self.tx_slot.is_occupied() || self.read_status().tx_pending() {
            return false;
        }
        match self.tx_slot.take() {
            Some(frame) => {
                self.write_frame(&frame);
                true
            }
            None => false,
        }
    }

    /// Wait up to `wait` for the parked frame to leave the slot
    fn await_slot(&mut self, wait: MillisDurationU32) -> Result<(), Error> {
        let mut waited = 0;
        loop {
            self.drain_slot();
            if !self.tx_slot.is_occupied() {
                return Ok(());
            }
            if waited >= wait.to_millis() {
                self.irq
                    .bus
                    .update_status(|s| s.txbuf_overflow = s.txbuf_overflow.wrapping_add(1));
                return Err(Error::TxBusy);
            }
            self.delay.delay_ms(1);
            waited += 1;
        }
    }

    fn read_rx_buffer(&mut self, instruction: Instruction) -> CanFrame {
        let mut buf = [0; 1 + buffer::BUFFER_LEN];
        buf[0] = instruction as u8;
        self.transfer(&mut buf);
        let mut bytes = [0; buffer::BUFFER_LEN];
        bytes.copy_from_slice(&buf[1..]);
        buffer::decode(&bytes)
    }

    fn bind(&mut self) -> Result<(), Error> {
        if !self.bound {
            let pin = self.config.int_pin;
            self.pins.set_direction(pin, Direction::Input)?;
            self.pins.set_interrupt_edge(pin, Edge::Falling)?;
            self.line.bind(self.irq)?;
            self.bound = true;
        }
        Ok(())
    }
}

impl<'a, SPI, P, L, D, Q> CanBus for Mcp2515<'a, SPI, P, L, D, Q>
where
    SPI: SpiDevice,
    P: PinConfig,
    L: InterruptLine<'a>,
    D: DelayNs,
    Q: DeliveryQueue + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn handle(&self) -> BusHandle {
        self.irq.bus.handle()
    }

    fn mode(&self) -> CanMode {
        self.mode
    }

    fn speed(&self) -> Option<CanSpeed> {
        self.speed
    }

    fn start(&mut self, mode: CanMode, speed: CanSpeed) -> Result<(), Error> {
        if mode == CanMode::Off {
            self.mode = CanMode::Off;
            return self.stop();
        }
        let cnf = Cnf::lookup(self.config.oscillator, speed).ok_or(Error::UnsupportedSpeed(speed))?;
        self.irq.bus.clear_status();

        // The reset drops any previous configuration
        self.power = PowerMode::Off;
        if let Some(frame) = self.tx_slot.take() {
            log::debug!("{}: discarding parked frame {:#x}", self.name, frame.raw_id());
        }
        self.reset();
        self.write_register_verified(Register::Caninte, 0, 0xff)?;
        self.write_register(
            Register::Canctrl,
            OpMode::Config as u8 | CANCTRL_ABAT | CANCTRL_OSM,
        );
        self.write_register_verified(
            Register::Rxb0ctrl,
            RXB0CTRL_ANY_ROLLOVER,
            RXB0CTRL_VERIFY_MASK,
        )?;
        self.write_register_verified(Register::Bfpctrl, BFPCTRL_RUNNING, 0xff)?;
        self.write_registers(Register::Cnf3, &[cnf.cnf3, cnf.cnf2, cnf.cnf1]);

        self.change_mode(match mode {
            CanMode::Listen => OpMode::Listen,
            _ => OpMode::Normal,
        })?;
        self.modify_register(Register::Canctrl, CANCTRL_OSM | CANCTRL_ABAT, 0);

        let mut readback = [0; 3];
        self.read_registers(Register::Cnf3, &mut readback);
        if readback != [cnf.cnf3, cnf.cnf2, cnf.cnf1] {
            log::error!(
                "{}: could not change configuration registers (read CNF {:#04x} {:#04x} {:#04x})",
                self.name,
                readback[2],
                readback[1],
                readback[0]
            );
            return Err(Error::ConfigurationMismatch);
        }

        self.write_register(Register::Caninte, 0xff);
        self.bind()?;

        self.last_errflag = 0;
        self.mode = mode;
        self.speed = Some(speed);
        self.power = PowerMode::On;
        log::info!("{}: started {:?} at {:?}", self.name, mode, speed);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.reset();
        let pins = self.write_register_verified(Register::Bfpctrl, BFPCTRL_STOPPED, 0xff);
        let sleep = self.change_mode(OpMode::Sleep);
        if self.power != PowerMode::Off {
            log::info!("{}: stopped", self.name);
        }
        self.power = PowerMode::Off;
        if let Some(frame) = self.tx_slot.take() {
            log::debug!("{}: discarding parked frame {:#x}", self.name, frame.raw_id());
        }
        pins.and(sleep)
    }

    fn write(&mut self, frame: &CanFrame, wait: MillisDurationU32) -> Result<(), Error> {
        if self.power != PowerMode::On || self.mode != CanMode::Active {
            log::warn!("{}: write while not active", self.name);
            return Err(Error::NotActive);
        }

        if self.tx_slot.is_occupied() {
            self.await_slot(wait)?;
        }

        if self.read_status().tx_pending() {
            if self.tx_slot.park(*frame).is_err() {
                return Err(Error::TxBusy);
            }
            self.irq
                .bus
                .update_status(|s| s.txbuf_delay = s.txbuf_delay.wrapping_add(1));
            log::debug!("{}: frame {:#x} parked", self.name, frame.raw_id());
            return Ok(());
        }

        self.write_frame(frame);
        Ok(())
    }

    fn power_mode(&self) -> PowerMode {
        self.power
    }

    fn set_power_mode(&mut self, power: PowerMode) {
        apply_power_mode(self, power)
    }

    fn status(&self) -> Status {
        self.irq.bus.status()
    }

    fn clear_status(&mut self) {
        self.irq.bus.clear_status()
    }
}

impl<'a, SPI, P, L: InterruptLine<'a>, D, Q> Drop for Mcp2515<'a, SPI, P, L, D, Q> {
    fn drop(&mut self) {
        if self.bound {
            self.line.unbind();
        }
    }
}
