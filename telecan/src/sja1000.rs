//! Integrated SJA1000-compatible controller
//!
//! The controller is memory mapped and entirely interrupt driven. All receive
//! work happens in [`Sja1000Irq`]: every interrupt reads IR once, drains a
//! received frame into the delivery queue and releases the receive buffer.
//! Thread context ([`Sja1000`]) only configures the controller and loads the
//! transmit buffer.

pub mod mailbox;
pub mod regs;

use crate::bus::{
    apply_power_mode, log_counters, BusContext, BusHandle, CanBus, CanMode, PowerMode, Status,
};
use crate::config::{BitTiming, CanSpeed, Sja1000Config};
use crate::dispatch::DeliveryQueue;
use crate::error::Error;
use crate::frame::CanFrame;
use crate::interrupt::InterruptSet;
use fugit::MillisDurationU32;
use mailbox::Mailbox;
use regs::RegisterBlock;
use telecan_core::{
    Direction, InterruptHandler, InterruptLine, PeripheralClock, PinConfig, PinError, Signal,
};

/// SR bits kept in the error snapshot: everything but the receive and
/// transmit activity flags
const STATUS_ERROR_MASK: u32 = 0xcf;

/// Interrupt half of the integrated backend
///
/// Bound to the controller's interrupt source by [`Sja1000::start`].
pub struct Sja1000Irq<'a, Q> {
    regs: &'a RegisterBlock,
    bus: BusContext<'a, Q>,
}

impl<'a, Q: DeliveryQueue> Sja1000Irq<'a, Q> {
    /// Create the handler of bus `handle`, delivering into `queue`
    pub const fn new(regs: &'a RegisterBlock, handle: BusHandle, queue: &'a Q) -> Self {
        Self {
            regs,
            bus: BusContext::new(handle, queue),
        }
    }

    /// State shared with the thread half
    pub fn context(&self) -> &BusContext<'a, Q> {
        &self.bus
    }

    fn record_errors(&self, errors: InterruptSet) {
        let regs = self.regs;
        let status = regs.status.get() & STATUS_ERROR_MASK;
        let code = regs.error_code.get() & 0xff;
        let (rx, tx) = (regs.rx_errors(), regs.tx_errors());
        self.bus.update_status(|s| {
            s.error_flags = errors.bits() << 16 | status << 8 | code;
            s.errors_rx = rx;
            s.errors_tx = tx;
            if errors.doi() {
                s.rxbuf_overflow = s.rxbuf_overflow.wrapping_add(1);
            }
        });
        self.bus.report_error();
    }
}

impl<Q: DeliveryQueue + Sync> InterruptHandler for Sja1000Irq<'_, Q> {
    fn on_interrupt(&self) {
        // Reading IR acknowledges every pending interrupt
        let irqs = InterruptSet::from_register(self.regs.interrupt.get());
        self.bus
            .update_status(|s| s.interrupts = s.interrupts.wrapping_add(1));

        if irqs.ri() {
            let frame = self.regs.read_mailbox().decode();
            // A full queue drops the frame; the buffer is released regardless
            self.bus.deliver_frame(frame);
            self.regs.command(|c| c.set_release_rx_buffer(true));
        }

        let errors = irqs.intersection(InterruptSet::ERRORS);
        if !errors.is_empty() {
            self.record_errors(errors);
        }
        // Transmit complete and wake-up need no servicing
    }
}

/// Thread half of the integrated backend
pub struct Sja1000<'a, K, P, L: InterruptLine<'a>, Q> {
    name: &'static str,
    irq: &'a Sja1000Irq<'a, Q>,
    clock: K,
    pins: P,
    line: L,
    config: Sja1000Config,
    mode: CanMode,
    speed: Option<CanSpeed>,
    power: PowerMode,
    bound: bool,
}

impl<'a, K, P, L, Q> Sja1000<'a, K, P, L, Q>
where
    K: PeripheralClock,
    P: PinConfig,
    L: InterruptLine<'a>,
    Q: DeliveryQueue + Sync,
{
    /// Create a powered down instance
    ///
    /// Nothing touches the hardware until [`CanBus::start`].
    pub fn new(
        name: &'static str,
        irq: &'a Sja1000Irq<'a, Q>,
        clock: K,
        pins: P,
        line: L,
        config: Sja1000Config,
    ) -> Self {
        Self {
            name,
            irq,
            clock,
            pins,
            line,
            config,
            mode: CanMode::Off,
            speed: None,
            power: PowerMode::Off,
            bound: false,
        }
    }

    fn regs(&self) -> &'a RegisterBlock {
        self.irq.regs
    }

    fn route_pins(&mut self) -> Result<(), PinError> {
        let Sja1000Config { tx_pin, rx_pin } = self.config;
        self.pins.set_level(tx_pin, true)?;
        self.pins.set_direction(tx_pin, Direction::Output)?;
        self.pins.route_output(tx_pin, Signal::CanTx)?;
        self.pins.set_direction(rx_pin, Direction::Input)?;
        self.pins.route_input(rx_pin, Signal::CanRx)
    }

    /// Program the controller. Leaves it in reset mode.
    fn configure(&self, mode: CanMode, timing: &BitTiming) {
        let regs = self.regs();
        regs.modify_mode(|m| m.set_reset(true));
        regs.select_pelican();
        regs.set_bit_timing(timing);
        regs.accept_all();
        regs.interrupt_enable.set(0xff);
        regs.set_normal_output();
        regs.modify_mode(|m| {
            m.set_listen_only(mode == CanMode::Listen);
            m.set_acceptance_filter(false);
        });
        regs.tx_error_counter.set(0);
        regs.rx_error_counter.set(0);
        // Both are cleared by reading
        let _ = regs.error_code.get();
        let _ = regs.interrupt.get();
    }

    fn bind(&mut self) -> Result<(), Error> {
        if !self.bound {
            self.line.bind(self.irq)?;
            self.bound = true;
        }
        Ok(())
    }
}

impl<'a, K, P, L, Q> CanBus for Sja1000<'a, K, P, L, Q>
where
    K: PeripheralClock,
    P: PinConfig,
    L: InterruptLine<'a>,
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
        let timing = BitTiming::sja1000(speed, self.clock.frequency())?;

        self.clock.enable();
        // Stays in reset, and the bus stays off, until every step succeeded
        let regs = self.regs();
        critical_section::with(|_| regs.modify_mode(|m| m.set_reset(true)));
        self.power = PowerMode::Off;
        self.route_pins()?;
        critical_section::with(|_| self.configure(mode, &timing));
        self.bind()?;
        self.irq.bus.clear_status();
        regs.modify_mode(|m| m.set_reset(false));

        self.mode = mode;
        self.speed = Some(speed);
        self.power = PowerMode::On;
        log::info!("{}: started {:?} at {:?}", self.name, mode, speed);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        let regs = self.regs();
        critical_section::with(|_| regs.modify_mode(|m| m.set_reset(true)));
        if self.power != PowerMode::Off {
            log::info!("{}: stopped", self.name);
        }
        self.power = PowerMode::Off;
        Ok(())
    }

    fn write(&mut self, frame: &CanFrame, _wait: MillisDurationU32) -> Result<(), Error> {
        if self.power != PowerMode::On || self.mode != CanMode::Active {
            log::warn!("{}: write while not active", self.name);
            return Err(Error::NotActive);
        }
        let regs = self.regs();
        let mailbox = Mailbox::encode(frame);
        let result = critical_section::with(|_| {
            if !regs.status().tx_buffer_free() {
                return Err(Error::TxBusy);
            }
            regs.write_mailbox(&mailbox);
            regs.command(|c| c.set_tx_request(true));
            Ok(())
        });
        let sent = result.is_ok();
        self.irq.bus.update_status(|s| {
            if sent {
                s.packets_tx = s.packets_tx.wrapping_add(1);
            } else {
                s.txbuf_overflow = s.txbuf_overflow.wrapping_add(1);
            }
        });
        if !sent {
            log::debug!("{}: transmit buffer locked", self.name);
        }
        result
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

    fn log_status(&self) {
        let status = self.status();
        log_counters(self.name, &status);
        let errors = InterruptSet::from_register(status.error_flags >> 16);
        if !errors.is_empty() {
            log::info!("{}: last error interrupts {:?}", self.name, errors);
        }
    }
}

impl<'a, K, P, L: InterruptLine<'a>, Q> Drop for Sja1000<'a, K, P, L, Q> {
    fn drop(&mut self) {
        self.irq.regs.modify_mode(|m| m.set_reset(true));
        if self.bound {
            self.line.unbind();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dispatch::BusMessage;
    use crate::testing::{FakeClock, FakeLine, FakePins, PinCall};
    use embedded_can::{ExtendedId, Frame, StandardId};
    use heapless::mpmc::{Q2, Q8};
    use telecan_core::Gpio;

    const TX: Gpio = Gpio(5);
    const RX: Gpio = Gpio(4);
    const NO_WAIT: MillisDurationU32 = MillisDurationU32::from_ticks(0);

    type Bus<'a, Q> = Sja1000<'a, FakeClock, FakePins, FakeLine<'a>, Q>;

    fn bus<'a, Q: DeliveryQueue + Sync>(irq: &'a Sja1000Irq<'a, Q>, pins: FakePins) -> Bus<'a, Q> {
        Sja1000::new(
            "can1",
            irq,
            FakeClock::apb(),
            pins,
            FakeLine::new(),
            Sja1000Config::new(TX, RX),
        )
    }

    fn std_frame(id: u16, data: &[u8]) -> CanFrame {
        CanFrame::new(StandardId::new(id).unwrap(), data).unwrap()
    }

    fn load_rx(regs: &RegisterBlock, frame: &CanFrame) {
        for (reg, byte) in regs.mailbox.iter().zip(Mailbox::encode(frame).as_bytes()) {
            reg.set(u32::from(*byte));
        }
    }

    #[test]
    fn start_programs_controller() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        let pins = FakePins::default();
        let mut can = bus(&irq, pins.clone());
        let bound = can.line.bound.clone();
        let enabled = can.clock.enabled.clone();

        can.start(CanMode::Active, CanSpeed::Kbps500).unwrap();

        assert!(enabled.get());
        assert!(bound.get());
        assert_eq!(regs.mode.get() & 0x03, 0, "out of reset, not listen only");
        assert_eq!(regs.bus_timing_0.get(), 0x44);
        assert_eq!(regs.bus_timing_1.get(), 0x9c);
        assert_eq!(regs.interrupt_enable.get(), 0xff);
        assert_eq!(regs.clock_divider.get() & 0x80, 0x80);
        assert_eq!(regs.output_control.get(), 0b10);
        assert_eq!(regs.mailbox[4].get(), 0xff);
        assert_eq!(
            *pins.calls.borrow(),
            [
                PinCall::Level(TX, true),
                PinCall::Direction(TX, Direction::Output),
                PinCall::Output(TX, Signal::CanTx),
                PinCall::Direction(RX, Direction::Input),
                PinCall::Input(RX, Signal::CanRx),
            ]
        );
        assert_eq!(can.power_mode(), PowerMode::On);
        assert_eq!(can.speed(), Some(CanSpeed::Kbps500));
    }

    #[test]
    fn listen_mode_sets_listen_only() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        let mut can = bus(&irq, FakePins::default());
        can.start(CanMode::Listen, CanSpeed::Kbps125).unwrap();
        assert_eq!(regs.mode.get() & 0x03, 0x02);
        assert_eq!(regs.bus_timing_0.get(), 0x40 | 19);
    }

    #[test]
    fn unsupported_speed_touches_nothing() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        let pins = FakePins::default();
        let mut can = bus(&irq, pins.clone());
        let enabled = can.clock.enabled.clone();

        assert_eq!(
            can.start(CanMode::Active, CanSpeed::Kbps83_3),
            Err(Error::UnsupportedSpeed(CanSpeed::Kbps83_3))
        );
        assert!(!enabled.get());
        assert!(pins.calls.borrow().is_empty());
        assert_eq!(can.power_mode(), PowerMode::Off);
    }

    #[test]
    fn invalid_pin_is_reported() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        let pins = FakePins {
            invalid: Some(RX),
            ..FakePins::default()
        };
        let mut can = bus(&irq, pins);
        let bound = can.line.bound.clone();
        assert_eq!(
            can.start(CanMode::Active, CanSpeed::Kbps250),
            Err(Error::Pin(PinError::InvalidPin(RX)))
        );
        assert!(!bound.get());
    }

    #[test]
    fn failed_restart_leaves_bus_stopped() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        let mut can = bus(&irq, FakePins::default());
        can.start(CanMode::Active, CanSpeed::Kbps500).unwrap();
        regs.status.set(0x04);

        can.pins.invalid = Some(TX);
        assert_eq!(
            can.start(CanMode::Active, CanSpeed::Kbps250),
            Err(Error::Pin(PinError::InvalidPin(TX)))
        );
        assert_eq!(can.power_mode(), PowerMode::Off);
        assert_eq!(regs.mode.get() & 0x01, 0x01, "held in reset");
        assert_eq!(can.write(&std_frame(1, &[]), NO_WAIT), Err(Error::NotActive));
        assert_eq!(regs.command.get(), 0);
    }

    #[test]
    fn write_loads_transmit_buffer() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        let mut can = bus(&irq, FakePins::default());
        can.start(CanMode::Active, CanSpeed::Kbps500).unwrap();
        regs.status.set(0x04);

        can.write(&std_frame(0x123, &[0xAA, 0xBB]), NO_WAIT).unwrap();

        let words: [u32; 5] = core::array::from_fn(|i| regs.mailbox[i].get());
        assert_eq!(words, [0x02, 0x24, 0x60, 0xAA, 0xBB]);
        assert_eq!(regs.command.get(), 0x01);
        assert_eq!(can.status().packets_tx, 1);
    }

    #[test]
    fn write_refused_when_buffer_locked() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        let mut can = bus(&irq, FakePins::default());
        can.start(CanMode::Active, CanSpeed::Kbps500).unwrap();

        assert_eq!(can.write(&std_frame(1, &[]), NO_WAIT), Err(Error::TxBusy));
        assert_eq!(regs.command.get(), 0);
        assert_eq!(can.status().txbuf_overflow, 1);
    }

    #[test]
    fn write_requires_active_mode() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        let mut can = bus(&irq, FakePins::default());
        regs.status.set(0x04);
        assert_eq!(can.write(&std_frame(1, &[]), NO_WAIT), Err(Error::NotActive));
        can.start(CanMode::Listen, CanSpeed::Kbps500).unwrap();
        assert_eq!(can.write(&std_frame(1, &[]), NO_WAIT), Err(Error::NotActive));
    }

    #[test]
    fn receive_interrupt_delivers_tagged_frame() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(4), &queue);
        let frame = CanFrame::new(ExtendedId::new(0x18DB_33F1).unwrap(), &[2, 1, 0]).unwrap();
        load_rx(&regs, &frame);
        regs.interrupt.set(0x01);

        irq.on_interrupt();

        assert_eq!(
            queue.dequeue(),
            Some(BusMessage::Frame(frame.with_origin(BusHandle(4))))
        );
        assert_eq!(regs.command.get(), 0x04);
        let status = irq.context().status();
        assert_eq!((status.interrupts, status.packets_rx), (1, 1));
    }

    #[test]
    fn full_queue_drops_frame_and_releases_buffer() {
        let regs = RegisterBlock::zeroed();
        let queue: Q2<BusMessage> = Q2::new();
        queue.enqueue(BusMessage::Service(BusHandle(0))).unwrap();
        queue.enqueue(BusMessage::Service(BusHandle(0))).unwrap();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        load_rx(&regs, &std_frame(0x7E8, &[1]));
        regs.interrupt.set(0x01);

        irq.on_interrupt();

        assert_eq!(regs.command.get(), 0x04);
        let status = irq.context().status();
        assert_eq!((status.packets_rx, status.rx_dropped), (0, 1));
    }

    #[test]
    fn error_interrupt_records_snapshot() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(2), &queue);
        regs.interrupt.set(0x0c);
        regs.status.set(0xff);
        regs.error_code.set(0x1f);
        regs.rx_error_counter.set(5);
        regs.tx_error_counter.set(130);

        irq.on_interrupt();

        let status = irq.context().status();
        assert_eq!(status.error_flags, 0x0c << 16 | 0xcf << 8 | 0x1f);
        assert_eq!((status.errors_rx, status.errors_tx), (5, 130));
        assert_eq!(status.rxbuf_overflow, 1);
        assert_eq!(queue.dequeue(), Some(BusMessage::ErrorStatus(BusHandle(2))));
        assert_eq!(regs.command.get(), 0, "overrun is not cleared");
    }

    #[test]
    fn transmit_and_wakeup_are_only_counted() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(2), &queue);
        regs.interrupt.set(0x12);
        irq.on_interrupt();
        assert_eq!(queue.dequeue(), None);
        assert_eq!(irq.context().status().interrupts, 1);
        assert_eq!(irq.context().status().error_flags, 0);
    }

    #[test]
    fn power_modes_stop_and_restart() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        let mut can = bus(&irq, FakePins::default());
        let binds = can.line.binds.clone();

        can.set_power_mode(PowerMode::On);
        assert_eq!(can.power_mode(), PowerMode::Off, "never started");

        can.start(CanMode::Listen, CanSpeed::Kbps250).unwrap();
        can.set_power_mode(PowerMode::Sleep);
        assert_eq!(can.power_mode(), PowerMode::Off);
        assert_eq!(regs.mode.get() & 0x01, 0x01);
        can.stop().unwrap();

        can.set_power_mode(PowerMode::On);
        assert_eq!(can.power_mode(), PowerMode::On);
        assert_eq!(regs.mode.get() & 0x03, 0x02);
        assert_eq!(binds.get(), 1);
    }

    #[test]
    fn drop_unbinds_interrupt() {
        let regs = RegisterBlock::zeroed();
        let queue: Q8<BusMessage> = Q8::new();
        let irq = Sja1000Irq::new(&regs, BusHandle(1), &queue);
        let mut can = bus(&irq, FakePins::default());
        let bound = can.line.bound.clone();
        can.start(CanMode::Active, CanSpeed::Kbps1000).unwrap();
        assert!(bound.get());
        drop(can);
        assert!(!bound.get());
        assert_eq!(regs.mode.get() & 0x01, 0x01);
    }
}
