//! Host-side stand-ins for the integration layer

use core::cell::{Cell, RefCell};
use embedded_hal::delay::DelayNs;
use fugit::HertzU32;
use std::rc::Rc;
use std::vec::Vec;
use telecan_core::{
    BindError, Direction, Edge, Gpio, InterruptHandler, InterruptLine, PeripheralClock, PinConfig,
    PinError, Signal,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinCall {
    Direction(Gpio, Direction),
    Level(Gpio, bool),
    Output(Gpio, Signal),
    Input(Gpio, Signal),
    Edge(Gpio, Edge),
}

/// Records every call; `invalid` is rejected, pins in `low` read low
#[derive(Clone, Default)]
pub struct FakePins {
    pub calls: Rc<RefCell<Vec<PinCall>>>,
    pub low: Rc<RefCell<Vec<Gpio>>>,
    pub invalid: Option<Gpio>,
}

impl FakePins {
    fn record(&self, pin: Gpio, call: PinCall) -> Result<(), PinError> {
        if self.invalid == Some(pin) {
            return Err(PinError::InvalidPin(pin));
        }
        self.calls.borrow_mut().push(call);
        Ok(())
    }
}

impl PinConfig for FakePins {
    fn set_direction(&mut self, pin: Gpio, direction: Direction) -> Result<(), PinError> {
        self.record(pin, PinCall::Direction(pin, direction))
    }

    fn set_level(&mut self, pin: Gpio, high: bool) -> Result<(), PinError> {
        self.record(pin, PinCall::Level(pin, high))
    }

    fn is_high(&mut self, pin: Gpio) -> Result<bool, PinError> {
        Ok(!self.low.borrow().contains(&pin))
    }

    fn route_output(&mut self, pin: Gpio, signal: Signal) -> Result<(), PinError> {
        self.record(pin, PinCall::Output(pin, signal))
    }

    fn route_input(&mut self, pin: Gpio, signal: Signal) -> Result<(), PinError> {
        self.record(pin, PinCall::Input(pin, signal))
    }

    fn set_interrupt_edge(&mut self, pin: Gpio, edge: Edge) -> Result<(), PinError> {
        self.record(pin, PinCall::Edge(pin, edge))
    }
}

/// Holds the bound handler; `bound` and `binds` are observable from outside
pub struct FakeLine<'a> {
    handler: Option<&'a dyn InterruptHandler>,
    pub bound: Rc<Cell<bool>>,
    pub binds: Rc<Cell<u32>>,
}

impl FakeLine<'_> {
    pub fn new() -> Self {
        Self {
            handler: None,
            bound: Rc::default(),
            binds: Rc::default(),
        }
    }
}

impl<'a> InterruptLine<'a> for FakeLine<'a> {
    fn bind(&mut self, handler: &'a dyn InterruptHandler) -> Result<(), BindError> {
        if self.handler.is_some() {
            return Err(BindError::AlreadyBound);
        }
        self.handler = Some(handler);
        self.bound.set(true);
        self.binds.set(self.binds.get() + 1);
        Ok(())
    }

    fn unbind(&mut self) {
        self.handler = None;
        self.bound.set(false);
    }
}

pub struct FakeClock {
    pub enabled: Rc<Cell<bool>>,
    pub frequency: HertzU32,
}

impl FakeClock {
    pub fn apb() -> Self {
        Self {
            enabled: Rc::default(),
            frequency: HertzU32::MHz(80),
        }
    }
}

unsafe impl PeripheralClock for FakeClock {
    fn enable(&mut self) {
        self.enabled.set(true);
    }

    fn frequency(&self) -> HertzU32 {
        self.frequency
    }
}

/// Returns immediately, accumulating the requested time
#[derive(Clone, Default)]
pub struct FakeDelay {
    pub elapsed_ns: Rc<Cell<u64>>,
}

impl FakeDelay {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns.get() / 1_000_000
    }
}

impl DelayNs for FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns.set(self.elapsed_ns.get() + u64::from(ns));
    }
}
