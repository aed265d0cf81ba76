#![no_std]
#![warn(missing_docs)]

//! `telecan-core` provides a set of essential abstractions that serve as a thin
//! integration layer between the platform independent [`telecan`] drivers and
//! platform specific HAL crates (in documentation also referred to as _target
//! HALs_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs or
//! by the board support layer of the firmware.
//!
//! The drivers consume four capabilities:
//! - [`PinConfig`]: direction, level, signal routing and edge triggers of GPIOs
//! - [`PeripheralClock`]: clock gating / reset of the integrated controller
//! - [`InterruptLine`]: binding an [`InterruptHandler`] to a HW interrupt source
//! - [`embedded_hal::spi::SpiDevice`] and [`embedded_hal::delay::DelayNs`]
//!   for the SPI-attached controller
//!
//! [`telecan`]: <https://docs.rs/crate/telecan/>

pub use embedded_hal;
pub use fugit;

/// GPIO number as understood by the target's pin matrix
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Gpio(pub u8);

/// Pin direction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// High impedance input
    Input,
    /// Push-pull output
    Output,
}

/// Peripheral signals a pin can be routed to
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Transmit line of the integrated CAN controller
    CanTx,
    /// Receive line of the integrated CAN controller
    CanRx,
}

/// Interrupt trigger of an input pin
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Edge {
    /// No interrupt
    Disabled,
    /// High to low transition
    Falling,
    /// Low to high transition
    Rising,
    /// Either transition
    Any,
}

/// Pin could not be configured
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinError {
    /// The pin does not exist on this target
    InvalidPin(Gpio),
    /// The pin cannot carry the requested signal
    NotRoutable(Gpio, Signal),
}

/// Pin configuration primitives
///
/// Implementations are expected to apply each call immediately. Calls that
/// fail must leave the pin in the state it had before the call.
pub trait PinConfig {
    /// Set the direction of `pin`
    fn set_direction(&mut self, pin: Gpio, direction: Direction) -> Result<(), PinError>;
    /// Drive an output `pin` high or low
    fn set_level(&mut self, pin: Gpio, high: bool) -> Result<(), PinError>;
    /// Sample the level of an input `pin`
    fn is_high(&mut self, pin: Gpio) -> Result<bool, PinError>;
    /// Connect `pin` to a peripheral output `signal`
    fn route_output(&mut self, pin: Gpio, signal: Signal) -> Result<(), PinError>;
    /// Connect a peripheral input `signal` to `pin`
    fn route_input(&mut self, pin: Gpio, signal: Signal) -> Result<(), PinError>;
    /// Select the edge that raises the pin's interrupt
    fn set_interrupt_edge(&mut self, pin: Gpio, edge: Edge) -> Result<(), PinError>;
}

/// Clock and reset control of the integrated CAN controller
///
/// # Safety
/// After [`PeripheralClock::enable`] returns, the controller register block must
/// be accessible and its clock must run at [`PeripheralClock::frequency`] until
/// the implementing value is dropped.
pub unsafe trait PeripheralClock {
    /// Ungate the controller clock and release it from reset.
    ///
    /// Calling it on an already enabled controller has no effect.
    fn enable(&mut self);
    /// Frequency of the clock feeding the controller's baud rate prescaler.
    fn frequency(&self) -> fugit::HertzU32;
}

/// Code run in interrupt context
///
/// The handler runs concurrently with thread-mode code of the owning driver,
/// so it must be [`Sync`] and must never block.
pub trait InterruptHandler: Sync {
    /// Service one interrupt
    fn on_interrupt(&self);
}

/// Interrupt source could not be bound
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Another handler already owns the source
    AlreadyBound,
    /// No interrupt slot could be allocated for the source
    Unavailable,
}

/// A single HW interrupt source
///
/// The handler reference is captured at bind time and invoked on every
/// interrupt until [`InterruptLine::unbind`] is called. The lifetime `'a`
/// ties the handler to the driver context it services, so no global instance
/// pointer is involved.
///
/// # Example
/// ```
/// use telecan_core::{BindError, InterruptHandler, InterruptLine};
///
/// struct Slot<'a>(Option<&'a dyn InterruptHandler>);
///
/// impl<'a> InterruptLine<'a> for Slot<'a> {
///     fn bind(&mut self, handler: &'a dyn InterruptHandler) -> Result<(), BindError> {
///         if self.0.is_some() {
///             return Err(BindError::AlreadyBound);
///         }
///         self.0 = Some(handler);
///         Ok(())
///     }
///
///     fn unbind(&mut self) {
///         self.0 = None;
///     }
/// }
/// ```
pub trait InterruptLine<'a> {
    /// Route the source's interrupts to `handler`
    fn bind(&mut self, handler: &'a dyn InterruptHandler) -> Result<(), BindError>;
    /// Detach the currently bound handler, if any
    fn unbind(&mut self);
}
