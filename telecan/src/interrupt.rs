//! Interrupt classification of the integrated controller

use bitfield::bitfield;

bitfield! {
    /// A set of integrated controller interrupts, as read from IR.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct InterruptSet(u32);

    /// Bus Error
    pub bei, set_bei: 7;
    /// Arbitration Lost
    pub ali, set_ali: 6;
    /// Error Passive
    pub epi, set_epi: 5;
    /// Wake-Up
    pub wui, set_wui: 4;
    /// Data Overrun
    pub doi, set_doi: 3;
    /// Error Warning
    pub ei, set_ei: 2;
    /// Transmit
    pub ti, set_ti: 1;
    /// Receive
    pub ri, set_ri: 0;
}

impl InterruptSet {
    /// Interrupts recorded as bus errors
    pub const ERRORS: InterruptSet = InterruptSet(
        1 << Interrupt::ErrorWarning as u32
            | 1 << Interrupt::DataOverrun as u32
            | 1 << Interrupt::ErrorPassive as u32
            | 1 << Interrupt::ArbitrationLost as u32
            | 1 << Interrupt::BusError as u32,
    );

    /// Keep the defined bits of a raw IR read
    pub fn from_register(bits: u32) -> Self {
        Self(bits & 0xff)
    }

    /// Raw register value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// True when no interrupt is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// The interrupts present in both sets
    pub fn intersection(&self, other: InterruptSet) -> InterruptSet {
        InterruptSet(self.0 & other.0)
    }

    /// An iterator visiting all elements, lowest bit first.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

impl core::fmt::Debug for InterruptSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "InterruptSet {{ ")?;
        for int in self.iter() {
            write!(f, "{} ", int.mnemonic())?;
        }
        write!(f, "}}")
    }
}

/// A single interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// RI
    Receive = 0,
    /// TI
    Transmit = 1,
    /// EI
    ErrorWarning = 2,
    /// DOI
    DataOverrun = 3,
    /// WUI
    WakeUp = 4,
    /// EPI
    ErrorPassive = 5,
    /// ALI
    ArbitrationLost = 6,
    /// BEI
    BusError = 7,
}

impl Interrupt {
    fn mnemonic(self) -> &'static str {
        match self {
            Interrupt::Receive => "RI",
            Interrupt::Transmit => "TI",
            Interrupt::ErrorWarning => "EI",
            Interrupt::DataOverrun => "DOI",
            Interrupt::WakeUp => "WUI",
            Interrupt::ErrorPassive => "EPI",
            Interrupt::ArbitrationLost => "ALI",
            Interrupt::BusError => "BEI",
        }
    }
}

/// Bit number without a corresponding interrupt
#[derive(Debug)]
pub struct InvalidInterruptNumber;

impl TryFrom<u8> for Interrupt {
    type Error = InvalidInterruptNumber;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Interrupt::*;
        let ret = match value {
            0 => Receive,
            1 => Transmit,
            2 => ErrorWarning,
            3 => DataOverrun,
            4 => WakeUp,
            5 => ErrorPassive,
            6 => ArbitrationLost,
            7 => BusError,
            8.. => Err(InvalidInterruptNumber)?,
        };
        Ok(ret)
    }
}

/// An iterator over the items of an [`InterruptSet`].
///
/// This `struct` is created by [`InterruptSet::iter`].
pub struct Iter {
    flags: InterruptSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = Interrupt;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let i = self.index;
            self.index = self.index.saturating_add(1);
            // No gaps in the bit numbering, so this is `Some` until every bit
            // has been visited.
            let int = i.try_into().ok()?;
            if self.flags.0 & (1 << i) != 0 {
                return Some(int);
            }
        }
    }
}
