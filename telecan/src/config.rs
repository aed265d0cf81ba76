//! CAN bus configuration

use core::ops::RangeInclusive;
use fugit::{HertzU32, MillisDurationU32};
use telecan_core::Gpio;

/// Bit rates the drivers know how to configure
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CanSpeed {
    /// 33.3 kbit/s (single wire GMLAN)
    Kbps33_3,
    /// 83.3 kbit/s
    Kbps83_3,
    /// 100 kbit/s
    Kbps100,
    /// 125 kbit/s
    Kbps125,
    /// 250 kbit/s
    Kbps250,
    /// 500 kbit/s
    Kbps500,
    /// 1 Mbit/s
    Kbps1000,
}

impl CanSpeed {
    /// Every speed, slowest first
    pub const ALL: [CanSpeed; 7] = [
        CanSpeed::Kbps33_3,
        CanSpeed::Kbps83_3,
        CanSpeed::Kbps100,
        CanSpeed::Kbps125,
        CanSpeed::Kbps250,
        CanSpeed::Kbps500,
        CanSpeed::Kbps1000,
    ];

    /// Nominal bit rate
    pub fn bitrate(self) -> HertzU32 {
        HertzU32::from_raw(match self {
            CanSpeed::Kbps33_3 => 33_333,
            CanSpeed::Kbps83_3 => 83_333,
            CanSpeed::Kbps100 => 100_000,
            CanSpeed::Kbps125 => 125_000,
            CanSpeed::Kbps250 => 250_000,
            CanSpeed::Kbps500 => 500_000,
            CanSpeed::Kbps1000 => 1_000_000,
        })
    }

    /// Whole kbit/s value, truncated for the fractional rates
    pub fn kbps(self) -> u32 {
        match self {
            CanSpeed::Kbps33_3 => 33,
            CanSpeed::Kbps83_3 => 83,
            other => other.bitrate().to_kHz(),
        }
    }
}

/// Misconfigurations of [`BitTiming`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitTimingError {
    /// The controller has no timing for the speed
    UnsupportedSpeed(CanSpeed),
    /// The peripheral clock is too slow for the requested time quantum
    ClockTooSlow(HertzU32),
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// Time segment 1 is outside the wrapped `RangeInclusive`
    Tseg1OutOfRange(RangeInclusive<u32>),
}

/// Bit-timing register values of the integrated controller
///
/// All fields hold the *register encoding*: the hardware adds one to each of
/// `sjw`, `tseg1`, `tseg2` and `prescaler`. A time quantum lasts
/// `2 * (prescaler + 1)` peripheral clock cycles.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BitTiming {
    /// Synchronization jump width
    pub sjw: u8,
    /// Propagation and phase segment before the sample point
    pub tseg1: u8,
    /// Phase segment after the sample point
    pub tseg2: u8,
    /// Sample each bit three times
    pub triple_sampling: bool,
    /// Baud rate prescaler
    pub prescaler: u8,
}

const PRESCALER_RANGE: RangeInclusive<u32> = 0..=63;
const TSEG1_RANGE: RangeInclusive<u32> = 1..=15;

/// Time quantum in microseconds, as the fraction `num / den`
#[derive(Copy, Clone)]
struct TimeQuantum {
    num: u64,
    den: u64,
}

impl BitTiming {
    /// Derive the timing for `speed` from the controller clock.
    ///
    /// The two highest rates use fixed segment lengths with a 125 ns quantum.
    /// The others use 16 quanta per bit. The prescaler is
    /// `round((f_clk * t_q / 2 - 1) / 1e6) - 1` with `t_q` in microseconds,
    /// evaluated in integer arithmetic.
    pub fn sja1000(speed: CanSpeed, clock: HertzU32) -> Result<Self, BitTimingError> {
        let (tseg1, tq) = match speed {
            CanSpeed::Kbps1000 => (4, TimeQuantum { num: 1, den: 8 }),
            CanSpeed::Kbps500 => (12, TimeQuantum { num: 1, den: 8 }),
            CanSpeed::Kbps100 | CanSpeed::Kbps125 | CanSpeed::Kbps250 => (
                12,
                TimeQuantum {
                    num: 1000,
                    den: u64::from(speed.kbps()) * 16,
                },
            ),
            CanSpeed::Kbps33_3 | CanSpeed::Kbps83_3 => {
                return Err(BitTimingError::UnsupportedSpeed(speed))
            }
        };
        if !TSEG1_RANGE.contains(&tseg1) {
            return Err(BitTimingError::Tseg1OutOfRange(TSEG1_RANGE));
        }

        let clk = u64::from(clock.to_Hz());
        let n = (clk * tq.num)
            .checked_sub(2 * tq.den)
            .ok_or(BitTimingError::ClockTooSlow(clock))?;
        let d = 2 * tq.den * 1_000_000;
        let prescaler = ((2 * n + d) / (2 * d))
            .checked_sub(1)
            .ok_or(BitTimingError::ClockTooSlow(clock))?;
        if prescaler > u64::from(*PRESCALER_RANGE.end()) {
            return Err(BitTimingError::PrescalerOutOfRange(PRESCALER_RANGE));
        }

        Ok(Self {
            sjw: 1,
            tseg1: tseg1 as u8,
            tseg2: 1,
            triple_sampling: true,
            prescaler: prescaler as u8,
        })
    }

    /// Returns the number of time quanta that make up one bit time
    pub fn time_quanta_per_bit(&self) -> u32 {
        3 + u32::from(self.tseg1) + u32::from(self.tseg2)
    }

    /// Bit rate these registers produce with `clock`
    pub fn bitrate(&self, clock: HertzU32) -> HertzU32 {
        let cycles_per_bit = 2 * (u32::from(self.prescaler) + 1) * self.time_quanta_per_bit();
        clock / cycles_per_bit
    }
}

/// Crystal fitted next to the SPI-attached controller
///
/// Board revisions differ in the oscillator, which changes every divider.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Oscillator {
    /// 8 MHz crystal
    MHz8,
    /// 16 MHz crystal
    MHz16,
}

impl Oscillator {
    /// Crystal frequency
    pub fn frequency(self) -> HertzU32 {
        match self {
            Oscillator::MHz8 => HertzU32::MHz(8),
            Oscillator::MHz16 => HertzU32::MHz(16),
        }
    }
}

/// CNF1..CNF3 bit-timing register values of the SPI-attached controller
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cnf {
    /// SJW[7:6] BRP[5:0]
    pub cnf1: u8,
    /// BTLMODE SAM PHSEG1[5:3] PRSEG[2:0]
    pub cnf2: u8,
    /// SOF WAKFIL PHSEG2[2:0]
    pub cnf3: u8,
}

const fn cnf(cnf1: u8, cnf2: u8, cnf3: u8) -> Cnf {
    Cnf { cnf1, cnf2, cnf3 }
}

const CNF_8MHZ: [(CanSpeed, Cnf); 7] = [
    (CanSpeed::Kbps33_3, cnf(0x47, 0xad, 0x81)),
    (CanSpeed::Kbps83_3, cnf(0x01, 0xbe, 0x07)),
    (CanSpeed::Kbps100, cnf(0x01, 0xfa, 0x87)),
    (CanSpeed::Kbps125, cnf(0x01, 0xf0, 0x86)),
    (CanSpeed::Kbps250, cnf(0x40, 0xf1, 0x85)),
    (CanSpeed::Kbps500, cnf(0x00, 0xd1, 0x81)),
    (CanSpeed::Kbps1000, cnf(0x00, 0xc0, 0x80)),
];

const CNF_16MHZ: [(CanSpeed, Cnf); 7] = [
    (CanSpeed::Kbps33_3, cnf(0x4f, 0xad, 0x81)),
    (CanSpeed::Kbps83_3, cnf(0x03, 0xbe, 0x07)),
    (CanSpeed::Kbps100, cnf(0x03, 0xfa, 0x87)),
    (CanSpeed::Kbps125, cnf(0x03, 0xf0, 0x86)),
    (CanSpeed::Kbps250, cnf(0x41, 0xf1, 0x85)),
    (CanSpeed::Kbps500, cnf(0x00, 0xf0, 0x86)),
    (CanSpeed::Kbps1000, cnf(0x00, 0xd0, 0x82)),
];

impl Cnf {
    /// Table entry for `speed` on a board with `oscillator`
    pub fn lookup(oscillator: Oscillator, speed: CanSpeed) -> Option<Self> {
        let table = match oscillator {
            Oscillator::MHz8 => &CNF_8MHZ,
            Oscillator::MHz16 => &CNF_16MHZ,
        };
        table
            .iter()
            .find(|(s, _)| *s == speed)
            .map(|(_, cnf)| *cnf)
    }

    /// Bit rate these registers produce with `oscillator`
    ///
    /// Assumes BTLMODE is set, which holds for every table entry.
    pub fn bitrate(&self, oscillator: Oscillator) -> HertzU32 {
        let brp = u32::from(self.cnf1 & 0x3f) + 1;
        let prseg = u32::from(self.cnf2 & 0x07) + 1;
        let phseg1 = u32::from((self.cnf2 >> 3) & 0x07) + 1;
        let phseg2 = u32::from(self.cnf3 & 0x07) + 1;
        let quanta = 1 + prseg + phseg1 + phseg2;
        oscillator.frequency() / (2 * brp * quanta)
    }
}

/// Configuration of the integrated controller
#[derive(Debug, Copy, Clone)]
pub struct Sja1000Config {
    /// Pin driving the transceiver's TXD
    pub tx_pin: Gpio,
    /// Pin sampling the transceiver's RXD
    pub rx_pin: Gpio,
}

impl Sja1000Config {
    /// Create an instance
    pub fn new(tx_pin: Gpio, rx_pin: Gpio) -> Self {
        Self { tx_pin, rx_pin }
    }
}

/// Configuration of the SPI-attached controller
#[derive(Debug, Copy, Clone)]
pub struct Mcp2515Config {
    /// Host pin wired to the controller's INT output
    pub int_pin: Gpio,
    /// Crystal fitted on this board revision
    pub oscillator: Oscillator,
    /// Pause after a reset command before the controller accepts commands
    pub reset_settle: MillisDurationU32,
    /// How long a register write is re-checked before giving up
    pub verify_timeout: MillisDurationU32,
    /// Period between register write checks
    pub verify_poll: MillisDurationU32,
    /// How long an operation mode change is awaited
    pub mode_timeout: MillisDurationU32,
    /// Period between operation mode checks
    pub mode_poll: MillisDurationU32,
}

impl Mcp2515Config {
    /// Create an instance
    ///
    /// The pin and oscillator must be provided, all timings come pre-populated
    /// with default values.
    pub fn new(int_pin: Gpio, oscillator: Oscillator) -> Self {
        Self {
            int_pin,
            oscillator,
            reset_settle: MillisDurationU32::millis(50),
            verify_timeout: MillisDurationU32::millis(100),
            verify_poll: MillisDurationU32::millis(10),
            mode_timeout: MillisDurationU32::millis(100),
            mode_poll: MillisDurationU32::millis(20),
        }
    }
}
