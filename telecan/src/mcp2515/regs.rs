//! Instruction set and register map of the SPI-attached controller

use bitfield::bitfield;

/// SPI instructions
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    /// Write consecutive registers
    Write = 0x02,
    /// Read consecutive registers
    Read = 0x03,
    /// Masked write of one register
    BitModify = 0x05,
    /// Load TXB0 starting at SIDH
    LoadTx0 = 0x40,
    /// Request to send TXB0
    Rts0 = 0x81,
    /// Read RXB0 starting at SIDH, clears RX0IF
    ReadRx0 = 0x90,
    /// Read RXB1 starting at SIDH, clears RX1IF
    ReadRx1 = 0x94,
    /// Quick status of the buffers
    ReadStatus = 0xa0,
    /// Return every register to its reset value and enter configuration mode
    Reset = 0xc0,
}

/// Register addresses
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    /// RXnBF pin control
    Bfpctrl = 0x0c,
    /// CAN status
    Canstat = 0x0e,
    /// CAN control
    Canctrl = 0x0f,
    /// Transmit error counter
    Tec = 0x1c,
    /// Receive error counter
    Rec = 0x1d,
    /// Bit timing 3
    Cnf3 = 0x28,
    /// Bit timing 2
    Cnf2 = 0x29,
    /// Bit timing 1
    Cnf1 = 0x2a,
    /// Interrupt enable
    Caninte = 0x2b,
    /// Interrupt flags
    Canintf = 0x2c,
    /// Error flags
    Eflg = 0x2d,
    /// Transmit buffer 0 control
    Txb0ctrl = 0x30,
    /// Receive buffer 0 control
    Rxb0ctrl = 0x60,
}

/// REQOP / OPMOD field of CANCTRL and CANSTAT
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum OpMode {
    /// Normal operation
    Normal = 0x00,
    /// Sleep
    Sleep = 0x20,
    /// Internal loopback
    Loopback = 0x40,
    /// Listen only
    Listen = 0x60,
    /// Configuration
    Config = 0x80,
}

/// Mask of the operation mode bits
pub const OP_MODE_MASK: u8 = 0xe0;
/// CANCTRL: abort all pending transmissions
pub const CANCTRL_ABAT: u8 = 0x10;
/// CANCTRL: one-shot mode, no automatic retransmission
pub const CANCTRL_OSM: u8 = 0x08;

/// RXB0CTRL: receive any message, roll over into RXB1
pub const RXB0CTRL_ANY_ROLLOVER: u8 = 0b0110_0100;
/// Writable RXB0CTRL bits checked after configuration
pub const RXB0CTRL_VERIFY_MASK: u8 = 0b0110_1101;
/// BFPCTRL while running: RXnBF pins are driven high digital outputs
pub const BFPCTRL_RUNNING: u8 = 0b0000_1100;
/// BFPCTRL while stopped
pub const BFPCTRL_STOPPED: u8 = 0b0011_1100;

bitfield! {
    /// CANINTF / CANINTE
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Intf(u8);
    impl Debug;
    /// Message error
    pub merrf, set_merrf: 7;
    /// Wake-up
    pub wakif, set_wakif: 6;
    /// Error (EFLG changed)
    pub errif, set_errif: 5;
    /// TXB2 empty
    pub tx2if, set_tx2if: 4;
    /// TXB1 empty
    pub tx1if, set_tx1if: 3;
    /// TXB0 empty
    pub tx0if, set_tx0if: 2;
    /// RXB1 full
    pub rx1if, set_rx1if: 1;
    /// RXB0 full
    pub rx0if, set_rx0if: 0;
}

impl Intf {
    /// Transmit buffer empty flags
    pub const TX: u8 = 0x1c;
    /// Error and wake-up flags
    pub const ERRORS: u8 = 0xe0;

    /// Transmit buffer empty flags that are set
    pub fn tx(&self) -> u8 {
        self.0 & Self::TX
    }

    /// Error and wake-up flags that are set
    pub fn errors(&self) -> u8 {
        self.0 & Self::ERRORS
    }
}

bitfield! {
    /// EFLG
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Eflg(u8);
    impl Debug;
    /// RXB1 overflow
    pub rx1ovr, set_rx1ovr: 7;
    /// RXB0 overflow
    pub rx0ovr, set_rx0ovr: 6;
    /// Bus off
    pub txbo, _: 5;
    /// Transmit error passive
    pub txep, _: 4;
    /// Receive error passive
    pub rxep, _: 3;
    /// Transmit error warning
    pub txwar, _: 2;
    /// Receive error warning
    pub rxwar, _: 1;
    /// Error warning
    pub ewarn, _: 0;
}

impl Eflg {
    /// Overflow flags, the only ones software may clear
    pub const RX_OVERFLOW: u8 = 0xc0;
}

bitfield! {
    /// Result of the READ STATUS instruction
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct ReadStatus(u8);
    impl Debug;
    /// TXB2 empty flag
    pub tx2if, _: 7;
    /// TXB2 transmit request
    pub tx2req, _: 6;
    /// TXB1 empty flag
    pub tx1if, _: 5;
    /// TXB1 transmit request
    pub tx1req, _: 4;
    /// TXB0 empty flag
    pub tx0if, _: 3;
    /// TXB0 transmit request
    pub tx0req, _: 2;
    /// RXB1 full
    pub rx1if, _: 1;
    /// RXB0 full
    pub rx0if, _: 0;
}

impl ReadStatus {
    /// True while any transmit buffer holds a pending request
    pub fn tx_pending(&self) -> bool {
        self.tx0req() || self.tx1req() || self.tx2req()
    }
}

bitfield! {
    /// TXBnCTRL
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct TxbCtrl(u8);
    impl Debug;
    /// Transmission aborted
    pub abtf, _: 6;
    /// Arbitration lost
    pub mloa, _: 5;
    /// Bus error during transmission
    pub txerr, _: 4;
    /// Transmit request pending
    pub txreq, _: 3;
}

impl TxbCtrl {
    /// Abort and bus error flags, the transmission did not complete
    pub const FAILED: u8 = 0x50;

    /// True if the last transmission was aborted or hit a bus error
    pub fn failed(&self) -> bool {
        self.0 & Self::FAILED != 0
    }
}
