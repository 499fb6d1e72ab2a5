//! Error and status type definitions for the front-end M&C core
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.

/// An enumeration of possible errors with the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Error {
    /// A serial transaction failed.
    Interface,
    /// The hardware did not become ready in time.
    Timeout,
    /// A value or address was out of range.
    Bounds,
    /// The operation is not legal in the current state.
    InvalidState,
    /// The addressed hardware is not installed.
    NotPresent,
    /// A scaling computation left its mathematical domain.
    Conversion,
    /// A software timer was misused.
    Timer,
}

/// The status reported in the outgoing bus message.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Status {
    #[default]
    NoError,
    Error,
    HardwareRange,
    HardwareBlocked,
    HardwareUpdateWarning,
    HardwareConversion,
    HardwareRetry,
    HardwareError,
    /// Monitored value in error range, or last control payload outside the allowed range.
    OutOfRange,
    MonitorWarning,
    /// Monitor request on a non-existing RCA.
    MonitorCanRange,
}

impl Status {
    /// Get the wire code of the status.
    pub fn code(self) -> i8 {
        match self {
            Status::NoError => 0,
            Status::Error => -1,
            Status::HardwareRange => -2,
            Status::HardwareBlocked => -3,
            Status::HardwareUpdateWarning => -4,
            Status::HardwareConversion => -5,
            Status::HardwareRetry => -6,
            Status::HardwareError => -7,
            Status::OutOfRange => -10,
            Status::MonitorWarning => -11,
            Status::MonitorCanRange => -12,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::NoError
    }
}

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        match error {
            Error::Conversion => Status::HardwareConversion,
            Error::Bounds => Status::HardwareRange,
            Error::NotPresent => Status::HardwareBlocked,
            _ => Status::Error,
        }
    }
}

/// The originating module of an entry in the error history.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
#[repr(u8)]
pub enum ErrorModule {
    Error = 0x00,
    Can = 0x03,
    Cartridge = 0x04,
    CartridgeTemp = 0x05,
    Lo = 0x06,
    Pll = 0x07,
    Yto = 0x08,
    Photomixer = 0x09,
    Amc = 0x0A,
    Pa = 0x0B,
    PaChannel = 0x0C,
    Polarization = 0x0D,
    Sideband = 0x0E,
    LnaLed = 0x0F,
    SisHeater = 0x10,
    Sis = 0x12,
    SisMagnet = 0x13,
    Lna = 0x14,
    LnaStage = 0x15,
    Timer = 0x1A,
    BiasSerial = 0x1B,
    LoSerial = 0x1C,
    PowerDistribution = 0x1D,
    PdModule = 0x1E,
    PdChannel = 0x1F,
    PdSerial = 0x20,
    IfChannel = 0x21,
    IfSwitch = 0x22,
    IfSerial = 0x23,
    Cryostat = 0x24,
    TurboPump = 0x25,
    VacuumController = 0x26,
    GateValve = 0x27,
    SolenoidValve = 0x28,
    VacuumSensor = 0x29,
    CryostatTemp = 0x2A,
    CryoSerial = 0x2B,
    PhotoDetector = 0x2D,
    Laser = 0x2E,
    Edfa = 0x2F,
    OpticalSwitch = 0x30,
    Lpr = 0x31,
    LprTemp = 0x32,
    LprSerial = 0x33,
    Ini = 0x35,
    Fetim = 0x37,
    Interlock = 0x38,
    Compressor = 0x39,
    Dewar = 0x3A,
    InterlockTemp = 0x3B,
    InterlockFlow = 0x3C,
    InterlockGlitch = 0x3D,
    FetimSerial = 0x3E,
}

/// Error sub-codes shared by all modules.
///
/// # Note
/// Module-specific sub-codes are small integers starting at 0x01 and are defined next to the
/// module that raises them.
pub mod erc {
    pub const NO_MEMORY: u8 = 0xF0;
    pub const MODULE_RANGE: u8 = 0xF1;
    pub const RCA_RANGE: u8 = 0xF2;
    pub const COMMAND_VAL: u8 = 0xF3;
    pub const MODULE_ABSENT: u8 = 0xF4;
    pub const MODULE_POWER: u8 = 0xF5;
    pub const HARDWARE_TIMEOUT: u8 = 0xF6;
    pub const HARDWARE_WAIT: u8 = 0xF7;
    pub const HARDWARE_BLOCKED: u8 = 0xF8;
    pub const HARDWARE_ERROR: u8 = 0xF9;
}
