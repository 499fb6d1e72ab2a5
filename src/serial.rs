//! Serial bus access to the front-end hardware
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use crate::{
    error::ErrorModule,
    history::ErrorHistory,
    timer::{Clock, Instant},
    Error,
};

/// Serial mux port of the power distribution board.
pub const PD_PORT: u8 = 20;
/// Serial mux port of the IF switch.
pub const IF_PORT: u8 = 21;
/// Serial mux port of the cryostat.
pub const CRYO_PORT: u8 = 22;
/// Serial mux port of the LO photonic receiver.
pub const LPR_PORT: u8 = 23;
/// Serial mux port of the FE thermal interlock module.
pub const FETIM_PORT: u8 = 24;

/// The cartridge sub-assemblies that own a serial port.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Subsystem {
    Bias = 0,
    Lo = 1,
}

/// Get the serial mux port of a cartridge sub-assembly.
///
/// # Args
/// * `band` - The cartridge index (0 for band 1).
/// * `subsystem` - The addressed sub-assembly.
pub fn cartridge_port(band: usize, subsystem: Subsystem) -> u8 {
    (2 * band + 1 - subsystem as usize) as u8
}

/// Bit shift applied to a transfer by the serial mux.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Shift {
    None,
    Left(u8),
    Right(u8),
}

/// A single framed transaction on the multiplexed serial bus.
///
/// # Note
/// Transactions are atomic: on failure no partial data has been transferred.
pub trait SerialAccess {
    /// Write `bits` bits of `data` to a command register.
    fn write(&mut self, port: u8, command: u8, data: u64, bits: u8, shift: Shift)
        -> Result<(), Error>;

    /// Read `bits` bits back from a command register.
    fn read(&mut self, port: u8, command: u8, bits: u8, shift: Shift) -> Result<u64, Error>;
}

/// The hardware access context threaded through every handler.
///
/// # Note
/// The bus bundles the serial transport, the system clock and the error history so that
/// handlers receive their dependencies explicitly.
pub struct Bus<'a> {
    serial: &'a mut dyn SerialAccess,
    clock: &'a mut dyn Clock,
    history: &'a mut ErrorHistory,
}

impl<'a> Bus<'a> {
    pub fn new(
        serial: &'a mut dyn SerialAccess,
        clock: &'a mut dyn Clock,
        history: &'a mut ErrorHistory,
    ) -> Self {
        Self {
            serial,
            clock,
            history,
        }
    }

    pub fn write(
        &mut self,
        port: u8,
        command: u8,
        data: u64,
        bits: u8,
        shift: Shift,
    ) -> Result<(), Error> {
        self.serial
            .write(port, command, data, bits, shift)
            .inspect_err(|_| warn!("Serial write failed: port {} command {:#x}", port, command))
    }

    pub fn read(&mut self, port: u8, command: u8, bits: u8, shift: Shift) -> Result<u64, Error> {
        self.serial
            .read(port, command, bits, shift)
            .inspect_err(|_| warn!("Serial read failed: port {} command {:#x}", port, command))
    }

    pub fn clock(&mut self) -> &mut dyn Clock {
        &mut *self.clock
    }

    pub fn now(&mut self) -> Instant {
        self.clock.now()
    }

    /// Record an error in the error history.
    pub fn store_error(&mut self, module: ErrorModule, code: u8) {
        warn!("Error {:?}:{:#04x}", module, code);
        self.history.store(module, code);
    }

    pub fn history(&mut self) -> &mut ErrorHistory {
        &mut *self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartridge_ports() {
        assert_eq!(cartridge_port(0, Subsystem::Bias), 1);
        assert_eq!(cartridge_port(0, Subsystem::Lo), 0);
        assert_eq!(cartridge_port(9, Subsystem::Bias), 19);
        assert_eq!(cartridge_port(9, Subsystem::Lo), 18);
    }
}
