//! Serial register map of the IF switch
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use core::ops::Range;

use bit_field::BitField;

use crate::{
    error::ErrorModule,
    monitor::{AnalogMonitor, MonitorFamily, ReadyPoll, ADC_READY_TIMEOUT},
    register::Shadow,
    serial::{Bus, Shift, IF_PORT},
    Error,
};

use super::BANDS;

pub mod command {
    /// Parallel writes are addressed by register index.
    pub const AREG: u8 = 0x00;
    pub const FREG: u8 = 0x05;
    pub const GREG: u8 = 0x06;
    pub const ADC_STROBE: u8 = 0x08;
    pub const ADC_DATA: u8 = 0x09;
    pub const STATUS: u8 = 0x0A;

    /// Attenuation register of an IF channel (BREG to EREG).
    pub const fn attenuation(channel: usize) -> u8 {
        0x01 + channel as u8
    }
}

/// The number of IF channels.
pub const CHANNELS: usize = 4;

const REGISTER_BITS: u8 = 5;
const GREG_BITS: u8 = 4;
const STATUS_BITS: u8 = 4;
const SHIFT: Shift = Shift::Left(1);

const STATUS_REVISION: Range<usize> = 0..2;

/// Switch way of every band.
const WAYS: [u16; BANDS] = [0, 1, 2, 3, 4, 8, 9, 10, 11, 12];

static MONITOR: MonitorFamily = MonitorFamily {
    module: ErrorModule::IfSerial,
    select_command: command::GREG,
    select_bits: GREG_BITS,
    select_shift: SHIFT,
    strobe_command: command::ADC_STROBE,
    strobe_bits: 3,
    ready: Some(ReadyPoll {
        command: command::STATUS,
        bits: STATUS_BITS,
        ready_bit: 3,
        timeout: ADC_READY_TIMEOUT,
    }),
    data_command: command::ADC_DATA,
    data_bits: 18,
    data_mask: 0xFFFF,
};

/// The temperature monitor voltages of an IF channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TemperatureMonitor {
    /// First bridge voltage of the revision 0 sensor circuit.
    BridgeV1,
    /// Second bridge voltage of the revision 0 sensor circuit.
    BridgeV2,
    /// Divider voltage of the single-reading sensor circuit.
    Divider,
}

impl TemperatureMonitor {
    fn select(self, channel: usize) -> u16 {
        let channel = channel as u16;
        match self {
            TemperatureMonitor::BridgeV1 => 2 * channel,
            TemperatureMonitor::BridgeV2 => 2 * channel + 1,
            TemperatureMonitor::Divider => channel,
        }
    }
}

/// Register images of the IF switch.
pub struct IfRegisters {
    way: Shadow<u16>,
    attenuation: [Shadow<u16>; CHANNELS],
    servo: Shadow<u16>,
    greg: Shadow<u16>,
    monitor: AnalogMonitor,
}

impl Default for IfRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl IfRegisters {
    pub fn new() -> Self {
        Self {
            way: Shadow::new(0),
            attenuation: [Shadow::new(0); CHANNELS],
            servo: Shadow::new(0),
            greg: Shadow::new(0),
            monitor: AnalogMonitor::new(&MONITOR, IF_PORT),
        }
    }

    pub fn way(&self) -> u16 {
        self.way.get()
    }

    pub fn attenuation(&self, channel: usize) -> u8 {
        self.attenuation[channel].get() as u8
    }

    pub fn servo_enabled(&self, channel: usize) -> bool {
        self.servo.get().get_bit(channel)
    }

    pub fn greg(&self) -> u16 {
        self.greg.get()
    }

    pub fn adc_data(&self) -> u16 {
        self.monitor.adc_data()
    }

    /// Read the hardware revision level from the status register.
    pub fn revision(&self, bus: &mut Bus) -> Result<u8, Error> {
        let status = bus.read(IF_PORT, command::STATUS, STATUS_BITS, Shift::None)?;
        Ok(status.get_bits(STATUS_REVISION) as u8)
    }

    /// Route the IF of a band to the outputs.
    pub fn select_band(&mut self, bus: &mut Bus, band: usize) -> Result<(), Error> {
        let way = *WAYS.get(band).ok_or(Error::Bounds)?;
        self.way.update(
            |reg| *reg = way,
            |reg| bus.write(IF_PORT, command::AREG, reg as u64, REGISTER_BITS, SHIFT),
        )
    }

    /// Set the attenuation of an IF channel in dB.
    pub fn set_attenuation(
        &mut self,
        bus: &mut Bus,
        channel: usize,
        attenuation: u8,
    ) -> Result<(), Error> {
        let reg = self.attenuation.get_mut(channel).ok_or(Error::Bounds)?;
        reg.update(
            |reg| {
                reg.set_bits(0..4, attenuation as u16);
            },
            |reg| {
                bus.write(
                    IF_PORT,
                    command::attenuation(channel),
                    reg as u64,
                    REGISTER_BITS,
                    SHIFT,
                )
            },
        )
    }

    pub fn set_servo_enable(
        &mut self,
        bus: &mut Bus,
        channel: usize,
        enable: bool,
    ) -> Result<(), Error> {
        self.servo.update(
            |reg| {
                reg.set_bit(channel, enable);
            },
            |reg| bus.write(IF_PORT, command::FREG, reg as u64, REGISTER_BITS, SHIFT),
        )
    }

    /// Convert a temperature monitor voltage of an IF channel.
    pub fn sample(
        &mut self,
        bus: &mut Bus,
        channel: usize,
        point: TemperatureMonitor,
    ) -> Result<u16, Error> {
        let mut greg = self.greg.begin();
        *greg.value_mut() = point.select(channel);

        let data = self.monitor.sample(bus, greg.value() as u64)?;
        greg.commit();

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        history::ErrorHistory,
        mock::{MockBus, MockClock},
    };

    #[test]
    fn band_ways() {
        let mut serial = MockBus::new();
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut regs = IfRegisters::new();

        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
        regs.select_band(&mut bus, 6).unwrap();
        assert_eq!(regs.select_band(&mut bus, 10), Err(Error::Bounds));
        drop(bus);

        assert_eq!(serial.last_write(IF_PORT, command::AREG), Some(9));
        assert_eq!(regs.way(), 9);
    }

    #[test]
    fn channel_registers() {
        let mut serial = MockBus::new();
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut regs = IfRegisters::new();

        {
            let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
            regs.set_attenuation(&mut bus, 2, 11).unwrap();
            regs.set_servo_enable(&mut bus, 3, true).unwrap();
            regs.set_servo_enable(&mut bus, 0, true).unwrap();
        }
        assert_eq!(serial.last_write(IF_PORT, 0x03), Some(11));
        assert_eq!(serial.last_write(IF_PORT, command::FREG), Some(0x09));

        serial.fail_writes = true;
        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
        assert!(regs.set_servo_enable(&mut bus, 3, false).is_err());
        assert!(regs.servo_enabled(3));
        assert_eq!(regs.attenuation(2), 11);
    }

    #[test]
    fn temperature_selects() {
        let mut serial = MockBus::new();
        serial.respond(IF_PORT, command::ADC_DATA, 0x1234);
        serial.respond(IF_PORT, command::STATUS, 0x09);
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut regs = IfRegisters::new();

        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
        assert_eq!(regs.revision(&mut bus), Ok(1));
        assert_eq!(
            regs.sample(&mut bus, 2, TemperatureMonitor::BridgeV2),
            Ok(0x1234)
        );
        assert_eq!(regs.greg(), 5);
        regs.sample(&mut bus, 2, TemperatureMonitor::Divider).unwrap();
        assert_eq!(regs.greg(), 2);
    }
}
