//! Serial register map of the LO photonic receiver
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
    serial::{Bus, Shift, LPR_PORT},
    timer::Duration,
    Error,
};

pub mod command {
    pub const DAC_RESET: u8 = 0x01;
    pub const SWITCH_STROBE: u8 = 0x02;
    pub const ADC_STROBE: u8 = 0x03;
    pub const DAC_DATA: u8 = 0x05;
    pub const ADC_DATA: u8 = 0x06;
    pub const TEN_MHZ_MODE: u8 = 0x07;
    pub const AREG: u8 = 0x08;
    pub const BREG: u8 = 0x09;
    pub const STATUS: u8 = 0x0A;
}

/// Error code of a switch command issued while the optical switch is moving.
pub const ERR_SWITCH_BUSY: u8 = 0x02;

/// Time granted to the optical switch to settle during initialization.
pub const SWITCH_READY_TIMEOUT: Duration = Duration::millis(5000);

/// The number of optical switch output ports.
pub const SWITCH_PORTS: u8 = 10;

const AREG_BITS: u8 = 9;
const BREG_BITS: u8 = 4;
const STATUS_BITS: u8 = 4;
const SHIFT: Shift = Shift::Left(1);

const AREG_PORT: Range<usize> = 0..5;
/// Port field value selecting the shutter.
const AREG_SHUTTER: u16 = 0x00;
/// Port field offset of the first output port.
const AREG_PORT_OFFSET: u16 = 0x10;

const DAC_BITS: u8 = 29;
const DAC_SHIFT: Shift = Shift::Left(5);
const DAC_DATA: Range<usize> = 0..16;
const DAC_QUICK_LOAD: usize = 21;
const DAC_SELECT: usize = 23;
/// DAC codes per volt of modulation input.
const DAC_MODULATION_SCALE: f32 = 65536.0 * 0.2;

const SWITCH_STROBE_BITS: u8 = 10;

static MONITOR: MonitorFamily = MonitorFamily {
    module: ErrorModule::LprSerial,
    select_command: command::BREG,
    select_bits: BREG_BITS,
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

/// LPR analog monitor points.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MonitorPoint {
    LaserPhotoDetector,
    EdfaPhotoDetector,
    Temperature(u8),
    LaserDriveCurrent,
    PumpTemperature,
}

impl MonitorPoint {
    fn select(self) -> u16 {
        match self {
            MonitorPoint::LaserPhotoDetector => 0x00,
            MonitorPoint::EdfaPhotoDetector => 0x01,
            MonitorPoint::Temperature(sensor) => 0x02 + sensor as u16,
            MonitorPoint::LaserDriveCurrent => 0x04,
            MonitorPoint::PumpTemperature => 0x05,
        }
    }
}

/// Decoded LPR status register.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LprStatus {
    /// The EDFA driver reports an over-temperature alarm.
    pub edfa_driver_alarm: bool,
    /// The optical switch is moving.
    pub switch_busy: bool,
    pub switch_error: bool,
}

/// Register images of the LPR.
pub struct LprRegisters {
    areg: Shadow<u16>,
    breg: Shadow<u16>,
    dac: Shadow<u32>,
    monitor: AnalogMonitor,
}

impl Default for LprRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl LprRegisters {
    pub fn new() -> Self {
        Self {
            areg: Shadow::new(0),
            breg: Shadow::new(0),
            dac: Shadow::new(0),
            monitor: AnalogMonitor::new(&MONITOR, LPR_PORT),
        }
    }

    pub fn areg(&self) -> u16 {
        self.areg.get()
    }

    pub fn breg(&self) -> u16 {
        self.breg.get()
    }

    pub fn dac(&self) -> u32 {
        self.dac.get()
    }

    pub fn adc_data(&self) -> u16 {
        self.monitor.adc_data()
    }

    pub fn status(&self, bus: &mut Bus) -> Result<LprStatus, Error> {
        let status = bus.read(LPR_PORT, command::STATUS, STATUS_BITS, Shift::None)?;
        Ok(LprStatus {
            edfa_driver_alarm: status.get_bit(0),
            switch_busy: status.get_bit(1),
            switch_error: status.get_bit(2),
        })
    }

    /// Switch the serial interface to the 10 MHz clock.
    pub fn enable_10mhz(&self, bus: &mut Bus) -> Result<(), Error> {
        bus.write(LPR_PORT, command::TEN_MHZ_MODE, 0, 0, Shift::None)
    }

    pub fn reset_dac(&self, bus: &mut Bus) -> Result<(), Error> {
        bus.write(LPR_PORT, command::DAC_RESET, 0, 1, Shift::None)
    }

    /// Set the EDFA modulation input voltage.
    pub fn set_modulation_input(&mut self, bus: &mut Bus, voltage: f32) -> Result<(), Error> {
        let code = (DAC_MODULATION_SCALE * voltage).clamp(0.0, 65535.0) as u32;
        self.dac.update(
            |dac| {
                dac.set_bits(DAC_DATA, code);
                dac.set_bit(DAC_QUICK_LOAD, false);
                dac.set_bit(DAC_SELECT, false);
            },
            |dac| bus.write(LPR_PORT, command::DAC_DATA, dac as u64, DAC_BITS, DAC_SHIFT),
        )
    }

    /// Move the optical switch to an output port.
    ///
    /// # Args
    /// * `port` - The output port, or `None` to close the shutter.
    /// * `forced` - Skip the busy check.
    pub fn set_switch(
        &mut self,
        bus: &mut Bus,
        port: Option<u8>,
        forced: bool,
    ) -> Result<(), Error> {
        if let Some(port) = port {
            if port >= SWITCH_PORTS {
                return Err(Error::Bounds);
            }
        }

        if !forced && self.status(bus)?.switch_busy {
            bus.store_error(ErrorModule::LprSerial, ERR_SWITCH_BUSY);
            return Err(Error::InvalidState);
        }

        let field = port.map_or(AREG_SHUTTER, |port| AREG_PORT_OFFSET + port as u16);
        self.areg.update(
            |areg| {
                areg.set_bits(AREG_PORT, field);
            },
            |areg| bus.write(LPR_PORT, command::AREG, areg as u64, AREG_BITS, SHIFT),
        )?;

        bus.write(
            LPR_PORT,
            command::SWITCH_STROBE,
            0,
            SWITCH_STROBE_BITS,
            Shift::None,
        )
    }

    pub fn sample(&mut self, bus: &mut Bus, point: MonitorPoint) -> Result<u16, Error> {
        let mut breg = self.breg.begin();
        *breg.value_mut() = point.select();

        let data = self.monitor.sample(bus, breg.value() as u64)?;
        breg.commit();

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
    fn busy_switch_is_refused() {
        let mut serial = MockBus::new();
        serial.respond(LPR_PORT, command::STATUS, 0x0A);
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut regs = LprRegisters::new();

        {
            let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
            assert_eq!(
                regs.set_switch(&mut bus, Some(3), false),
                Err(Error::InvalidState)
            );
            assert_eq!(bus.history().next(), 0x3302);

            regs.set_switch(&mut bus, None, true).unwrap();
        }
        assert_eq!(regs.areg(), 0);
        assert_eq!(serial.last_write(LPR_PORT, command::SWITCH_STROBE), Some(0));
    }

    #[test]
    fn port_selection() {
        let mut serial = MockBus::new();
        serial.respond(LPR_PORT, command::STATUS, 0x08);
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut regs = LprRegisters::new();

        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
        regs.set_switch(&mut bus, Some(4), false).unwrap();
        assert_eq!(regs.areg(), 0x14);
        assert_eq!(regs.set_switch(&mut bus, Some(10), false), Err(Error::Bounds));
    }

    #[test]
    fn modulation_dac_word() {
        let mut serial = MockBus::new();
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut regs = LprRegisters::new();

        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
        regs.set_modulation_input(&mut bus, 2.5).unwrap();
        assert_eq!(regs.dac(), 32768);

        regs.sample(&mut bus, MonitorPoint::Temperature(1)).unwrap();
        assert_eq!(regs.breg(), 3);
    }
}
