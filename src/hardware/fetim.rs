//! Serial register map of the front-end thermal interlock module
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use bit_field::BitField;

use crate::{
    error::ErrorModule,
    monitor::{AnalogMonitor, MonitorFamily},
    register::Shadow,
    serial::{Bus, Shift, FETIM_PORT},
    Error,
};

pub mod command {
    pub const AREG_OUT: u8 = 0x00;
    pub const DREG_OUT: u8 = 0x03;
    pub const ADC_STROBE: u8 = 0x06;
    pub const AREG_IN: u8 = 0x08;
    pub const BREG_IN: u8 = 0x09;
    pub const CREG_IN: u8 = 0x0A;
}

/// Revision code of a slot without FETIM hardware.
pub const NO_HARDWARE: u8 = 0x00;

const AREG_OUT_BITS: u8 = 5;
const DREG_OUT_BITS: u8 = 3;
const SHIFT: Shift = Shift::Left(2);
const BREG_IN_BITS: u8 = 12;
const CREG_IN_BITS: u8 = 5;

static MONITOR: MonitorFamily = MonitorFamily {
    module: ErrorModule::FetimSerial,
    select_command: command::AREG_OUT,
    select_bits: AREG_OUT_BITS,
    select_shift: SHIFT,
    strobe_command: command::ADC_STROBE,
    strobe_bits: 6,
    ready: None,
    data_command: command::AREG_IN,
    data_bits: 8,
    data_mask: 0xFF,
};

/// Parallel ADC monitor points.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MonitorPoint {
    Temperature(u8),
    Glitch,
    Flow(u8),
}

impl MonitorPoint {
    fn select(self) -> u16 {
        match self {
            MonitorPoint::Temperature(sensor) => sensor as u16,
            MonitorPoint::Glitch => 0x05,
            MonitorPoint::Flow(sensor) => 0x06 + sensor as u16,
        }
    }
}

/// Digital interlock inputs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Digital {
    FlowOutOfRange = 0,
    TemperatureOutOfRange = 1,
    GlitchTriggered = 2,
    ShutdownTriggered = 3,
    DelayTriggered = 4,
    SingleFail = 5,
    MultiFail = 6,
    CompressorCable = 7,
    CompressorInterlock = 8,
    He2PressureOutOfRange = 9,
    ExternalTemp1OutOfRange = 10,
    ExternalTemp2OutOfRange = 11,
}

/// Register images of the FETIM.
pub struct FetimRegisters {
    areg: Shadow<u16>,
    safe: Shadow<u16>,
    monitor: AnalogMonitor,
}

impl Default for FetimRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl FetimRegisters {
    pub fn new() -> Self {
        Self {
            areg: Shadow::new(0),
            safe: Shadow::new(0),
            monitor: AnalogMonitor::new(&MONITOR, FETIM_PORT),
        }
    }

    pub fn areg(&self) -> u16 {
        self.areg.get()
    }

    /// The last front-end status signalled to the interlock.
    pub fn fe_safe(&self) -> bool {
        self.safe.get().get_bit(0)
    }

    /// Read the hardware revision level.
    pub fn revision(&self, bus: &mut Bus) -> Result<u8, Error> {
        let creg = bus.read(FETIM_PORT, command::CREG_IN, CREG_IN_BITS, Shift::None)?;
        Ok(creg.get_bits(0..5) as u8)
    }

    /// Read the digital inputs and return the addressed one.
    pub fn digital(&self, bus: &mut Bus, input: Digital) -> Result<bool, Error> {
        let breg = bus.read(FETIM_PORT, command::BREG_IN, BREG_IN_BITS, Shift::None)?;
        Ok(breg.get_bit(input as usize))
    }

    /// Tell the interlock whether the front end is safe to operate.
    pub fn set_fe_safe(&mut self, bus: &mut Bus, safe: bool) -> Result<(), Error> {
        self.safe.update(
            |dreg| {
                dreg.set_bit(0, safe);
            },
            |dreg| bus.write(FETIM_PORT, command::DREG_OUT, dreg as u64, DREG_OUT_BITS, SHIFT),
        )
    }

    pub fn sample(&mut self, bus: &mut Bus, point: MonitorPoint) -> Result<u8, Error> {
        let mut areg = self.areg.begin();
        *areg.value_mut() = point.select();

        let data = self.monitor.sample(bus, areg.value() as u64)?;
        areg.commit();

        Ok(data as u8)
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
    fn parallel_adc_has_no_ready_poll() {
        let mut serial = MockBus::new();
        serial.respond(FETIM_PORT, command::AREG_IN, 0x1C0);
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut regs = FetimRegisters::new();

        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
        assert_eq!(regs.sample(&mut bus, MonitorPoint::Flow(1)), Ok(0xC0));
        drop(bus);

        assert_eq!(regs.areg(), 0x07);
        assert_eq!(serial.reads, [(FETIM_PORT, command::AREG_IN)]);
    }

    #[test]
    fn digital_inputs() {
        let mut serial = MockBus::new();
        serial.respond(FETIM_PORT, command::BREG_IN, 0x008);
        serial.respond(FETIM_PORT, command::CREG_IN, 0x02);
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut regs = FetimRegisters::new();

        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
        assert_eq!(regs.digital(&mut bus, Digital::ShutdownTriggered), Ok(true));
        assert_eq!(regs.digital(&mut bus, Digital::MultiFail), Ok(false));
        assert_eq!(regs.revision(&mut bus), Ok(2));

        regs.set_fe_safe(&mut bus, true).unwrap();
        assert!(regs.fe_safe());
    }
}
