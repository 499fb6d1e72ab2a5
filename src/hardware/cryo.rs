//! Serial register map of the cryostat M&C module
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use bit_field::BitField;

use crate::{
    error::ErrorModule,
    monitor::{AnalogMonitor, MonitorFamily, ReadyPoll, ADC_READY_TIMEOUT},
    register::Shadow,
    serial::{Bus, Shift, CRYO_PORT},
    timer::{AsyncTimer, Duration, TimerState},
    Error,
};

pub mod command {
    pub const AREG: u8 = 0x00;
    pub const BREG: u8 = 0x01;
    pub const ADC_STROBE: u8 = 0x08;
    pub const ADC_DATA: u8 = 0x09;
    pub const STATUS: u8 = 0x0A;
}

const AREG_BITS: u8 = 12;
const BREG_BITS: u8 = 6;
const SHIFT: Shift = Shift::Left(1);
const STATUS_BITS: u8 = 10;
const ADC_READY_BIT: usize = 9;

/// Settling time of the analog multiplexer before a conversion.
pub const SETTLE_TIME: Duration = Duration::millis(50);

/// Multiplexer addresses of the temperature sensors.
const TEMPERATURE_SELECT: [u16; 13] = [
    0x000, 0x004, 0x005, 0x008, 0x00A, 0x00C, 0x010, 0x014, 0x018, 0x100, 0x120, 0x140, 0x160,
];

static MONITOR: MonitorFamily = MonitorFamily {
    module: ErrorModule::CryoSerial,
    select_command: command::AREG,
    select_bits: AREG_BITS,
    select_shift: SHIFT,
    strobe_command: command::ADC_STROBE,
    strobe_bits: 3,
    ready: Some(ReadyPoll {
        command: command::STATUS,
        bits: STATUS_BITS,
        ready_bit: ADC_READY_BIT,
        timeout: ADC_READY_TIMEOUT,
    }),
    data_command: command::ADC_DATA,
    data_bits: 18,
    data_mask: 0xFFFF,
};

/// Analog monitor points of the cryostat.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AnalogPoint {
    Temperature(usize),
    Pressure(usize),
    SupplyCurrent,
}

impl AnalogPoint {
    fn select(self) -> u16 {
        match self {
            AnalogPoint::Temperature(sensor) => TEMPERATURE_SELECT[sensor],
            AnalogPoint::Pressure(sensor) => 0x100 * sensor as u16 + 0x200,
            AnalogPoint::SupplyCurrent => 0x400,
        }
    }
}

/// The switched outputs of the BREG register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Switch {
    /// Active low in hardware.
    VacuumController = 0,
    TurboPump = 1,
    BackingPump = 2,
    SolenoidValve = 3,
    GateValve = 4,
}

/// A reading of the digital status register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CryoStatus(u16);

impl CryoStatus {
    pub fn vacuum_controller_ok(&self) -> bool {
        self.0.get_bit(0)
    }

    pub fn turbo_error(&self) -> bool {
        self.0.get_bit(1)
    }

    pub fn turbo_speed(&self) -> bool {
        self.0.get_bit(2)
    }

    /// The four gate valve position sensors.
    pub fn gate_sensors(&self) -> u8 {
        self.0.get_bits(3..7) as u8
    }

    /// The two solenoid valve position sensors.
    pub fn solenoid_sensors(&self) -> u8 {
        self.0.get_bits(7..9) as u8
    }
}

/// Register images and the stepped ADC of the cryostat.
pub struct CryoRegisters {
    areg: Shadow<u16>,
    breg: Shadow<u8>,
    monitor: AnalogMonitor,
    settle: AsyncTimer,
    /// The point the multiplexer is settling on.
    selected: Option<AnalogPoint>,
}

impl Default for CryoRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl CryoRegisters {
    /// Construct the registers in their reset state: everything off, vacuum controller on.
    pub fn new() -> Self {
        Self {
            areg: Shadow::new(0),
            breg: Shadow::new(0),
            monitor: AnalogMonitor::new(&MONITOR, CRYO_PORT),
            settle: AsyncTimer::new(),
            selected: None,
        }
    }

    pub fn areg(&self) -> u16 {
        self.areg.get()
    }

    pub fn breg(&self) -> u8 {
        self.breg.get()
    }

    /// The commanded state of a switched output.
    pub fn switch(&self, output: Switch) -> bool {
        self.breg.get().get_bit(output as usize) != (output == Switch::VacuumController)
    }

    /// Command a switched output.
    pub fn set_switch(&mut self, bus: &mut Bus, output: Switch, on: bool) -> Result<(), Error> {
        let level = on != (output == Switch::VacuumController);
        self.breg.update(
            |breg| {
                breg.set_bit(output as usize, level);
            },
            |breg| bus.write(CRYO_PORT, command::BREG, breg as u64, BREG_BITS, SHIFT),
        )
    }

    pub fn status(&self, bus: &mut Bus) -> Result<CryoStatus, Error> {
        let status = bus.read(CRYO_PORT, command::STATUS, STATUS_BITS, Shift::None)?;
        Ok(CryoStatus(status as u16))
    }

    /// Advance the conversion of an analog monitor point by one step.
    ///
    /// # Note
    /// The first call selects the point and arms the settling timer. Once it expired the ADC is
    /// strobed and read. A failure restarts the conversion from the selection.
    ///
    /// # Returns
    /// The ADC code once the conversion completed.
    pub fn convert(&mut self, bus: &mut Bus, point: AnalogPoint) -> Result<Option<u16>, Error> {
        if self.selected != Some(point) {
            self.selected = None;
            self.settle.stop();

            let mut areg = self.areg.begin();
            *areg.value_mut() = point.select();
            self.monitor.select(bus, areg.value() as u64)?;
            areg.commit();

            self.settle.start(bus.clock(), SETTLE_TIME)?;
            self.selected = Some(point);
            return Ok(None);
        }

        if self.settle.query(bus.clock()) == TimerState::Running {
            return Ok(None);
        }

        self.selected = None;
        self.monitor.convert(bus).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::Bench;

    #[test]
    fn conversion_waits_for_settling() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::ADC_DATA, 0x2_8000);
        let mut regs = CryoRegisters::new();

        let point = AnalogPoint::Temperature(9);
        assert_eq!(regs.convert(&mut bench.bus(), point), Ok(None));
        assert_eq!(regs.areg(), 0x100);
        assert_eq!(regs.convert(&mut bench.bus(), point), Ok(None));
        assert!(bench.serial.last_write(CRYO_PORT, command::ADC_STROBE).is_none());

        bench.clock.advance(50);
        assert_eq!(regs.convert(&mut bench.bus(), point), Ok(Some(0x8000)));
        assert_eq!(bench.serial.writes_to(CRYO_PORT)[0], (command::AREG, 0x100));

        // The next request selects again.
        assert_eq!(regs.convert(&mut bench.bus(), AnalogPoint::Pressure(1)), Ok(None));
        assert_eq!(regs.areg(), 0x300);
    }

    #[test]
    fn busy_adc_restarts_conversion() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::STATUS, 0x000);
        bench.clock = crate::mock::MockClock::new(10);
        let mut regs = CryoRegisters::new();

        let point = AnalogPoint::SupplyCurrent;
        regs.convert(&mut bench.bus(), point).unwrap();
        bench.clock.advance(50);
        assert_eq!(regs.convert(&mut bench.bus(), point), Err(Error::Timeout));
        assert_eq!(bench.history.next(), 0x2BF6);

        let selects = bench.serial.writes_to(CRYO_PORT).iter().filter(|w| w.0 == command::AREG).count();
        assert_eq!(regs.convert(&mut bench.bus(), point), Ok(None));
        assert_eq!(
            bench.serial.writes_to(CRYO_PORT).iter().filter(|w| w.0 == command::AREG).count(),
            selects + 1
        );
    }

    #[test]
    fn switched_outputs() {
        let mut bench = Bench::new();
        let mut regs = CryoRegisters::new();
        assert!(regs.switch(Switch::VacuumController));
        assert!(!regs.switch(Switch::BackingPump));

        regs.set_switch(&mut bench.bus(), Switch::BackingPump, true).unwrap();
        regs.set_switch(&mut bench.bus(), Switch::VacuumController, false).unwrap();
        assert_eq!(regs.breg(), 0x05);
        assert_eq!(bench.serial.last_write(CRYO_PORT, command::BREG), Some(0x05));

        bench.serial.fail_writes = true;
        assert!(regs.set_switch(&mut bench.bus(), Switch::GateValve, true).is_err());
        assert!(!regs.switch(Switch::GateValve));
    }

    #[test]
    fn status_fields() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::STATUS, 0b10_0101_0101);
        let regs = CryoRegisters::new();

        let status = regs.status(&mut bench.bus()).unwrap();
        assert!(status.vacuum_controller_ok());
        assert!(!status.turbo_error());
        assert!(status.turbo_speed());
        assert_eq!(status.gate_sensors(), 0xA);
        assert_eq!(status.solenoid_sensors(), 0x0);
    }
}
