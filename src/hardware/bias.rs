//! Serial register map of the cartridge bias modules
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Note
//! Each polarization has its own bias board behind the cartridge BIAS port. The boards are
//! addressed by offsetting every command word by `0x10` per polarization.
use core::ops::Range;

use bit_field::BitField;

use super::{Polarization, Sideband};
use crate::{
    error::ErrorModule,
    linear_transformation::LinearTransformation,
    monitor::{AnalogMonitor, MonitorFamily, ReadyPoll, ADC_READY_TIMEOUT},
    register::Shadow,
    serial::{cartridge_port, Bus, Shift, Subsystem},
    timer::Duration,
    Error,
};

/// BIAS command words of polarization 0. Polarization 1 adds `0x10`.
pub mod command {
    pub const ADC_STROBE: u8 = 0x03;
    pub const DAC1: u8 = 0x04;
    pub const DAC2: u8 = 0x05;
    pub const ADC_DATA: u8 = 0x06;
    pub const TEN_MHZ_MODE: u8 = 0x07;
    pub const AREG: u8 = 0x08;
    pub const BREG: u8 = 0x09;
    pub const STATUS: u8 = 0x0A;
}

const AREG_BITS: u8 = 13;
const AREG_SHIFT: Shift = Shift::Left(1);
const BREG_BITS: u8 = 9;
const BREG_SHIFT: Shift = Shift::Left(1);
const DAC1_BITS: u8 = 26;
const DAC1_SHIFT: Shift = Shift::Left(2);
const DAC2_BITS: u8 = 29;
const DAC2_SHIFT: Shift = Shift::Left(5);
const STATUS_BITS: u8 = 4;

const DAC1_READY_BIT: usize = 2;
const ADC_READY_BIT: usize = 3;

/// Timeout of the DAC1 ready poll.
pub const DAC1_READY_TIMEOUT: Duration = Duration::millis(100);

const AREG_LNA_STAGE: Range<usize> = 0..2;
const AREG_LNA_POINT: Range<usize> = 2..5;
const AREG_TEMP_SENSOR: Range<usize> = 5..7;
const AREG_MONITOR_POINT: Range<usize> = 7..11;

const BREG_SIS_HEATER: usize = 0;
const BREG_LNA_LED: usize = 1;
const BREG_SIS_OPEN_LOOP: Range<usize> = 2..4;
const BREG_LNA_ENABLE: Range<usize> = 4..6;

const DAC1_DATA: Range<usize> = 0..14;
const DAC1_INPUT_REGISTER: Range<usize> = 14..16;
const DAC1_CHANNEL: Range<usize> = 16..20;
const DAC1_READ_WRITE: usize = 22;
const DAC1_TOGGLE: usize = 23;
const DAC1_INPUT_DATA_REGISTER: u32 = 3;

const DAC2_DATA: Range<usize> = 0..16;
const DAC2_QUICK_LOAD: usize = 21;
const DAC2_INPUT_REGISTER: Range<usize> = 22..24;

/// Full range of DAC1 codes.
pub const DAC1_RANGE: f32 = 16384.0;
/// Full range of DAC2 codes.
pub const DAC2_RANGE: f32 = 65536.0;

/// SIS junction voltage in mV, centered on the mid-scale code.
const SIS_VOLTAGE_DAC: LinearTransformation = LinearTransformation::new(50.0 / DAC2_RANGE, -25.0);
/// SIS magnet current in mA, centered on the mid-scale code.
const MAGNET_CURRENT_DAC: LinearTransformation =
    LinearTransformation::new(250.0 / DAC2_RANGE, -125.0);
/// LNA drain voltage in V.
const DRAIN_VOLTAGE_DAC: LinearTransformation = LinearTransformation::new(5.0 / DAC1_RANGE, 0.0);
/// LNA drain current in mA.
const DRAIN_CURRENT_DAC: LinearTransformation = LinearTransformation::new(50.0 / DAC1_RANGE, 0.0);

const fn family(offset: u8) -> MonitorFamily {
    MonitorFamily {
        module: ErrorModule::BiasSerial,
        select_command: offset + command::AREG,
        select_bits: AREG_BITS,
        select_shift: AREG_SHIFT,
        strobe_command: offset + command::ADC_STROBE,
        strobe_bits: 3,
        ready: Some(ReadyPoll {
            command: offset + command::STATUS,
            bits: STATUS_BITS,
            ready_bit: ADC_READY_BIT,
            timeout: ADC_READY_TIMEOUT,
        }),
        data_command: offset + command::ADC_DATA,
        data_bits: 18,
        data_mask: 0xFFFF,
    }
}

static MONITOR: [MonitorFamily; 2] = [family(0x00), family(0x10)];

/// The ports of an LNA stage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LnaPort {
    DrainVoltage = 0,
    DrainCurrent = 1,
    GateVoltage = 2,
}

/// The analog monitor points of a bias board.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MonitorPoint {
    SisVoltage(Sideband),
    SisCurrent(Sideband),
    MagnetVoltage(Sideband),
    MagnetCurrent(Sideband),
    SisHeaterCurrent,
    /// One of the three temperature sensors wired to the board.
    Temperature(u8),
    Lna {
        sideband: Sideband,
        stage: u8,
        port: LnaPort,
    },
}

impl MonitorPoint {
    /// The AREG image selecting the point. All other AREG fields are cleared.
    fn areg(self) -> u16 {
        let mut areg = 0u16;
        match self {
            MonitorPoint::SisVoltage(sideband) => {
                areg.set_bits(AREG_MONITOR_POINT, 2 * sideband as u16 + 0x01);
            }
            MonitorPoint::SisCurrent(sideband) => {
                areg.set_bits(AREG_MONITOR_POINT, 2 * sideband as u16 + 0x02);
            }
            MonitorPoint::MagnetVoltage(sideband) => {
                areg.set_bits(AREG_MONITOR_POINT, 2 * sideband as u16 + 0x05);
            }
            MonitorPoint::MagnetCurrent(sideband) => {
                areg.set_bits(AREG_MONITOR_POINT, 2 * sideband as u16 + 0x06);
            }
            MonitorPoint::SisHeaterCurrent => {
                areg.set_bits(AREG_MONITOR_POINT, 0x09);
            }
            MonitorPoint::Temperature(sensor) => {
                areg.set_bits(AREG_MONITOR_POINT, 0x0A);
                areg.set_bits(AREG_TEMP_SENSOR, sensor as u16);
            }
            MonitorPoint::Lna {
                sideband,
                stage,
                port,
            } => {
                areg.set_bits(AREG_LNA_STAGE, stage as u16);
                areg.set_bits(
                    AREG_LNA_POINT,
                    (3 * sideband as u16 + port as u16 + 0x04) & 0x07,
                );
            }
        }
        areg
    }
}

/// The BREG mask bit of a sideband. Sidebands are numbered in reverse.
fn sideband_mask(sideband: Sideband) -> u16 {
    2 - sideband as u16
}

/// Register images of one polarization bias board.
pub struct BiasRegisters {
    port: u8,
    offset: u8,
    areg: Shadow<u16>,
    breg: Shadow<u16>,
    dac1: Shadow<u32>,
    dac2: Shadow<u32>,
    monitor: AnalogMonitor,
}

impl BiasRegisters {
    /// Construct the registers of a polarization.
    ///
    /// # Args
    /// * `band` - The cartridge index (0 for band 1).
    /// * `polarization` - The polarization served by the board.
    pub fn new(band: usize, polarization: Polarization) -> Self {
        let port = cartridge_port(band, Subsystem::Bias);
        Self {
            port,
            offset: 0x10 * polarization as u8,
            areg: Shadow::new(0),
            breg: Shadow::new(0),
            dac1: Shadow::new(0),
            dac2: Shadow::new(0),
            monitor: AnalogMonitor::new(&MONITOR[polarization as usize], port),
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    /// The command word of this board.
    pub fn command(&self, base: u8) -> u8 {
        self.offset + base
    }

    pub fn areg(&self) -> u16 {
        self.areg.get()
    }

    pub fn breg(&self) -> u16 {
        self.breg.get()
    }

    pub fn dac1(&self) -> u32 {
        self.dac1.get()
    }

    pub fn dac2(&self) -> u32 {
        self.dac2.get()
    }

    pub fn adc_data(&self) -> u16 {
        self.monitor.adc_data()
    }

    pub fn sis_heater(&self) -> bool {
        self.breg.get().get_bit(BREG_SIS_HEATER)
    }

    pub fn lna_led(&self) -> bool {
        self.breg.get().get_bit(BREG_LNA_LED)
    }

    pub fn sis_open_loop(&self, sideband: Sideband) -> bool {
        self.breg.get().get_bits(BREG_SIS_OPEN_LOOP) & sideband_mask(sideband) != 0
    }

    pub fn lna_enable(&self, sideband: Sideband) -> bool {
        self.breg.get().get_bits(BREG_LNA_ENABLE) & sideband_mask(sideband) != 0
    }

    /// Switch the board interface to the 10 MHz clock.
    pub fn enable_10mhz(&mut self, bus: &mut Bus) -> Result<(), Error> {
        bus.write(self.port, self.command(command::TEN_MHZ_MODE), 0, 0, Shift::None)
    }

    fn update_breg(&mut self, bus: &mut Bus, modify: impl FnOnce(&mut u16)) -> Result<(), Error> {
        let port = self.port;
        let command = self.command(command::BREG);
        self.breg.update(modify, |breg| {
            bus.write(port, command, breg as u64, BREG_BITS, BREG_SHIFT)
        })
    }

    pub fn set_sis_heater(&mut self, bus: &mut Bus, enable: bool) -> Result<(), Error> {
        self.update_breg(bus, |breg| {
            breg.set_bit(BREG_SIS_HEATER, enable);
        })
    }

    pub fn set_lna_led(&mut self, bus: &mut Bus, enable: bool) -> Result<(), Error> {
        self.update_breg(bus, |breg| {
            breg.set_bit(BREG_LNA_LED, enable);
        })
    }

    /// Select open or closed loop SIS mixer bias.
    pub fn set_sis_open_loop(
        &mut self,
        bus: &mut Bus,
        sideband: Sideband,
        open: bool,
    ) -> Result<(), Error> {
        self.update_breg(bus, |breg| {
            let mut mode = breg.get_bits(BREG_SIS_OPEN_LOOP);
            if open {
                mode |= sideband_mask(sideband);
            } else {
                mode &= !sideband_mask(sideband);
            }
            breg.set_bits(BREG_SIS_OPEN_LOOP, mode);
        })
    }

    pub fn set_lna_enable(
        &mut self,
        bus: &mut Bus,
        sideband: Sideband,
        enable: bool,
    ) -> Result<(), Error> {
        self.update_breg(bus, |breg| {
            let mut mask = breg.get_bits(BREG_LNA_ENABLE);
            if enable {
                mask |= sideband_mask(sideband);
            } else {
                mask &= !sideband_mask(sideband);
            }
            breg.set_bits(BREG_LNA_ENABLE, mask);
        })
    }

    /// Write a DAC2 register.
    ///
    /// # Args
    /// * `register` - The DAC2 input register: SIS voltage `Sb`, magnet current `Sb + 2`.
    /// * `code` - The DAC code.
    fn write_dac2(&mut self, bus: &mut Bus, register: u8, code: u16) -> Result<(), Error> {
        let port = self.port;
        let command = self.command(command::DAC2);
        self.dac2.update(
            |dac| {
                dac.set_bits(DAC2_INPUT_REGISTER, register as u32);
                dac.set_bit(DAC2_QUICK_LOAD, false);
                dac.set_bits(DAC2_DATA, code as u32);
            },
            |dac| bus.write(port, command, dac as u64, DAC2_BITS, DAC2_SHIFT),
        )
    }

    /// Set the SIS junction bias voltage in mV.
    pub fn set_sis_voltage(
        &mut self,
        bus: &mut Bus,
        sideband: Sideband,
        voltage: f32,
    ) -> Result<(), Error> {
        let code = dac_code(SIS_VOLTAGE_DAC.code(voltage), u16::MAX as f32);
        self.write_dac2(bus, sideband as u8, code as u16)
    }

    /// Set the SIS magnet current in mA.
    pub fn set_magnet_current(
        &mut self,
        bus: &mut Bus,
        sideband: Sideband,
        current: f32,
    ) -> Result<(), Error> {
        let code = dac_code(MAGNET_CURRENT_DAC.code(current), u16::MAX as f32);
        self.write_dac2(bus, sideband as u8 + 0x02, code as u16)
    }

    /// Set an LNA stage drain voltage or drain current.
    ///
    /// # Note
    /// DAC1 is written only after it reports ready.
    ///
    /// # Args
    /// * `sideband` - The LNA sideband.
    /// * `stage` - The LNA stage.
    /// * `port` - [LnaPort::DrainVoltage] in volts or [LnaPort::DrainCurrent] in mA.
    /// * `value` - The commanded value.
    pub fn set_lna_stage(
        &mut self,
        bus: &mut Bus,
        sideband: Sideband,
        stage: u8,
        port: LnaPort,
        value: f32,
    ) -> Result<(), Error> {
        let transfer = match port {
            LnaPort::DrainVoltage => DRAIN_VOLTAGE_DAC,
            LnaPort::DrainCurrent => DRAIN_CURRENT_DAC,
            LnaPort::GateVoltage => return Err(Error::Bounds),
        };
        let data = dac_code(transfer.code(value), DAC1_RANGE - 1.0);

        self.dac1_ready().wait(bus, self.port, ErrorModule::BiasSerial)?;

        let serial_port = self.port;
        let command = self.command(command::DAC1);
        self.dac1.update(
            |dac| {
                dac.set_bit(DAC1_TOGGLE, false);
                dac.set_bit(DAC1_READ_WRITE, false);
                dac.set_bits(
                    DAC1_CHANNEL,
                    0x08 * port as u32 + 0x04 * sideband as u32 + stage as u32,
                );
                dac.set_bits(DAC1_INPUT_REGISTER, DAC1_INPUT_DATA_REGISTER);
                dac.set_bits(DAC1_DATA, data);
            },
            |dac| bus.write(serial_port, command, dac as u64, DAC1_BITS, DAC1_SHIFT),
        )
    }

    fn dac1_ready(&self) -> ReadyPoll {
        ReadyPoll {
            command: self.command(command::STATUS),
            bits: STATUS_BITS,
            ready_bit: DAC1_READY_BIT,
            timeout: DAC1_READY_TIMEOUT,
        }
    }

    /// Convert an analog monitor point.
    ///
    /// # Returns
    /// The raw ADC code.
    pub fn sample(&mut self, bus: &mut Bus, point: MonitorPoint) -> Result<u16, Error> {
        let mut areg = self.areg.begin();
        *areg.value_mut() = point.areg();

        let data = self.monitor.sample(bus, areg.value() as u64)?;
        areg.commit();

        Ok(data)
    }
}

/// Truncate a scaled DAC value into the valid code range.
fn dac_code(value: f32, max: f32) -> u32 {
    value.clamp(0.0, max) as u32
}
