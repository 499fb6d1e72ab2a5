//! Serial register map of the power distribution board
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
    serial::{Bus, Shift, PD_PORT},
    Error,
};

pub mod command {
    pub const ADC_STROBE: u8 = 0x03;
    pub const ADC_DATA: u8 = 0x06;
    pub const AREG: u8 = 0x08;
    pub const BREG: u8 = 0x09;
    pub const STATUS: u8 = 0x0A;
}

const AREG_BITS: u8 = 11;
const BREG_BITS: u8 = 9;
const SHIFT: Shift = Shift::Left(1);

const BREG_MONITOR_POINT: Range<usize> = 0..4;
const BREG_MONITOR_BAND: Range<usize> = 4..8;

static MONITOR: MonitorFamily = MonitorFamily {
    module: ErrorModule::PdSerial,
    select_command: command::BREG,
    select_bits: BREG_BITS,
    select_shift: SHIFT,
    strobe_command: command::ADC_STROBE,
    strobe_bits: 3,
    ready: Some(ReadyPoll {
        command: command::STATUS,
        bits: 4,
        ready_bit: 3,
        timeout: ADC_READY_TIMEOUT,
    }),
    data_command: command::ADC_DATA,
    data_bits: 18,
    data_mask: 0xFFFF,
};

/// The supply rails of a power distribution module.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Rail {
    Plus6 = 0,
    Minus6 = 1,
    Plus15 = 2,
    Minus15 = 3,
    Plus24 = 4,
    Plus8 = 5,
}

impl Rail {
    pub fn from_index(index: usize) -> Option<Self> {
        [
            Rail::Plus6,
            Rail::Minus6,
            Rail::Plus15,
            Rail::Minus15,
            Rail::Plus24,
            Rail::Plus8,
        ]
        .get(index)
        .copied()
    }

    /// Full-scale current of the rail monitor.
    pub fn current_scale(self) -> f32 {
        match self {
            Rail::Plus6 => 10.0,
            Rail::Minus6 => 1.0,
            Rail::Plus15 => 4.0,
            Rail::Minus15 => 2.0,
            Rail::Plus24 => 2.0,
            Rail::Plus8 => 2.0,
        }
    }

    /// Full-scale voltage of the rail monitor.
    pub fn voltage_scale(self) -> f32 {
        match self {
            Rail::Plus6 => 8.0,
            Rail::Minus6 => -8.0,
            Rail::Plus15 => 20.0,
            Rail::Minus15 => -20.0,
            Rail::Plus24 => 30.0,
            Rail::Plus8 => 10.0,
        }
    }
}

/// Register images of the power distribution board.
pub struct PdRegisters {
    /// One power enable bit per cartridge.
    areg: Shadow<u16>,
    breg: Shadow<u16>,
    monitor: AnalogMonitor,
}

impl Default for PdRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl PdRegisters {
    pub fn new() -> Self {
        Self {
            areg: Shadow::new(0),
            breg: Shadow::new(0),
            monitor: AnalogMonitor::new(&MONITOR, PD_PORT),
        }
    }

    pub fn areg(&self) -> u16 {
        self.areg.get()
    }

    pub fn breg(&self) -> u16 {
        self.breg.get()
    }

    pub fn adc_data(&self) -> u16 {
        self.monitor.adc_data()
    }

    pub fn enabled(&self, band: usize) -> bool {
        self.areg.get().get_bit(band)
    }

    /// Switch the power of a cartridge.
    pub fn set_enable(&mut self, bus: &mut Bus, band: usize, enable: bool) -> Result<(), Error> {
        self.areg.update(
            |areg| {
                areg.set_bit(band, enable);
            },
            |areg| bus.write(PD_PORT, command::AREG, areg as u64, AREG_BITS, SHIFT),
        )
    }

    /// Convert a rail monitor of a cartridge supply.
    ///
    /// # Args
    /// * `band` - The cartridge whose supply is monitored.
    /// * `rail` - The supply rail.
    /// * `voltage` - Monitor the voltage rather than the current.
    pub fn sample(
        &mut self,
        bus: &mut Bus,
        band: usize,
        rail: Rail,
        voltage: bool,
    ) -> Result<u16, Error> {
        let mut breg = self.breg.begin();
        *breg.value_mut() = 0;
        breg.value_mut()
            .set_bits(BREG_MONITOR_POINT, 0x08 * voltage as u16 + rail as u16);
        breg.value_mut().set_bits(BREG_MONITOR_BAND, band as u16);

        let data = self.monitor.sample(bus, breg.value() as u64)?;
        breg.commit();

        Ok(data)
    }
}
