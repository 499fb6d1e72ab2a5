//! Serial register map of the cartridge local oscillator
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use core::ops::Range;

use bit_field::BitField;

use super::PaChannel;
use crate::{
    error::ErrorModule,
    monitor::{AnalogMonitor, MonitorFamily, ReadyPoll, ADC_READY_TIMEOUT},
    register::Shadow,
    serial::{cartridge_port, Bus, Shift, Subsystem},
    Error,
};

/// LO command words.
pub mod command {
    pub const ADC_STROBE: u8 = 0x03;
    pub const PA_POTS: u8 = 0x04;
    pub const AMC_POTS: u8 = 0x05;
    pub const ADC_DATA: u8 = 0x06;
    pub const TEN_MHZ_MODE: u8 = 0x07;
    pub const AREG: u8 = 0x08;
    pub const BREG: u8 = 0x09;
    pub const STATUS: u8 = 0x0A;
}

const AREG_BITS: u8 = 15;
const AREG_SHIFT: Shift = Shift::Left(3);
const BREG_BITS: u8 = 14;
const BREG_SHIFT: Shift = Shift::Left(2);
const POTS_BITS: u8 = 35;
const POTS_SHIFT: Shift = Shift::Left(1);
const STATUS_BITS: u8 = 4;

const YTO_COARSE_TUNE: Range<usize> = 0..12;
const MONITOR_POINT: Range<usize> = 0..5;

const REF_IF_STATE_BIT: usize = 1;
const UNLOCK_LATCH_BIT: usize = 2;
const ADC_READY_BIT: usize = 3;

static MONITOR: MonitorFamily = MonitorFamily {
    module: ErrorModule::LoSerial,
    select_command: command::BREG,
    select_bits: BREG_BITS,
    select_shift: BREG_SHIFT,
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

/// Single-bit controls held in BREG.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flag {
    NullLoopIntegrator = 5,
    SidebandLockPolarity = 6,
    LoopBandwidth = 7,
    ClearUnlockLatch = 8,
    PhotomixerEnable = 11,
}

/// The analog monitor points of the LO.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MonitorPoint {
    PhotomixerVoltage,
    PhotomixerCurrent,
    /// PLL monitor point 0 (lock detect) to 5 (IF total power).
    Pll(u8),
    /// AMC monitor point as numbered on the AMC board.
    Amc(u8),
    Supply3V,
    Supply5V,
    /// PA channel monitor point: gate voltage 0, drain voltage 1, drain current 2.
    PaChannel(PaChannel, u8),
}

impl MonitorPoint {
    fn select(self) -> u16 {
        match self {
            MonitorPoint::PhotomixerVoltage => 0x00,
            MonitorPoint::PhotomixerCurrent => 0x01,
            MonitorPoint::Pll(point) => point as u16 + 0x02,
            MonitorPoint::Amc(point) => point as u16 + 0x10,
            MonitorPoint::Supply3V => 0x0F,
            MonitorPoint::Supply5V => 0x0C + 0x0F,
            MonitorPoint::PaChannel(channel, point) => 0x03 * channel as u16 + point as u16 + 0x08,
        }
    }
}

/// One of the four digital potentiometers of a pot chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Pot {
    Pot0,
    Pot1,
    Pot2,
    Pot3,
}

impl Pot {
    /// The position of the pot wiper byte in the chain. Bits 16 and 33 are stack bits.
    fn bits(self) -> Range<usize> {
        match self {
            Pot::Pot0 => 0..8,
            Pot::Pot1 => 8..16,
            Pot::Pot2 => 17..25,
            Pot::Pot3 => 25..33,
        }
    }

    /// The pot driving a PA channel gate or drain.
    pub fn pa(channel: PaChannel, drain: bool) -> Self {
        match (channel, drain) {
            (PaChannel::A, false) => Pot::Pot0,
            (PaChannel::A, true) => Pot::Pot1,
            (PaChannel::B, false) => Pot::Pot2,
            (PaChannel::B, true) => Pot::Pot3,
        }
    }
}

/// The decoded LO status register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PllStatus {
    pub reference_if: bool,
    /// The lock detector latched an unlock event.
    pub unlock_detected: bool,
}

/// Register images of a cartridge LO.
pub struct LoRegisters {
    port: u8,
    areg: Shadow<u16>,
    breg: Shadow<u16>,
    pa_pots: Shadow<u64>,
    amc_pots: Shadow<u64>,
    monitor: AnalogMonitor,
}

impl LoRegisters {
    /// Construct the registers of a cartridge.
    ///
    /// # Args
    /// * `band` - The cartridge index (0 for band 1).
    pub fn new(band: usize) -> Self {
        let port = cartridge_port(band, Subsystem::Lo);
        Self {
            port,
            areg: Shadow::new(0),
            breg: Shadow::new(0),
            pa_pots: Shadow::new(0),
            amc_pots: Shadow::new(0),
            monitor: AnalogMonitor::new(&MONITOR, port),
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn areg(&self) -> u16 {
        self.areg.get()
    }

    pub fn breg(&self) -> u16 {
        self.breg.get()
    }

    pub fn yto_coarse_tune(&self) -> u16 {
        self.areg.get().get_bits(YTO_COARSE_TUNE)
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.breg.get().get_bit(flag as usize)
    }

    pub fn pa_pot(&self, pot: Pot) -> u8 {
        self.pa_pots.get().get_bits(pot.bits()) as u8
    }

    pub fn amc_pot(&self, pot: Pot) -> u8 {
        self.amc_pots.get().get_bits(pot.bits()) as u8
    }

    /// The last successfully converted ADC code.
    pub fn adc_data(&self) -> u16 {
        self.monitor.adc_data()
    }

    /// Switch the LO board interface to the 10 MHz clock.
    pub fn enable_10mhz(&mut self, bus: &mut Bus) -> Result<(), Error> {
        bus.write(self.port, command::TEN_MHZ_MODE, 0, 0, Shift::None)
    }

    /// Write the YTO coarse tuning word.
    pub fn set_yto_coarse_tune(&mut self, bus: &mut Bus, word: u16) -> Result<(), Error> {
        let port = self.port;
        self.areg.update(
            |areg| {
                areg.set_bits(YTO_COARSE_TUNE, word);
            },
            |areg| bus.write(port, command::AREG, areg as u64, AREG_BITS, AREG_SHIFT),
        )
    }

    pub fn set_flag(&mut self, bus: &mut Bus, flag: Flag, value: bool) -> Result<(), Error> {
        let port = self.port;
        self.breg.update(
            |breg| {
                breg.set_bit(flag as usize, value);
            },
            |breg| bus.write(port, command::BREG, breg as u64, BREG_BITS, BREG_SHIFT),
        )
    }

    /// Clear the PLL unlock detect latch.
    ///
    /// # Note
    /// The latch is cleared by a pulse: the clear bit is written set, then cleared again.
    pub fn clear_unlock_latch(&mut self, bus: &mut Bus) -> Result<(), Error> {
        let mut breg = self.breg.begin();

        breg.value_mut().set_bit(Flag::ClearUnlockLatch as usize, true);
        bus.write(self.port, command::BREG, breg.value() as u64, BREG_BITS, BREG_SHIFT)?;

        breg.value_mut().set_bit(Flag::ClearUnlockLatch as usize, false);
        bus.write(self.port, command::BREG, breg.value() as u64, BREG_BITS, BREG_SHIFT)?;

        breg.commit();
        Ok(())
    }

    /// Read the status register.
    pub fn pll_status(&mut self, bus: &mut Bus) -> Result<PllStatus, Error> {
        let status = bus.read(self.port, command::STATUS, STATUS_BITS, Shift::None)?;
        Ok(PllStatus {
            reference_if: status.get_bit(REF_IF_STATE_BIT),
            unlock_detected: status.get_bit(UNLOCK_LATCH_BIT),
        })
    }

    pub fn set_pa_pot(&mut self, bus: &mut Bus, pot: Pot, value: u8) -> Result<(), Error> {
        let port = self.port;
        self.pa_pots.update(
            |pots| {
                pots.set_bits(pot.bits(), value as u64);
            },
            |pots| bus.write(port, command::PA_POTS, pots, POTS_BITS, POTS_SHIFT),
        )
    }

    pub fn set_amc_pot(&mut self, bus: &mut Bus, pot: Pot, value: u8) -> Result<(), Error> {
        let port = self.port;
        self.amc_pots.update(
            |pots| {
                pots.set_bits(pot.bits(), value as u64);
            },
            |pots| bus.write(port, command::AMC_POTS, pots, POTS_BITS, POTS_SHIFT),
        )
    }

    /// Convert an analog monitor point.
    ///
    /// # Note
    /// The monitor point select is kept in BREG once the conversion succeeds.
    ///
    /// # Returns
    /// The raw ADC code.
    pub fn sample(&mut self, bus: &mut Bus, point: MonitorPoint) -> Result<u16, Error> {
        let mut breg = self.breg.begin();
        breg.value_mut().set_bits(MONITOR_POINT, point.select());

        let data = self.monitor.sample(bus, breg.value() as u64)?;
        breg.commit();

        Ok(data)
    }
}
