//! Analog monitor request core shared by all hardware families
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use bit_field::BitField;

use crate::{
    error::{erc, ErrorModule},
    serial::{Bus, Shift},
    timer::{AsyncTimer, Duration, TimerState},
    Error,
};

/// Timeout of every ADC ready poll.
pub const ADC_READY_TIMEOUT: Duration = Duration::millis(100);

/// Description of a busy/ready poll of a status register.
#[derive(Debug, Copy, Clone)]
pub struct ReadyPoll {
    /// Parallel read command of the status register.
    pub command: u8,
    /// Width of the status register.
    pub bits: u8,
    /// Ready bit in the status register. A cleared bit signals busy.
    pub ready_bit: usize,
    pub timeout: Duration,
}

impl ReadyPoll {
    /// Poll the status register until the ready bit is set.
    ///
    /// # Args
    /// * `bus` - The serial bus.
    /// * `port` - The serial port of the addressed hardware.
    /// * `module` - The module charged with a timeout.
    pub fn wait(&self, bus: &mut Bus, port: u8, module: ErrorModule) -> Result<(), Error> {
        let mut timer = AsyncTimer::new();
        timer.start(bus.clock(), self.timeout)?;

        loop {
            let status = bus
                .read(port, self.command, self.bits, Shift::None)
                .inspect_err(|_| timer.stop())?;

            let state = timer.query(bus.clock());
            if status.get_bit(self.ready_bit) {
                timer.stop();
                return Ok(());
            }

            if state != TimerState::Running {
                bus.store_error(module, erc::HARDWARE_TIMEOUT);
                return Err(Error::Timeout);
            }
        }
    }
}

/// The serial protocol of one family's analog monitor request.
#[derive(Debug, Copy, Clone)]
pub struct MonitorFamily {
    /// Serial interface module charged with errors.
    pub module: ErrorModule,
    /// Parallel write command of the monitor point select register.
    pub select_command: u8,
    pub select_bits: u8,
    pub select_shift: Shift,
    pub strobe_command: u8,
    pub strobe_bits: u8,
    pub ready: Option<ReadyPoll>,
    pub data_command: u8,
    pub data_bits: u8,
    /// Mask of the valid data bits.
    pub data_mask: u64,
}

/// The analog monitor core of one addressed piece of hardware.
#[derive(Debug, Copy, Clone)]
pub struct AnalogMonitor {
    family: &'static MonitorFamily,
    port: u8,
    adc_data: u16,
}

impl AnalogMonitor {
    pub const fn new(family: &'static MonitorFamily, port: u8) -> Self {
        Self {
            family,
            port,
            adc_data: 0,
        }
    }

    /// The last successfully converted ADC code.
    pub fn adc_data(&self) -> u16 {
        self.adc_data
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    /// Convert the analog channel selected by a register image.
    ///
    /// # Note
    /// The stored ADC data is only updated on success.
    ///
    /// # Args
    /// * `bus` - The serial bus.
    /// * `select` - The image of the select register addressing the monitor point.
    ///
    /// # Returns
    /// The raw ADC code.
    pub fn sample(&mut self, bus: &mut Bus, select: u64) -> Result<u16, Error> {
        self.select(bus, select)?;
        self.convert(bus)
    }

    /// Route the monitor multiplexer to a monitor point without converting it.
    pub fn select(&mut self, bus: &mut Bus, select: u64) -> Result<(), Error> {
        let family = self.family;
        bus.write(
            self.port,
            family.select_command,
            select,
            family.select_bits,
            family.select_shift,
        )
    }

    /// Convert the monitor point currently selected.
    pub fn convert(&mut self, bus: &mut Bus) -> Result<u16, Error> {
        let family = self.family;

        bus.write(
            self.port,
            family.strobe_command,
            0,
            family.strobe_bits,
            Shift::None,
        )?;

        if let Some(ready) = &family.ready {
            ready.wait(bus, self.port, family.module)?;
        }

        let data = bus.read(self.port, family.data_command, family.data_bits, Shift::None)?;
        self.adc_data = (data & family.data_mask) as u16;

        Ok(self.adc_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{history::ErrorHistory, mock::{MockBus, MockClock}};

    static FAMILY: MonitorFamily = MonitorFamily {
        module: ErrorModule::LoSerial,
        select_command: 0x09,
        select_bits: 14,
        select_shift: Shift::Left(2),
        strobe_command: 0x03,
        strobe_bits: 3,
        ready: Some(ReadyPoll {
            command: 0x0A,
            bits: 4,
            ready_bit: 3,
            timeout: ADC_READY_TIMEOUT,
        }),
        data_command: 0x06,
        data_bits: 18,
        data_mask: 0xFFFF,
    };

    #[test]
    fn sample_masks_data() {
        let mut serial = MockBus::new();
        serial.respond(4, 0x06, 0x3_1234);
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);

        let mut monitor = AnalogMonitor::new(&FAMILY, 4);
        assert_eq!(monitor.sample(&mut bus, 0x5), Ok(0x1234));
        assert_eq!(monitor.adc_data(), 0x1234);

        assert_eq!(serial.writes[0], (4, 0x09, 0x5, 14));
        assert_eq!(serial.writes[1], (4, 0x03, 0, 3));
    }

    #[test]
    fn busy_adc_times_out_and_keeps_data() {
        let mut serial = MockBus::new();
        serial.respond(4, 0x06, 0x0042);
        let mut clock = MockClock::new(10);
        let mut history = ErrorHistory::new();

        let mut monitor = AnalogMonitor::new(&FAMILY, 4);
        {
            let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
            monitor.sample(&mut bus, 0).unwrap();
        }

        serial.respond(4, 0x0A, 0x0);
        serial.respond(4, 0x06, 0x1111);
        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);
        assert_eq!(monitor.sample(&mut bus, 0), Err(Error::Timeout));
        assert_eq!(monitor.adc_data(), 0x0042);

        assert_eq!(history.next(), 0x1CF6);
    }

    #[test]
    fn convert_keeps_selection() {
        let mut serial = MockBus::new();
        serial.respond(4, 0x06, 0x0321);
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);

        let mut monitor = AnalogMonitor::new(&FAMILY, 4);
        monitor.select(&mut bus, 0x7).unwrap();
        assert_eq!(monitor.convert(&mut bus), Ok(0x0321));
        assert_eq!(monitor.convert(&mut bus), Ok(0x0321));

        let writes = serial.writes_to(4);
        assert_eq!(writes.iter().filter(|write| write.0 == 0x09).count(), 1);
        assert_eq!(writes.iter().filter(|write| write.0 == 0x03).count(), 2);
    }

    #[test]
    fn failed_select_aborts() {
        let mut serial = MockBus::new();
        serial.fail_writes = true;
        let mut clock = MockClock::new(1);
        let mut history = ErrorHistory::new();
        let mut bus = Bus::new(&mut serial, &mut clock, &mut history);

        let mut monitor = AnalogMonitor::new(&FAMILY, 4);
        assert_eq!(monitor.sample(&mut bus, 0), Err(Error::Interface));
        assert_eq!(serial.reads.len(), 0);
    }
}
