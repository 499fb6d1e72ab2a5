//! LO photonic receiver: optical switch, EDFA and temperatures
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use crate::{
    can::{Message, Reply},
    error::{erc, ErrorModule},
    hardware::lpr::{LprRegisters, LprStatus, MonitorPoint, SWITCH_PORTS, SWITCH_READY_TIMEOUT},
    leaf::{self, Access, LastControl},
    scaling::{adc, pump_temperature},
    serial::Bus,
    timer::{AsyncTimer, TimerState},
    Error, Status,
};

const MODULE_MASK: u32 = 0x30;
const SWITCH_MASK: u32 = 0x0E;
const EDFA_MASK: u32 = 0x0C;
const EDFA_QUANTITY_MASK: u32 = 0x03;
const MODULATION_MASK: u32 = 0x02;

/// The number of LPR temperature sensors.
pub const TEMPERATURE_SENSORS: usize = 2;

/// Port reported while the optical switch is shuttered.
pub const PORT_SHUTTERED: u8 = 0xFF;

/// Default EDFA photodetector power conversion coefficient.
pub const DEFAULT_POWER_COEFFICIENT: f32 = 28.0;

const TEMPERATURE_SCALE: f32 = 978.4736;
const DRIVE_CURRENT_SCALE: f32 = 800.0;
const LASER_PD_CURRENT_SCALE: f32 = 50.0;
const LASER_PD_CURRENT_OFFSET: f32 = 25.0;
const EDFA_PD_CURRENT_SCALE: f32 = 500.0;

#[derive(Default)]
struct Laser {
    pump_temperature: f32,
    drive_current: f32,
    photodetector_current: f32,
}

struct PhotoDetector {
    current: f32,
    coefficient: f32,
    last_coefficient: LastControl,
    power: f32,
}

/// The LO photonic receiver.
pub struct Lpr {
    registers: LprRegisters,
    temperatures: [f32; TEMPERATURE_SENSORS],
    port: u8,
    last_port: LastControl,
    last_shutter: LastControl,
    last_force_shutter: LastControl,
    status: LprStatus,
    laser: Laser,
    photodetector: PhotoDetector,
    modulation: f32,
    last_modulation: LastControl,
    last_dac_reset: LastControl,
}

impl Default for Lpr {
    fn default() -> Self {
        Self::new()
    }
}

impl Lpr {
    pub fn new() -> Self {
        Self {
            registers: LprRegisters::new(),
            temperatures: [0.0; TEMPERATURE_SENSORS],
            port: PORT_SHUTTERED,
            last_port: LastControl::new(),
            last_shutter: LastControl::new(),
            last_force_shutter: LastControl::new(),
            status: LprStatus {
                edfa_driver_alarm: false,
                switch_busy: false,
                switch_error: false,
            },
            laser: Laser::default(),
            photodetector: PhotoDetector {
                current: 0.0,
                coefficient: DEFAULT_POWER_COEFFICIENT,
                last_coefficient: LastControl::new(),
                power: 0.0,
            },
            modulation: 0.0,
            last_modulation: LastControl::new(),
            last_dac_reset: LastControl::new(),
        }
    }

    pub fn registers(&self) -> &LprRegisters {
        &self.registers
    }

    /// The optical switch port, or [PORT_SHUTTERED].
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Switch the interface to 10 MHz and bring the LPR to a safe state.
    pub fn startup(&mut self, bus: &mut Bus) -> Result<(), Error> {
        self.registers.enable_10mhz(bus)?;
        self.stop(bus)
    }

    /// Minimize the optical output: no modulation and the optical switch shuttered.
    pub fn stop(&mut self, bus: &mut Bus) -> Result<(), Error> {
        self.registers.set_modulation_input(bus, 0.0)?;
        self.modulation = 0.0;

        self.wait_switch(bus)?;
        self.registers.set_switch(bus, None, false)?;
        self.port = PORT_SHUTTERED;
        info!("LPR shuttered");
        Ok(())
    }

    /// Wait for the optical switch to finish moving.
    fn wait_switch(&mut self, bus: &mut Bus) -> Result<(), Error> {
        let mut timer = AsyncTimer::new();
        timer.start(bus.clock(), SWITCH_READY_TIMEOUT)?;

        loop {
            let status = self
                .registers
                .status(bus)
                .inspect_err(|_| timer.stop())?;
            self.status = status;

            let state = timer.query(bus.clock());
            if !status.switch_busy {
                timer.stop();
                return Ok(());
            }

            if state != TimerState::Running {
                bus.store_error(ErrorModule::OpticalSwitch, erc::HARDWARE_TIMEOUT);
                return Err(Error::Timeout);
            }
        }
    }

    pub fn handle(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        match message.slice(MODULE_MASK) {
            sensor @ 0..=1 => {
                if !leaf::monitor_only(bus, message, reply, ErrorModule::LprTemp) {
                    return;
                }

                let sample = self
                    .registers
                    .sample(bus, MonitorPoint::Temperature(sensor as u8))
                    .map(|raw| adc(raw, TEMPERATURE_SCALE));
                leaf::emit(reply, sample, &mut self.temperatures[sensor]);
            }
            2 => self.handle_switch(bus, message, reply),
            _ => self.handle_edfa(bus, message, reply),
        }
    }

    fn handle_switch(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let Some(quantity) = leaf::select(
            bus,
            message,
            reply,
            SWITCH_MASK,
            5,
            ErrorModule::OpticalSwitch,
        ) else {
            return;
        };

        match quantity {
            0 => match leaf::access::<u8>(
                bus,
                message,
                reply,
                ErrorModule::OpticalSwitch,
                &mut self.last_port,
            ) {
                Some(Access::Control(port)) => {
                    if !leaf::in_range(
                        bus,
                        ErrorModule::OpticalSwitch,
                        &mut self.last_port,
                        port,
                        0..=SWITCH_PORTS - 1,
                    ) {
                        return;
                    }

                    let result = self.registers.set_switch(bus, Some(port), false);
                    if result.is_ok() {
                        self.port = port;
                    }
                    self.last_port.complete(result);
                }
                Some(Access::Monitor) => reply.put(self.port),
                None => {}
            },
            1 | 2 => {
                let forced = quantity == 2;
                let last = if forced {
                    &mut self.last_force_shutter
                } else {
                    &mut self.last_shutter
                };
                match leaf::access::<u8>(bus, message, reply, ErrorModule::OpticalSwitch, last) {
                    Some(Access::Control(_)) => {
                        let result = self.registers.set_switch(bus, None, forced);
                        if result.is_ok() {
                            self.port = PORT_SHUTTERED;
                        }
                        last.complete(result);
                    }
                    Some(Access::Monitor) if forced => {
                        bus.store_error(ErrorModule::OpticalSwitch, erc::RCA_RANGE);
                        reply.status = Status::MonitorCanRange;
                    }
                    Some(Access::Monitor) => reply.put(self.port == PORT_SHUTTERED),
                    None => {}
                }
            }
            _ => {
                if !leaf::monitor_only(bus, message, reply, ErrorModule::OpticalSwitch) {
                    return;
                }

                match self.registers.status(bus) {
                    Ok(status) => self.status = status,
                    Err(error) => reply.status = error.into(),
                }

                if quantity == 3 {
                    reply.put(self.status.switch_error as u8);
                } else {
                    reply.put(self.status.switch_busy);
                }
            }
        }
    }

    fn handle_edfa(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        match message.slice(EDFA_MASK) {
            0 => {
                let Some(quantity) =
                    leaf::select(bus, message, reply, EDFA_QUANTITY_MASK, 3, ErrorModule::Edfa)
                else {
                    return;
                };
                if !leaf::monitor_only(bus, message, reply, ErrorModule::Edfa) {
                    return;
                }

                let laser = &mut self.laser;
                let (sample, cache) = match quantity {
                    0 => (
                        self.registers
                            .sample(bus, MonitorPoint::PumpTemperature)
                            .and_then(pump_temperature),
                        &mut laser.pump_temperature,
                    ),
                    1 => (
                        self.registers
                            .sample(bus, MonitorPoint::LaserDriveCurrent)
                            .map(|raw| adc(raw, DRIVE_CURRENT_SCALE)),
                        &mut laser.drive_current,
                    ),
                    _ => (
                        self.registers
                            .sample(bus, MonitorPoint::LaserPhotoDetector)
                            .map(|raw| LASER_PD_CURRENT_OFFSET - adc(raw, LASER_PD_CURRENT_SCALE)),
                        &mut laser.photodetector_current,
                    ),
                };
                leaf::emit(reply, sample, cache);
            }
            1 => {
                let Some(quantity) =
                    leaf::select(bus, message, reply, EDFA_QUANTITY_MASK, 3, ErrorModule::Edfa)
                else {
                    return;
                };

                let detector = &mut self.photodetector;
                if quantity == 1 {
                    match leaf::access::<f32>(
                        bus,
                        message,
                        reply,
                        ErrorModule::Edfa,
                        &mut detector.last_coefficient,
                    ) {
                        Some(Access::Control(coefficient)) => detector.coefficient = coefficient,
                        Some(Access::Monitor) => reply.put(detector.coefficient),
                        None => {}
                    }
                    return;
                }

                if !leaf::monitor_only(bus, message, reply, ErrorModule::Edfa) {
                    return;
                }

                let raw = self.registers.sample(bus, MonitorPoint::EdfaPhotoDetector);
                if quantity == 0 {
                    let sample = raw.map(|raw| adc(raw, EDFA_PD_CURRENT_SCALE));
                    leaf::emit(reply, sample, &mut detector.current);
                } else {
                    let sample = raw.map(|raw| adc(raw, detector.coefficient));
                    leaf::emit(reply, sample, &mut detector.power);
                }
            }
            2 => {
                if message.slice(MODULATION_MASK) == 0 {
                    let last = &mut self.last_modulation;
                    match leaf::access::<f32>(bus, message, reply, ErrorModule::Edfa, last) {
                        Some(Access::Control(voltage)) => {
                            let result = self.registers.set_modulation_input(bus, voltage);
                            if result.is_ok() {
                                self.modulation = voltage;
                            }
                            last.complete(result);
                        }
                        Some(Access::Monitor) => reply.put(self.modulation),
                        None => {}
                    }
                    return;
                }

                let last = &mut self.last_dac_reset;
                match leaf::access::<u8>(bus, message, reply, ErrorModule::Edfa, last) {
                    Some(Access::Control(_)) => {
                        let result = self.registers.reset_dac(bus);
                        last.complete(result);
                    }
                    // The DAC reset has no monitor point.
                    Some(Access::Monitor) => {
                        bus.store_error(ErrorModule::Edfa, erc::RCA_RANGE);
                        reply.status = Status::MonitorCanRange;
                    }
                    None => {}
                }
            }
            _ => {
                if !leaf::monitor_only(bus, message, reply, ErrorModule::Edfa) {
                    return;
                }

                match self.registers.status(bus) {
                    Ok(status) => self.status = status,
                    Err(error) => reply.status = error.into(),
                }
                reply.put(self.status.edfa_driver_alarm);
            }
        }
    }
}
