//! Front-end thermal interlock module
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Note
//! The interlock shuts the front end down when the cryostat cooling fails. Its temperatures,
//! airflow sensors and glitch counter are sampled on a parallel ADC, its trigger states are
//! digital inputs. The compressor and dewar interfaces are not fitted on this front end.
use crate::{
    can::{Message, Reply},
    error::{erc, ErrorModule},
    hardware::fetim::{Digital, FetimRegisters, MonitorPoint, NO_HARDWARE},
    leaf,
    scheduler::AsyncStatus,
    serial::Bus,
    Error, Status,
};

const MODULE_MASK: u32 = 0xC0;
const INTERLOCK_MASK: u32 = 0x20;
const SENSORS_MASK: u32 = 0x18;
const TEMPERATURE_MASK: u32 = 0x07;
const FLOW_MASK: u32 = 0x04;
const STATE_MASK: u32 = 0x1C;
const GLITCH_MASK: u32 = 0x02;

/// The number of interlock temperature sensors.
pub const TEMPERATURE_SENSORS: usize = 5;

/// The number of interlock airflow sensors.
pub const FLOW_SENSORS: usize = 2;

const PAR_ADC_RANGE: f32 = 256.0;
const TEMPERATURE_SCALE: f32 = 60.0;
const FLOW_SCALE: f32 = 2.0;
const GLITCH_SCALE: f32 = 100.0;
const GLITCH_OFFSET: f32 = -100.0;

/// The steps of the background cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Task {
    Temperature(usize),
    SafeStatus,
    Shutdown,
}

/// The FETIM.
pub struct Fetim {
    registers: FetimRegisters,
    available: bool,
    revision: u8,
    temperatures: [f32; TEMPERATURE_SENSORS],
    flows: [f32; FLOW_SENSORS],
    glitch: f32,
    /// The front-end status last signalled to the interlock.
    fe_safe: bool,
    shutdown: bool,
    task: Task,
}

impl Fetim {
    /// Construct the FETIM.
    ///
    /// # Args
    /// * `available` - The module is configured as installed.
    pub fn new(available: bool) -> Self {
        Self {
            registers: FetimRegisters::new(),
            available,
            revision: NO_HARDWARE,
            temperatures: [0.0; TEMPERATURE_SENSORS],
            flows: [0.0; FLOW_SENSORS],
            glitch: 0.0,
            fe_safe: false,
            shutdown: false,
            task: Task::Temperature(0),
        }
    }

    pub fn registers(&self) -> &FetimRegisters {
        &self.registers
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    /// The interlock requested the front end to shut down.
    pub fn shutdown_triggered(&self) -> bool {
        self.shutdown
    }

    pub fn temperature(&self, sensor: usize) -> Option<f32> {
        self.temperatures.get(sensor).copied()
    }

    /// Detect the FETIM hardware from its revision level.
    pub fn startup(&mut self, bus: &mut Bus) -> Result<(), Error> {
        if !self.available {
            info!("FETIM not configured");
            return Ok(());
        }

        self.revision = self.registers.revision(bus)?;
        if self.revision == NO_HARDWARE {
            warn!("FETIM not installed");
            self.available = false;
        } else {
            info!("FETIM hardware revision {}", self.revision);
        }

        Ok(())
    }

    /// Perform one step of the background cycle.
    ///
    /// # Args
    /// * `cryostat_safe` - The cryostat is cold and evacuated.
    ///
    /// # Returns
    /// [AsyncStatus::Done] once the cycle completed.
    pub fn step(&mut self, bus: &mut Bus, cryostat_safe: bool) -> Result<AsyncStatus, Error> {
        if !self.available {
            return Ok(AsyncStatus::Done);
        }

        match self.task {
            Task::Temperature(sensor) => {
                self.task = if sensor + 1 < TEMPERATURE_SENSORS {
                    Task::Temperature(sensor + 1)
                } else {
                    Task::SafeStatus
                };
                self.sample_temperature(bus, sensor)?;
                Ok(AsyncStatus::Pending)
            }
            Task::SafeStatus => {
                self.task = Task::Shutdown;
                if cryostat_safe != self.fe_safe {
                    self.registers.set_fe_safe(bus, cryostat_safe)?;
                    self.fe_safe = cryostat_safe;
                    info!("FETIM front-end status safe: {}", cryostat_safe);
                }
                Ok(AsyncStatus::Pending)
            }
            Task::Shutdown => {
                self.task = Task::Temperature(0);
                if self.registers.digital(bus, Digital::ShutdownTriggered)? && !self.shutdown {
                    error!("FETIM shutdown triggered");
                    self.shutdown = true;
                }
                Ok(AsyncStatus::Done)
            }
        }
    }

    fn sample_temperature(&mut self, bus: &mut Bus, sensor: usize) -> Result<f32, Error> {
        let raw = self
            .registers
            .sample(bus, MonitorPoint::Temperature(sensor as u8))?;
        let temperature = scale(raw, TEMPERATURE_SCALE);
        self.temperatures[sensor] = temperature;
        Ok(temperature)
    }

    pub fn handle(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let Some(module) = leaf::select(bus, message, reply, MODULE_MASK, 3, ErrorModule::Fetim)
        else {
            return;
        };

        match module {
            0 => self.handle_interlock(bus, message, reply),
            1 => absent(bus, reply, ErrorModule::Compressor),
            _ => absent(bus, reply, ErrorModule::Dewar),
        }
    }

    fn handle_interlock(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        if !leaf::monitor_only(bus, message, reply, ErrorModule::Interlock) {
            return;
        }

        if message.slice(INTERLOCK_MASK) == 0 {
            self.handle_sensors(bus, message, reply);
        } else {
            self.handle_state(bus, message, reply);
        }
    }

    fn handle_sensors(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        match message.slice(SENSORS_MASK) {
            0 => {
                let Some(sensor) = leaf::select(
                    bus,
                    message,
                    reply,
                    TEMPERATURE_MASK,
                    TEMPERATURE_SENSORS,
                    ErrorModule::InterlockTemp,
                ) else {
                    return;
                };

                let sample = self
                    .registers
                    .sample(bus, MonitorPoint::Temperature(sensor as u8))
                    .map(|raw| scale(raw, TEMPERATURE_SCALE));
                leaf::emit(reply, sample, &mut self.temperatures[sensor]);
            }
            1 => {
                let sensor = message.slice(FLOW_MASK);
                let sample = self
                    .registers
                    .sample(bus, MonitorPoint::Flow(sensor as u8))
                    .map(|raw| scale(raw, FLOW_SCALE));
                leaf::emit(reply, sample, &mut self.flows[sensor]);
            }
            2 => self.digital(bus, reply, Digital::SingleFail),
            _ => {
                bus.store_error(ErrorModule::Interlock, erc::MODULE_RANGE);
                reply.status = Status::HardwareRange;
            }
        }
    }

    fn handle_state(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let Some(state) =
            leaf::select(bus, message, reply, STATE_MASK, 6, ErrorModule::Interlock)
        else {
            return;
        };

        let input = match state {
            0 if message.slice(GLITCH_MASK) == 0 => {
                let sample = self
                    .registers
                    .sample(bus, MonitorPoint::Glitch)
                    .map(|raw| GLITCH_OFFSET + GLITCH_SCALE * raw as f32 / (PAR_ADC_RANGE - 1.0));
                leaf::emit(reply, sample, &mut self.glitch);
                return;
            }
            0 => Digital::GlitchTriggered,
            1 => Digital::MultiFail,
            2 => Digital::TemperatureOutOfRange,
            3 => Digital::FlowOutOfRange,
            4 => Digital::DelayTriggered,
            _ => Digital::ShutdownTriggered,
        };
        self.digital(bus, reply, input);
    }

    fn digital(&mut self, bus: &mut Bus, reply: &mut Reply, input: Digital) {
        match self.registers.digital(bus, input) {
            Ok(state) => reply.put(state),
            Err(error) => {
                reply.status = error.into();
                reply.put(false);
            }
        }
    }
}

fn scale(raw: u8, scale: f32) -> f32 {
    scale * raw as f32 / PAR_ADC_RANGE
}

/// Refuse access to an interface without hardware.
fn absent(bus: &mut Bus, reply: &mut Reply, module: ErrorModule) {
    bus.store_error(module, erc::MODULE_ABSENT);
    reply.status = Status::HardwareBlocked;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hardware::fetim::command, mock::Bench, serial::FETIM_PORT};
    use approx::assert_abs_diff_eq;

    fn float(reply: &Reply) -> f32 {
        f32::from_be_bytes(reply.data[..4].try_into().unwrap())
    }

    #[test]
    fn missing_hardware_is_detected() {
        let mut bench = Bench::new();
        bench.serial.respond(FETIM_PORT, command::CREG_IN, 0x00);
        let mut fetim = Fetim::new(true);
        let mut bus = bench.bus();

        fetim.startup(&mut bus).unwrap();
        assert!(!fetim.is_available());
        assert_eq!(fetim.step(&mut bus, true), Ok(AsyncStatus::Done));
    }

    #[test]
    fn interlock_monitors() {
        let mut bench = Bench::new();
        bench.serial.respond(FETIM_PORT, command::AREG_IN, 0x80);
        bench.serial.respond(FETIM_PORT, command::BREG_IN, 0x040);
        let mut fetim = Fetim::new(true);
        let mut bus = bench.bus();

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::monitor(0xE002), &mut reply);
        assert_abs_diff_eq!(float(&reply), 30.0);
        assert_eq!(fetim.registers().areg(), 2);

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::monitor(0xE00C), &mut reply);
        assert_abs_diff_eq!(float(&reply), 1.0);
        assert_eq!(fetim.registers().areg(), 7);

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::monitor(0xE020), &mut reply);
        assert_abs_diff_eq!(float(&reply), -100.0 + 12800.0 / 255.0, epsilon = 1e-4);

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::monitor(0xE024), &mut reply);
        assert_eq!(reply.data.as_slice(), &[1]);

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::monitor(0xE034), &mut reply);
        assert_eq!(reply.data.as_slice(), &[0]);
    }

    #[test]
    fn out_of_range_addresses() {
        let mut bench = Bench::new();
        let mut fetim = Fetim::new(true);
        let mut bus = bench.bus();

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::monitor(0xE005), &mut reply);
        assert_eq!(reply.status, Status::HardwareRange);
        assert_eq!(bus.history().next(), 0x3BF1);

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::monitor(0xE038), &mut reply);
        assert_eq!(reply.status, Status::HardwareRange);

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::monitor(0xE0C0), &mut reply);
        assert_eq!(bus.history().next(), 0x38F1);
        assert_eq!(bus.history().next(), 0x37F1);

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::control(0x1_E000, &[0]), &mut reply);
        assert_eq!(bus.history().next(), 0x38F2);
    }

    #[test]
    fn compressor_and_dewar_are_absent() {
        let mut bench = Bench::new();
        let mut fetim = Fetim::new(true);
        let mut bus = bench.bus();

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::monitor(0xE040), &mut reply);
        assert_eq!(reply.status, Status::HardwareBlocked);
        assert_eq!(bus.history().next(), 0x39F4);

        let mut reply = Reply::new();
        fetim.handle(&mut bus, &Message::monitor(0xE080), &mut reply);
        assert_eq!(bus.history().next(), 0x3AF4);
    }

    #[test]
    fn background_cycle() {
        let mut bench = Bench::new();
        bench.serial.respond(FETIM_PORT, command::CREG_IN, 0x01);
        bench.serial.respond(FETIM_PORT, command::AREG_IN, 0x40);
        bench.serial.respond(FETIM_PORT, command::BREG_IN, 0x000);
        let mut fetim = Fetim::new(true);
        {
            let mut bus = bench.bus();
            fetim.startup(&mut bus).unwrap();

            for _ in 0..TEMPERATURE_SENSORS + 1 {
                assert_eq!(fetim.step(&mut bus, true), Ok(AsyncStatus::Pending));
            }
            assert_eq!(fetim.step(&mut bus, true), Ok(AsyncStatus::Done));
        }

        assert_eq!(fetim.revision(), 1);
        assert!(!fetim.shutdown_triggered());
        assert!(fetim.registers().fe_safe());
        assert_abs_diff_eq!(fetim.temperature(4).unwrap(), 15.0);
        assert_eq!(bench.serial.last_write(FETIM_PORT, command::DREG_OUT), Some(1));

        // An unchanged status is not rewritten.
        let writes = bench.serial.writes_to(FETIM_PORT).len();
        {
            let mut bus = bench.bus();
            for _ in 0..TEMPERATURE_SENSORS + 2 {
                fetim.step(&mut bus, true).unwrap();
            }
        }
        assert_eq!(
            bench.serial.writes_to(FETIM_PORT).len(),
            writes + 2 * TEMPERATURE_SENSORS
        );
    }

    #[test]
    fn shutdown_is_latched() {
        let mut bench = Bench::new();
        bench.serial.respond(FETIM_PORT, command::BREG_IN, 0x008);
        let mut fetim = Fetim::new(true);
        let mut bus = bench.bus();

        let mut status = AsyncStatus::Pending;
        while status == AsyncStatus::Pending {
            status = fetim.step(&mut bus, false).unwrap();
        }
        assert!(fetim.shutdown_triggered());
        assert!(!fetim.registers().fe_safe());
    }
}
