//! Cryostat vacuum, valve and temperature supervision
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Note
//! The analog quantities (temperatures, pressures and the 230 V supply current) take several
//! scheduler ticks to convert and are only sampled in the background. Monitor requests report
//! the cached readings. The pumps, valves and the vacuum controller are switched outputs with
//! live digital feedback. The turbo pump and the valves are powered from the backing pump.
use crate::{
    can::{Message, Reply},
    config::CryostatConfig,
    error::{erc, ErrorModule},
    hardware::cryo::{AnalogPoint, CryoRegisters, CryoStatus, Switch},
    leaf::{self, Access, LastControl},
    scaling,
    scheduler::AsyncStatus,
    serial::Bus,
    timer::{AsyncTimer, Clock, Duration, TimerState},
    Error, Status,
};

const MODULE_MASK: u32 = 0x3FC;
const SUBMODULE_MASK: u32 = 0x003;

/// The number of cryostat temperature sensors.
pub const TEMPERATURE_SENSORS: usize = 13;
/// The temperature sensors read through a TVO calibration. The others are PRTs.
pub const TVO_SENSORS: usize = 9;
/// The number of TVO calibration polynomial coefficients.
pub const TVO_COEFFS: usize = 7;
pub const PRESSURE_SENSORS: usize = 2;

const BACKING_PUMP: usize = 13;
const TURBO_PUMP: usize = 14;
const GATE_VALVE: usize = 15;
const SOLENOID_VALVE: usize = 16;
const VACUUM_CONTROLLER: usize = 17;
const SUPPLY_CURRENT: usize = 18;
const COLD_HEAD_HOURS: usize = 19;
/// Direct addressing of a single TVO coefficient, eight addresses per sensor.
const TVO_COEFF_MODULES: core::ops::Range<usize> = 0x20..0xA0;

/// Turbo pump error code: the backing pump powering the turbo pump is off.
pub const ERR_BACKING_PUMP_OFF: u8 = 0x08;

/// Interval of the cold head hour counter.
const HOURS_INTERVAL: Duration = Duration::secs(3600);
/// The stages whose temperature decides if the cold head is running (4 K, 12 K, 90 K).
const COLD_STAGES: [usize; 3] = [0, 5, 9];
const VALID_TEMPERATURE: f32 = 350.0;
const COLD_TEMPERATURE: f32 = 265.0;

/// The state of a valve as decoded from its position sensors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ValveState {
    Close = 0,
    Open = 1,
    Unknown = 2,
    Error = 3,
    OverCurrent = 4,
}

impl ValveState {
    fn gate(sensors: u8, powered: bool) -> Self {
        match sensors {
            0x0 => ValveState::Unknown,
            0x5 => ValveState::Open,
            0xA => ValveState::Close,
            0xF if powered => ValveState::OverCurrent,
            0xF => ValveState::Unknown,
            _ => ValveState::Error,
        }
    }

    fn solenoid(sensors: u8) -> Self {
        match sensors {
            0 => ValveState::Unknown,
            1 => ValveState::Open,
            2 => ValveState::Close,
            _ => ValveState::Error,
        }
    }
}

/// A value converted in the background and the outcome of its last conversion.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Reading {
    pub value: f32,
    pub status: Status,
}

impl Reading {
    /// No conversion was completed yet.
    const PENDING: Self = Self {
        value: 0.0,
        status: Status::HardwareBlocked,
    };

    fn update(&mut self, value: Result<f32, Error>) {
        match value {
            Ok(value) => {
                self.value = value;
                self.status = Status::NoError;
            }
            Err(error) => self.status = error.into(),
        }
    }

    fn report(&self, reply: &mut Reply, background: bool) {
        reply.put(self.value);
        reply.status = if !self.status.is_ok() {
            self.status
        } else if !background {
            Status::HardwareBlocked
        } else {
            Status::NoError
        };
    }
}

/// The steps of the background cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Task {
    Temperature(usize),
    Pressure(usize),
    SupplyCurrent,
    LogHours,
}

#[derive(Debug, Default)]
struct Controls {
    backing_pump: LastControl,
    turbo_pump: LastControl,
    gate_valve: LastControl,
    solenoid_valve: LastControl,
    vacuum_controller: LastControl,
    coefficients: [LastControl; TVO_SENSORS],
    coefficient: LastControl,
    cold_head_hours: LastControl,
}

/// The cryostat.
pub struct Cryostat {
    registers: CryoRegisters,
    coefficients: [[f32; TVO_COEFFS]; TVO_SENSORS],
    /// The coefficient reported by the next sequential coefficient monitor.
    next_coeff: [usize; TVO_SENSORS],
    temperatures: [Reading; TEMPERATURE_SENSORS],
    pressures: [Reading; PRESSURE_SENSORS],
    supply_current: Reading,
    turbo_error: bool,
    turbo_speed: bool,
    gate_state: u8,
    solenoid_state: u8,
    vacuum_controller_state: u8,
    cold_head_hours: u32,
    /// The hour counter changed since it was last saved.
    hours_dirty: bool,
    hours_timer: AsyncTimer,
    task: Task,
    last: Controls,
}

impl Cryostat {
    pub fn new(config: &CryostatConfig) -> Self {
        Self {
            registers: CryoRegisters::new(),
            coefficients: config.tvo_coefficients,
            next_coeff: [0; TVO_SENSORS],
            temperatures: [Reading::PENDING; TEMPERATURE_SENSORS],
            pressures: [Reading::PENDING; PRESSURE_SENSORS],
            supply_current: Reading::PENDING,
            turbo_error: false,
            turbo_speed: false,
            gate_state: ValveState::Unknown as u8,
            solenoid_state: ValveState::Unknown as u8,
            vacuum_controller_state: 0,
            cold_head_hours: config.cold_head_hours.unwrap_or(0),
            hours_dirty: config.cold_head_hours.is_none(),
            hours_timer: AsyncTimer::new(),
            task: Task::Temperature(0),
            last: Controls::default(),
        }
    }

    pub fn registers(&self) -> &CryoRegisters {
        &self.registers
    }

    pub fn temperature(&self, sensor: usize) -> Option<Reading> {
        self.temperatures.get(sensor).copied()
    }

    pub fn pressure(&self, sensor: usize) -> Option<Reading> {
        self.pressures.get(sensor).copied()
    }

    pub fn supply_current(&self) -> Reading {
        self.supply_current
    }

    pub fn cold_head_hours(&self) -> u32 {
        self.cold_head_hours
    }

    /// Take the hour count for saving if it changed since it was last taken.
    pub fn take_cold_head_hours(&mut self) -> Option<u32> {
        core::mem::take(&mut self.hours_dirty).then_some(self.cold_head_hours)
    }

    /// Bring the switched outputs to their reset state: all off, vacuum controller on.
    pub fn startup(&mut self, bus: &mut Bus) -> Result<(), Error> {
        info!("Cryostat cold head hours: {}", self.cold_head_hours);
        self.registers.set_switch(bus, Switch::VacuumController, true)
    }

    /// Perform one step of the background cycle.
    ///
    /// # Note
    /// A cycle converts every temperature, both pressures and the supply current. The cold head
    /// hour counter is served as a cycle of its own.
    ///
    /// # Returns
    /// [AsyncStatus::Done] once the cycle completed.
    pub fn step(&mut self, bus: &mut Bus) -> Result<AsyncStatus, Error> {
        match self.task {
            Task::Temperature(sensor) => {
                let next = if sensor + 1 < TEMPERATURE_SENSORS {
                    Task::Temperature(sensor + 1)
                } else {
                    Task::Pressure(0)
                };
                self.acquire(bus, AnalogPoint::Temperature(sensor), next)
            }
            Task::Pressure(sensor) => {
                let next = if sensor + 1 < PRESSURE_SENSORS {
                    Task::Pressure(sensor + 1)
                } else {
                    Task::SupplyCurrent
                };
                self.acquire(bus, AnalogPoint::Pressure(sensor), next)
            }
            Task::SupplyCurrent => self.acquire(bus, AnalogPoint::SupplyCurrent, Task::LogHours),
            Task::LogHours => {
                self.task = Task::Temperature(0);
                self.log_hours(bus.clock())?;
                Ok(AsyncStatus::Done)
            }
        }
    }

    fn acquire(&mut self, bus: &mut Bus, point: AnalogPoint, next: Task) -> Result<AsyncStatus, Error> {
        let raw = match self.registers.convert(bus, point) {
            Ok(None) => return Ok(AsyncStatus::Pending),
            Ok(Some(raw)) => raw,
            Err(error) => {
                self.task = next;
                self.reading(point).status = Status::Error;
                return Err(error);
            }
        };

        self.task = next;
        let value = self.scale(point, scaling::cryo_voltage(raw));
        self.reading(point).update(value);

        Ok(match next {
            Task::LogHours => AsyncStatus::Done,
            _ => AsyncStatus::Pending,
        })
    }

    fn reading(&mut self, point: AnalogPoint) -> &mut Reading {
        match point {
            AnalogPoint::Temperature(sensor) => &mut self.temperatures[sensor],
            AnalogPoint::Pressure(sensor) => &mut self.pressures[sensor],
            AnalogPoint::SupplyCurrent => &mut self.supply_current,
        }
    }

    fn scale(&self, point: AnalogPoint, voltage: f32) -> Result<f32, Error> {
        match point {
            AnalogPoint::Temperature(sensor) if sensor < TVO_SENSORS => {
                scaling::tvo_temperature(voltage, &self.coefficients[sensor])
            }
            AnalogPoint::Temperature(_) => scaling::prt_temperature(voltage),
            AnalogPoint::Pressure(0) => scaling::cryostat_pressure(voltage),
            AnalogPoint::Pressure(_) => scaling::vacuum_port_pressure(voltage),
            AnalogPoint::SupplyCurrent => Ok(scaling::supply_current(voltage)),
        }
    }

    /// Count an hour of cold head operation if at least two stages are cold.
    fn log_hours(&mut self, clock: &mut dyn Clock) -> Result<(), Error> {
        match self.hours_timer.query(clock) {
            TimerState::Running => return Ok(()),
            TimerState::NotRunning => return self.hours_timer.start(clock, HOURS_INTERVAL),
            TimerState::Expired => self.hours_timer.start(clock, HOURS_INTERVAL)?,
        }

        let cold = COLD_STAGES
            .iter()
            .map(|&sensor| self.temperatures[sensor])
            .filter(|reading| {
                reading.status.is_ok()
                    && reading.value > 0.0
                    && reading.value < VALID_TEMPERATURE
                    && reading.value < COLD_TEMPERATURE
            })
            .count();

        if cold >= 2 {
            self.cold_head_hours += 1;
            self.hours_dirty = true;
            info!("Cryostat cold head hours: {}", self.cold_head_hours);
        }

        Ok(())
    }

    fn backing_pump_on(&self) -> bool {
        self.registers.switch(Switch::BackingPump)
    }

    /// Service a request addressed to the cryostat.
    ///
    /// # Args
    /// * `background` - Background conversions are running, so cached readings are current.
    pub fn handle(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply, background: bool) {
        match message.slice(MODULE_MASK) {
            sensor @ 0..=12 => self.handle_temperature(bus, message, reply, sensor, background),
            BACKING_PUMP => self.handle_backing_pump(bus, message, reply),
            TURBO_PUMP => self.handle_turbo_pump(bus, message, reply),
            GATE_VALVE => self.handle_gate_valve(bus, message, reply),
            SOLENOID_VALVE => self.handle_solenoid_valve(bus, message, reply),
            VACUUM_CONTROLLER => self.handle_vacuum_controller(bus, message, reply, background),
            SUPPLY_CURRENT => {
                if leaf::monitor_only(bus, message, reply, ErrorModule::Cryostat) {
                    self.supply_current
                        .report(reply, background && self.backing_pump_on());
                }
            }
            COLD_HEAD_HOURS => self.handle_cold_head_hours(bus, message, reply, background),
            module if TVO_COEFF_MODULES.contains(&module) => {
                let offset = module - TVO_COEFF_MODULES.start;
                self.handle_coefficient(bus, message, reply, offset >> 3, offset & 0x7)
            }
            _ => {
                bus.store_error(ErrorModule::Cryostat, erc::MODULE_RANGE);
                reply.status = Status::HardwareRange;
            }
        }
    }

    fn handle_temperature(
        &mut self,
        bus: &mut Bus,
        message: &Message,
        reply: &mut Reply,
        sensor: usize,
        background: bool,
    ) {
        let Some(submodule) =
            leaf::select(bus, message, reply, SUBMODULE_MASK, 2, ErrorModule::CryostatTemp)
        else {
            return;
        };

        if submodule == 0 {
            if leaf::monitor_only(bus, message, reply, ErrorModule::CryostatTemp) {
                self.temperatures[sensor].report(reply, background);
            }
            return;
        }

        if sensor >= TVO_SENSORS {
            bus.store_error(ErrorModule::CryostatTemp, erc::MODULE_RANGE);
            reply.status = Status::HardwareRange;
            return;
        }

        // Sequential access: the payload carries the coefficient index after the value.
        let last = &mut self.last.coefficients[sensor];
        match leaf::access::<f32>(bus, message, reply, ErrorModule::CryostatTemp, last) {
            Some(Access::Control(value)) => match message.data.get(4).map(|&coeff| coeff as usize) {
                Some(coeff) if coeff < TVO_COEFFS => self.coefficients[sensor][coeff] = value,
                _ => {
                    bus.store_error(ErrorModule::CryostatTemp, erc::COMMAND_VAL);
                    last.status = Status::OutOfRange;
                    self.next_coeff[sensor] = 0;
                }
            },
            Some(Access::Monitor) => {
                let coeff = self.next_coeff[sensor];
                reply.put(self.coefficients[sensor][coeff]);
                reply.data.push(coeff as u8).ok();
                self.next_coeff[sensor] = (coeff + 1) % TVO_COEFFS;
            }
            None => {}
        }
    }

    fn handle_coefficient(
        &mut self,
        bus: &mut Bus,
        message: &Message,
        reply: &mut Reply,
        sensor: usize,
        coeff: usize,
    ) {
        if sensor >= TVO_SENSORS || coeff >= TVO_COEFFS {
            bus.store_error(ErrorModule::CryostatTemp, erc::COMMAND_VAL);
            reply.status = Status::HardwareRange;
            return;
        }

        let last = &mut self.last.coefficient;
        match leaf::access::<f32>(bus, message, reply, ErrorModule::CryostatTemp, last) {
            Some(Access::Control(value)) => self.coefficients[sensor][coeff] = value,
            Some(Access::Monitor) => reply.put(self.coefficients[sensor][coeff]),
            None => {}
        }
    }

    fn handle_backing_pump(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let last = &mut self.last.backing_pump;
        match leaf::access::<bool>(bus, message, reply, ErrorModule::Cryostat, last) {
            Some(Access::Control(on)) => {
                let registers = &mut self.registers;
                let result = if on {
                    registers.set_switch(bus, Switch::BackingPump, true)
                } else {
                    // Everything powered from the backing pump goes first.
                    [Switch::GateValve, Switch::SolenoidValve, Switch::TurboPump, Switch::BackingPump]
                        .into_iter()
                        .try_for_each(|output| registers.set_switch(bus, output, false))
                };
                last.complete(result);
            }
            Some(Access::Monitor) => reply.put(self.backing_pump_on()),
            None => {}
        }
    }

    fn handle_turbo_pump(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        if !self.backing_pump_on() {
            bus.store_error(ErrorModule::TurboPump, ERR_BACKING_PUMP_OFF);
            reply.status = Status::HardwareBlocked;
            return;
        }

        let Some(submodule) =
            leaf::select(bus, message, reply, SUBMODULE_MASK, 3, ErrorModule::TurboPump)
        else {
            return;
        };

        if submodule == 0 {
            let last = &mut self.last.turbo_pump;
            match leaf::access::<bool>(bus, message, reply, ErrorModule::TurboPump, last) {
                Some(Access::Control(on)) => {
                    last.complete(self.registers.set_switch(bus, Switch::TurboPump, on))
                }
                Some(Access::Monitor) => reply.put(self.registers.switch(Switch::TurboPump)),
                None => {}
            }
            return;
        }

        if !leaf::monitor_only(bus, message, reply, ErrorModule::TurboPump) {
            return;
        }

        let status = self.registers.status(bus);
        if submodule == 1 {
            leaf::emit(reply, status.map(|s| s.turbo_error()), &mut self.turbo_error);
        } else {
            leaf::emit(reply, status.map(|s| s.turbo_speed()), &mut self.turbo_speed);
        }
    }

    fn gate_valve_state(&self, bus: &mut Bus) -> Result<ValveState, Error> {
        let status = self.registers.status(bus)?;
        Ok(ValveState::gate(status.gate_sensors(), self.backing_pump_on()))
    }

    fn handle_gate_valve(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let powered = self.backing_pump_on();
        let last = &mut self.last.gate_valve;
        match leaf::access::<bool>(bus, message, reply, ErrorModule::GateValve, last) {
            Some(Access::Control(open)) => {
                if !powered {
                    bus.store_error(ErrorModule::GateValve, erc::MODULE_POWER);
                    last.status = Status::HardwareBlocked;
                    return;
                }

                // A moving valve must come to rest first.
                let status = self.registers.status(bus);
                match status.map(|s| ValveState::gate(s.gate_sensors(), powered)) {
                    Ok(ValveState::Unknown) => {
                        bus.store_error(ErrorModule::GateValve, erc::HARDWARE_WAIT);
                        last.status = Status::HardwareBlocked;
                    }
                    Ok(_) => last.complete(self.registers.set_switch(bus, Switch::GateValve, open)),
                    Err(error) => last.complete(Err(error)),
                }
            }
            Some(Access::Monitor) => {
                let state = self.gate_valve_state(bus).map(|state| state as u8);
                leaf::emit(reply, state, &mut self.gate_state);
            }
            None => {}
        }
    }

    fn handle_solenoid_valve(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let powered = self.backing_pump_on();
        let last = &mut self.last.solenoid_valve;
        match leaf::access::<bool>(bus, message, reply, ErrorModule::SolenoidValve, last) {
            Some(Access::Control(open)) => {
                if !powered {
                    bus.store_error(ErrorModule::SolenoidValve, erc::MODULE_POWER);
                    last.status = Status::HardwareBlocked;
                    return;
                }
                last.complete(self.registers.set_switch(bus, Switch::SolenoidValve, open));
            }
            Some(Access::Monitor) => {
                let state = self
                    .registers
                    .status(bus)
                    .map(|status| ValveState::solenoid(status.solenoid_sensors()));
                leaf::emit(reply, state.map(|state| state as u8), &mut self.solenoid_state);

                let commanded = if self.registers.switch(Switch::SolenoidValve) {
                    ValveState::Open
                } else {
                    ValveState::Close
                };
                if matches!(state, Ok(state) if state != commanded) {
                    // Closed by the interlock while the pump is running.
                    if powered {
                        bus.store_error(ErrorModule::SolenoidValve, erc::HARDWARE_BLOCKED);
                    }
                    reply.status = Status::HardwareBlocked;
                }
            }
            None => {}
        }
    }

    fn handle_vacuum_controller(
        &mut self,
        bus: &mut Bus,
        message: &Message,
        reply: &mut Reply,
        background: bool,
    ) {
        let Some(submodule) = leaf::select(
            bus,
            message,
            reply,
            SUBMODULE_MASK,
            4,
            ErrorModule::VacuumController,
        ) else {
            return;
        };

        match submodule {
            sensor @ 0..=1 => {
                if leaf::monitor_only(bus, message, reply, ErrorModule::VacuumSensor) {
                    self.pressures[sensor].report(reply, background);
                }
            }
            2 => {
                let last = &mut self.last.vacuum_controller;
                match leaf::access::<bool>(bus, message, reply, ErrorModule::VacuumController, last)
                {
                    Some(Access::Control(on)) => {
                        last.complete(self.registers.set_switch(bus, Switch::VacuumController, on))
                    }
                    Some(Access::Monitor) => {
                        reply.put(self.registers.switch(Switch::VacuumController))
                    }
                    None => {}
                }
            }
            _ => {
                if leaf::monitor_only(bus, message, reply, ErrorModule::VacuumController) {
                    // Zero reports a healthy controller.
                    let state = self
                        .registers
                        .status(bus)
                        .map(|status: CryoStatus| !status.vacuum_controller_ok() as u8);
                    leaf::emit(reply, state, &mut self.vacuum_controller_state);
                }
            }
        }
    }

    fn handle_cold_head_hours(
        &mut self,
        bus: &mut Bus,
        message: &Message,
        reply: &mut Reply,
        background: bool,
    ) {
        let last = &mut self.last.cold_head_hours;
        match leaf::access::<u32>(bus, message, reply, ErrorModule::Cryostat, last) {
            Some(Access::Control(hours)) => {
                info!("Cryostat cold head hours set to {}", hours);
                self.cold_head_hours = hours;
                self.hours_dirty = true;
            }
            Some(Access::Monitor) => {
                reply.put(self.cold_head_hours);
                if !background {
                    reply.status = Status::HardwareBlocked;
                }
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hardware::cryo::command, mock::Bench, serial::CRYO_PORT};
    use approx::assert_abs_diff_eq;

    /// Gate valve closed, solenoid valve open, vacuum controller healthy, ADC ready.
    const STATUS_NOMINAL: u64 = 0b10_1101_0001;

    fn config() -> CryostatConfig {
        let mut config = CryostatConfig::new();
        config.available = true;
        config.tvo_coefficients[0][0] = 4.0;
        config.tvo_coefficients[5][0] = 12.0;
        config.cold_head_hours = Some(100);
        config
    }

    fn float(reply: &Reply) -> f32 {
        f32::from_be_bytes(reply.data[..4].try_into().unwrap())
    }

    fn monitor(cryostat: &mut Cryostat, bench: &mut Bench, rca: u32) -> Reply {
        let mut reply = Reply::new();
        cryostat.handle(&mut bench.bus(), &Message::monitor(rca), &mut reply, true);
        reply
    }

    fn control(cryostat: &mut Cryostat, bench: &mut Bench, rca: u32, data: &[u8]) {
        let mut reply = Reply::new();
        cryostat.handle(&mut bench.bus(), &Message::control(0x1_0000 | rca, data), &mut reply, true);
    }

    /// Run background steps until the cycle completes.
    fn cycle(cryostat: &mut Cryostat, bench: &mut Bench) -> usize {
        for steps in 1..200 {
            if cryostat.step(&mut bench.bus()) == Ok(AsyncStatus::Done) {
                return steps;
            }
            bench.clock.advance(10);
        }
        panic!("Cycle did not complete");
    }

    #[test]
    fn background_conversions() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::ADC_DATA, 0x8000);
        let mut cryostat = Cryostat::new(&config());

        let reply = monitor(&mut cryostat, &mut bench, 0xC000);
        assert_eq!(reply.status, Status::HardwareBlocked);

        cycle(&mut cryostat, &mut bench);

        let temperature = cryostat.temperature(0).unwrap();
        assert_eq!(temperature.status, Status::NoError);
        assert_abs_diff_eq!(temperature.value, 4.0);
        assert_abs_diff_eq!(
            cryostat.temperature(12).unwrap().value,
            scaling::prt_temperature(5.0).unwrap()
        );
        assert_abs_diff_eq!(
            cryostat.pressure(0).unwrap().value,
            scaling::cryostat_pressure(5.0).unwrap()
        );
        assert_abs_diff_eq!(cryostat.supply_current().value, 7.443229, epsilon = 1e-4);

        let reply = monitor(&mut cryostat, &mut bench, 0xC000);
        assert_eq!(reply.status, Status::NoError);
        assert_abs_diff_eq!(float(&reply), 4.0);

        // Pressure of the vacuum port through the vacuum controller.
        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 17 << 2 | 1);
        assert_abs_diff_eq!(float(&reply), scaling::vacuum_port_pressure(5.0).unwrap());

        // Readings are stale while background work is suspended.
        let mut reply = Reply::new();
        cryostat.handle(&mut bench.bus(), &Message::monitor(0xC000), &mut reply, false);
        assert_eq!(reply.status, Status::HardwareBlocked);
        assert_abs_diff_eq!(float(&reply), 4.0);
    }

    #[test]
    fn failed_conversion_is_reported() {
        let mut bench = Bench::new();
        let mut cryostat = Cryostat::new(&config());
        bench.serial.fail_command = Some((CRYO_PORT, command::ADC_DATA));

        let mut result = Ok(AsyncStatus::Pending);
        while result == Ok(AsyncStatus::Pending) {
            result = cryostat.step(&mut bench.bus());
            bench.clock.advance(100);
        }
        assert_eq!(result, Err(Error::Interface));
        assert_eq!(cryostat.temperature(0).unwrap().status, Status::Error);

        let reply = monitor(&mut cryostat, &mut bench, 0xC000);
        assert_eq!(reply.status, Status::Error);

        // The cycle continues with the next sensor.
        bench.serial.fail_command = None;
        assert_eq!(cryostat.step(&mut bench.bus()), Ok(AsyncStatus::Pending));
        assert_eq!(cryostat.registers().areg(), 0x004);
    }

    #[test]
    fn cold_head_hours_are_counted() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::ADC_DATA, 0x8000);
        let mut cryostat = Cryostat::new(&config());
        assert_eq!(cryostat.take_cold_head_hours(), None);

        cycle(&mut cryostat, &mut bench);
        // The first hour cycle arms the counter.
        assert_eq!(cycle(&mut cryostat, &mut bench), 1);
        assert_eq!(cryostat.cold_head_hours(), 100);

        bench.clock.advance(3_600_000);
        cycle(&mut cryostat, &mut bench);
        cycle(&mut cryostat, &mut bench);
        assert_eq!(cryostat.cold_head_hours(), 101);
        assert_eq!(cryostat.take_cold_head_hours(), Some(101));
        assert_eq!(cryostat.take_cold_head_hours(), None);

        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 19 << 2);
        assert_eq!(reply.data.as_slice(), &101u32.to_be_bytes());

        control(&mut cryostat, &mut bench, 0xC000 | 19 << 2, &5000u32.to_be_bytes());
        assert_eq!(cryostat.take_cold_head_hours(), Some(5000));
    }

    #[test]
    fn warm_stages_do_not_count() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::ADC_DATA, 0x8000);
        let mut config = config();
        config.tvo_coefficients[0][0] = 290.0;
        config.tvo_coefficients[5][0] = 290.0;
        let mut cryostat = Cryostat::new(&config);

        cycle(&mut cryostat, &mut bench);
        cycle(&mut cryostat, &mut bench);
        bench.clock.advance(3_600_000);
        cycle(&mut cryostat, &mut bench);
        cycle(&mut cryostat, &mut bench);

        // Only the 90 K stage is cold.
        assert!(cryostat.temperature(9).unwrap().value < COLD_TEMPERATURE);
        assert_eq!(cryostat.cold_head_hours(), 100);
    }

    #[test]
    fn tvo_coefficients() {
        let mut bench = Bench::new();
        let mut cryostat = Cryostat::new(&config());

        // Sequential access cycles through the coefficients.
        let reply = monitor(&mut cryostat, &mut bench, 0xC001);
        assert_eq!(&reply.data[..4], &4.0f32.to_be_bytes());
        assert_eq!(reply.data[4], 0);
        let reply = monitor(&mut cryostat, &mut bench, 0xC001);
        assert_eq!(reply.data[4], 1);

        let mut payload = [0u8; 5];
        payload[..4].copy_from_slice(&1.5f32.to_be_bytes());
        payload[4] = 3;
        control(&mut cryostat, &mut bench, 0xC001, &payload);

        // Sensor 0, coefficient 3 addressed directly.
        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 0x23 << 2);
        assert_abs_diff_eq!(float(&reply), 1.5);

        payload[4] = 7;
        control(&mut cryostat, &mut bench, 0xC001, &payload);
        assert_eq!(bench.history.next(), 0x2AF3);
        let mut reply = Reply::new();
        cryostat.handle(&mut bench.bus(), &Message::monitor(0x1_C001), &mut reply, true);
        assert_eq!(reply.status, Status::OutOfRange);
        let reply = monitor(&mut cryostat, &mut bench, 0xC001);
        assert_eq!(reply.data[4], 0);

        // PRT sensors have no coefficients.
        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 9 << 2 | 1);
        assert_eq!(reply.status, Status::HardwareRange);

        // Sensor 9 through the direct addresses does not exist either.
        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 0x68 << 2);
        assert_eq!(reply.status, Status::HardwareRange);
        assert_eq!(bench.history.next(), 0x2AF1);
        assert_eq!(bench.history.next(), 0x2AF3);
    }

    #[test]
    fn pumps_and_valves_need_backing_pump() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::STATUS, STATUS_NOMINAL);
        let mut cryostat = Cryostat::new(&config());

        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 14 << 2);
        assert_eq!(reply.status, Status::HardwareBlocked);
        assert_eq!(bench.history.next(), 0x2508);

        control(&mut cryostat, &mut bench, 0xC000 | 15 << 2, &[1]);
        assert_eq!(bench.history.next(), 0x27F5);
        let mut reply = Reply::new();
        cryostat.handle(&mut bench.bus(), &Message::monitor(0x1_C000 | 15 << 2), &mut reply, true);
        assert_eq!(reply.status, Status::HardwareBlocked);

        control(&mut cryostat, &mut bench, 0xC000 | 16 << 2, &[1]);
        assert_eq!(bench.history.next(), 0x28F5);
        assert_eq!(cryostat.registers().breg(), 0x00);

        // The 230 V supply current is only valid with the backing pump running.
        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 18 << 2);
        assert_eq!(reply.status, Status::HardwareBlocked);
    }

    #[test]
    fn pump_down_sequence() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::STATUS, STATUS_NOMINAL);
        let mut cryostat = Cryostat::new(&config());

        control(&mut cryostat, &mut bench, 0xC000 | 13 << 2, &[1]);
        control(&mut cryostat, &mut bench, 0xC000 | 14 << 2, &[1]);
        control(&mut cryostat, &mut bench, 0xC000 | 16 << 2, &[1]);
        control(&mut cryostat, &mut bench, 0xC000 | 15 << 2, &[1]);
        assert_eq!(cryostat.registers().breg(), 0x1E);
        assert!(bench.history.is_empty());

        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 14 << 2);
        assert_eq!(reply.data.as_slice(), &[1]);
        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 14 << 2 | 2);
        assert_eq!(reply.data.as_slice(), &[0]);

        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 15 << 2);
        assert_eq!(reply.data.as_slice(), &[ValveState::Close as u8]);
        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 16 << 2);
        assert_eq!(reply.status, Status::NoError);
        assert_eq!(reply.data.as_slice(), &[ValveState::Open as u8]);

        // Switching the backing pump off shuts down everything it powers, in order.
        let before = bench.serial.writes_to(CRYO_PORT).len();
        control(&mut cryostat, &mut bench, 0xC000 | 13 << 2, &[0]);
        let breg: std::vec::Vec<u64> = bench.serial.writes_to(CRYO_PORT)[before..]
            .iter()
            .map(|write| write.1)
            .collect();
        assert_eq!(breg, [0x0E, 0x06, 0x04, 0x00]);
        assert!(cryostat.registers().switch(Switch::VacuumController));
    }

    #[test]
    fn moving_gate_valve_is_not_commanded() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::STATUS, STATUS_NOMINAL & !0x78);
        let mut cryostat = Cryostat::new(&config());

        control(&mut cryostat, &mut bench, 0xC000 | 13 << 2, &[1]);
        control(&mut cryostat, &mut bench, 0xC000 | 15 << 2, &[1]);
        assert_eq!(bench.history.next(), 0x27F7);
        assert!(!cryostat.registers().switch(Switch::GateValve));

        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 15 << 2);
        assert_eq!(reply.data.as_slice(), &[ValveState::Unknown as u8]);
    }

    #[test]
    fn interlocked_solenoid_valve_is_reported() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::STATUS, STATUS_NOMINAL);
        let mut cryostat = Cryostat::new(&config());

        // The sensors read open although the valve was never opened.
        control(&mut cryostat, &mut bench, 0xC000 | 13 << 2, &[1]);
        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 16 << 2);
        assert_eq!(reply.status, Status::HardwareBlocked);
        assert_eq!(reply.data.as_slice(), &[ValveState::Open as u8]);
        assert_eq!(bench.history.next(), 0x28F8);
    }

    #[test]
    fn vacuum_controller() {
        let mut bench = Bench::new();
        bench.serial.respond(CRYO_PORT, command::STATUS, STATUS_NOMINAL);
        let mut cryostat = Cryostat::new(&config());

        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 17 << 2 | 2);
        assert_eq!(reply.data.as_slice(), &[1]);
        let reply = monitor(&mut cryostat, &mut bench, 0xC000 | 17 << 2 | 3);
        assert_eq!(reply.data.as_slice(), &[0]);

        control(&mut cryostat, &mut bench, 0xC000 | 17 << 2 | 2, &[0]);
        assert_eq!(bench.serial.last_write(CRYO_PORT, command::BREG), Some(0x01));

        // Pressures are monitor-only.
        control(&mut cryostat, &mut bench, 0xC000 | 17 << 2, &[0]);
        assert_eq!(bench.history.next(), 0x29F2);
    }

    #[test]
    fn address_ranges() {
        let mut bench = Bench::new();
        let mut cryostat = Cryostat::new(&config());

        for rca in [0xC000 | 20 << 2, 0xC000 | 0xA0 << 2] {
            let reply = monitor(&mut cryostat, &mut bench, rca);
            assert_eq!(reply.status, Status::HardwareRange);
            assert_eq!(bench.history.next(), 0x24F1);
        }

        let reply = monitor(&mut cryostat, &mut bench, 0xC002);
        assert_eq!(reply.status, Status::HardwareRange);
        assert_eq!(bench.history.next(), 0x2AF1);

        control(&mut cryostat, &mut bench, 0xC000 | 18 << 2, &[1]);
        assert_eq!(bench.history.next(), 0x24F2);
    }
}
