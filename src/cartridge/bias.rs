//! Cartridge BIAS subsystem: SIS mixers, SIS magnets, LNAs, LNA LED and SIS heater
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use super::Setpoint;
use crate::{
    can::{Message, Reply},
    error::{erc, ErrorModule},
    hardware::{
        bias::{BiasRegisters, LnaPort, MonitorPoint},
        Polarization, Sideband,
    },
    leaf::{self, Access, LastControl},
    scaling::bipolar_adc,
    serial::Bus,
    Error, Status,
};

const POLARIZATION_MASK: u32 = 0x400;
const POLARIZATION_MODULE_MASK: u32 = 0x380;
const SIDEBAND_MODULE_MASK: u32 = 0x060;
const SIS_MODULE_MASK: u32 = 0x018;
const MAGNET_MODULE_MASK: u32 = 0x010;
const LNA_MODULE_MASK: u32 = 0x01C;
const STAGE_MODULE_MASK: u32 = 0x003;
const HEATER_MODULE_MASK: u32 = 0x040;

const LNA_STAGES: usize = 3;

const SIS_VOLTAGE_SCALE: f32 = 50.0;
const SIS_CURRENT_SCALE: f32 = 20.0;
const MAGNET_VOLTAGE_SCALE: f32 = 10.0;
const MAGNET_CURRENT_SCALE: f32 = 250.0;
const LNA_DRAIN_VOLTAGE_SCALE: f32 = 10.0;
const LNA_DRAIN_CURRENT_SCALE: f32 = 100.0;
const LNA_GATE_VOLTAGE_SCALE: f32 = 10.0;
const HEATER_CURRENT_SCALE: f32 = 425.0;

/// The factory SIS current sense resistor of a band in ohms.
///
/// # Args
/// * `band` - The cartridge index (0 for band 1).
pub fn default_sense_resistor(band: usize) -> f32 {
    match band {
        2 | 3 | 5 | 7 => 5.0,
        4 => 5.1,
        6 => 50.0,
        8 | 9 => 10.0,
        _ => 1.0,
    }
}

/// SIS mixers are fitted to bands 3 to 10.
fn has_sis(band: usize) -> bool {
    band >= 2
}

/// SIS magnets are fitted to bands 5 to 10.
fn has_magnet(band: usize) -> bool {
    band >= 4
}

#[derive(Default)]
struct LnaStage {
    drain_voltage: Setpoint,
    drain_current: Setpoint,
    gate_voltage: f32,
}

#[derive(Default)]
struct SidebandBias {
    last_sense_resistor: LastControl,
    sis_voltage: Setpoint,
    sis_current: f32,
    sis_open_loop: LastControl,
    magnet_voltage: f32,
    magnet_current: Setpoint,
    lna_enable: LastControl,
    stages: [LnaStage; LNA_STAGES],
}

/// The addressing context of a BIAS request.
#[derive(Debug, Copy, Clone)]
struct Context {
    band: usize,
    polarization: Polarization,
    sideband: Sideband,
    standby2: bool,
}

/// Refuse a control request while the cartridge is in STANDBY2.
///
/// # Returns
/// True if the request may proceed.
fn admit(context: &Context, last: &mut LastControl) -> bool {
    if context.standby2 {
        last.status = Status::HardwareBlocked;
        return false;
    }

    true
}

/// One polarization bias board.
pub struct PolarizationBias {
    registers: BiasRegisters,
    sidebands: [SidebandBias; 2],
    lna_led: LastControl,
    heater_enable: LastControl,
    heater_current: f32,
}

impl PolarizationBias {
    pub fn new(band: usize, polarization: Polarization) -> Self {
        Self {
            registers: BiasRegisters::new(band, polarization),
            sidebands: Default::default(),
            lna_led: LastControl::new(),
            heater_enable: LastControl::new(),
            heater_current: 0.0,
        }
    }

    pub fn registers(&self) -> &BiasRegisters {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut BiasRegisters {
        &mut self.registers
    }
}

/// The BIAS subsystem of a cartridge.
pub struct Bias {
    band: usize,
    /// SIS current sense resistors indexed by polarization and sideband.
    sense_resistors: [[f32; 2]; 2],
    polarizations: [PolarizationBias; 2],
}

impl Bias {
    /// Construct the BIAS subsystem of a cartridge.
    ///
    /// # Args
    /// * `band` - The cartridge index (0 for band 1).
    /// * `sense_resistors` - The configured SIS current sense resistors.
    pub fn new(band: usize, sense_resistors: [[f32; 2]; 2]) -> Self {
        Self {
            band,
            sense_resistors,
            polarizations: [
                PolarizationBias::new(band, Polarization::Pol0),
                PolarizationBias::new(band, Polarization::Pol1),
            ],
        }
    }

    pub fn polarization(&self, polarization: Polarization) -> &PolarizationBias {
        &self.polarizations[polarization as usize]
    }

    pub fn registers_mut(&mut self, polarization: Polarization) -> &mut BiasRegisters {
        &mut self.polarizations[polarization as usize].registers
    }

    pub fn sense_resistor(&self, polarization: Polarization, sideband: Sideband) -> f32 {
        self.sense_resistors[polarization as usize][sideband as usize]
    }

    /// Enable the 10 MHz interface of both bias boards.
    pub fn init(&mut self, bus: &mut Bus) -> Result<(), Error> {
        for polarization in self.polarizations.iter_mut() {
            polarization.registers.enable_10mhz(bus)?;
        }

        Ok(())
    }

    /// Remove bias from the cold electronics for STANDBY2.
    ///
    /// # Note
    /// Every step is attempted. Failures are logged and otherwise ignored.
    pub fn go_standby2(&mut self, bus: &mut Bus) {
        let band = self.band;
        let sidebands = [Sideband::Sb1, Sideband::Sb2];

        for polarization in self.polarizations.iter_mut() {
            let registers = &mut polarization.registers;
            for sideband in sidebands {
                registers.set_lna_enable(bus, sideband, false).ok();
            }

            if has_sis(band) {
                for sideband in sidebands {
                    registers.set_sis_voltage(bus, sideband, 0.0).ok();
                }
            }

            if has_magnet(band) {
                for sideband in sidebands {
                    registers.set_magnet_current(bus, sideband, 0.0).ok();
                }
            }

            if registers.set_lna_led(bus, false).is_err() {
                warn!("Band {} LNA LED not switched off", band + 1);
            }
        }
    }

    /// Service a request addressed to the BIAS subsystem.
    ///
    /// # Args
    /// * `standby2` - The cartridge is in STANDBY2.
    pub fn handle(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply, standby2: bool) {
        let polarization = match message.slice(POLARIZATION_MASK) {
            0 => Polarization::Pol0,
            _ => Polarization::Pol1,
        };

        let Some(module) = leaf::select(
            bus,
            message,
            reply,
            POLARIZATION_MODULE_MASK,
            4,
            ErrorModule::Polarization,
        ) else {
            return;
        };

        let board = &mut self.polarizations[polarization as usize];
        let mut context = Context {
            band: self.band,
            polarization,
            sideband: Sideband::Sb1,
            standby2,
        };

        match module {
            0 | 1 => {
                context.sideband = if module == 0 { Sideband::Sb1 } else { Sideband::Sb2 };
                handle_sideband(
                    bus,
                    message,
                    reply,
                    &context,
                    &mut board.registers,
                    &mut board.sidebands[module],
                    &mut self.sense_resistors,
                )
            }
            2 => handle_lna_led(bus, message, reply, board),
            _ => handle_heater(bus, message, reply, &context, board),
        }
    }
}

fn handle_lna_led(bus: &mut Bus, message: &Message, reply: &mut Reply, board: &mut PolarizationBias) {
    match leaf::access::<bool>(bus, message, reply, ErrorModule::LnaLed, &mut board.lna_led) {
        Some(Access::Control(enable)) => {
            let result = board.registers.set_lna_led(bus, enable);
            board.lna_led.complete(result);
        }
        Some(Access::Monitor) => reply.put(board.registers.lna_led()),
        None => {}
    }
}

fn handle_heater(
    bus: &mut Bus,
    message: &Message,
    reply: &mut Reply,
    context: &Context,
    board: &mut PolarizationBias,
) {
    if !has_sis(context.band) {
        bus.store_error(ErrorModule::SisHeater, erc::MODULE_ABSENT);
        reply.status = Status::HardwareRange;
        return;
    }

    match message.slice(HEATER_MODULE_MASK) {
        0 => match leaf::access::<bool>(
            bus,
            message,
            reply,
            ErrorModule::SisHeater,
            &mut board.heater_enable,
        ) {
            Some(Access::Control(enable)) => {
                if admit(context, &mut board.heater_enable) {
                    let result = board.registers.set_sis_heater(bus, enable);
                    board.heater_enable.complete(result);
                }
            }
            Some(Access::Monitor) => reply.put(board.registers.sis_heater()),
            None => {}
        },
        _ => {
            if leaf::monitor_only(bus, message, reply, ErrorModule::SisHeater) {
                let sample = board
                    .registers
                    .sample(bus, MonitorPoint::SisHeaterCurrent)
                    .map(|raw| bipolar_adc(raw, HEATER_CURRENT_SCALE));
                leaf::emit(reply, sample, &mut board.heater_current);
            }
        }
    }
}

fn handle_sideband(
    bus: &mut Bus,
    message: &Message,
    reply: &mut Reply,
    context: &Context,
    registers: &mut BiasRegisters,
    sideband: &mut SidebandBias,
    sense_resistors: &mut [[f32; 2]; 2],
) {
    let Some(module) = leaf::select(
        bus,
        message,
        reply,
        SIDEBAND_MODULE_MASK,
        3,
        ErrorModule::Sideband,
    ) else {
        return;
    };

    match module {
        0 => handle_sis(bus, message, reply, context, registers, sideband, sense_resistors),
        1 => handle_magnet(bus, message, reply, context, registers, sideband),
        _ => handle_lna(bus, message, reply, context, registers, sideband),
    }
}

fn handle_sis(
    bus: &mut Bus,
    message: &Message,
    reply: &mut Reply,
    context: &Context,
    registers: &mut BiasRegisters,
    state: &mut SidebandBias,
    sense_resistors: &mut [[f32; 2]; 2],
) {
    if !has_sis(context.band) {
        bus.store_error(ErrorModule::Sis, erc::MODULE_ABSENT);
        reply.status = Status::HardwareRange;
        return;
    }

    let sideband = context.sideband;
    let (pol, sb) = (context.polarization as usize, sideband as usize);

    // The SIS address field is two bits wide: no range check is needed.
    match message.slice(SIS_MODULE_MASK) {
        0 => match leaf::access::<f32>(
            bus,
            message,
            reply,
            ErrorModule::Sis,
            &mut state.last_sense_resistor,
        ) {
            // The sense resistor is shared by every mixer of the cartridge.
            Some(Access::Control(value)) => *sense_resistors = [[value; 2]; 2],
            Some(Access::Monitor) => reply.put(sense_resistors[pol][sb]),
            None => {}
        },
        1 => {
            let setpoint = &mut state.sis_voltage;
            match leaf::access::<f32>(bus, message, reply, ErrorModule::Sis, &mut setpoint.last) {
                Some(Access::Control(voltage)) => {
                    if admit(context, &mut setpoint.last) {
                        let result = registers.set_sis_voltage(bus, sideband, voltage);
                        setpoint.last.complete(result);
                    }
                }
                Some(Access::Monitor) => {
                    let sample = registers
                        .sample(bus, MonitorPoint::SisVoltage(sideband))
                        .map(|raw| bipolar_adc(raw, SIS_VOLTAGE_SCALE));
                    leaf::emit(reply, sample, &mut setpoint.value);
                }
                None => {}
            }
        }
        2 => {
            if leaf::monitor_only(bus, message, reply, ErrorModule::Sis) {
                let resistor = sense_resistors[pol][sb];
                let sample = registers
                    .sample(bus, MonitorPoint::SisCurrent(sideband))
                    .map(|raw| bipolar_adc(raw, SIS_CURRENT_SCALE) / resistor);
                leaf::emit(reply, sample, &mut state.sis_current);
            }
        }
        _ => match leaf::access::<bool>(bus, message, reply, ErrorModule::Sis, &mut state.sis_open_loop)
        {
            Some(Access::Control(open)) => {
                if admit(context, &mut state.sis_open_loop) {
                    let result = registers.set_sis_open_loop(bus, sideband, open);
                    state.sis_open_loop.complete(result);
                }
            }
            Some(Access::Monitor) => reply.put(registers.sis_open_loop(sideband)),
            None => {}
        },
    }
}

fn handle_magnet(
    bus: &mut Bus,
    message: &Message,
    reply: &mut Reply,
    context: &Context,
    registers: &mut BiasRegisters,
    state: &mut SidebandBias,
) {
    if !has_magnet(context.band) {
        bus.store_error(ErrorModule::SisMagnet, erc::MODULE_ABSENT);
        reply.status = Status::HardwareRange;
        return;
    }

    let sideband = context.sideband;
    match message.slice(MAGNET_MODULE_MASK) {
        0 => {
            if leaf::monitor_only(bus, message, reply, ErrorModule::SisMagnet) {
                let sample = registers
                    .sample(bus, MonitorPoint::MagnetVoltage(sideband))
                    .map(|raw| bipolar_adc(raw, MAGNET_VOLTAGE_SCALE));
                leaf::emit(reply, sample, &mut state.magnet_voltage);
            }
        }
        _ => {
            let setpoint = &mut state.magnet_current;
            match leaf::access::<f32>(bus, message, reply, ErrorModule::SisMagnet, &mut setpoint.last)
            {
                Some(Access::Control(current)) => {
                    let result = registers.set_magnet_current(bus, sideband, current);
                    setpoint.last.complete(result);
                }
                Some(Access::Monitor) => {
                    let sample = registers
                        .sample(bus, MonitorPoint::MagnetCurrent(sideband))
                        .map(|raw| bipolar_adc(raw, MAGNET_CURRENT_SCALE));
                    leaf::emit(reply, sample, &mut setpoint.value);
                }
                None => {}
            }
        }
    }
}

fn handle_lna(
    bus: &mut Bus,
    message: &Message,
    reply: &mut Reply,
    context: &Context,
    registers: &mut BiasRegisters,
    state: &mut SidebandBias,
) {
    let Some(module) = leaf::select(bus, message, reply, LNA_MODULE_MASK, 7, ErrorModule::Lna)
    else {
        return;
    };

    match module {
        0..=2 => handle_lna_stage(bus, message, reply, context, registers, state, module as u8),
        3..=5 => {
            bus.store_error(ErrorModule::Lna, erc::MODULE_ABSENT);
            reply.status = Status::HardwareRange;
        }
        _ => match leaf::access::<bool>(bus, message, reply, ErrorModule::Lna, &mut state.lna_enable) {
            Some(Access::Control(enable)) => {
                if admit(context, &mut state.lna_enable) {
                    let mut result = registers.set_lna_enable(bus, context.sideband, enable);

                    // Bands 1 and 2 drive a single LNA per polarization from both enables.
                    if result.is_ok() && context.band < 2 && context.sideband == Sideband::Sb1 {
                        result = registers.set_lna_enable(bus, Sideband::Sb2, enable);
                    }
                    state.lna_enable.complete(result);
                }
            }
            Some(Access::Monitor) => reply.put(registers.lna_enable(context.sideband)),
            None => {}
        },
    }
}

fn handle_lna_stage(
    bus: &mut Bus,
    message: &Message,
    reply: &mut Reply,
    context: &Context,
    registers: &mut BiasRegisters,
    state: &mut SidebandBias,
    stage: u8,
) {
    let Some(module) = leaf::select(
        bus,
        message,
        reply,
        STAGE_MODULE_MASK,
        3,
        ErrorModule::LnaStage,
    ) else {
        return;
    };

    let sideband = context.sideband;
    let lna = &mut state.stages[stage as usize];

    let (setpoint, port, scale) = match module {
        0 => (&mut lna.drain_voltage, LnaPort::DrainVoltage, LNA_DRAIN_VOLTAGE_SCALE),
        1 => (&mut lna.drain_current, LnaPort::DrainCurrent, LNA_DRAIN_CURRENT_SCALE),
        _ => {
            if leaf::monitor_only(bus, message, reply, ErrorModule::LnaStage) {
                let point = MonitorPoint::Lna {
                    sideband,
                    stage,
                    port: LnaPort::GateVoltage,
                };
                let sample = registers
                    .sample(bus, point)
                    .map(|raw| bipolar_adc(raw, LNA_GATE_VOLTAGE_SCALE));
                leaf::emit(reply, sample, &mut lna.gate_voltage);
            }
            return;
        }
    };

    match leaf::access::<f32>(bus, message, reply, ErrorModule::LnaStage, &mut setpoint.last) {
        Some(Access::Control(value)) => {
            if admit(context, &mut setpoint.last) {
                let result = registers.set_lna_stage(bus, sideband, stage, port, value);
                setpoint.last.complete(result);
            }
        }
        Some(Access::Monitor) => {
            let point = MonitorPoint::Lna {
                sideband,
                stage,
                port,
            };
            let sample = registers
                .sample(bus, point)
                .map(|raw| bipolar_adc(raw, scale));
            leaf::emit(reply, sample, &mut setpoint.value);
        }
        None => {}
    }
}
