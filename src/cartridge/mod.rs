//! Cartridge power sequencing and request routing
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Note
//! A cartridge is powered by the power distribution and then brought up by the scheduler one
//! step per tick: the settle timer is armed, polled until it expires, and the BIAS and LO
//! boards are initialized. A cartridge asked for STANDBY2 has its cold electronics unbiased
//! by a further step.
pub mod bias;
pub mod lo;
pub mod temp;

use self::{bias::Bias, lo::Lo, temp::Temperatures};
use crate::{
    can::{Message, Reply},
    config::CartridgeConfig,
    error::{erc, ErrorModule},
    hardware::BANDS,
    leaf::LastControl,
    pa_limits::PaLimits,
    scheduler::AsyncStatus,
    serial::Bus,
    special::PaLimitsStore,
    timer::{AsyncTimer, Duration, TimerState},
    Error, Status,
};

/// The number of temperature sensors of a cartridge.
pub const TEMPERATURE_SENSORS: usize = 6;

/// The time allowed for the cartridge supplies to settle before initialization.
pub const INIT_SETTLE_TIME: Duration = Duration::millis(1000);

const SUBSYSTEM_MASK: u32 = 0x800;
const LO_TEMPERATURE_MASK: u32 = 0x780;

/// A controllable quantity with an analog read-back.
#[derive(Default)]
struct Setpoint {
    last: LastControl,
    value: f32,
}

mod sm {
    use smlang::statemachine;

    impl Copy for States {}
    impl Clone for States {
        fn clone(&self) -> States {
            *self
        }
    }

    impl serde::Serialize for States {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let (idx, var) = match self {
                States::Off => (0, "Off"),
                States::On => (1, "On"),
                States::Initing => (2, "Initing"),
                States::Ready => (3, "Ready"),
                States::GoStandby2 => (4, "GoStandby2"),
                States::Error => (5, "Error"),
            };
            serializer.serialize_unit_variant("State", idx, var)
        }
    }

    statemachine! {
        transitions: {
            *Off + PowerOn = On,
            Off + PowerOff = Off,
            Off + Fault = Error,

            On + StartInit = Initing,
            On + PowerOff = Off,
            On + Fault = Error,

            Initing + InitDone = Ready,
            Initing + PowerOff = Off,
            Initing + Fault = Error,

            Ready + EnterStandby2 = GoStandby2,
            Ready + PowerOff = Off,
            Ready + Fault = Error,

            GoStandby2 + Standby2Done = Ready,
            GoStandby2 + PowerOff = Off,
            GoStandby2 + Fault = Error,

            Error + PowerOff = Off,
            Error + Fault = Error,
        }
    }
}

pub use sm::States as CartridgeState;

/// The initialization steps run by the scheduler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum InitStep {
    SetWait,
    Wait,
    Init,
}

/// The background work in progress on a cartridge.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Task {
    Idle,
    Init(InitStep),
    Standby2,
}

/// One cartridge slot of the front end.
pub struct Cartridge {
    band: usize,
    available: bool,
    standby2: bool,
    bias: Bias,
    lo: Lo,
    temperatures: Temperatures,
    task: Task,
    timer: AsyncTimer,
}

impl Cartridge {
    /// Construct a cartridge slot from its configuration.
    ///
    /// # Args
    /// * `band` - The cartridge index (0 for band 1).
    /// * `config` - The cartridge configuration.
    pub fn new(band: usize, config: &CartridgeConfig) -> Self {
        Self {
            band,
            available: config.available,
            standby2: false,
            bias: Bias::new(band, config.sense_resistors),
            lo: Lo::new(band, config),
            temperatures: Temperatures::new(band, config.temperature_offsets),
            task: Task::Idle,
            timer: AsyncTimer::new(),
        }
    }

    pub fn band(&self) -> usize {
        self.band
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn is_standby2(&self) -> bool {
        self.standby2
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn bias(&self) -> &Bias {
        &self.bias
    }

    pub fn lo(&self) -> &Lo {
        &self.lo
    }

    pub fn temperatures(&self) -> &Temperatures {
        &self.temperatures
    }

    /// Run the hardware initialization of both boards.
    fn init(&mut self, bus: &mut Bus) -> Result<(), Error> {
        self.bias.init(bus)?;
        self.lo.init(bus)
    }

    /// Route a request to the addressed subsystem.
    fn dispatch(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        if message.slice(SUBSYSTEM_MASK) == 0 {
            self.bias.handle(bus, message, reply, self.standby2);
            return;
        }

        match message.slice(LO_TEMPERATURE_MASK) {
            0 => self.lo.handle(bus, message, reply),
            1 => self
                .temperatures
                .handle(bus, message, reply, &mut self.bias),
            _ => {
                bus.store_error(ErrorModule::Cartridge, erc::MODULE_RANGE);
                reply.status = Status::HardwareRange;
            }
        }
    }
}

impl sm::StateMachineContext for Cartridge {}

/// A cartridge slot and its power state.
pub type CartridgeMachine = sm::StateMachine<Cartridge>;

impl sm::StateMachine<Cartridge> {
    pub fn band(&self) -> usize {
        self.context().band
    }

    pub fn is_available(&self) -> bool {
        self.context().available
    }

    pub fn is_off(&self) -> bool {
        matches!(self.state(), &sm::States::Off)
    }

    pub fn is_standby2(&self) -> bool {
        self.context().standby2
    }

    pub fn pa_limits_mut(&mut self) -> &mut PaLimits {
        self.context_mut().lo.pa_limits_mut()
    }

    /// Switch the cartridge on after the power distribution enabled it.
    ///
    /// # Args
    /// * `standby2` - Bring the cartridge up in STANDBY2.
    pub fn power_on(&mut self, standby2: bool) {
        if self.process_event(sm::Events::PowerOn).is_ok() {
            self.context_mut().standby2 = standby2;
            info!(
                "Band {} powered{}",
                self.band() + 1,
                if standby2 { " in STANDBY2" } else { "" }
            );
        }
    }

    /// Put a powered cartridge in STANDBY2.
    ///
    /// # Note
    /// A cartridge still initializing enters STANDBY2 once it is ready.
    pub fn go_standby2(&mut self) {
        self.context_mut().standby2 = true;
        self.process_event(sm::Events::EnterStandby2).ok();
    }

    /// Leave STANDBY2 for full operation.
    pub fn leave_standby2(&mut self) {
        self.context_mut().standby2 = false;
    }

    /// Mark the cartridge as switched off.
    pub fn stop(&mut self) {
        self.process_event(sm::Events::PowerOff).ok();
        self.context_mut().standby2 = false;
        info!("Band {} off", self.band() + 1);
    }

    /// Mark the cartridge as unreachable until it is switched off.
    pub fn fault(&mut self) {
        self.process_event(sm::Events::Fault).ok();
        error!("Band {} in error", self.band() + 1);
    }

    /// Service a request addressed to the cartridge.
    pub fn handle(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        if !self.is_available() {
            bus.store_error(ErrorModule::Cartridge, erc::MODULE_ABSENT);
            reply.status = Status::HardwareRange;
            return;
        }

        let state = *self.state();
        match state {
            sm::States::Error => {
                bus.store_error(ErrorModule::Cartridge, erc::HARDWARE_ERROR);
                reply.status = Status::HardwareError;
            }
            sm::States::Off => {
                bus.store_error(ErrorModule::Cartridge, erc::MODULE_POWER);
                reply.status = Status::HardwareBlocked;
            }
            // Powered but not initialized: the boards still run from the 5 MHz clock.
            sm::States::On | sm::States::Initing | sm::States::GoStandby2 => {
                reply.status = Status::HardwareBlocked;
            }
            sm::States::Ready => self.context_mut().dispatch(bus, message, reply),
        }
    }

    /// Perform one unit of background work.
    ///
    /// # Returns
    /// [AsyncStatus::Pending] while the cartridge needs further ticks, [AsyncStatus::Done]
    /// once it has no more work this cycle. An error means the initialization failed and the
    /// cartridge has to be switched off.
    pub fn step(&mut self, bus: &mut Bus) -> Result<AsyncStatus, Error> {
        let task = self.context().task;
        let state = *self.state();
        match task {
            Task::Idle => match state {
                sm::States::On => {
                    self.context_mut().task = Task::Init(InitStep::SetWait);
                    Ok(AsyncStatus::Pending)
                }
                sm::States::GoStandby2 => {
                    self.context_mut().task = Task::Standby2;
                    Ok(AsyncStatus::Pending)
                }
                _ => Ok(AsyncStatus::Done),
            },
            Task::Init(step) => self.step_init(bus, step),
            Task::Standby2 => {
                self.context_mut().task = Task::Idle;
                if self.is_off() {
                    return Ok(AsyncStatus::Done);
                }

                // Failures are not reported: the sequence always completes.
                self.context_mut().bias.go_standby2(bus);
                self.process_event(sm::Events::Standby2Done).ok();
                info!("Band {} in STANDBY2", self.band() + 1);
                Ok(AsyncStatus::Done)
            }
        }
    }

    fn step_init(&mut self, bus: &mut Bus, step: InitStep) -> Result<AsyncStatus, Error> {
        // Switched off in the meantime.
        if self.is_off() {
            let cartridge = self.context_mut();
            cartridge.timer.stop();
            cartridge.task = Task::Idle;
            return Ok(AsyncStatus::Done);
        }

        match step {
            InitStep::SetWait => {
                self.process_event(sm::Events::StartInit).ok();
                let cartridge = self.context_mut();
                if let Err(error) = cartridge.timer.start(bus.clock(), INIT_SETTLE_TIME) {
                    cartridge.task = Task::Idle;
                    return Err(error);
                }
                cartridge.task = Task::Init(InitStep::Wait);
            }
            InitStep::Wait => {
                let cartridge = self.context_mut();
                if cartridge.timer.query(bus.clock()) != TimerState::Running {
                    cartridge.task = Task::Init(InitStep::Init);
                }
            }
            InitStep::Init => {
                let cartridge = self.context_mut();
                cartridge.task = Task::Idle;
                if let Err(error) = cartridge.init(bus) {
                    warn!("Band {} initialization failed: {:?}", cartridge.band + 1, error);
                    return Err(error);
                }

                self.process_event(sm::Events::InitDone).ok();
                info!("Band {} ready", self.band() + 1);

                // A cartridge powered into STANDBY2 continues with the STANDBY2 sequence.
                if self.is_standby2() {
                    self.process_event(sm::Events::EnterStandby2).ok();
                    return Ok(AsyncStatus::Pending);
                }

                return Ok(AsyncStatus::Done);
            }
        }

        Ok(AsyncStatus::Pending)
    }
}

impl PaLimitsStore for [CartridgeMachine; BANDS] {
    fn pa_limits(&mut self, band: usize) -> &mut PaLimits {
        self[band].pa_limits_mut()
    }
}
