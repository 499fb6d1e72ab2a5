//! The front end: message routing, startup, background work and shutdown
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use serde::Serialize;

use crate::{
    can::{self, Class, Message, Reply, Target},
    cartridge::{Cartridge, CartridgeMachine, CartridgeState},
    config::{ConfigSource, FrontendConfig},
    cryostat::Cryostat,
    error::{erc, ErrorModule},
    fetim::Fetim,
    hardware::BANDS,
    history::ErrorHistory,
    if_switch::IfSwitch,
    lpr::Lpr,
    power_distribution::PowerDistribution,
    scheduler::{AsyncStatus, Background, Scheduler, Stage},
    serial::{Bus, SerialAccess},
    special::{Mode, Special},
    timer::Clock,
    Error, Status,
};

/// The background work of one scheduler tick.
struct Sequences<'a, 'b> {
    bus: &'a mut Bus<'b>,
    cartridges: &'a mut [CartridgeMachine; BANDS],
    power_distribution: Option<&'a mut PowerDistribution>,
    cryostat: Option<&'a mut Cryostat>,
    fetim: &'a mut Fetim,
}

impl Background for Sequences<'_, '_> {
    fn cryostat(&mut self) -> Result<AsyncStatus, Error> {
        match self.cryostat.as_deref_mut() {
            Some(cryostat) => cryostat.step(self.bus),
            None => Ok(AsyncStatus::Done),
        }
    }

    fn cartridge(&mut self, band: usize) -> Result<AsyncStatus, Error> {
        let cartridge = &mut self.cartridges[band];
        let result = cartridge.step(self.bus);
        if result.is_err() {
            match self.power_distribution.as_deref_mut() {
                Some(pd) => pd.abort_init(self.bus, cartridge),
                None => cartridge.fault(),
            }
        }
        result
    }

    fn fetim(&mut self) -> Result<AsyncStatus, Error> {
        self.fetim.step(self.bus, false)
    }
}

/// The power and scheduling state of the front end, for diagnostics.
#[derive(Clone, Serialize)]
pub struct Snapshot {
    pub mode: Mode,
    pub scheduler: Scheduler,
    pub cartridges: [CartridgeState; BANDS],
    pub powered_modules: u8,
    pub standby2_modules: u8,
}

/// The monitor and control core of the front end.
///
/// # Note
/// The front end owns the serial transport and the clock. Every inbound message and every
/// scheduler tick builds a [Bus] over them for the duration of the call.
pub struct Frontend<S, C> {
    serial: S,
    clock: C,
    history: ErrorHistory,
    special: Special,
    scheduler: Scheduler,
    cartridges: [CartridgeMachine; BANDS],
    power_distribution: Option<PowerDistribution>,
    if_switch: Option<IfSwitch>,
    lpr: Option<Lpr>,
    cryostat: Option<Cryostat>,
    fetim: Fetim,
}

impl<S: SerialAccess, C: Clock> Frontend<S, C> {
    /// Construct the front end from its configuration.
    ///
    /// # Args
    /// * `serial` - The serial transport to the front-end hardware.
    /// * `clock` - The system time source.
    /// * `source` - The configuration file.
    pub fn new(serial: S, clock: C, source: &dyn ConfigSource) -> Self {
        let mut history = ErrorHistory::new();
        let config = FrontendConfig::load(source, &mut history);
        Self::with_config(serial, clock, &config, history)
    }

    /// Construct the front end from a loaded configuration.
    pub fn with_config(
        serial: S,
        clock: C,
        config: &FrontendConfig,
        history: ErrorHistory,
    ) -> Self {
        Self {
            serial,
            clock,
            history,
            special: Special::new(config.mode),
            scheduler: Scheduler::new(),
            cartridges: core::array::from_fn(|band| {
                CartridgeMachine::new(Cartridge::new(band, &config.cartridges[band]))
            }),
            power_distribution: config
                .power_distribution
                .then(|| PowerDistribution::new(config.mode)),
            if_switch: config
                .if_switch
                .then(|| IfSwitch::new(config.if_switch_new_hardware)),
            lpr: config.lpr.then(Lpr::new),
            cryostat: config
                .cryostat
                .available
                .then(|| Cryostat::new(&config.cryostat)),
            fetim: Fetim::new(config.fetim),
        }
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn history(&mut self) -> &mut ErrorHistory {
        &mut self.history
    }

    pub fn mode(&self) -> Mode {
        self.special.mode()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn cartridge(&self, band: usize) -> Option<&CartridgeMachine> {
        self.cartridges.get(band)
    }

    pub fn power_distribution(&self) -> Option<&PowerDistribution> {
        self.power_distribution.as_ref()
    }

    pub fn if_switch(&self) -> Option<&IfSwitch> {
        self.if_switch.as_ref()
    }

    pub fn lpr(&self) -> Option<&Lpr> {
        self.lpr.as_ref()
    }

    pub fn cryostat(&self) -> Option<&Cryostat> {
        self.cryostat.as_ref()
    }

    /// The cryostat, for saving its cold head hours.
    pub fn cryostat_mut(&mut self) -> Option<&mut Cryostat> {
        self.cryostat.as_mut()
    }

    pub fn fetim(&self) -> &Fetim {
        &self.fetim
    }

    pub fn snapshot(&self) -> Snapshot {
        let pd = self.power_distribution.as_ref();
        Snapshot {
            mode: self.special.mode(),
            scheduler: self.scheduler.clone(),
            cartridges: core::array::from_fn(|band| *self.cartridges[band].state()),
            powered_modules: pd.map_or(0, PowerDistribution::powered_modules),
            standby2_modules: pd.map_or(0, PowerDistribution::standby2_modules),
        }
    }

    /// Serialize the diagnostic state.
    ///
    /// # Args
    /// * `buffer` - The storage for the serialized state.
    ///
    /// # Returns
    /// The serialized portion of the buffer.
    pub fn save_snapshot<'a>(&self, buffer: &'a mut [u8]) -> Result<&'a mut [u8], Error> {
        postcard::to_slice(&self.snapshot(), buffer).map_err(|_| Error::Bounds)
    }

    /// Check if the embedding application should shut the front end down and exit.
    pub fn exit_requested(&self) -> bool {
        self.special.exit_requested()
    }

    /// Bring the hardware to its startup state and resume background work.
    ///
    /// # Note
    /// A failing subsystem is logged and left in whatever state it reached. The remaining
    /// subsystems are still started.
    pub fn startup(&mut self) {
        info!("Front end starting in {:?} mode", self.special.mode());
        let mut bus = Bus::new(&mut self.serial, &mut self.clock, &mut self.history);

        if let Some(pd) = self.power_distribution.as_mut() {
            pd.power_down(&mut bus, &mut self.cartridges);
        }

        if let Some(if_switch) = self.if_switch.as_mut() {
            if_switch.startup(&mut bus);
        }

        if let Some(lpr) = self.lpr.as_mut() {
            if let Err(error) = lpr.startup(&mut bus) {
                warn!("LPR startup failed: {:?}", error);
            }
        }

        if let Some(cryostat) = self.cryostat.as_mut() {
            if let Err(error) = cryostat.startup(&mut bus) {
                warn!("Cryostat startup failed: {:?}", error);
            }
        }

        if let Err(error) = self.fetim.startup(&mut bus) {
            warn!("FETIM startup failed: {:?}", error);
        }

        self.scheduler.enable(true);
        info!("Front end ready");
    }

    /// Switch every cartridge off, forget the PA limits and shutter the LPR.
    pub fn shutdown(&mut self) {
        info!("Front end shutting down");
        self.scheduler.enable(false);
        let mut bus = Bus::new(&mut self.serial, &mut self.clock, &mut self.history);

        if let Some(pd) = self.power_distribution.as_mut() {
            pd.power_down(&mut bus, &mut self.cartridges);
        }

        for cartridge in self.cartridges.iter_mut() {
            cartridge.pa_limits_mut().clear();
        }

        if let Some(lpr) = self.lpr.as_mut() {
            if let Err(error) = lpr.stop(&mut bus) {
                warn!("LPR stop failed: {:?}", error);
            }
        }
    }

    /// Service one inbound message.
    ///
    /// # Returns
    /// The reply to a monitor request. Control requests are not answered.
    pub fn handle(&mut self, message: &Message) -> Option<Reply> {
        let mut bus = Bus::new(&mut self.serial, &mut self.clock, &mut self.history);

        let Some(class) = message.class() else {
            bus.store_error(ErrorModule::Can, can::erc::CLASS_RANGE);
            return None;
        };

        if class == Class::Special {
            if message.is_control() {
                self.special.control(&mut bus, message, &mut self.cartridges);
                return None;
            }
            return Some(self.special.monitor(&mut bus, message.rca, &mut self.cartridges));
        }

        if message.is_control() && class == Class::Monitor {
            bus.store_error(ErrorModule::Can, can::erc::CONTROL_ON_MONITOR_RCA);
            return None;
        }

        let mut reply = Reply::new();
        match Target::from_rca(message.rca) {
            Some(target) => {
                let handlers = Handlers {
                    cartridges: &mut self.cartridges,
                    power_distribution: self.power_distribution.as_mut(),
                    if_switch: self.if_switch.as_mut(),
                    lpr: self.lpr.as_mut(),
                    cryostat: self.cryostat.as_mut(),
                    fetim: &mut self.fetim,
                    background: self.scheduler.stage() != Stage::Off,
                };
                handlers.route(&mut bus, target, message, &mut reply);
            }
            None => {
                bus.store_error(ErrorModule::Can, can::erc::MODULE_RANGE);
                reply.status = Status::HardwareRange;
            }
        }

        (!message.is_control()).then_some(reply)
    }

    /// Advance the background sequences by at most one unit of work.
    ///
    /// # Note
    /// A shutdown requested by the thermal interlock is carried out here and the embedding
    /// application is asked to exit.
    pub fn tick(&mut self) {
        {
            let mut bus = Bus::new(&mut self.serial, &mut self.clock, &mut self.history);
            let mut sequences = Sequences {
                bus: &mut bus,
                cartridges: &mut self.cartridges,
                power_distribution: self.power_distribution.as_mut(),
                cryostat: self.cryostat.as_mut(),
                fetim: &mut self.fetim,
            };
            self.scheduler.tick(&mut sequences);
        }

        if self.fetim.shutdown_triggered() && !self.special.exit_requested() {
            error!("Front end exiting on FETIM shutdown");
            self.shutdown();
            self.special.request_exit();
        }
    }
}

/// The module handlers a standard RCA is routed to.
struct Handlers<'a> {
    cartridges: &'a mut [CartridgeMachine; BANDS],
    power_distribution: Option<&'a mut PowerDistribution>,
    if_switch: Option<&'a mut IfSwitch>,
    lpr: Option<&'a mut Lpr>,
    cryostat: Option<&'a mut Cryostat>,
    fetim: &'a mut Fetim,
    /// Background work is running.
    background: bool,
}

impl Handlers<'_> {
    fn route(self, bus: &mut Bus, target: Target, message: &Message, reply: &mut Reply) {
        match target {
            Target::Cartridge(band) => self.cartridges[band].handle(bus, message, reply),
            Target::PowerDistribution => match self.power_distribution {
                Some(pd) => pd.handle(bus, message, reply, self.cartridges),
                None => absent(bus, reply, ErrorModule::PowerDistribution),
            },
            Target::IfSwitch => match self.if_switch {
                Some(if_switch) => if_switch.handle(bus, message, reply),
                None => absent(bus, reply, ErrorModule::IfSwitch),
            },
            Target::Cryostat => match self.cryostat {
                Some(cryostat) => cryostat.handle(bus, message, reply, self.background),
                None => absent(bus, reply, ErrorModule::Cryostat),
            },
            Target::Lpr => match self.lpr {
                Some(lpr) => lpr.handle(bus, message, reply),
                None => absent(bus, reply, ErrorModule::Lpr),
            },
            Target::Fetim if self.fetim.is_available() => self.fetim.handle(bus, message, reply),
            Target::Fetim => absent(bus, reply, ErrorModule::Fetim),
        }
    }
}

fn absent(bus: &mut Bus, reply: &mut Reply, module: ErrorModule) {
    bus.store_error(module, erc::MODULE_ABSENT);
    reply.status = Status::HardwareBlocked;
}
