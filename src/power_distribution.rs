//! Cartridge power distribution and power-on admission control
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Note
//! Every cartridge is fed by one power distribution module. Switching a module is the only way
//! to power a cartridge, so the enable handler is where the number of powered cartridges is
//! bounded and counted. Cartridges in STANDBY2 are counted separately from fully powered ones.
use crate::{
    can::{Message, Reply},
    cartridge::CartridgeMachine,
    error::{erc, ErrorModule},
    hardware::{
        pd::{PdRegisters, Rail},
        BANDS,
    },
    leaf::{self, Access, LastControl},
    scaling::adc,
    serial::Bus,
    special::Mode,
    Status,
};

/// The number of cartridges that may be powered in operational mode.
pub const MAX_POWERED_OPERATIONAL: u8 = 3;

/// The number of cartridges that may be powered in troubleshooting mode.
pub const MAX_POWERED_TROUBLESHOOTING: u8 = 10;

/// The number of cartridges that may be in STANDBY2.
pub const MAX_STANDBY2: u8 = 1;

/// The number of supply rails of a module.
pub const RAILS: usize = 6;

const MODULE_MASK: u32 = 0xF0;
const POWERED_MODULES: usize = BANDS;
const MODULE_QUANTITY_MASK: u32 = 0x0E;
const ENABLE: usize = RAILS;
const CHANNEL_QUANTITY_MASK: u32 = 0x01;

/// The requested power state of a module.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Enable {
    Off = 0,
    On = 1,
    Standby2 = 2,
}

impl TryFrom<u8> for Enable {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, crate::Error> {
        match value {
            0 => Ok(Enable::Off),
            1 => Ok(Enable::On),
            2 => Ok(Enable::Standby2),
            _ => Err(crate::Error::Bounds),
        }
    }
}

/// The maximum number of powered cartridges in an operating mode.
pub fn max_powered(mode: Mode) -> u8 {
    match mode {
        Mode::Troubleshooting => MAX_POWERED_TROUBLESHOOTING,
        _ => MAX_POWERED_OPERATIONAL,
    }
}

/// Check if a band has the hardware to operate in STANDBY2.
///
/// # Args
/// * `band` - The cartridge index (0 for band 1).
pub fn allow_standby2(band: usize) -> bool {
    (2..BANDS).contains(&band)
}

#[derive(Default, Copy, Clone)]
struct RailMonitor {
    voltage: f32,
    current: f32,
}

#[derive(Default)]
struct PdModule {
    rails: [RailMonitor; RAILS],
    last_enable: LastControl,
    /// The counter the module is currently accounted in, if any.
    counted: Option<Enable>,
}

/// The power distribution system.
pub struct PowerDistribution {
    registers: PdRegisters,
    modules: [PdModule; BANDS],
    powered: u8,
    standby2: u8,
    max_powered: u8,
}

impl PowerDistribution {
    /// Construct the power distribution.
    ///
    /// # Args
    /// * `mode` - The operating mode, which bounds the number of powered cartridges.
    pub fn new(mode: Mode) -> Self {
        Self {
            registers: PdRegisters::new(),
            modules: Default::default(),
            powered: 0,
            standby2: 0,
            max_powered: max_powered(mode),
        }
    }

    pub fn registers(&self) -> &PdRegisters {
        &self.registers
    }

    /// The number of fully powered cartridges, including the ones still initializing.
    pub fn powered_modules(&self) -> u8 {
        self.powered
    }

    pub fn standby2_modules(&self) -> u8 {
        self.standby2
    }

    pub fn max_powered_modules(&self) -> u8 {
        self.max_powered
    }

    /// Check if one more cartridge may be powered.
    ///
    /// # Args
    /// * `standby2` - The cartridge is requested in STANDBY2.
    pub fn allow_power_on(&self, standby2: bool) -> bool {
        if standby2 {
            self.standby2 < MAX_STANDBY2
        } else {
            self.powered < self.max_powered
        }
    }

    /// Switch every module off, regardless of the cartridge states.
    ///
    /// # Note
    /// Used at startup and shutdown to align the hardware with the bookkeeping. Failures are
    /// logged and the remaining modules are still switched.
    pub fn power_down(&mut self, bus: &mut Bus, cartridges: &mut [CartridgeMachine; BANDS]) {
        for cartridge in cartridges.iter_mut() {
            let band = cartridge.band();
            if let Err(error) = self.registers.set_enable(bus, band, false) {
                warn!("Band {} power down failed: {:?}", band + 1, error);
            }
            if !cartridge.is_off() {
                cartridge.stop();
            }
            self.modules[band].counted = None;
        }

        self.powered = 0;
        self.standby2 = 0;
    }

    /// Remove the power of a cartridge whose initialization failed.
    ///
    /// # Note
    /// If the module cannot be switched off the cartridge is considered unreachable and is put in
    /// error. It stays powered as far as admission is concerned until a later power-off succeeds.
    pub fn abort_init(&mut self, bus: &mut Bus, cartridge: &mut CartridgeMachine) {
        let band = cartridge.band();

        match self.registers.set_enable(bus, band, false) {
            Ok(()) => {
                cartridge.stop();
                self.release(band);
            }
            Err(_) => {
                self.modules[band].last_enable.status = Status::Error;
                cartridge.fault();
            }
        }
    }

    fn count(&mut self, band: usize, enable: Enable) {
        self.release(band);
        match enable {
            Enable::Off => return,
            Enable::On => self.powered += 1,
            Enable::Standby2 => self.standby2 += 1,
        }
        self.modules[band].counted = Some(enable);
    }

    fn release(&mut self, band: usize) {
        match self.modules[band].counted.take() {
            Some(Enable::On) => self.powered = self.powered.saturating_sub(1),
            Some(Enable::Standby2) => self.standby2 = self.standby2.saturating_sub(1),
            Some(Enable::Off) | None => {}
        }
    }

    /// Service a request addressed to the power distribution.
    ///
    /// # Args
    /// * `cartridges` - The cartridges fed by the modules.
    pub fn handle(
        &mut self,
        bus: &mut Bus,
        message: &Message,
        reply: &mut Reply,
        cartridges: &mut [CartridgeMachine; BANDS],
    ) {
        let Some(module) = leaf::select(
            bus,
            message,
            reply,
            MODULE_MASK,
            BANDS + 1,
            ErrorModule::PowerDistribution,
        ) else {
            return;
        };

        if module == POWERED_MODULES {
            if leaf::monitor_only(bus, message, reply, ErrorModule::PowerDistribution) {
                reply.put(self.powered);
            }
            return;
        }

        let Some(quantity) = leaf::select(
            bus,
            message,
            reply,
            MODULE_QUANTITY_MASK,
            RAILS + 1,
            ErrorModule::PdModule,
        ) else {
            return;
        };

        let cartridge = &mut cartridges[module];
        if !cartridge.is_available() {
            bus.store_error(ErrorModule::PdModule, erc::MODULE_ABSENT);
            reply.status = Status::HardwareBlocked;
            return;
        }

        if quantity == ENABLE {
            self.handle_enable(bus, message, reply, cartridge);
            return;
        }

        // The rail index is bounded by the select above.
        let Some(rail) = Rail::from_index(quantity) else {
            return;
        };

        if !leaf::monitor_only(bus, message, reply, ErrorModule::PdChannel) {
            return;
        }

        let voltage = message.slice(CHANNEL_QUANTITY_MASK) == 0;
        let sample = self
            .registers
            .sample(bus, module, rail, voltage)
            .map(|raw| {
                adc(
                    raw,
                    if voltage {
                        rail.voltage_scale()
                    } else {
                        rail.current_scale()
                    },
                )
            });

        let monitor = &mut self.modules[module].rails[rail as usize];
        let cache = if voltage {
            &mut monitor.voltage
        } else {
            &mut monitor.current
        };
        leaf::emit(reply, sample, cache);
    }

    fn handle_enable(
        &mut self,
        bus: &mut Bus,
        message: &Message,
        reply: &mut Reply,
        cartridge: &mut CartridgeMachine,
    ) {
        let band = cartridge.band();
        let mut last = core::mem::take(&mut self.modules[band].last_enable);

        match leaf::access::<u8>(bus, message, reply, ErrorModule::PdModule, &mut last) {
            Some(Access::Control(value)) => {
                if leaf::in_range(bus, ErrorModule::PdModule, &mut last, value, 0..=2) {
                    if let Ok(enable) = Enable::try_from(value) {
                        self.enable(bus, cartridge, enable, &mut last);
                    }
                }
            }
            Some(Access::Monitor) => reply.put(Self::enable_state(cartridge) as u8),
            None => {}
        }

        self.modules[band].last_enable = last;
    }

    fn enable_state(cartridge: &CartridgeMachine) -> Enable {
        if cartridge.is_off() {
            Enable::Off
        } else if cartridge.is_standby2() {
            Enable::Standby2
        } else {
            Enable::On
        }
    }

    /// Apply an enable request to a module.
    fn enable(
        &mut self,
        bus: &mut Bus,
        cartridge: &mut CartridgeMachine,
        enable: Enable,
        last: &mut LastControl,
    ) {
        let band = cartridge.band();
        let current = Self::enable_state(cartridge);
        if current == enable {
            return;
        }

        if enable == Enable::Standby2 && !allow_standby2(band) {
            bus.store_error(ErrorModule::PdModule, erc::COMMAND_VAL);
            last.status = Status::OutOfRange;
            return;
        }

        match (current, enable) {
            (_, Enable::Off) => {
                if let Err(error) = self.registers.set_enable(bus, band, false) {
                    warn!("Band {} power off failed: {:?}", band + 1, error);
                    last.complete(Err(error));
                    return;
                }

                cartridge.stop();
                self.release(band);
            }
            (Enable::Off, _) => {
                let standby2 = enable == Enable::Standby2;
                if !self.allow_power_on(standby2) {
                    self.block(bus, band, last);
                    return;
                }

                if let Err(error) = self.registers.set_enable(bus, band, true) {
                    warn!("Band {} power on failed: {:?}", band + 1, error);
                    last.complete(Err(error));
                    return;
                }

                cartridge.power_on(standby2);
                self.count(band, enable);
            }
            (Enable::Standby2, _) => {
                if !self.allow_power_on(false) {
                    self.block(bus, band, last);
                    return;
                }

                cartridge.leave_standby2();
                self.count(band, Enable::On);
            }
            (Enable::On, _) => {
                if !self.allow_power_on(true) {
                    self.block(bus, band, last);
                    return;
                }

                cartridge.go_standby2();
                self.count(band, Enable::Standby2);
            }
        }

        info!(
            "Band {} {:?}: {} powered, {} in STANDBY2",
            band + 1,
            enable,
            self.powered,
            self.standby2
        );
    }

    fn block(&mut self, bus: &mut Bus, band: usize, last: &mut LastControl) {
        warn!(
            "Band {} refused: {} powered, {} in STANDBY2",
            band + 1,
            self.powered,
            self.standby2
        );
        bus.store_error(ErrorModule::PdModule, erc::HARDWARE_BLOCKED);
        last.status = Status::HardwareBlocked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cartridge::{Cartridge, CartridgeState},
        config::CartridgeConfig,
        hardware::pd::command,
        mock::Bench,
        serial::PD_PORT,
    };
    use approx::assert_abs_diff_eq;

    fn cartridges() -> [CartridgeMachine; BANDS] {
        core::array::from_fn(|band| {
            let mut config = CartridgeConfig::new(band);
            config.available = band != 9;
            CartridgeMachine::new(Cartridge::new(band, &config))
        })
    }

    /// The enable RCA of a module.
    fn enable_rca(band: usize) -> u32 {
        0xA00C | (band as u32) << 4
    }

    fn request(
        pd: &mut PowerDistribution,
        bench: &mut Bench,
        cartridges: &mut [CartridgeMachine; BANDS],
        band: usize,
        enable: u8,
    ) -> Reply {
        let mut bus = bench.bus();
        let mut reply = Reply::new();
        pd.handle(
            &mut bus,
            &Message::control(0x1_0000 | enable_rca(band), &[enable]),
            &mut reply,
            cartridges,
        );

        let mut reply = Reply::new();
        pd.handle(
            &mut bus,
            &Message::monitor(0x1_0000 | enable_rca(band)),
            &mut reply,
            cartridges,
        );
        reply
    }

    #[test]
    fn power_on_is_bounded() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);

        for band in 0..3 {
            let reply = request(&mut pd, &mut bench, &mut cartridges, band, 1);
            assert_eq!(reply.status, Status::NoError);
        }
        assert_eq!(pd.powered_modules(), 3);

        let reply = request(&mut pd, &mut bench, &mut cartridges, 3, 1);
        assert_eq!(reply.status, Status::HardwareBlocked);
        assert_eq!(reply.data.as_slice(), &[1]);
        assert_eq!(pd.powered_modules(), 3);
        assert!(cartridges[3].is_off());
        assert_eq!(bench.history.next(), 0x1EF8);

        let reply = request(&mut pd, &mut bench, &mut cartridges, 1, 0);
        assert_eq!(reply.status, Status::NoError);
        assert_eq!(pd.powered_modules(), 2);
        assert!(cartridges[1].is_off());

        let reply = request(&mut pd, &mut bench, &mut cartridges, 3, 1);
        assert_eq!(reply.status, Status::NoError);
        assert_eq!(pd.powered_modules(), 3);
        assert!(matches!(cartridges[3].state(), CartridgeState::On));
        assert_eq!(bench.serial.last_write(PD_PORT, command::AREG), Some(0b1101));
    }

    #[test]
    fn repeated_commands_are_ignored() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);

        request(&mut pd, &mut bench, &mut cartridges, 4, 1);
        request(&mut pd, &mut bench, &mut cartridges, 4, 1);
        assert_eq!(pd.powered_modules(), 1);

        request(&mut pd, &mut bench, &mut cartridges, 4, 0);
        request(&mut pd, &mut bench, &mut cartridges, 4, 0);
        assert_eq!(pd.powered_modules(), 0);

        let reply = request(&mut pd, &mut bench, &mut cartridges, 4, 3);
        assert_eq!(reply.status, Status::OutOfRange);
        assert_eq!(bench.history.next(), 0x1EF3);
    }

    #[test]
    fn standby2_is_counted_separately() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);

        // Bands 1 and 2 have no STANDBY2 hardware.
        let reply = request(&mut pd, &mut bench, &mut cartridges, 1, 2);
        assert_eq!(reply.status, Status::OutOfRange);
        assert!(cartridges[1].is_off());

        request(&mut pd, &mut bench, &mut cartridges, 5, 2);
        assert_eq!((pd.powered_modules(), pd.standby2_modules()), (0, 1));
        assert!(cartridges[5].is_standby2());

        let reply = request(&mut pd, &mut bench, &mut cartridges, 6, 2);
        assert_eq!(reply.status, Status::HardwareBlocked);
        assert!(cartridges[6].is_off());

        // Leaving STANDBY2 moves the cartridge between the counters.
        request(&mut pd, &mut bench, &mut cartridges, 5, 1);
        assert_eq!((pd.powered_modules(), pd.standby2_modules()), (1, 0));
        assert!(!cartridges[5].is_standby2());

        let mut bus = bench.bus();
        let mut reply = Reply::new();
        pd.handle(&mut bus, &Message::monitor(enable_rca(5)), &mut reply, &mut cartridges);
        assert_eq!(reply.data.as_slice(), &[1]);
    }

    #[test]
    fn troubleshooting_allows_all_bands() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Troubleshooting);

        for band in 0..9 {
            request(&mut pd, &mut bench, &mut cartridges, band, 1);
        }
        assert_eq!(pd.powered_modules(), 9);
        assert_eq!(pd.max_powered_modules(), 10);
    }

    #[test]
    fn absent_cartridge_is_blocked() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);

        let mut bus = bench.bus();
        let mut reply = Reply::new();
        pd.handle(&mut bus, &Message::monitor(0xA090), &mut reply, &mut cartridges);
        assert_eq!(reply.status, Status::HardwareBlocked);
        assert_eq!(bus.history().next(), 0x1EF4);
    }

    #[test]
    fn failed_power_off_keeps_cartridge() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);

        request(&mut pd, &mut bench, &mut cartridges, 2, 1);
        bench.serial.fail_writes = true;
        let reply = request(&mut pd, &mut bench, &mut cartridges, 2, 0);
        assert_eq!(reply.status, Status::Error);
        assert_eq!(pd.powered_modules(), 1);
        assert!(!cartridges[2].is_off());
    }

    #[test]
    fn aborted_init_releases_module() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);

        request(&mut pd, &mut bench, &mut cartridges, 0, 1);
        request(&mut pd, &mut bench, &mut cartridges, 7, 1);

        {
            let mut bus = bench.bus();
            pd.abort_init(&mut bus, &mut cartridges[0]);
        }
        assert!(cartridges[0].is_off());
        assert_eq!(pd.powered_modules(), 1);

        bench.serial.fail_writes = true;
        {
            let mut bus = bench.bus();
            pd.abort_init(&mut bus, &mut cartridges[7]);
        }
        assert!(matches!(cartridges[7].state(), CartridgeState::Error));
        assert_eq!(pd.powered_modules(), 1);
        assert!(pd.registers().enabled(7));

        {
            let mut bus = bench.bus();
            let mut reply = Reply::new();
            pd.handle(
                &mut bus,
                &Message::monitor(0x1_0000 | enable_rca(7)),
                &mut reply,
                &mut cartridges,
            );
            assert_eq!(reply.status, Status::Error);
        }

        bench.serial.fail_writes = false;
        request(&mut pd, &mut bench, &mut cartridges, 7, 0);
        assert!(cartridges[7].is_off());
        assert_eq!(pd.powered_modules(), 0);
    }

    #[test]
    fn faulted_module_is_released_once() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);

        request(&mut pd, &mut bench, &mut cartridges, 0, 1);
        request(&mut pd, &mut bench, &mut cartridges, 7, 1);

        bench.serial.fail_writes = true;
        {
            let mut bus = bench.bus();
            pd.abort_init(&mut bus, &mut cartridges[7]);
        }
        bench.serial.fail_writes = false;
        assert_eq!(pd.powered_modules(), 2);

        // Repeated power-off of the faulted module must not free more than its own slot.
        request(&mut pd, &mut bench, &mut cartridges, 7, 0);
        request(&mut pd, &mut bench, &mut cartridges, 7, 0);
        assert_eq!(pd.powered_modules(), 1);

        for band in 1..3 {
            let reply = request(&mut pd, &mut bench, &mut cartridges, band, 1);
            assert_eq!(reply.status, Status::NoError);
        }
        let reply = request(&mut pd, &mut bench, &mut cartridges, 3, 1);
        assert_eq!(reply.status, Status::HardwareBlocked);
        assert!(cartridges[3].is_off());

        let on = cartridges.iter().filter(|cartridge| !cartridge.is_off()).count();
        assert_eq!(on, 3);
        assert_eq!(pd.powered_modules(), 3);
    }

    #[test]
    fn faulted_module_moves_between_counters() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);

        request(&mut pd, &mut bench, &mut cartridges, 4, 1);
        bench.serial.fail_writes = true;
        {
            let mut bus = bench.bus();
            pd.abort_init(&mut bus, &mut cartridges[4]);
        }
        bench.serial.fail_writes = false;

        request(&mut pd, &mut bench, &mut cartridges, 4, 2);
        request(&mut pd, &mut bench, &mut cartridges, 4, 0);
        assert_eq!((pd.powered_modules(), pd.standby2_modules()), (0, 0));
    }

    #[test]
    fn rail_monitors() {
        let mut bench = Bench::new();
        bench.serial.respond(PD_PORT, command::ADC_DATA, 0x8000);
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);

        let mut bus = bench.bus();
        let mut reply = Reply::new();
        pd.handle(&mut bus, &Message::monitor(0xA036), &mut reply, &mut cartridges);
        assert_eq!(reply.status, Status::NoError);
        assert_abs_diff_eq!(f32::from_be_bytes(reply.data[..4].try_into().unwrap()), -10.0);
        assert_eq!(pd.registers().breg(), 0x3B);

        let mut reply = Reply::new();
        pd.handle(&mut bus, &Message::monitor(0xA037), &mut reply, &mut cartridges);
        assert_abs_diff_eq!(f32::from_be_bytes(reply.data[..4].try_into().unwrap()), 1.0);

        let mut reply = Reply::new();
        pd.handle(&mut bus, &Message::control(0x1_A037, &[0]), &mut reply, &mut cartridges);
        assert_eq!(bus.history().next(), 0x1FF2);
    }

    #[test]
    fn powered_modules_monitor() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);
        request(&mut pd, &mut bench, &mut cartridges, 0, 1);

        let mut bus = bench.bus();
        let mut reply = Reply::new();
        pd.handle(&mut bus, &Message::monitor(0xA0A0), &mut reply, &mut cartridges);
        assert_eq!(reply.data.as_slice(), &[1]);

        let mut reply = Reply::new();
        pd.handle(&mut bus, &Message::monitor(0xA0B0), &mut reply, &mut cartridges);
        assert_eq!(reply.status, Status::HardwareRange);
        assert_eq!(bus.history().next(), 0x1DF1);
    }

    #[test]
    fn power_down_clears_counters() {
        let mut bench = Bench::new();
        let mut cartridges = cartridges();
        let mut pd = PowerDistribution::new(Mode::Operational);
        request(&mut pd, &mut bench, &mut cartridges, 0, 1);
        request(&mut pd, &mut bench, &mut cartridges, 4, 2);

        let mut bus = bench.bus();
        pd.power_down(&mut bus, &mut cartridges);
        assert_eq!((pd.powered_modules(), pd.standby2_modules()), (0, 0));
        assert!(cartridges.iter().all(|cartridge| cartridge.is_off()));
        assert_eq!(pd.registers().areg(), 0);
    }
}
