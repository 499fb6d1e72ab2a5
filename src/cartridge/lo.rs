//! Cartridge LO subsystem: YTO, photomixer, PLL, AMC and PA with the drain voltage limiter
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use enum_iterator::all;

use super::Setpoint;
use crate::{
    can::{Message, Reply},
    config::CartridgeConfig,
    error::{erc, ErrorModule},
    hardware::{
        lo::{Flag, LoRegisters, MonitorPoint, Pot},
        PaChannel, Polarization,
    },
    leaf::{self, Access, LastControl},
    linear_transformation::LinearTransformation,
    pa_limits::PaLimits,
    scaling::{bipolar_adc, drain_pot, gate_pot},
    serial::Bus,
    Error, Status,
};

const LO_MODULE_MASK: u32 = 0x070;
const PHOTOMIXER_MODULE_MASK: u32 = 0x00C;
const PLL_MODULE_MASK: u32 = 0x00F;
const AMC_MODULE_MASK: u32 = 0x00F;
const PA_MODULE_MASK: u32 = 0x00C;
const PA_CHANNEL_MODULE_MASK: u32 = 0x003;

const LO_MODULES: usize = 5;
const PLL_MODULES: usize = 12;
const AMC_MODULES: usize = 12;

/// The largest YTO coarse tuning word.
pub const YTO_MAX: u16 = 4095;

/// Warning sub-code for a PA channel without a known polarization mapping.
const UNMAPPED_CHANNEL: u8 = 0x0C;

const PHOTOMIXER_SCALE: f32 = -10.0;
const GATE_DRAIN_VOLTAGE_SCALE: f32 = 10.0;
const DRAIN_CURRENT_SCALE: f32 = 1000.0;
const MULTIPLIER_CURRENT_SCALE: f32 = 100.0;
const SUPPLY_3V_SCALE: f32 = 20.0;

/// Scales of the PLL analog monitor points. The YIG heater current has its own mapping.
const PLL_SCALES: [f32; 6] = [210.0 / 11.0, 260.0 / 11.0, 1000.0, 0.0, 10.0, 10.0];
const YIG_HEATER_POINT: usize = 3;

/// PA drain voltage pot counts per volt.
const PA_DRAIN_POT_SCALE: f32 = 102.0;

/// The transfer function from a commanded voltage to a pot setting.
#[derive(Debug, Copy, Clone)]
enum PotLaw {
    Gate,
    /// Linear drain setting with the given counts per volt.
    Drain(f32),
}

impl PotLaw {
    fn setting(self, voltage: f32) -> u8 {
        match self {
            PotLaw::Gate => gate_pot(voltage),
            PotLaw::Drain(scale) => drain_pot(voltage, scale),
        }
    }
}

/// An AMC quantity: its monitor point, scale and optional control pot.
#[derive(Debug, Copy, Clone)]
struct AmcQuantity {
    point: u8,
    scale: AmcScale,
    control: Option<(Pot, PotLaw)>,
}

#[derive(Debug, Copy, Clone)]
enum AmcScale {
    Fixed(f32),
    Supply,
}

const fn amc(point: u8, scale: f32, control: Option<(Pot, PotLaw)>) -> Option<AmcQuantity> {
    Some(AmcQuantity {
        point,
        scale: AmcScale::Fixed(scale),
        control,
    })
}

/// The AMC quantities by address. The multiplier D voltage has no monitor point.
const AMC_QUANTITIES: [Option<AmcQuantity>; AMC_MODULES] = [
    amc(0, GATE_DRAIN_VOLTAGE_SCALE, None),
    amc(1, GATE_DRAIN_VOLTAGE_SCALE, None),
    amc(2, DRAIN_CURRENT_SCALE, None),
    amc(3, GATE_DRAIN_VOLTAGE_SCALE, None),
    amc(4, GATE_DRAIN_VOLTAGE_SCALE, Some((Pot::Pot3, PotLaw::Drain(51.0)))),
    amc(5, DRAIN_CURRENT_SCALE, None),
    None,
    amc(8, GATE_DRAIN_VOLTAGE_SCALE, Some((Pot::Pot0, PotLaw::Gate))),
    amc(9, GATE_DRAIN_VOLTAGE_SCALE, Some((Pot::Pot1, PotLaw::Drain(102.0)))),
    amc(10, DRAIN_CURRENT_SCALE, None),
    amc(7, MULTIPLIER_CURRENT_SCALE, None),
    Some(AmcQuantity {
        point: 6,
        scale: AmcScale::Supply,
        control: None,
    }),
];

/// The PA channel driving a polarization.
///
/// # Returns
/// The channel and whether the mapping is known for the band. Unknown bands use the
/// default mapping.
pub fn pa_channel(band: usize, polarization: Polarization) -> (PaChannel, bool) {
    let swapped = match band {
        2 | 3 | 7 | 8 => Some(true),
        5 | 6 => Some(false),
        _ => None,
    };

    let channel = match (swapped.unwrap_or(false), polarization) {
        (false, Polarization::Pol0) | (true, Polarization::Pol1) => PaChannel::A,
        _ => PaChannel::B,
    };

    (channel, swapped.is_some())
}

#[derive(Default)]
struct Photomixer {
    enable: LastControl,
    voltage: f32,
    current: f32,
}

#[derive(Default)]
struct Pll {
    monitors: [f32; 6],
    unlock_detected: bool,
    clear_unlock_latch: LastControl,
    /// Loop bandwidth, sideband lock polarity and null integrator.
    flags: [LastControl; 3],
}

#[derive(Default)]
struct Amc {
    monitors: [f32; AMC_MODULES],
    controls: [LastControl; AMC_MODULES],
}

#[derive(Default)]
struct PaChannelState {
    gate_voltage: Setpoint,
    drain_voltage: Setpoint,
    drain_current: f32,
}

#[derive(Default)]
struct Pa {
    channels: [PaChannelState; 2],
    supply_3v: f32,
    supply_5v: f32,
}

/// The LO subsystem of a cartridge.
pub struct Lo {
    band: usize,
    registers: LoRegisters,
    pa_limits: PaLimits,
    supply_voltage_scale: f32,
    yig_heater: LinearTransformation,
    loop_bandwidth: Option<bool>,
    yto: LastControl,
    photomixer: Photomixer,
    pll: Pll,
    amc: Amc,
    pa: Pa,
}

impl Lo {
    /// Construct the LO of a cartridge.
    ///
    /// # Args
    /// * `band` - The cartridge index (0 for band 1).
    /// * `config` - The cartridge configuration.
    pub fn new(band: usize, config: &CartridgeConfig) -> Self {
        Self {
            band,
            registers: LoRegisters::new(band),
            pa_limits: config.pa_limits.clone(),
            supply_voltage_scale: config.supply_voltage_scale,
            yig_heater: config.yig_heater,
            loop_bandwidth: config.loop_bandwidth,
            yto: LastControl::new(),
            photomixer: Default::default(),
            pll: Default::default(),
            amc: Default::default(),
            pa: Default::default(),
        }
    }

    pub fn registers(&self) -> &LoRegisters {
        &self.registers
    }

    pub fn pa_limits(&self) -> &PaLimits {
        &self.pa_limits
    }

    pub fn pa_limits_mut(&mut self) -> &mut PaLimits {
        &mut self.pa_limits
    }

    /// The last commanded drain voltage of a polarization.
    pub fn drain_voltage(&self, polarization: Polarization) -> f32 {
        let (channel, _) = pa_channel(self.band, polarization);
        self.pa.channels[channel as usize]
            .drain_voltage
            .last
            .value()
            .unwrap_or(0.0)
    }

    /// Bring the LO to a safe state during cartridge initialization.
    ///
    /// # Note
    /// The PA is unbiased before the YTO is detuned. The default loop bandwidth is applied
    /// on a best effort basis.
    pub fn init(&mut self, bus: &mut Bus) -> Result<(), Error> {
        self.registers.enable_10mhz(bus)?;

        for channel in all::<PaChannel>() {
            self.registers
                .set_pa_pot(bus, Pot::pa(channel, true), drain_pot(0.0, PA_DRAIN_POT_SCALE))?;
            self.pa.channels[channel as usize]
                .drain_voltage
                .last
                .overwrite(0.0f32);
        }

        for channel in all::<PaChannel>() {
            self.registers
                .set_pa_pot(bus, Pot::pa(channel, false), gate_pot(0.0))?;
        }

        self.registers.set_yto_coarse_tune(bus, 0)?;

        if let Some(bandwidth) = self.loop_bandwidth {
            if self
                .registers
                .set_flag(bus, Flag::LoopBandwidth, bandwidth)
                .is_err()
            {
                warn!("Band {} loop bandwidth default not applied", self.band + 1);
            }
        }

        Ok(())
    }

    /// Reduce the PA drain voltages to the limits at a new YTO tuning.
    ///
    /// # Returns
    /// True if any drain voltage was reduced.
    fn limit_for_tuning(&mut self, bus: &mut Bus, yto: u16) -> Result<bool, Error> {
        let mut reduced = false;

        for polarization in all::<Polarization>() {
            let (channel, _) = pa_channel(self.band, polarization);
            let last = &mut self.pa.channels[channel as usize].drain_voltage.last;
            let commanded = last.value().unwrap_or(0.0f32);

            let (voltage, clamped) = self.pa_limits.limit(yto, polarization, commanded);
            if clamped {
                self.registers.set_pa_pot(
                    bus,
                    Pot::pa(channel, true),
                    drain_pot(voltage, PA_DRAIN_POT_SCALE),
                )?;
                last.overwrite(voltage);
                info!(
                    "Band {} pol {} drain reduced to {} V for YTO {}",
                    self.band + 1,
                    polarization as usize,
                    voltage,
                    yto
                );
                reduced = true;
            }
        }

        Ok(reduced)
    }

    /// Service a request addressed to the LO subsystem.
    pub fn handle(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let Some(module) = leaf::select(
            bus,
            message,
            reply,
            LO_MODULE_MASK,
            LO_MODULES,
            ErrorModule::Lo,
        ) else {
            return;
        };

        match module {
            0 => self.handle_yto(bus, message, reply),
            1 => self.handle_photomixer(bus, message, reply),
            2 => self.handle_pll(bus, message, reply),
            3 => self.handle_amc(bus, message, reply),
            _ => self.handle_pa(bus, message, reply),
        }
    }

    fn handle_yto(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        match leaf::access::<u16>(bus, message, reply, ErrorModule::Yto, &mut self.yto) {
            Some(Access::Control(word)) => {
                if !leaf::in_range(bus, ErrorModule::Yto, &mut self.yto, word, 0..=YTO_MAX) {
                    return;
                }

                // The drains are reduced before the retune. A failed reduction aborts it.
                let reduced = match self.limit_for_tuning(bus, word) {
                    Ok(reduced) => reduced,
                    Err(error) => {
                        self.yto.complete(Err(error));
                        return;
                    }
                };

                let result = self.registers.set_yto_coarse_tune(bus, word);
                self.yto.complete(result);
                if result.is_ok() && reduced {
                    self.yto.status = Status::HardwareBlocked;
                }
            }
            Some(Access::Monitor) => reply.put(self.registers.yto_coarse_tune()),
            None => {}
        }
    }

    fn handle_photomixer(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let Some(module) = leaf::select(
            bus,
            message,
            reply,
            PHOTOMIXER_MODULE_MASK,
            3,
            ErrorModule::Photomixer,
        ) else {
            return;
        };

        let photomixer = &mut self.photomixer;
        let (point, cache) = match module {
            0 => {
                match leaf::access::<bool>(
                    bus,
                    message,
                    reply,
                    ErrorModule::Photomixer,
                    &mut photomixer.enable,
                ) {
                    Some(Access::Control(enable)) => {
                        let result = self.registers.set_flag(bus, Flag::PhotomixerEnable, enable);
                        photomixer.enable.complete(result);
                    }
                    Some(Access::Monitor) => {
                        reply.put(self.registers.flag(Flag::PhotomixerEnable))
                    }
                    None => {}
                }
                return;
            }
            1 => (MonitorPoint::PhotomixerVoltage, &mut photomixer.voltage),
            _ => (MonitorPoint::PhotomixerCurrent, &mut photomixer.current),
        };

        if leaf::monitor_only(bus, message, reply, ErrorModule::Photomixer) {
            let sample = self
                .registers
                .sample(bus, point)
                .map(|raw| bipolar_adc(raw, PHOTOMIXER_SCALE));
            leaf::emit(reply, sample, cache);
        }
    }

    fn handle_pll(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let Some(module) =
            leaf::select(bus, message, reply, PLL_MODULE_MASK, PLL_MODULES, ErrorModule::Pll)
        else {
            return;
        };

        let pll = &mut self.pll;
        let registers = &mut self.registers;

        match module {
            0..=5 => {
                if !leaf::monitor_only(bus, message, reply, ErrorModule::Pll) {
                    return;
                }

                let yig_heater = &self.yig_heater;
                let sample = registers.sample(bus, MonitorPoint::Pll(module as u8)).map(|raw| {
                    if module == YIG_HEATER_POINT {
                        yig_heater.physical(raw as i16 as f32)
                    } else {
                        bipolar_adc(raw, PLL_SCALES[module])
                    }
                });
                leaf::emit(reply, sample, &mut pll.monitors[module]);
            }
            6 => {
                // Reserved address: controls are ignored.
                if !message.is_control() {
                    reply.data.clear();
                    reply.status = Status::HardwareUpdateWarning;
                }
            }
            7 => {
                if leaf::monitor_only(bus, message, reply, ErrorModule::Pll) {
                    let sample = registers.pll_status(bus).map(|status| status.unlock_detected);
                    leaf::emit(reply, sample, &mut pll.unlock_detected);
                }
            }
            8 => match leaf::access::<u8>(
                bus,
                message,
                reply,
                ErrorModule::Pll,
                &mut pll.clear_unlock_latch,
            ) {
                Some(Access::Control(_)) => {
                    let result = registers.clear_unlock_latch(bus);
                    pll.clear_unlock_latch.complete(result);
                }
                // The latch clear has no monitor point.
                Some(Access::Monitor) => {
                    bus.store_error(ErrorModule::Pll, erc::RCA_RANGE);
                    reply.status = Status::MonitorCanRange;
                }
                None => {}
            },
            _ => {
                let flag = match module {
                    9 => Flag::LoopBandwidth,
                    10 => Flag::SidebandLockPolarity,
                    _ => Flag::NullLoopIntegrator,
                };
                let last = &mut pll.flags[module - 9];
                match leaf::access::<bool>(bus, message, reply, ErrorModule::Pll, last) {
                    Some(Access::Control(value)) => {
                        let result = registers.set_flag(bus, flag, value);
                        last.complete(result);
                    }
                    Some(Access::Monitor) => reply.put(registers.flag(flag)),
                    None => {}
                }
            }
        }
    }

    fn handle_amc(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let Some(module) =
            leaf::select(bus, message, reply, AMC_MODULE_MASK, AMC_MODULES, ErrorModule::Amc)
        else {
            return;
        };

        let registers = &mut self.registers;
        let last = &mut self.amc.controls[module];
        let cache = &mut self.amc.monitors[module];

        let Some(quantity) = AMC_QUANTITIES[module] else {
            // The multiplier D voltage reports the commanded pot setting.
            match leaf::access::<u8>(bus, message, reply, ErrorModule::Amc, last) {
                Some(Access::Control(setting)) => {
                    let result = registers.set_amc_pot(bus, Pot::Pot2, setting);
                    last.complete(result);
                }
                Some(Access::Monitor) => reply.put(registers.amc_pot(Pot::Pot2)),
                None => {}
            }
            return;
        };

        let scale = match quantity.scale {
            AmcScale::Fixed(scale) => scale,
            AmcScale::Supply => self.supply_voltage_scale,
        };

        match quantity.control {
            Some((pot, law)) => {
                match leaf::access::<f32>(bus, message, reply, ErrorModule::Amc, last) {
                    Some(Access::Control(voltage)) => {
                        let result = registers.set_amc_pot(bus, pot, law.setting(voltage));
                        last.complete(result);
                        return;
                    }
                    Some(Access::Monitor) => {}
                    None => return,
                }
            }
            None => {
                if !leaf::monitor_only(bus, message, reply, ErrorModule::Amc) {
                    return;
                }
            }
        }

        let sample = registers
            .sample(bus, MonitorPoint::Amc(quantity.point))
            .map(|raw| bipolar_adc(raw, scale));
        leaf::emit(reply, sample, cache);
    }

    fn handle_pa(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let Some(module) = leaf::select(bus, message, reply, PA_MODULE_MASK, 4, ErrorModule::Pa)
        else {
            return;
        };

        let (point, scale, cache) = match module {
            0 | 1 => {
                let polarization =
                    if module == 0 { Polarization::Pol0 } else { Polarization::Pol1 };
                self.handle_pa_channel(bus, message, reply, polarization);
                return;
            }
            2 => (MonitorPoint::Supply3V, SUPPLY_3V_SCALE, &mut self.pa.supply_3v),
            _ => (
                MonitorPoint::Supply5V,
                self.supply_voltage_scale,
                &mut self.pa.supply_5v,
            ),
        };

        if leaf::monitor_only(bus, message, reply, ErrorModule::Pa) {
            let sample = self
                .registers
                .sample(bus, point)
                .map(|raw| bipolar_adc(raw, scale));
            leaf::emit(reply, sample, cache);
        }
    }

    fn handle_pa_channel(
        &mut self,
        bus: &mut Bus,
        message: &Message,
        reply: &mut Reply,
        polarization: Polarization,
    ) {
        let Some(module) = leaf::select(
            bus,
            message,
            reply,
            PA_CHANNEL_MODULE_MASK,
            3,
            ErrorModule::PaChannel,
        ) else {
            return;
        };

        let (channel, mapped) = pa_channel(self.band, polarization);
        let yto = self.registers.yto_coarse_tune();
        let registers = &mut self.registers;
        let state = &mut self.pa.channels[channel as usize];

        let setpoint = match module {
            0 => &mut state.gate_voltage,
            1 => &mut state.drain_voltage,
            _ => {
                if leaf::monitor_only(bus, message, reply, ErrorModule::PaChannel) {
                    let sample = registers
                        .sample(bus, MonitorPoint::PaChannel(channel, 2))
                        .map(|raw| bipolar_adc(raw, DRAIN_CURRENT_SCALE));
                    leaf::emit(reply, sample, &mut state.drain_current);
                    warn_unmapped(bus, mapped, &mut reply.status);
                }
                return;
            }
        };

        let drain = module == 1;
        match leaf::access::<f32>(bus, message, reply, ErrorModule::PaChannel, &mut setpoint.last) {
            Some(Access::Control(voltage)) => {
                let (voltage, clamped) = if drain {
                    self.pa_limits.limit(yto, polarization, voltage)
                } else {
                    (voltage, false)
                };

                let setting = if drain {
                    drain_pot(voltage, PA_DRAIN_POT_SCALE)
                } else {
                    gate_pot(voltage)
                };

                let result = registers.set_pa_pot(bus, Pot::pa(channel, drain), setting);
                setpoint.last.complete(result);
                if result.is_ok() {
                    if clamped {
                        // The applied value is what a later retune has to respect.
                        setpoint.last.overwrite(voltage);
                        setpoint.last.status = Status::HardwareBlocked;
                    }
                    warn_unmapped(bus, mapped, &mut setpoint.last.status);
                }
            }
            Some(Access::Monitor) => {
                let sample = registers
                    .sample(bus, MonitorPoint::PaChannel(channel, module as u8))
                    .map(|raw| bipolar_adc(raw, GATE_DRAIN_VOLTAGE_SCALE));
                leaf::emit(reply, sample, &mut setpoint.value);
                warn_unmapped(bus, mapped, &mut reply.status);
            }
            None => {}
        }
    }
}

/// Flag an access to a PA channel of a band without a known polarization mapping.
fn warn_unmapped(bus: &mut Bus, mapped: bool, status: &mut Status) {
    if !mapped {
        bus.store_error(ErrorModule::PaChannel, UNMAPPED_CHANNEL);
        if *status == Status::NoError {
            *status = Status::HardwareUpdateWarning;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hardware::lo::command,
        history::ErrorHistory,
        mock::Bench,
        pa_limits::PolarizationSelect,
        serial::{cartridge_port, Subsystem},
    };
    use approx::assert_abs_diff_eq;

    /// An LO whose PA limits are given as `(yto, pol0, pol1)` rows.
    fn lo(band: usize, rows: &[(u16, f32, f32)]) -> Lo {
        let mut config = CartridgeConfig::new(band);
        let mut history = ErrorHistory::new();
        for &(yto, vd0, vd1) in rows {
            for (polarization, voltage) in [(Polarization::Pol0, vd0), (Polarization::Pol1, vd1)] {
                config
                    .pa_limits
                    .add_entry(&mut history, PolarizationSelect::Single(polarization), yto, voltage)
                    .unwrap();
            }
        }
        Lo::new(band, &config)
    }

    fn control(lo: &mut Lo, bench: &mut Bench, rca: u32, data: &[u8]) {
        let mut bus = bench.bus();
        let mut reply = Reply::new();
        lo.handle(&mut bus, &Message::control(rca, data), &mut reply);
    }

    fn monitor(lo: &mut Lo, bench: &mut Bench, rca: u32) -> Reply {
        let mut bus = bench.bus();
        let mut reply = Reply::new();
        lo.handle(&mut bus, &Message::monitor(rca), &mut reply);
        reply
    }

    #[test]
    fn channel_mapping() {
        assert_eq!(pa_channel(2, Polarization::Pol0), (PaChannel::B, true));
        assert_eq!(pa_channel(8, Polarization::Pol1), (PaChannel::A, true));
        assert_eq!(pa_channel(5, Polarization::Pol0), (PaChannel::A, true));
        assert_eq!(pa_channel(0, Polarization::Pol1), (PaChannel::B, false));
    }

    #[test]
    fn retune_reduces_drain_first() {
        let mut bench = Bench::new();
        let mut lo = lo(2, &[(100, 1.0, 2.0), (200, 0.5, 2.0)]);
        let port = cartridge_port(2, Subsystem::Lo);

        control(&mut lo, &mut bench, 0x1_2841, &0.8f32.to_be_bytes());
        assert_eq!(bench.serial.last_write(port, command::PA_POTS), Some(81 << 25));

        control(&mut lo, &mut bench, 0x1_2800, &200u16.to_be_bytes());
        let writes = bench.serial.writes_to(port);
        let reduction = writes
            .iter()
            .position(|&write| write == (command::PA_POTS, 51 << 25))
            .unwrap();
        let retune = writes
            .iter()
            .position(|&write| write == (command::AREG, 200))
            .unwrap();
        assert!(reduction < retune);

        let echo = monitor(&mut lo, &mut bench, 0x1_2800);
        assert_eq!(echo.status, Status::HardwareBlocked);
        assert_eq!(echo.data.as_slice(), &200u16.to_be_bytes());
        assert_abs_diff_eq!(lo.drain_voltage(Polarization::Pol0), 0.5);

        let echo = monitor(&mut lo, &mut bench, 0x1_2841);
        assert_eq!(echo.data.as_slice(), &0.5f32.to_be_bytes());
    }

    #[test]
    fn failed_reduction_aborts_retune() {
        let mut bench = Bench::new();
        let mut lo = lo(5, &[(0, 2.0, 2.0), (100, 0.5, 0.5)]);
        let port = cartridge_port(5, Subsystem::Lo);

        control(&mut lo, &mut bench, 0x1_5841, &1.0f32.to_be_bytes());
        assert_abs_diff_eq!(lo.drain_voltage(Polarization::Pol0), 1.0);

        bench.serial.fail_command = Some((port, command::PA_POTS));
        control(&mut lo, &mut bench, 0x1_5800, &100u16.to_be_bytes());

        assert_eq!(lo.registers().yto_coarse_tune(), 0);
        assert_eq!(monitor(&mut lo, &mut bench, 0x1_5800).status, Status::Error);
    }

    #[test]
    fn drain_command_is_clamped() {
        let mut bench = Bench::new();
        let mut lo = lo(5, &[(0, 1.0, 3.0)]);
        let port = cartridge_port(5, Subsystem::Lo);

        control(&mut lo, &mut bench, 0x1_5841, &1.5f32.to_be_bytes());
        assert_eq!(bench.serial.last_write(port, command::PA_POTS), Some(102 << 8));

        let echo = monitor(&mut lo, &mut bench, 0x1_5841);
        assert_eq!(echo.status, Status::HardwareBlocked);
        assert_eq!(echo.data.as_slice(), &1.0f32.to_be_bytes());
    }

    #[test]
    fn unmapped_channel_warns() {
        let mut bench = Bench::new();
        let mut lo = lo(0, &[]);

        let reply = monitor(&mut lo, &mut bench, 0x0_0840);
        assert_eq!(reply.status, Status::HardwareUpdateWarning);
        assert_eq!(bench.history.next(), 0x0C0C);
    }

    #[test]
    fn yto_range_is_checked() {
        let mut bench = Bench::new();
        let mut lo = lo(3, &[]);
        let port = cartridge_port(3, Subsystem::Lo);

        control(&mut lo, &mut bench, 0x1_3800, &5000u16.to_be_bytes());
        assert_eq!(bench.serial.last_write(port, command::AREG), None);
        assert_eq!(monitor(&mut lo, &mut bench, 0x1_3800).status, Status::OutOfRange);
        assert_eq!(bench.history.next(), 0x08F3);
    }

    #[test]
    fn unlock_latch_clear_is_control_only() {
        let mut bench = Bench::new();
        let mut lo = lo(1, &[]);
        let port = cartridge_port(1, Subsystem::Lo);

        let reply = monitor(&mut lo, &mut bench, 0x0_1828);
        assert_eq!(reply.status, Status::MonitorCanRange);
        assert_eq!(bench.history.next(), 0x07F2);

        control(&mut lo, &mut bench, 0x1_1828, &[1]);
        assert_eq!(bench.serial.writes_to(port).len(), 2);
        assert_eq!(monitor(&mut lo, &mut bench, 0x1_1828).data.as_slice(), &[1]);
    }

    #[test]
    fn amc_controls_touch_their_own_pot() {
        let mut bench = Bench::new();
        let mut lo = lo(4, &[]);
        let port = cartridge_port(4, Subsystem::Lo);

        control(&mut lo, &mut bench, 0x1_4834, &2.0f32.to_be_bytes());
        assert_eq!(bench.serial.last_write(port, command::AMC_POTS), Some(102 << 25));

        control(&mut lo, &mut bench, 0x1_4838, &1.0f32.to_be_bytes());
        assert_eq!(
            bench.serial.last_write(port, command::AMC_POTS),
            Some((102 << 25) | (102 << 8))
        );

        control(&mut lo, &mut bench, 0x1_4836, &[0x40]);
        assert_eq!(monitor(&mut lo, &mut bench, 0x0_4836).data.as_slice(), &[0x40]);
        assert_eq!(lo.registers().amc_pot(Pot::Pot3), 102);
    }

    #[test]
    fn yig_heater_uses_configured_mapping() {
        let mut bench = Bench::new();
        let mut lo = lo(6, &[]);
        bench
            .serial
            .respond(cartridge_port(6, Subsystem::Lo), command::ADC_DATA, 0x4000);

        let reply = monitor(&mut lo, &mut bench, 0x0_6823);
        assert_eq!(reply.status, Status::NoError);
        assert_eq!(reply.data.as_slice(), &250.0f32.to_be_bytes());

        let reserved = monitor(&mut lo, &mut bench, 0x0_6826);
        assert_eq!(reserved.status, Status::HardwareUpdateWarning);
        assert!(reserved.data.is_empty());
    }

    #[test]
    fn init_unbiases_pa() {
        let mut bench = Bench::new();
        let mut lo = lo(1, &[]);
        {
            let mut bus = bench.bus();
            lo.init(&mut bus).unwrap();
        }

        let port = cartridge_port(1, Subsystem::Lo);
        let gate = gate_pot(0.0) as u64;
        assert_eq!(
            bench.serial.last_write(port, command::PA_POTS),
            Some(gate | (gate << 17))
        );
        assert_eq!(bench.serial.last_write(port, command::AREG), Some(0));
        assert!(lo.registers().flag(Flag::LoopBandwidth));
        assert_eq!(lo.drain_voltage(Polarization::Pol1), 0.0);
    }
}
