//! Front-end configuration loading
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Note
//! Configuration is read once at startup from INI-style `section`/`key` pairs. Missing keys
//! fall back to defaults; malformed values are reported and ignored.
use core::{fmt::Write, str::FromStr};

use heapless::String;

use crate::{
    cartridge::{bias::default_sense_resistor, TEMPERATURE_SENSORS},
    cryostat::{TVO_COEFFS, TVO_SENSORS},
    error::ErrorModule,
    hardware::BANDS,
    history::ErrorHistory,
    linear_transformation::LinearTransformation,
    pa_limits::PaLimits,
    special::Mode,
};

/// Error code of a malformed configuration value.
pub const ERR_INI_VALUE: u8 = 0x01;

/// A provider of configuration values.
pub trait ConfigSource {
    /// Look up a raw value.
    fn get(&self, section: &str, key: &str) -> Option<&str>;
}

/// Typed access to a [ConfigSource] that records malformed values.
pub struct Reader<'a> {
    source: &'a dyn ConfigSource,
    history: &'a mut ErrorHistory,
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a dyn ConfigSource, history: &'a mut ErrorHistory) -> Self {
        Self { source, history }
    }

    pub fn raw(&self, section: &str, key: &str) -> Option<&'a str> {
        self.source.get(section, key).map(str::trim)
    }

    /// Read a parsed value.
    ///
    /// # Returns
    /// The value, or `None` if it is missing or malformed.
    pub fn value<T: FromStr>(&mut self, section: &str, key: &str) -> Option<T> {
        let raw = self.raw(section, key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.malformed(section, key);
                None
            }
        }
    }

    /// Read a boolean flag given as `0`/`1` or `FALSE`/`TRUE`.
    pub fn flag(&mut self, section: &str, key: &str) -> Option<bool> {
        let raw = self.raw(section, key)?;
        if raw == "1" || raw.eq_ignore_ascii_case("true") {
            Some(true)
        } else if raw == "0" || raw.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            self.malformed(section, key);
            None
        }
    }

    /// Report a malformed value.
    pub fn malformed(&mut self, section: &str, key: &str) {
        warn!("Malformed configuration value [{}] {}", section, key);
        self.history.store(ErrorModule::Ini, ERR_INI_VALUE);
    }
}

/// Parse a string of hexadecimal byte pairs.
pub fn hex_bytes<const N: usize>(value: &str) -> Option<[u8; N]> {
    let value = value.trim();
    if value.len() != 2 * N || !value.is_ascii() {
        return None;
    }

    let mut bytes = [0u8; N];
    for (byte, digits) in bytes.iter_mut().zip(value.as_bytes().chunks(2)) {
        let digits = core::str::from_utf8(digits).ok()?;
        *byte = u8::from_str_radix(digits, 16).ok()?;
    }

    Some(bytes)
}

/// Name the configuration section of a cartridge.
///
/// # Args
/// * `prefix` - The section prefix.
/// * `band` - The cartridge index (0 for band 1).
pub fn band_section(prefix: &str, band: usize) -> String<32> {
    let mut section = String::new();
    write!(section, "{}{}", prefix, band + 1).ok();
    section
}

/// Startup configuration of one cartridge.
#[derive(Debug, Clone)]
pub struct CartridgeConfig {
    pub available: bool,
    /// SIS sense resistors indexed by polarization and sideband.
    pub sense_resistors: [[f32; 2]; 2],
    pub temperature_offsets: [f32; TEMPERATURE_SENSORS],
    /// Default PLL loop bandwidth, if the band defines one.
    pub loop_bandwidth: Option<bool>,
    /// Full-scale value of the LO supply voltage monitors.
    pub supply_voltage_scale: f32,
    pub yig_heater: LinearTransformation,
    pub pa_limits: PaLimits,
}

const LOOP_BANDWIDTH_DEFAULTS: [Option<bool>; BANDS] = [
    None,
    Some(true),
    Some(true),
    Some(false),
    Some(true),
    Some(true),
    Some(true),
    Some(false),
    Some(false),
    Some(true),
];

impl CartridgeConfig {
    /// The configuration of a band without configuration file.
    pub fn new(band: usize) -> Self {
        let resistor = default_sense_resistor(band);
        Self {
            available: false,
            sense_resistors: [[resistor; 2]; 2],
            temperature_offsets: [0.0; TEMPERATURE_SENSORS],
            loop_bandwidth: LOOP_BANDWIDTH_DEFAULTS[band],
            supply_voltage_scale: 20.0,
            yig_heater: LinearTransformation::full_scale(400.0, crate::scaling::ADC_RANGE, 150.0),
            pa_limits: PaLimits::new(),
        }
    }

    /// Load the configuration of a cartridge.
    ///
    /// # Args
    /// * `reader` - The configuration reader.
    /// * `band` - The cartridge index (0 for band 1).
    pub fn load(reader: &mut Reader, band: usize) -> Self {
        let mut config = Self::new(band);
        let section = band_section("CARTRIDGE", band);

        config.available = reader.flag(&section, "AVAILABLE").unwrap_or(false);

        for (polarization, resistors) in config.sense_resistors.iter_mut().enumerate() {
            for (sideband, resistor) in resistors.iter_mut().enumerate() {
                let mut key: String<32> = String::new();
                write!(key, "SIS_RESISTOR_P{}_S{}", polarization, sideband).ok();
                if let Some(value) = reader.value(&section, &key) {
                    *resistor = value;
                }
            }
        }

        for (sensor, offset) in config.temperature_offsets.iter_mut().enumerate() {
            let mut key: String<32> = String::new();
            write!(key, "TEMP{}_OFFSET", sensor).ok();
            if let Some(value) = reader.value(&section, &key) {
                *offset = value;
            }
        }

        if let Some(value) = reader.value::<u8>(&section, "LOOP_BW") {
            config.loop_bandwidth = Some(value != 0);
        }

        if let Some(value) = reader.value(&section, "SUPPLY_V_SCALE") {
            config.supply_voltage_scale = value;
        }

        let scale = reader.value(&section, "YIG_HEATER_SCALE").unwrap_or(400.0);
        let offset: f32 = reader.value(&section, "YIG_HEATER_OFFSET").unwrap_or(150.0);
        config.yig_heater =
            LinearTransformation::full_scale(scale, crate::scaling::ADC_RANGE, offset);

        config.pa_limits = PaLimits::load(reader, band);

        if config.available {
            info!("Band {} configured", band + 1);
        }

        config
    }
}

/// Calibration sections of the TVO sensors, in sensor order.
const TVO_SECTIONS: [&str; TVO_SENSORS] = [
    "CRYOCOOLER_4K",
    "PLATE_4K_LINK_1",
    "PLATE_4K_LINK_2",
    "PLATE_4K_FAR_1",
    "PLATE_4K_FAR_2",
    "CRYOCOOLER_12K",
    "PLATE_12K_LINK",
    "PLATE_12K_FAR",
    "PLATE_12K_SHIELD",
];

/// Startup configuration of the cryostat.
#[derive(Debug, Clone, Default)]
pub struct CryostatConfig {
    pub available: bool,
    /// TVO calibration polynomials, lowest order first.
    pub tvo_coefficients: [[f32; TVO_COEFFS]; TVO_SENSORS],
    /// The cold head hours saved by the previous run, if any.
    pub cold_head_hours: Option<u32>,
}

impl CryostatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(reader: &mut Reader) -> Self {
        let mut config = Self::new();
        config.available = reader.flag("FRONTEND", "CRYO_AVAILABLE").unwrap_or(false);

        for (section, coefficients) in TVO_SECTIONS.iter().zip(config.tvo_coefficients.iter_mut()) {
            let Some(raw) = reader.raw(section, "TVO_COEFFS") else {
                continue;
            };

            match parse_floats::<TVO_COEFFS>(raw) {
                Some(values) => *coefficients = values,
                None => reader.malformed(section, "TVO_COEFFS"),
            }
        }

        config.cold_head_hours = reader.value("CRYO_HOURS", "HOURS");

        if config.available {
            info!("Cryostat configured");
        }

        config
    }
}

/// Parse exactly `N` numbers separated by commas or whitespace.
fn parse_floats<const N: usize>(raw: &str) -> Option<[f32; N]> {
    let mut fields = raw
        .split(|c: char| c == ',' || c.is_ascii_whitespace())
        .filter(|field| !field.is_empty());

    let mut values = [0.0; N];
    for value in values.iter_mut() {
        *value = fields.next()?.parse().ok()?;
    }

    fields.next().is_none().then_some(values)
}

/// Startup configuration of the front end.
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    pub mode: Mode,
    pub power_distribution: bool,
    pub if_switch: bool,
    /// The IF switch uses the single-reading temperature sensor hardware.
    pub if_switch_new_hardware: bool,
    pub lpr: bool,
    pub fetim: bool,
    pub cryostat: CryostatConfig,
    pub cartridges: [CartridgeConfig; BANDS],
}

impl FrontendConfig {
    pub fn load(source: &dyn ConfigSource, history: &mut ErrorHistory) -> Self {
        let mut reader = Reader::new(source, history);

        let mode = reader
            .value::<u8>("FRONTEND", "MODE")
            .and_then(|mode| Mode::try_from(mode).ok())
            .unwrap_or(Mode::Operational);

        Self {
            mode,
            power_distribution: reader.flag("FRONTEND", "PD_AVAILABLE").unwrap_or(true),
            if_switch: reader.flag("FRONTEND", "IF_AVAILABLE").unwrap_or(true),
            if_switch_new_hardware: reader.flag("IF_SWITCH", "NEW_HARDWARE").unwrap_or(false),
            lpr: reader.flag("FRONTEND", "LPR_AVAILABLE").unwrap_or(true),
            fetim: reader.flag("FRONTEND", "FETIM_AVAILABLE").unwrap_or(false),
            cryostat: CryostatConfig::load(&mut reader),
            cartridges: core::array::from_fn(|band| CartridgeConfig::load(&mut reader, band)),
        }
    }
}
