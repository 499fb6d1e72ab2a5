//! Special RCAs: firmware information, error history, operating mode and PA limits upload
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use serde::Serialize;

use crate::{
    can::{self, Message, Reply},
    error::{erc, ErrorModule},
    hardware::BANDS,
    pa_limits::{PaLimits, PolarizationSelect},
    serial::Bus,
    Error, Status,
};

mod build_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub mod rca {
    pub const GET_ARCOM_VERSION_INFO: u32 = 0x20002;
    pub const GET_SPECIAL_MONITOR_RCAS: u32 = 0x20003;
    pub const GET_SPECIAL_CONTROL_RCAS: u32 = 0x20004;
    pub const GET_MONITOR_RCAS: u32 = 0x20005;
    pub const GET_CONTROL_RCAS: u32 = 0x20006;
    pub const GET_PPCOMM_TIME: u32 = 0x20007;
    pub const GET_ERRORS_NUMBER: u32 = 0x2000C;
    pub const GET_NEXT_ERROR: u32 = 0x2000D;
    pub const GET_FE_MODE: u32 = 0x2000E;
    /// Through `0x20019`, one per band.
    pub const GET_LO_PA_LIMITS_TABLE_ESN: u32 = 0x20010;

    pub const SET_EXIT_PROGRAM: u32 = 0x21000;
    pub const SET_FE_MODE: u32 = 0x2100E;
    /// Through `0x21029`, one per band.
    pub const SET_LO_CLEAR_PA_LIMITS: u32 = 0x21020;
    /// Through `0x21039`, one per band.
    pub const SET_LO_SET_PA_LIMITS_ENTRY: u32 = 0x21030;
}

/// The operating mode of the front end.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Mode {
    Operational = 0,
    Troubleshooting = 1,
    Maintenance = 2,
    /// Recorded only. Hardware access is unaffected.
    Simulation = 3,
}

impl TryFrom<u8> for Mode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Mode::Operational),
            1 => Ok(Mode::Troubleshooting),
            2 => Ok(Mode::Maintenance),
            3 => Ok(Mode::Simulation),
            _ => Err(Error::Bounds),
        }
    }
}

/// Information about the running firmware.
#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub rust_version: &'static str,
    pub profile: &'static str,
    pub features: &'static str,
}

impl BuildInfo {
    pub fn new() -> Self {
        Self {
            version: build_info::PKG_VERSION,
            rust_version: build_info::RUSTC_VERSION,
            profile: build_info::PROFILE,
            features: build_info::FEATURES_STR,
        }
    }

    /// The version as reported on the bus: major, minor, patch.
    pub fn version_bytes(&self) -> [u8; 3] {
        [
            build_info::PKG_VERSION_MAJOR.parse().unwrap_or(0),
            build_info::PKG_VERSION_MINOR.parse().unwrap_or(0),
            build_info::PKG_VERSION_PATCH.parse().unwrap_or(0),
        ]
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Access to the LO PA limits table of every band.
pub trait PaLimitsStore {
    /// Get the table of a band.
    ///
    /// # Args
    /// * `band` - The cartridge index (0 for band 1).
    fn pa_limits(&mut self, band: usize) -> &mut PaLimits;
}

impl PaLimitsStore for [PaLimits; BANDS] {
    fn pa_limits(&mut self, band: usize) -> &mut PaLimits {
        &mut self[band]
    }
}

/// The state addressed by special RCAs.
#[derive(Debug)]
pub struct Special {
    mode: Mode,
    exit: bool,
    info: BuildInfo,
}

impl Special {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            exit: false,
            info: BuildInfo::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn info(&self) -> &BuildInfo {
        &self.info
    }

    /// Check if the embedding application was asked to shut down.
    pub fn exit_requested(&self) -> bool {
        self.exit
    }

    pub fn request_exit(&mut self) {
        self.exit = true;
    }

    /// Answer a special monitor request.
    pub fn monitor(&mut self, bus: &mut Bus, address: u32, tables: &mut dyn PaLimitsStore) -> Reply {
        let mut reply = Reply::new();

        match address {
            rca::GET_ARCOM_VERSION_INFO => reply.put_bytes(&self.info.version_bytes()),
            rca::GET_SPECIAL_MONITOR_RCAS => {
                put_range(&mut reply, rca::GET_ARCOM_VERSION_INFO, can::LAST_SPECIAL_MONITOR_RCA)
            }
            rca::GET_SPECIAL_CONTROL_RCAS => put_range(
                &mut reply,
                can::BASE_SPECIAL_CONTROL_RCA,
                can::LAST_SPECIAL_CONTROL_RCA,
            ),
            rca::GET_MONITOR_RCAS => {
                put_range(&mut reply, can::BASE_MONITOR_RCA, can::LAST_MONITOR_RCA)
            }
            rca::GET_CONTROL_RCAS => {
                put_range(&mut reply, can::BASE_CONTROL_RCA, can::LAST_CONTROL_RCA)
            }
            rca::GET_PPCOMM_TIME => reply.put_bytes(&[0; can::MAX_PAYLOAD]),
            rca::GET_ERRORS_NUMBER => {
                let count = bus.history().len().min(u8::MAX as usize);
                reply.put(count as u8);
            }
            rca::GET_NEXT_ERROR => reply.put(bus.history().next()),
            rca::GET_FE_MODE => reply.put(self.mode as u8),
            address if band_offset(address, rca::GET_LO_PA_LIMITS_TABLE_ESN).is_some() => {
                let band = (address - rca::GET_LO_PA_LIMITS_TABLE_ESN) as usize;
                reply.put_bytes(&tables.pa_limits(band).esn());
            }
            _ => {
                bus.store_error(ErrorModule::Can, can::erc::SPECIAL_MONITOR_RANGE);
                reply.status = Status::MonitorCanRange;
            }
        }

        reply
    }

    /// Apply a special control request.
    pub fn control(&mut self, bus: &mut Bus, message: &Message, tables: &mut dyn PaLimitsStore) {
        match message.rca {
            rca::SET_EXIT_PROGRAM => {
                info!("Exit requested");
                self.exit = true;
            }
            rca::SET_FE_MODE => match message.decode::<u8>().map(Mode::try_from) {
                Some(Ok(mode)) => {
                    info!("Operating mode {:?}", mode);
                    self.mode = mode;
                }
                _ => bus.store_error(ErrorModule::Can, erc::COMMAND_VAL),
            },
            address if band_offset(address, rca::SET_LO_CLEAR_PA_LIMITS).is_some() => {
                let band = (address - rca::SET_LO_CLEAR_PA_LIMITS) as usize;
                info!("Band {} PA limits cleared", band + 1);
                tables.pa_limits(band).clear();
            }
            address if band_offset(address, rca::SET_LO_SET_PA_LIMITS_ENTRY).is_some() => {
                let band = (address - rca::SET_LO_SET_PA_LIMITS_ENTRY) as usize;
                let Some((select, yto, voltage)) = decode_entry(message) else {
                    bus.store_error(ErrorModule::Lo, erc::COMMAND_VAL);
                    return;
                };

                tables
                    .pa_limits(band)
                    .add_entry(bus.history(), select, yto, voltage)
                    .ok();
            }
            _ => bus.store_error(ErrorModule::Can, can::erc::SPECIAL_CONTROL_RANGE),
        }
    }
}

/// Get the band addressed by a per-band special RCA.
fn band_offset(rca: u32, base: u32) -> Option<usize> {
    let offset = rca.checked_sub(base)? as usize;
    (offset < BANDS).then_some(offset)
}

/// Report an RCA range, least significant byte first.
fn put_range(reply: &mut Reply, base: u32, last: u32) {
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&base.to_le_bytes());
    bytes[4..].copy_from_slice(&last.to_le_bytes());
    reply.put_bytes(&bytes);
}

/// Decode a PA limits entry: polarization selector, YTO tuning word and drain voltage limit.
fn decode_entry(message: &Message) -> Option<(PolarizationSelect, u16, f32)> {
    let data = &message.data;
    let select = PolarizationSelect::try_from(*data.first()?).ok()?;
    let yto = u16::from_be_bytes(data.get(1..3)?.try_into().ok()?);
    let voltage = f32::from_be_bytes(data.get(3..7)?.try_into().ok()?);
    Some((select, yto, voltage))
}
