//! Inbound bus messages, outbound replies and top-level RCA routing
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use heapless::Vec;

use crate::{hardware::BANDS, leaf::Payload, Status};

/// The largest bus payload.
pub const MAX_PAYLOAD: usize = 8;

const CLASS_MASK: u32 = 0x30000;
const MODULE_MASK: u32 = 0x0F000;

pub const BASE_MONITOR_RCA: u32 = 0x00001;
pub const LAST_MONITOR_RCA: u32 = BASE_MONITOR_RCA + 0x0FFFF - 1;
pub const BASE_CONTROL_RCA: u32 = 0x10000;
pub const LAST_CONTROL_RCA: u32 = BASE_CONTROL_RCA + 0x0FFFF;
pub const BASE_SPECIAL_MONITOR_RCA: u32 = 0x20000;
pub const LAST_SPECIAL_MONITOR_RCA: u32 = BASE_SPECIAL_MONITOR_RCA + 0x00FFF;
pub const BASE_SPECIAL_CONTROL_RCA: u32 = 0x21000;
pub const LAST_SPECIAL_CONTROL_RCA: u32 = BASE_SPECIAL_CONTROL_RCA + 0x00FFF;

/// Error history sub-codes of the message router.
pub mod erc {
    pub const CLASS_RANGE: u8 = 0x01;
    pub const MODULE_RANGE: u8 = 0x02;
    pub const CONTROL_ON_MONITOR_RCA: u8 = 0x04;
    pub const SPECIAL_MONITOR_RANGE: u8 = 0x05;
    pub const SPECIAL_CONTROL_RANGE: u8 = 0x06;
}

/// The class of an RCA.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Class {
    Monitor = 0,
    Control = 1,
    Special = 2,
}

impl Class {
    pub fn from_rca(rca: u32) -> Option<Self> {
        match (rca & CLASS_MASK) >> 16 {
            0 => Some(Class::Monitor),
            1 => Some(Class::Control),
            2 => Some(Class::Special),
            _ => None,
        }
    }
}

/// The front-end module addressed by a standard RCA.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Target {
    /// A cartridge slot, 0 for band 1.
    Cartridge(usize),
    PowerDistribution,
    IfSwitch,
    Cryostat,
    Lpr,
    Fetim,
}

impl Target {
    pub fn from_rca(rca: u32) -> Option<Self> {
        match ((rca & MODULE_MASK) >> 12) as usize {
            band if band < BANDS => Some(Target::Cartridge(band)),
            0x0A => Some(Target::PowerDistribution),
            0x0B => Some(Target::IfSwitch),
            0x0C => Some(Target::Cryostat),
            0x0D => Some(Target::Lpr),
            0x0E => Some(Target::Fetim),
            _ => None,
        }
    }
}

/// An inbound bus message.
///
/// # Note
/// A message without payload is a monitor request. Any payload makes it a control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub rca: u32,
    pub data: Vec<u8, MAX_PAYLOAD>,
}

impl Message {
    pub fn monitor(rca: u32) -> Self {
        Self {
            rca,
            data: Vec::new(),
        }
    }

    /// Construct a control request. Payload beyond the bus limit is discarded.
    pub fn control(rca: u32, data: &[u8]) -> Self {
        let data = &data[..data.len().min(MAX_PAYLOAD)];
        Self {
            rca,
            data: Vec::from_slice(data).unwrap_or_default(),
        }
    }

    pub fn class(&self) -> Option<Class> {
        Class::from_rca(self.rca)
    }

    pub fn is_control(&self) -> bool {
        !self.data.is_empty()
    }

    /// Check for a monitor request addressed to a control RCA.
    pub fn on_control_rca(&self) -> bool {
        self.class() == Some(Class::Control)
    }

    /// Extract an address field.
    ///
    /// # Args
    /// * `mask` - The contiguous bit mask of the field.
    pub fn slice(&self, mask: u32) -> usize {
        ((self.rca & mask) >> mask.trailing_zeros()) as usize
    }

    /// Decode the payload in bus byte order.
    pub fn decode<T: Payload>(&self) -> Option<T> {
        T::decode(&self.data)
    }
}

/// The reply to a monitor request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub data: Vec<u8, MAX_PAYLOAD>,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the payload with a value in bus byte order.
    pub fn put<T: Payload>(&mut self, value: T) {
        self.data.clear();
        value.encode(&mut self.data);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend(bytes.iter().copied().take(MAX_PAYLOAD));
    }

    /// Serialize the reply for the bus.
    ///
    /// # Note
    /// The status byte is appended if the payload leaves room for it.
    pub fn encode(&self) -> Vec<u8, MAX_PAYLOAD> {
        let mut frame = self.data.clone();
        frame.push(self.status.code() as u8).ok();
        frame
    }
}
