//! Front-end hardware family definitions
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use enum_iterator::Sequence;
use serde::{Deserialize, Serialize};

pub mod bias;
pub mod cryo;
pub mod fetim;
pub mod if_switch;
pub mod lo;
pub mod lpr;
pub mod pd;

/// The number of cartridge slots (bands 1 to 10).
pub const BANDS: usize = 10;

/// A receiver polarization channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Sequence, Serialize, Deserialize)]
pub enum Polarization {
    Pol0 = 0,
    Pol1 = 1,
}

impl Polarization {
    pub fn from_index(index: usize) -> Option<Self> {
        enum_iterator::all::<Self>().nth(index)
    }
}

/// A mixer sideband.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Sequence, Serialize, Deserialize)]
pub enum Sideband {
    Sb1 = 0,
    Sb2 = 1,
}

impl Sideband {
    pub fn from_index(index: usize) -> Option<Self> {
        enum_iterator::all::<Self>().nth(index)
    }
}

/// A power amplifier channel on the LO PA board.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Sequence, Serialize, Deserialize)]
pub enum PaChannel {
    A = 0,
    B = 1,
}
