//! Cooperative round-robin scheduler for the background sequences
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Note
//! Every tick gives at most one unit of work to the current subsystem and returns. A subsystem
//! keeps the scheduler while it reports pending work and hands over once it is done or fails.
//! The cartridges are served one slot at a time in the same way, and the cartridge subsystem is
//! only done once every slot was visited.
use serde::Serialize;

use crate::{hardware::BANDS, Error};

/// The outcome of one unit of background work.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum AsyncStatus {
    /// The subsystem has more work for this cycle.
    Pending,
    /// The subsystem finished its cycle.
    Done,
}

/// The subsystem currently served by the scheduler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Stage {
    /// Background work is suspended.
    Off,
    /// Background work resumes with the next tick.
    On,
    Cryostat,
    Cartridge,
    Fetim,
}

/// The background work of the front end, one entry point per subsystem.
pub trait Background {
    fn cryostat(&mut self) -> Result<AsyncStatus, Error>;

    /// Perform one unit of work on a cartridge slot.
    ///
    /// # Args
    /// * `band` - The cartridge index (0 for band 1).
    fn cartridge(&mut self, band: usize) -> Result<AsyncStatus, Error>;

    fn fetim(&mut self) -> Result<AsyncStatus, Error>;
}

/// The round-robin state.
#[derive(Debug, Clone, Serialize)]
pub struct Scheduler {
    stage: Stage,
    cartridge: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Construct a suspended scheduler.
    pub const fn new() -> Self {
        Self {
            stage: Stage::Off,
            cartridge: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The cartridge slot served next.
    pub fn cartridge(&self) -> usize {
        self.cartridge
    }

    /// Resume or suspend background work.
    pub fn enable(&mut self, enable: bool) {
        match (self.stage, enable) {
            (Stage::Off, true) => self.stage = Stage::On,
            (_, false) => self.stage = Stage::Off,
            _ => {}
        }
    }

    /// Perform at most one unit of background work.
    ///
    /// # Args
    /// * `work` - The subsystems to serve.
    pub fn tick(&mut self, work: &mut dyn Background) {
        self.stage = match self.stage {
            Stage::Off => Stage::Off,
            Stage::On => Stage::Cryostat,
            Stage::Cryostat => match Self::outcome("Cryostat", work.cryostat()) {
                AsyncStatus::Pending => Stage::Cryostat,
                AsyncStatus::Done => Stage::Cartridge,
            },
            Stage::Cartridge => {
                let band = self.cartridge;
                match Self::outcome("Cartridge", work.cartridge(band)) {
                    AsyncStatus::Pending => Stage::Cartridge,
                    AsyncStatus::Done => {
                        self.cartridge = (band + 1) % BANDS;
                        if self.cartridge == 0 {
                            Stage::Fetim
                        } else {
                            Stage::Cartridge
                        }
                    }
                }
            }
            Stage::Fetim => match Self::outcome("FETIM", work.fetim()) {
                AsyncStatus::Pending => Stage::Fetim,
                AsyncStatus::Done => Stage::Cryostat,
            },
        };
    }

    /// A failed unit of work ends the cycle of its subsystem.
    fn outcome(subsystem: &str, result: Result<AsyncStatus, Error>) -> AsyncStatus {
        result.unwrap_or_else(|error| {
            warn!("{} background work failed: {:?}", subsystem, error);
            AsyncStatus::Done
        })
    }
}
