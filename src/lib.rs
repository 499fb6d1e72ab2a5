//! Front-end monitor and control core
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Note
//! The crate is driven by two entry points of [Frontend]: [Frontend::handle] services one
//! inbound bus message to completion, and [Frontend::tick] advances the cooperative
//! background sequences by at most one unit of work. Both run on the same thread of control.
#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate log;

pub mod can;
pub mod cartridge;
pub mod config;
pub mod cryostat;
pub mod error;
pub mod fetim;
pub mod frontend;
pub mod hardware;
pub mod history;
pub mod if_switch;
pub mod leaf;
pub mod linear_transformation;
pub mod logger;
pub mod lpr;
pub mod monitor;
pub mod pa_limits;
pub mod power_distribution;
pub mod register;
pub mod scaling;
pub mod scheduler;
pub mod serial;
pub mod special;
pub mod timer;

#[cfg(test)]
mod mock;

pub use error::{Error, Status};
pub use frontend::Frontend;
