//! Test doubles for the serial bus, clock and configuration source
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use std::{collections::BTreeMap, string::String, vec::Vec};

use crate::{
    config::ConfigSource,
    history::ErrorHistory,
    serial::{Bus, SerialAccess, Shift},
    timer::{Clock, Instant},
    Error,
};

/// A scripted serial bus that records every transaction.
///
/// # Note
/// Reads of registers without a scripted response return all ones, so every status poll
/// reports ready.
#[derive(Default)]
pub struct MockBus {
    /// Completed writes as `(port, command, data, bits)`.
    pub writes: Vec<(u8, u8, u64, u8)>,
    /// Completed reads as `(port, command)`.
    pub reads: Vec<(u8, u8)>,
    pub fail_writes: bool,
    pub fail_reads: bool,
    /// Fail every transaction addressing this `(port, command)`.
    pub fail_command: Option<(u8, u8)>,
    responses: BTreeMap<(u8, u8), u64>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the value returned by reads of a register.
    pub fn respond(&mut self, port: u8, command: u8, value: u64) {
        self.responses.insert((port, command), value);
    }

    /// Writes addressed to a port.
    pub fn writes_to(&self, port: u8) -> Vec<(u8, u64)> {
        self.writes
            .iter()
            .filter(|write| write.0 == port)
            .map(|write| (write.1, write.2))
            .collect()
    }

    /// The last value written to a register.
    pub fn last_write(&self, port: u8, command: u8) -> Option<u64> {
        self.writes
            .iter()
            .rev()
            .find(|write| write.0 == port && write.1 == command)
            .map(|write| write.2)
    }

    fn fails(&self, port: u8, command: u8) -> bool {
        self.fail_command == Some((port, command))
    }
}

impl SerialAccess for MockBus {
    fn write(
        &mut self,
        port: u8,
        command: u8,
        data: u64,
        bits: u8,
        _shift: Shift,
    ) -> Result<(), Error> {
        if self.fail_writes || self.fails(port, command) {
            return Err(Error::Interface);
        }

        self.writes.push((port, command, data, bits));
        Ok(())
    }

    fn read(&mut self, port: u8, command: u8, _bits: u8, _shift: Shift) -> Result<u64, Error> {
        if self.fail_reads || self.fails(port, command) {
            return Err(Error::Interface);
        }

        self.reads.push((port, command));
        Ok(self
            .responses
            .get(&(port, command))
            .copied()
            .unwrap_or(u64::MAX))
    }
}

/// A clock that advances by a fixed step every time it is read.
pub struct MockClock {
    now: u64,
    step: u64,
}

impl MockClock {
    pub fn new(step: u64) -> Self {
        Self { now: 0, step }
    }

    /// Advance the clock without reading it.
    pub fn advance(&mut self, millis: u64) {
        self.now += millis;
    }
}

impl Clock for MockClock {
    fn now(&mut self) -> Instant {
        let now = Instant::from_ticks(self.now);
        self.now += self.step;
        now
    }
}

/// An in-memory configuration file.
#[derive(Default)]
pub struct MemoryConfig {
    values: BTreeMap<(String, String), String>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.values
            .insert((section.into(), key.into()), value.into());
    }
}

impl ConfigSource for MemoryConfig {
    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.values
            .get(&(String::from(section), String::from(key)))
            .map(String::as_str)
    }
}

/// The collaborators of a [Bus], owned by a test.
pub struct Bench {
    pub serial: MockBus,
    pub clock: MockClock,
    pub history: ErrorHistory,
}

impl Bench {
    pub fn new() -> Self {
        Self {
            serial: MockBus::new(),
            clock: MockClock::new(1),
            history: ErrorHistory::new(),
        }
    }

    pub fn bus(&mut self) -> Bus<'_> {
        Bus::new(&mut self.serial, &mut self.clock, &mut self.history)
    }
}
