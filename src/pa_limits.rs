//! Maximum safe LO power amplifier drain voltage table
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Note
//! The table bounds the PA drain voltage of both polarizations as a function of the YTO
//! coarse tuning word. Entries are sorted by non-decreasing tuning; lookups clamp outside
//! the table and interpolate linearly between entries.
use core::fmt::Write;

use heapless::{String, Vec};

use crate::{
    config::{band_section, hex_bytes, Reader},
    error::{erc, ErrorModule},
    hardware::Polarization,
    history::ErrorHistory,
    Error,
};

/// The largest number of entries a table can hold.
pub const MAX_PA_LIMITS_ENTRIES: usize = 256;

/// Length of the serial number identifying the table.
pub const ESN_SIZE: usize = 8;

/// One row of the table.
#[derive(Debug, Copy, Clone, PartialEq, serde::Serialize)]
pub struct PaLimitsEntry {
    /// The YTO coarse tuning word of the row.
    pub yto: u16,
    /// The maximum drain voltage of each polarization.
    pub max_drain_voltage: [f32; 2],
}

impl PaLimitsEntry {
    pub fn limit(&self, polarization: Polarization) -> f32 {
        self.max_drain_voltage[polarization as usize]
    }
}

/// The polarizations addressed by a table update.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PolarizationSelect {
    Single(Polarization),
    Both,
}

impl TryFrom<u8> for PolarizationSelect {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::Single(Polarization::Pol0)),
            1 => Ok(Self::Single(Polarization::Pol1)),
            2 => Ok(Self::Both),
            _ => Err(Error::Bounds),
        }
    }
}

/// The maximum safe LO PA table of one cartridge.
#[derive(Debug, Clone)]
pub struct PaLimits {
    present: bool,
    esn: Option<[u8; ESN_SIZE]>,
    entries: Vec<PaLimitsEntry, MAX_PA_LIMITS_ENTRIES>,
}

impl Default for PaLimits {
    fn default() -> Self {
        Self::new()
    }
}

impl PaLimits {
    /// Construct an empty table.
    pub const fn new() -> Self {
        Self {
            present: false,
            esn: None,
            entries: Vec::new(),
        }
    }

    /// Load the table of a cartridge from configuration.
    ///
    /// # Note
    /// Entries are read from the `LO_PA_LIMITS<band>` section as `ENTRY_<n> = yto, vd0, vd1`.
    /// Malformed or out-of-order entries are skipped.
    ///
    /// # Args
    /// * `reader` - The configuration reader.
    /// * `band` - The cartridge index (0 for band 1).
    pub fn load(reader: &mut Reader, band: usize) -> Self {
        let mut table = Self::new();
        let section = band_section("LO_PA_LIMITS", band);

        let Some(count) = reader.value::<usize>(&section, "ENTRIES") else {
            return table;
        };
        table.present = true;

        for index in 1..=count.min(MAX_PA_LIMITS_ENTRIES) {
            let mut key: String<16> = String::new();
            write!(key, "ENTRY_{}", index).ok();

            let Some(raw) = reader.raw(&section, &key) else {
                reader.malformed(&section, &key);
                continue;
            };

            match parse_entry(raw) {
                Some(entry) if table.push(entry).is_ok() => {}
                _ => reader.malformed(&section, &key),
            }
        }

        table.esn = reader.raw(&section, "ESN").and_then(hex_bytes::<ESN_SIZE>);

        info!(
            "Band {} PA limits: {} entries, ESN {:?}",
            band + 1,
            table.entries.len(),
            table.esn
        );

        table
    }

    fn push(&mut self, entry: PaLimitsEntry) -> Result<(), Error> {
        if matches!(self.entries.last(), Some(last) if entry.yto <= last.yto) {
            return Err(Error::Bounds);
        }

        self.entries.push(entry).map_err(|_| Error::Bounds)
    }

    /// The entries of the table.
    pub fn entries(&self) -> &[PaLimitsEntry] {
        &self.entries
    }

    /// The serial number reported for the table.
    ///
    /// # Returns
    /// The configured ESN, all `0x00` if no table was loaded, or all `0xFF` if the table
    /// carries no ESN.
    pub fn esn(&self) -> [u8; ESN_SIZE] {
        match (self.present, self.esn) {
            (false, _) => [0x00; ESN_SIZE],
            (true, None) => [0xFF; ESN_SIZE],
            (true, Some(esn)) => esn,
        }
    }

    /// Remove all entries. No limiting is applied to an empty table.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Add or update an entry.
    ///
    /// # Note
    /// Entries must be added in non-decreasing tuning order. An entry with the same tuning
    /// as the last one updates it.
    ///
    /// # Args
    /// * `history` - The error history.
    /// * `select` - The polarizations to update.
    /// * `yto` - The YTO coarse tuning word of the entry.
    /// * `max_drain_voltage` - The maximum drain voltage at this tuning.
    pub fn add_entry(
        &mut self,
        history: &mut ErrorHistory,
        select: PolarizationSelect,
        yto: u16,
        max_drain_voltage: f32,
    ) -> Result<(), Error> {
        let assign = |entry: &mut PaLimitsEntry| match select {
            PolarizationSelect::Single(polarization) => {
                entry.max_drain_voltage[polarization as usize] = max_drain_voltage
            }
            PolarizationSelect::Both => entry.max_drain_voltage = [max_drain_voltage; 2],
        };

        match self.entries.last_mut() {
            Some(last) if yto < last.yto => {
                history.store(ErrorModule::Lo, erc::COMMAND_VAL);
                return Err(Error::Bounds);
            }
            Some(last) if yto == last.yto => assign(last),
            _ => {
                let mut entry = PaLimitsEntry {
                    yto,
                    max_drain_voltage: [0.0; 2],
                };
                assign(&mut entry);
                self.entries.push(entry).map_err(|_| {
                    history.store(ErrorModule::Lo, erc::NO_MEMORY);
                    Error::Bounds
                })?;
            }
        }

        self.present = true;
        Ok(())
    }

    /// Find the limits at a YTO tuning.
    ///
    /// # Args
    /// * `yto` - The YTO coarse tuning word.
    ///
    /// # Returns
    /// The matching or interpolated limits, or `None` if the table is empty.
    pub fn find(&self, yto: u16) -> Option<PaLimitsEntry> {
        let first = self.entries.first()?;
        let last = self.entries.last()?;

        if self.entries.len() == 1 || yto <= first.yto {
            return Some(*first);
        }

        if yto >= last.yto {
            return Some(*last);
        }

        let index = self.entries.partition_point(|entry| entry.yto < yto);
        let upper = self.entries[index];
        if upper.yto == yto {
            return Some(upper);
        }

        let lower = self.entries[index - 1];
        let factor = (yto - lower.yto) as f32 / (upper.yto - lower.yto) as f32;
        let interpolate =
            |pol: usize| lower.max_drain_voltage[pol] + factor * (upper.max_drain_voltage[pol] - lower.max_drain_voltage[pol]);

        Some(PaLimitsEntry {
            yto,
            max_drain_voltage: [interpolate(0), interpolate(1)],
        })
    }

    /// Clamp a drain voltage to the limit at the given tuning.
    ///
    /// # Returns
    /// The permitted voltage and whether it was reduced.
    pub fn limit(&self, yto: u16, polarization: Polarization, voltage: f32) -> (f32, bool) {
        match self.find(yto) {
            Some(entry) if voltage > entry.limit(polarization) => (entry.limit(polarization), true),
            _ => (voltage, false),
        }
    }
}

/// Parse a `yto, vd0, vd1` table row.
fn parse_entry(raw: &str) -> Option<PaLimitsEntry> {
    let mut fields = raw
        .split(|c: char| c == ' ' || c == ',' || c == '\t')
        .filter(|field| !field.is_empty());

    let yto = fields.next()?.parse().ok()?;
    let vd0 = fields.next()?.parse().ok()?;
    let vd1 = fields.next()?.parse().ok()?;

    Some(PaLimitsEntry {
        yto,
        max_drain_voltage: [vd0, vd1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryConfig;
    use approx::assert_abs_diff_eq;

    fn table(rows: &[(u16, f32, f32)]) -> PaLimits {
        let mut table = PaLimits::new();
        let mut history = ErrorHistory::new();
        for &(yto, vd0, vd1) in rows {
            table
                .add_entry(&mut history, PolarizationSelect::Single(Polarization::Pol0), yto, vd0)
                .unwrap();
            table
                .add_entry(&mut history, PolarizationSelect::Single(Polarization::Pol1), yto, vd1)
                .unwrap();
        }
        table
    }

    #[test]
    fn empty_table_has_no_entry() {
        let table = PaLimits::new();
        assert_eq!(table.find(0), None);
        assert_eq!(table.find(4095), None);
        assert_eq!(table.limit(100, Polarization::Pol0, 2.5), (2.5, false));
    }

    #[test]
    fn single_entry_always_matches() {
        let table = table(&[(1000, 1.0, 1.5)]);
        for yto in [0, 1000, 4095] {
            assert_eq!(table.find(yto).unwrap().max_drain_voltage, [1.0, 1.5]);
        }
    }

    #[test]
    fn endpoints_are_exact() {
        let table = table(&[(100, 1.0, 2.0), (200, 1.2, 2.2), (300, 0.8, 1.8)]);
        assert_eq!(table.find(50).unwrap().max_drain_voltage, [1.0, 2.0]);
        assert_eq!(table.find(200).unwrap().max_drain_voltage, [1.2, 2.2]);
        assert_eq!(table.find(4000).unwrap().max_drain_voltage, [0.8, 1.8]);
    }

    #[test]
    fn interior_is_interpolated() {
        let table = table(&[(100, 1.0, 2.0), (200, 1.2, 2.4)]);
        let midpoint = table.find(150).unwrap();
        assert_abs_diff_eq!(midpoint.max_drain_voltage[0], 1.1, epsilon = 1e-6);
        assert_abs_diff_eq!(midpoint.max_drain_voltage[1], 2.2, epsilon = 1e-6);

        let quarter = table.find(125).unwrap();
        assert_abs_diff_eq!(quarter.max_drain_voltage[0], 1.05, epsilon = 1e-6);
    }

    #[test]
    fn clamped_voltage_is_reported() {
        let table = table(&[(100, 1.0, 2.0)]);
        assert_eq!(table.limit(100, Polarization::Pol1, 2.5), (2.0, true));
        assert_eq!(table.limit(100, Polarization::Pol1, 1.5), (1.5, false));
    }

    #[test]
    fn decreasing_entry_is_rejected() {
        let mut table = table(&[(200, 1.0, 1.0)]);
        let mut history = ErrorHistory::new();
        assert_eq!(
            table.add_entry(&mut history, PolarizationSelect::Both, 100, 1.0),
            Err(Error::Bounds)
        );
        assert_eq!(history.next(), 0x06F3);

        table.add_entry(&mut history, PolarizationSelect::Both, 200, 0.5).unwrap();
        assert_eq!(table.entries().len(), 1);
        assert_eq!(table.entries()[0].max_drain_voltage, [0.5, 0.5]);
    }

    #[test]
    fn load_from_config() {
        let mut source = MemoryConfig::new();
        source.set("LO_PA_LIMITS3", "ENTRIES", "3");
        source.set("LO_PA_LIMITS3", "ENTRY_1", "100, 1.0, 1.1");
        source.set("LO_PA_LIMITS3", "ENTRY_2", "broken");
        source.set("LO_PA_LIMITS3", "ENTRY_3", "300,\t0.9 ,1.2");

        let mut history = ErrorHistory::new();
        let mut reader = Reader::new(&source, &mut history);
        let table = PaLimits::load(&mut reader, 2);

        assert_eq!(table.entries().len(), 2);
        assert_eq!(table.entries()[1].yto, 300);
        assert_eq!(table.esn(), [0xFF; ESN_SIZE]);
        assert_eq!(history.len(), 1);

        let missing = PaLimits::load(&mut Reader::new(&source, &mut history), 3);
        assert_eq!(missing.esn(), [0x00; ESN_SIZE]);
    }
}
