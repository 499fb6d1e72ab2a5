//! Bounded error history
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use heapless::Deque;

use crate::error::ErrorModule;

/// The number of entries retained before the oldest is overwritten.
pub const ERROR_HISTORY_LENGTH: usize = 255;

/// Reported by [ErrorHistory::next] when no entries are pending.
pub const NO_ERROR_ENTRY: u16 = 0xFFFF;

/// A circular history of `(module, code)` error records.
///
/// # Note
/// Each record is packed as `(module << 8) | code`, which is also the layout reported on the
/// bus by the special error-readout monitor point.
pub struct ErrorHistory {
    entries: Deque<u16, ERROR_HISTORY_LENGTH>,
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHistory {
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
        }
    }

    /// Store an error, discarding the oldest entry if the history is full.
    ///
    /// # Args
    /// * `module` - The module that raised the error.
    /// * `code` - The module-specific error code.
    pub fn store(&mut self, module: ErrorModule, code: u8) {
        if self.entries.is_full() {
            self.entries.pop_front();
        }

        let entry = ((module as u16) << 8) | code as u16;
        self.entries.push_back(entry).ok();
    }

    /// The number of errors pending readout.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pop the oldest pending error.
    ///
    /// # Returns
    /// The packed error entry, or [NO_ERROR_ENTRY] if the history is empty.
    pub fn next(&mut self) -> u16 {
        self.entries.pop_front().unwrap_or(NO_ERROR_ENTRY)
    }
}
