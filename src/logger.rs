//! Front-end logging utilities
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use core::{
    fmt::Write,
    sync::atomic::{AtomicUsize, Ordering},
};

use heapless::{mpmc::MpMcQueue, String};

/// The longest log line kept. Longer lines are truncated.
pub const LINE_LENGTH: usize = 128;

const LINES: usize = 16;

/// A logging buffer for storing serialized log lines pending transmission.
///
/// # Notes
/// Log lines are queued by whatever context logs and are intended to be consumed
/// asynchronously by the console of the embedding application. When the queue is full, new
/// lines are dropped and counted.
pub struct BufferedLog {
    lines: MpMcQueue<String<LINE_LENGTH>, LINES>,
    dropped: AtomicUsize,
}

impl Default for BufferedLog {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedLog {
    /// Construct a new buffered log object.
    pub const fn new() -> Self {
        Self {
            lines: MpMcQueue::new(),
            dropped: AtomicUsize::new(0),
        }
    }

    /// The number of lines dropped since the log was created.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Process all of the available log data.
    ///
    /// # Args
    /// * `sink` - The console to write log data into.
    pub fn process(&self, sink: &mut impl Write) -> core::fmt::Result {
        while let Some(line) = self.lines.dequeue() {
            sink.write_str(&line)?;
        }

        Ok(())
    }
}

impl log::Log for BufferedLog {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let source_file = record.file().unwrap_or("Unknown");
        let source_line = record.line().unwrap_or(u32::MAX);

        // A line that does not fit is kept truncated.
        let mut line = Line(String::new());
        write!(
            &mut line,
            "[{}] {}:{} - {}",
            record.level(),
            source_file,
            source_line,
            record.args()
        )
        .ok();
        let Line(mut line) = line;
        line.push('\n').ok();

        if self.lines.enqueue(line).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    // The log is not capable of being flushed as it does not own the data consumer.
    fn flush(&self) {}
}

/// A log line under construction. Leaves room for the line terminator.
struct Line(String<LINE_LENGTH>);

impl Write for Line {
    fn write_str(&mut self, text: &str) -> core::fmt::Result {
        for c in text.chars() {
            if self.0.len() + c.len_utf8() >= LINE_LENGTH {
                return Err(core::fmt::Error);
            }
            self.0.push(c).map_err(|_| core::fmt::Error)?;
        }

        Ok(())
    }
}
