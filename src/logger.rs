//! Process log backend for the `log` facade.
//!
//! Library code only uses `log::{debug, info, warn, error}`; binaries call [`init`]
//! once to route records to stdout/stderr.

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Simple logger for graph-kernel
pub struct Logger {
    level: LevelFilter,
}

impl Logger {
    pub fn new(level: LevelFilter) -> Self {
        Logger { level }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            Level::Error | Level::Warn => {
                eprintln!("[{}] {}: {}", record.level(), record.target(), record.args())
            }
            _ => println!("[{}] {}: {}", record.level(), record.target(), record.args()),
        }
    }

    fn flush(&self) {}
}

/// Parse a level name ("error", "warn", "info", "debug", "trace", "off").
///
/// Unknown names fall back to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}

/// Install the logger as the global `log` backend.
///
/// Calling this more than once keeps the first logger and only adjusts the max level.
pub fn init(level: &str) {
    let level = parse_level(level);
    let _ = log::set_boxed_logger(Box::new(Logger::new(level)));
    log::set_max_level(level);
}
