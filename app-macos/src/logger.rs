// src/logger.rs
//
// Logs go to the unified log (Console.app) and to stderr, so a daemon run by
// launchd and one run from a terminal both show their output.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use oslog::OsLogger;

const SUBSYSTEM: &str = "org.crankd";

struct MirroredLogger {
    oslog: OsLogger,
    stderr: env_logger::Logger,
    level: LevelFilter,
}

impl Log for MirroredLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.oslog.log(record);
            self.stderr.log(record);
        }
    }

    fn flush(&self) {
        self.oslog.flush();
        self.stderr.flush();
    }
}

/// Initializes the logger for the entire application.
/// Called once, first thing in `main()`.
pub fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = MirroredLogger {
        oslog: OsLogger::new(SUBSYSTEM).level_filter(level),
        stderr: env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .build(),
        level,
    };
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}
