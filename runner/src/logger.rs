// SPDX-License-Identifier: MPL-2.0

//! Logging support.
//!
//! The logger prints the logs to the standard error, prefixed by the time
//! elapsed since it was installed.
//!
//! Messages are always printed in their entirety without being mixed with
//! messages generated concurrently on other simulated CPUs.

use std::{sync::OnceLock, time::Instant};

use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

use crate::kcmdline::KCmdlineArg;

static LOGGER: Logger = Logger {
    start: OnceLock::new(),
};

struct Logger {
    start: OnceLock<Instant>,
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.start.get_or_init(Instant::now).elapsed();
        let timestamp = format!("[{:>10.3}]", elapsed.as_secs_f64());
        let level = format!("{:<5}", record.level());
        let record_str = format!("{}", record.args());

        #[cfg(feature = "log_color")]
        let (timestamp, level, record_str) = {
            use owo_colors::OwoColorize;

            let timestamp = timestamp.green();
            let level = match record.level() {
                log::Level::Error => level.red().to_string(),
                log::Level::Warn => level.bright_yellow().to_string(),
                log::Level::Info => level.blue().to_string(),
                log::Level::Debug => level.bright_green().to_string(),
                log::Level::Trace => level.bright_black().to_string(),
            };
            let record_str = record_str.default_color();
            (timestamp, level, record_str)
        };

        // Use a global lock to prevent interleaving of log messages.
        static RECORD_LOCK: Mutex<()> = Mutex::new(());
        let _lock = RECORD_LOCK.lock();

        eprintln!("{} {}: {}", timestamp, level, record_str);
    }

    fn flush(&self) {}
}

/// Initialize the logger. Users should avoid using the log macros before this function is called.
///
/// The level comes from `asid.log_level` and defaults to `warn`.
pub fn init(cmdline: &KCmdlineArg) -> anyhow::Result<()> {
    let level = get_log_level(cmdline).unwrap_or(LevelFilter::Warn);

    LOGGER.start.get_or_init(Instant::now);
    log::set_logger(&LOGGER).map_err(|err| anyhow::anyhow!("cannot install the logger: {}", err))?;
    log::set_max_level(level);
    Ok(())
}

fn get_log_level(cmdline: &KCmdlineArg) -> Option<LevelFilter> {
    let value = cmdline.get_module_value("asid", "log_level")?;
    Some(match value {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        // Otherwise, OFF
        _ => LevelFilter::Off,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn log_levels() {
        let level = |cmdline: &str| get_log_level(&KCmdlineArg::from(cmdline));

        assert_eq!(level(""), None);
        assert_eq!(level("asid.log_level=debug"), Some(LevelFilter::Debug));
        assert_eq!(level("asid.log_level=trace"), Some(LevelFilter::Trace));
        assert_eq!(level("asid.log_level=loud"), Some(LevelFilter::Off));
        assert_eq!(level("ostd.log_level=info"), None);
    }
}
