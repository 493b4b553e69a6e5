//! Command line helpers shared by the binaries.

use clap::ArgEnum;
use env_logger;
use log;

/// Logging level argument.
#[derive(Copy, Clone, clap::ArgEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }

    /// Returns the `-l/--loglevel` argument definition.
    pub fn arg() -> clap::Arg<'static> {
        clap::Arg::new("log_level")
            .short('l')
            .long("loglevel")
            .help("logging level")
            .takes_value(true)
            .default_value("info")
            .possible_values(LogLevel::possible_values())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

pub fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(log_level.into())
        .format_timestamp_millis()
        .init();
}
