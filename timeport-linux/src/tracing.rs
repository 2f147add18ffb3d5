//! Sets up the logging infrastructure: a `tracing` subscriber with a
//! bridge so `log` records from the protocol library end up in it too.

use serde::Deserialize;
use tracing::metadata::LevelFilter;

/// The log level of the daemon, from configuration
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show everything, including very noisy per-packet messages
    Trace,
    /// Protocol progress messages
    Debug,
    /// State transitions and measurements
    #[default]
    Info,
    /// Only protocol anomalies
    Warn,
    /// Only failures
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// Install the subscriber. Returns an error when a subscriber was already
/// installed.
pub fn tracing_init(level: LogLevel) -> Result<(), Box<dyn std::error::Error>> {
    tracing_log::LogTracer::builder()
        .with_max_level(level.into())
        .init()?;

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(level))
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
