//! Logging bootstrap for binaries and the simulation harness.
//!
//! Console output follows the chosen level (or `RUST_LOG`); a second layer
//! records everything at trace level to `logs/reelplay-last-run.log`.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name of the per-run trace log inside the logs directory.
pub const RUN_LOG_FILE: &str = "reelplay-last-run.log";

/// Creates the logs directory and truncates this run's log file.
///
/// # Errors
///
/// - `std::io::Error` - If the directory cannot be created or the file cannot be opened
pub fn prepare_run_log(logs_dir: &Path) -> std::io::Result<(File, PathBuf)> {
    create_dir_all(logs_dir)?;
    let path = logs_dir.join(RUN_LOG_FILE);
    let file = File::create(&path)?;
    Ok((file, path))
}

/// Installs the global subscriber: console at `console_level`, file at trace.
///
/// `logs_dir` defaults to `./logs`. The previous run's log is overwritten.
///
/// # Errors
///
/// - `std::io::Error` - If the log file cannot be prepared
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> std::io::Result<()> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new("logs"));
    let (log_file, log_file_path) = prepare_run_log(logs_path)?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        "Tracing initialized: console={}, trace_file={}",
        console_level,
        log_file_path.display()
    );

    Ok(())
}

/// Console verbosity selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl CliLogLevel {
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(CliLogLevel::Error),
            "warn" => Ok(CliLogLevel::Warn),
            "info" => Ok(CliLogLevel::Info),
            "debug" => Ok(CliLogLevel::Debug),
            "trace" => Ok(CliLogLevel::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("DEBUG".parse::<CliLogLevel>(), Ok(CliLogLevel::Debug));
        assert_eq!(CliLogLevel::Trace.as_tracing_level(), Level::TRACE);
        assert_eq!(CliLogLevel::Warn.to_string(), "warn");
        assert!("loud".parse::<CliLogLevel>().is_err());
    }

    #[test]
    fn test_prepare_run_log_truncates_previous_run() {
        let temp = tempfile::tempdir().unwrap();
        let logs = temp.path().join("nested/logs");

        let (mut file, path) = prepare_run_log(&logs).unwrap();
        writeln!(file, "first run").unwrap();
        drop(file);
        assert!(path.ends_with(RUN_LOG_FILE));

        let (_file, path) = prepare_run_log(&logs).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "");
    }
}
