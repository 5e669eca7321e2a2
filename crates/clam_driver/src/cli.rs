//! # Cli
//!
//! This module contains everything needed for parsing the CLI arguments for Clam.

use clap::{Parser, ValueEnum};

/// Struct containing the CLI configuration for Clam.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The path to the MCore program, serialized as JSON.
    #[arg(index = 1)]
    pub file: std::path::PathBuf,

    /// Whether to include source locations in the printed Clam program.
    #[arg(long)]
    pub show_loc: bool,

    /// Treat string constants as backed by the host's native string type
    /// rather than lowering them through the bytes-backed runtime.
    #[arg(long)]
    pub js_builtin_string: bool,

    /// Specify the log level of the lowerer.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    pub verbosity: LogLevel,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}

/// Enum for specifying the log level of Clam.
#[derive(ValueEnum, Clone, Default, Debug)]
pub enum LogLevel {
    /// The default log level. Only critical errors will be logged.
    #[default]
    #[value(alias("0"))]
    Error,

    /// A log level, where also warnings are logged.
    #[value(alias("1"))]
    Warn,

    /// Also log information about the general state of the lowerer.
    #[value(alias("2"))]
    Info,

    /// Log everything which happens internally in the lowerer.
    #[value(alias("3"))]
    Debug,

    /// Log extra information, e.g. per-item lowering decisions.
    #[value(alias("4"))]
    Trace,
}

impl From<&LogLevel> for log::Level {
    fn from(value: &LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}
