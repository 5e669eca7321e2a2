use std::error::Error;
use std::fmt::{self, Display};

/// Malformed `MOONC_INTERNAL_PARAMS` (§6.3/§7.3). Carries the offending
/// substring so the CLI can report it verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    MissingKeyValueSeparator { group: String },
    UnknownKey { key: String },
    InvalidBoolValue { key: String, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingKeyValueSeparator { group } => write!(
                f,
                "malformed MOONC_INTERNAL_PARAMS group '{group}': missing '=' separator"
            ),
            ConfigError::UnknownKey { key } => {
                write!(f, "unknown MOONC_INTERNAL_PARAMS key '{key}'")
            }
            ConfigError::InvalidBoolValue { key, value } => write!(
                f,
                "MOONC_INTERNAL_PARAMS key '{key}' expects 0 or 1, got '{value}'"
            ),
        }
    }
}

impl Error for ConfigError {}
