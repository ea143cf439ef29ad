//! Common errors across the cmip6-wps crate
use std::path::PathBuf;

use itertools::Itertools;

/// Errors in the model configuration table or the run settings.
///
/// These are always fatal: they are raised before any timestamp is processed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not read configuration file {}", .0.display())]
    CouldNotRead(PathBuf),
    #[error("Line {line}: {cause}")]
    InvalidRow { line: u64, cause: String },
    #[error("Line {line}: required field '{field}' is missing or empty")]
    MissingField { line: u64, field: &'static str },
    #[error("WPS field '{name}' at level {level} is defined twice (lines {first_line} and {line})")]
    DuplicateField {
        name: String,
        level: f64,
        first_line: u64,
        line: u64,
    },
    #[error("Line {line}: levels for '{name}' are not strictly ordered: {levels}")]
    LevelsNotOrdered {
        line: u64,
        name: String,
        levels: String,
    },
    #[error("Configuration file {} does not define any variables", .0.display())]
    Empty(PathBuf),
    #[error("Invalid run settings: {0}")]
    InvalidSettings(String),
}

impl ConfigError {
    pub fn invalid_row<S: ToString>(line: u64, cause: S) -> Self {
        Self::InvalidRow {
            line,
            cause: cause.to_string(),
        }
    }

    pub fn invalid_settings<S: ToString>(msg: S) -> Self {
        Self::InvalidSettings(msg.to_string())
    }
}

/// Errors building the list of requested timestamps.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimeAxisError {
    #[error("Invalid time range: {0}")]
    InvalidRange(String),
    #[error("Could not parse '{0}' as a date/time")]
    BadDateTime(String),
    #[error("Could not parse '{0}' as a time interval")]
    BadInterval(String),
}

/// Why a single output timestamp could not be written.
///
/// Every variant identifies the variable responsible (where there is one), so that
/// the end-of-run summary can attribute each failure precisely.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum TimestampError {
    #[error("variable '{variable}' is not declared by any source file{}", rejected_note(.rejected))]
    VariableNotFound {
        variable: String,
        /// Sources that could not be opened, any of which may have declared it.
        rejected: Vec<PathBuf>,
    },
    #[error("no source file covers variable '{variable}' at this time")]
    TimeNotCovered { variable: String },
    #[error("variable '{variable}' has no level {level} in {}", .path.display())]
    LevelNotCovered {
        variable: String,
        level: f64,
        path: PathBuf,
    },
    #[error("grid of '{variable}' in {} does not match the grid of the first contributing source", .path.display())]
    GridMismatch { variable: String, path: PathBuf },
    #[error("units of '{variable}' are '{found}' but the configuration expects '{expected}'")]
    UnitsMismatch {
        variable: String,
        found: String,
        expected: String,
    },
    #[error("could not serialize record '{field}' at level {level}")]
    Serialization { field: String, level: f64 },
    #[error("I/O error while {0}")]
    Io(String),
    #[error("conversion was cancelled")]
    Cancelled,
}

impl TimestampError {
    /// Short name of the failure category, used in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            TimestampError::VariableNotFound { .. } => "VariableNotFound",
            TimestampError::TimeNotCovered { .. } => "TimeNotCovered",
            TimestampError::LevelNotCovered { .. } => "LevelNotCovered",
            TimestampError::GridMismatch { .. } => "GridMismatch",
            TimestampError::UnitsMismatch { .. } => "UnitsMismatch",
            TimestampError::Serialization { .. } => "SerializationError",
            TimestampError::Io(_) => "IOError",
            TimestampError::Cancelled => "Cancelled",
        }
    }

    /// The variable (source or WPS name) responsible for the failure, if any.
    pub fn variable(&self) -> Option<&str> {
        match self {
            TimestampError::VariableNotFound { variable, .. }
            | TimestampError::TimeNotCovered { variable }
            | TimestampError::LevelNotCovered { variable, .. }
            | TimestampError::GridMismatch { variable, .. }
            | TimestampError::UnitsMismatch { variable, .. } => Some(variable),
            TimestampError::Serialization { field, .. } => Some(field),
            TimestampError::Io(_) | TimestampError::Cancelled => None,
        }
    }

    pub fn level(&self) -> Option<f64> {
        match self {
            TimestampError::LevelNotCovered { level, .. }
            | TimestampError::Serialization { level, .. } => Some(*level),
            _ => None,
        }
    }

    pub fn io<S: ToString>(action: S) -> Self {
        Self::Io(action.to_string())
    }
}

fn rejected_note(rejected: &[PathBuf]) -> String {
    if rejected.is_empty() {
        return String::new();
    }
    let paths = rejected.iter().map(|p| p.display().to_string()).join(", ");
    format!(" (unreadable sources: {paths})")
}

/// Errors that stop the whole run rather than a single timestamp.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("The model configuration is invalid")]
    Config,
    #[error("The requested time axis is invalid")]
    TimeAxis,
    #[error("Output location {} is not writable", .0.display())]
    OutputUnwritable(PathBuf),
    #[error("Could not start the worker pool: {0}")]
    WorkerPool(String),
    #[error("Could not write the run summary to {}", .0.display())]
    Summary(PathBuf),
    #[error("Invalid source file pattern '{0}'")]
    BadGlob(String),
    #[error("No usable source files")]
    NoSources,
}
