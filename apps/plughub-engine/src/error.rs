//! Engine failures and their exit codes

use plughub_core::security::SecurityError;
use plughub_core::CoreError;
use thiserror::Error;

/// Command-line usage problem
pub const EX_USAGE: u8 = 64;
/// Input was readable but unusable
pub const EX_DATAERR: u8 = 65;
/// An input file does not exist
pub const EX_NOINPUT: u8 = 66;
/// Anything else
pub const EX_SOFTWARE: u8 = 70;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    Data(String),

    #[error("{0}")]
    MissingInput(String),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Usage(_) => EX_USAGE,
            EngineError::Data(_) => EX_DATAERR,
            EngineError::MissingInput(_) => EX_NOINPUT,
            EngineError::Internal(_) => EX_SOFTWARE,
        }
    }

    /// Message flattened to a single stderr line
    pub fn line(&self) -> String {
        self.to_string().split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl From<SecurityError> for EngineError {
    fn from(err: SecurityError) -> Self {
        EngineError::Data(err.to_string())
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NoMatchingText
            | CoreError::NothingSelected
            | CoreError::NoImages
            | CoreError::NoPagesRendered
            | CoreError::LockedOrCorrupt(_)
            | CoreError::ParseError(_)
            | CoreError::InvalidRange(_)
            | CoreError::Image(_) => EngineError::Data(err.to_string()),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}
