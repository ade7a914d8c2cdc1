//! CLI error reporting
//!
//! A CLI failure is a stable `FAILSAFE_CLI_*` code plus a message. Access
//! layer failures keep their own code inside the message.

use std::fmt;
use std::io;

use crate::resilience::AccessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Unreadable or invalid configuration file
    ConfigError,
    /// stdout or runtime startup failed
    IoError,
    /// Malformed command argument
    InvalidArgument,
    /// The access layer rejected or could not complete the operation
    OperationFailed,
}

impl CliErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigError => "FAILSAFE_CLI_CONFIG_ERROR",
            Self::IoError => "FAILSAFE_CLI_IO_ERROR",
            Self::InvalidArgument => "FAILSAFE_CLI_INVALID_ARGUMENT",
            Self::OperationFailed => "FAILSAFE_CLI_OPERATION_FAILED",
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    kind: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(kind: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, message)
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InvalidArgument, message)
    }

    pub fn code(&self) -> CliErrorCode {
        self.kind
    }

    /// `FAILSAFE_CLI_*` code as printed in the error response
    pub fn code_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        Self::io_error(err.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::io_error(format!("cannot render JSON: {}", err))
    }
}

impl From<AccessError> for CliError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Config(message) => Self::config_error(message),
            other => Self::new(
                CliErrorCode::OperationFailed,
                format!("{}: {}", other.code(), other),
            ),
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
