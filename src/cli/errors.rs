//! CLI error type
//!
//! Every failure leaving the CLI has a code (which exit status, which class of
//! problem) and a kind (the engine's machine-readable error kind, when there
//! is one).

use std::fmt;

use crate::config::ConfigError;
use crate::migrations::executor::FailedStep;
use crate::migrations::MigrationError;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration missing or invalid
    ConfigError,
    /// Load, graph, plan or state error raised before any step ran
    MigrationError,
    /// A step failed and was rolled back; earlier steps stay committed
    StepFailed,
    /// Cancelled between steps
    Cancelled,
    /// Output could not be written
    IoError,
}

impl CliErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CliErrorCode::ConfigError => "CONFIG_ERROR",
            CliErrorCode::MigrationError => "MIGRATION_ERROR",
            CliErrorCode::StepFailed => "STEP_FAILED",
            CliErrorCode::Cancelled => "CANCELLED",
            CliErrorCode::IoError => "IO_ERROR",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CliErrorCode::ConfigError => 2,
            CliErrorCode::Cancelled => 130,
            _ => 1,
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    kind: &'static str,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, "CONFIG_ERROR", message)
    }

    pub fn step_failed(failed: &FailedStep) -> Self {
        let err = failed.to_error();
        Self::new(CliErrorCode::StepFailed, err.kind(), err.to_string())
    }

    pub fn cancelled(completed: usize) -> Self {
        Self::new(
            CliErrorCode::Cancelled,
            "CANCELLED",
            format!("Cancelled after {} committed step(s)", completed),
        )
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, "IO_ERROR", message)
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.code.as_str(), self.kind, self.message)
    }
}

impl std::error::Error for CliError {}

impl From<MigrationError> for CliError {
    fn from(err: MigrationError) -> Self {
        let code = match err {
            MigrationError::StepExecution { .. } => CliErrorCode::StepFailed,
            _ => CliErrorCode::MigrationError,
        };
        Self::new(code, err.kind(), err.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::config_error(err.to_string())
    }
}
