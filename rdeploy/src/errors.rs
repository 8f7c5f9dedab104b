//! Error types for rdeploy

use std::time::Duration;

use thiserror::Error;

use crate::deploy::fsm::DeploymentStatus;

/// Failure to open a remote session.
///
/// All three kinds end the calling operation; they are kept apart so the
/// deployment log can say which one happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("host {host} is unreachable: {detail}")]
    Unreachable { host: String, detail: String },

    #[error("authentication rejected by {host}: {detail}")]
    AuthenticationRejected { host: String, detail: String },

    #[error("protocol failure talking to {host}: {detail}")]
    Protocol { host: String, detail: String },
}

impl ConnectionError {
    /// Short tag used in deployment log diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionError::Unreachable { .. } => "unreachable",
            ConnectionError::AuthenticationRejected { .. } => "authentication",
            ConnectionError::Protocol { .. } => "protocol",
        }
    }
}

/// A remote command that could not run, or ran and failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("transport failure running `{command}`: {detail}")]
    Transport { command: String, detail: String },

    #[error("`{command}` did not finish within {after:?}")]
    TimedOut { command: String, after: Duration },

    #[error("`{command}` exited with {exit_code}: {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("unexpected output from `{command}`: {output}")]
    UnexpectedOutput { command: String, output: String },
}

/// A single file that could not be transferred or inspected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("file sync failed for {path}: {reason}")]
pub struct FileSyncError {
    pub path: String,
    pub reason: String,
}

impl FileSyncError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Main error type for rdeploy
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("File sync error: {0}")]
    FileSync(#[from] FileSyncError),

    #[error("Deployment {deployment_id} is {status}; `{operation}` is not allowed")]
    StateConflict {
        deployment_id: u64,
        status: DeploymentStatus,
        operation: String,
    },

    #[error("Deployment {deployment_id} already has an operation in flight")]
    Busy { deployment_id: u64 },

    #[error("Remote directory does not exist: {0}")]
    TargetMissing(String),

    #[error("No launcher found in {0}")]
    NoLauncher(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// True for the errors that reject a request without touching state
    pub fn is_conflict(&self) -> bool {
        matches!(self, DeployError::StateConflict { .. } | DeployError::Busy { .. })
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}

impl From<ignore::Error> for DeployError {
    fn from(err: ignore::Error) -> Self {
        DeployError::ConfigError(format!("invalid ignore pattern: {err}"))
    }
}
