//! Progress event type

use serde::{Deserialize, Serialize};

/// Phase of a progress stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Start,
    Progress,
    Complete,
    Error,
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Complete | ProgressStatus::Error)
    }
}

/// One progress update for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    pub message: String,
    /// Percentage, 0 through 100
    pub progress: u8,
}

impl ProgressEvent {
    pub fn new(status: ProgressStatus, message: impl Into<String>, progress: u8) -> Self {
        Self {
            status,
            message: message.into(),
            progress: progress.min(100),
        }
    }
}

/// Destination for progress events
pub trait ProgressSink: Send + Sync {
    fn publish(&self, project_id: u64, event: ProgressEvent);
}
