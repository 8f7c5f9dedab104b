//! Deployment status machine

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Associated with a machine, nothing pushed yet
    NotDeployed,

    /// Request accepted, unit of work not yet talking to the host
    Pending,

    /// Code sync in progress
    Syncing,

    /// Full deploy (sync + dependency setup) in progress
    Deploying,

    /// Code is in place on the host
    Success,

    /// Deploy failed
    Failed,

    /// Sync failed
    SyncFailed,

    /// Launcher is being run
    Starting,

    /// Launcher reported a successful start
    Running,

    /// Launcher failed
    StartFailed,

    /// Stop command is being run
    Stopping,

    /// Application stopped
    Stopped,

    /// Stop command failed
    StopFailed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::NotDeployed => "not_deployed",
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Syncing => "syncing",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::SyncFailed => "sync_failed",
            DeploymentStatus::Starting => "starting",
            DeploymentStatus::Running => "running",
            DeploymentStatus::StartFailed => "start_failed",
            DeploymentStatus::Stopping => "stopping",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::StopFailed => "stop_failed",
        }
    }

    /// Whether a unit of work is currently driving this deployment
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Pending
                | DeploymentStatus::Syncing
                | DeploymentStatus::Deploying
                | DeploymentStatus::Starting
                | DeploymentStatus::Stopping
        )
    }

    /// Whether this is one of the named failure states
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Failed
                | DeploymentStatus::SyncFailed
                | DeploymentStatus::StartFailed
                | DeploymentStatus::StopFailed
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("Unknown deployment status: {}", s))
    }
}

/// Deployment event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Sync requested
    RequestSync,

    /// Deploy requested
    RequestDeploy,

    /// Sync unit started remote work
    BeginSync,

    /// Deploy unit started remote work
    BeginDeploy,

    SyncSucceeded,
    SyncFailed,
    DeploySucceeded,
    DeployFailed,

    /// Start requested
    RequestStart,
    StartSucceeded,
    StartFailed,

    /// Stop requested
    RequestStop,
    StopSucceeded,
    StopFailed,

    /// The unit driving an in-flight status ended without recording an outcome
    Interrupted,
}

/// States from which a new sync or deploy may be requested
const REDEPLOYABLE: &[DeploymentStatus] = &[
    DeploymentStatus::NotDeployed,
    DeploymentStatus::Success,
    DeploymentStatus::Failed,
    DeploymentStatus::SyncFailed,
    DeploymentStatus::Stopped,
    DeploymentStatus::StartFailed,
    DeploymentStatus::StopFailed,
];

/// Compute the status an event leads to, or `None` when the transition is
/// not in the table.
pub fn transition(from: DeploymentStatus, event: DeploymentEvent) -> Option<DeploymentStatus> {
    use DeploymentEvent as E;
    use DeploymentStatus as S;

    let to = match (from, event) {
        (s, E::RequestSync | E::RequestDeploy) if REDEPLOYABLE.contains(&s) => S::Pending,

        (S::Pending, E::BeginSync) => S::Syncing,
        (S::Pending, E::BeginDeploy) => S::Deploying,

        (S::Syncing, E::SyncSucceeded) => S::Success,
        (S::Syncing, E::SyncFailed) => S::SyncFailed,
        (S::Deploying, E::DeploySucceeded) => S::Success,
        (S::Deploying, E::DeployFailed) => S::Failed,

        (S::Success | S::Stopped | S::StartFailed, E::RequestStart) => S::Starting,
        (S::Starting, E::StartSucceeded) => S::Running,
        (S::Starting, E::StartFailed) => S::StartFailed,

        (S::Success | S::Running | S::StopFailed, E::RequestStop) => S::Stopping,
        (S::Stopping, E::StopSucceeded) => S::Stopped,
        (S::Stopping, E::StopFailed) => S::StopFailed,

        (S::Pending | S::Deploying, E::Interrupted) => S::Failed,
        (S::Syncing, E::Interrupted) => S::SyncFailed,
        (S::Starting, E::Interrupted) => S::StartFailed,
        (S::Stopping, E::Interrupted) => S::StopFailed,

        _ => return None,
    };
    Some(to)
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
}

impl DeploymentFsm {
    /// Create an FSM positioned at a persisted status
    pub fn new(state: DeploymentStatus) -> Self {
        Self { state }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Check whether an event is allowed without applying it
    pub fn permits(&self, event: DeploymentEvent) -> bool {
        transition(self.state, event).is_some()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, String> {
        match transition(self.state, event) {
            Some(next) => {
                self.state = next;
                Ok(next)
            }
            None => Err(format!("Invalid transition: {} -> {:?}", self.state, event)),
        }
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new(DeploymentStatus::NotDeployed)
    }
}
