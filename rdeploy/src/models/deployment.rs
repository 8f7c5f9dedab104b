//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;

/// Persisted record of one project/machine pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: u64,

    pub project_id: u64,

    pub machine_id: u64,

    /// Free-form environment tag ("development", "production", ...)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Remote directory; unset until the first sync or deploy defaults it
    #[serde(default)]
    pub deploy_path: Option<String>,

    pub status: DeploymentStatus,

    /// Append-only operation log
    #[serde(default)]
    pub log: String,

    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

pub fn default_environment() -> String {
    "development".to_string()
}

impl Deployment {
    /// A fresh, never-deployed pairing
    pub fn new(id: u64, project_id: u64, machine_id: u64) -> Self {
        Self {
            id,
            project_id,
            machine_id,
            environment: default_environment(),
            deploy_path: None,
            status: DeploymentStatus::NotDeployed,
            log: String::new(),
            deployed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Append one rendered block to the log, separated from earlier blocks
    pub(crate) fn append_log(&mut self, block: &str) {
        if block.is_empty() {
            return;
        }
        if !self.log.is_empty() {
            self.log.push_str("\n\n");
        }
        self.log.push_str(block);
    }

    /// The deploy path with empty strings treated as unset
    pub fn deploy_path(&self) -> Option<&str> {
        self.deploy_path.as_deref().filter(|p| !p.trim().is_empty())
    }
}

/// Changes applied to a deployment in one durable commit
#[derive(Debug, Clone)]
pub struct DeploymentUpdate {
    pub status: DeploymentStatus,
    pub deploy_path: Option<String>,
    pub environment: Option<String>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub log_block: Option<String>,
}

impl DeploymentUpdate {
    /// Status-only update
    pub fn status(status: DeploymentStatus) -> Self {
        Self {
            status,
            deploy_path: None,
            environment: None,
            deployed_at: None,
            log_block: None,
        }
    }

    pub fn with_log(mut self, block: LogBlock) -> Self {
        self.log_block = Some(block.render());
        self
    }

    pub fn with_deploy_path(mut self, path: impl Into<String>) -> Self {
        self.deploy_path = Some(path.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_deployed_at(mut self, at: DateTime<Utc>) -> Self {
        self.deployed_at = Some(at);
        self
    }

    /// Apply the update to an in-memory record
    pub fn apply(&self, deployment: &mut Deployment) {
        deployment.status = self.status;
        if let Some(path) = &self.deploy_path {
            deployment.deploy_path = Some(path.clone());
        }
        if let Some(environment) = &self.environment {
            deployment.environment = environment.clone();
        }
        if let Some(at) = self.deployed_at {
            deployment.deployed_at = Some(at);
        }
        if let Some(block) = &self.log_block {
            deployment.append_log(block);
        }
    }
}

/// One timestamped block of the deployment log
#[derive(Debug, Clone)]
pub struct LogBlock {
    opened_at: DateTime<Utc>,
    title: String,
    lines: Vec<String>,
}

impl LogBlock {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            opened_at: Utc::now(),
            title: title.into(),
            lines: Vec::new(),
        }
    }

    pub fn line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Add captured command output, one log line per non-empty output line
    pub fn output(&mut self, label: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.lines.push(format!("{}:", label));
        for line in text.lines() {
            self.lines.push(format!("  {}", line));
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "[{}] {}",
            self.opened_at.format("%Y-%m-%d %H:%M:%S"),
            self.title
        );
        for line in &self.lines {
            out.push('\n');
            out.push_str(line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_appends_log_without_overwriting() {
        let mut deployment = Deployment::new(1, 2, 3);
        let mut first = LogBlock::new("sync started");
        first.line("fresh checkout performed");
        DeploymentUpdate::status(DeploymentStatus::Success)
            .with_log(first)
            .apply(&mut deployment);

        let before = deployment.log.clone();
        DeploymentUpdate::status(DeploymentStatus::Running)
            .with_log(LogBlock::new("start"))
            .apply(&mut deployment);

        assert!(deployment.log.starts_with(&before));
        assert!(deployment.log.contains("fresh checkout performed"));
        assert!(deployment.log.ends_with("] start"));
        assert_eq!(deployment.status, DeploymentStatus::Running);
    }

    #[test]
    fn test_blank_deploy_path_is_unset() {
        let mut deployment = Deployment::new(1, 2, 3);
        deployment.deploy_path = Some("  ".to_string());
        assert_eq!(deployment.deploy_path(), None);
    }
}
