//! Sync engine: strategy selection and the shared progress contract

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{error, info};

use crate::errors::{DeployError, FileSyncError};
use crate::models::project::{Project, RepositoryType};
use crate::progress::ProgressReporter;
use crate::remote::platform::{PlatformProfile, EXISTS_MARKER};
use crate::remote::session::RemoteSession;
use crate::sync::copy::PlainCopyStrategy;
use crate::sync::vcs::VersionControlStrategy;

/// Tunables shared by both strategies
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Controller-wide ignore file merged into every project's patterns
    pub root_ignore_file: Option<PathBuf>,
    /// Allowed modification-time drift, in seconds, for unchanged files
    pub mtime_tolerance_secs: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            root_ignore_file: None,
            mtime_tolerance_secs: 2,
        }
    }
}

/// What the version-control strategy did to the working copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutAction {
    /// Existing working copy updated in place
    Updated,
    /// No working copy was present; cloned from scratch
    FreshCheckout,
    /// Update failed; the tree was removed and cloned again
    Recheckout,
}

impl CheckoutAction {
    pub fn describe(&self) -> &'static str {
        match self {
            CheckoutAction::Updated => "working copy updated",
            CheckoutAction::FreshCheckout => "fresh checkout performed",
            CheckoutAction::Recheckout => "update failed; re-checkout performed",
        }
    }
}

/// Outcome of a successful sync
#[derive(Debug, Default)]
pub struct SyncReport {
    pub strategy: &'static str,
    pub checkout: Option<CheckoutAction>,
    pub transferred: usize,
    pub skipped: usize,
    pub failed: Vec<FileSyncError>,
    /// Remote paths deleted by the ignore cleanup pass
    pub removed: Vec<String>,
    /// Important files put back after a re-checkout
    pub restored: Vec<String>,
}

impl SyncReport {
    pub fn new(strategy: &'static str) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// One-line summary for logs and the terminal progress event
    pub fn summary(&self) -> String {
        match self.checkout {
            Some(action) => format!(
                "{}; {} ignored path(s) removed",
                action.describe(),
                self.removed.len()
            ),
            None => format!(
                "{} transferred, {} skipped, {} failed",
                self.transferred,
                self.skipped,
                self.failed.len()
            ),
        }
    }

    /// Lines for the deployment log
    pub fn log_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("strategy: {}", self.strategy), self.summary()];
        for path in &self.restored {
            lines.push(format!("restored {}", path));
        }
        for path in &self.removed {
            lines.push(format!("removed {}", path));
        }
        for failure in &self.failed {
            lines.push(format!("warning: {}", failure));
        }
        lines
    }
}

/// Everything a strategy needs for one run
pub struct SyncContext<'a> {
    pub project: &'a Project,
    pub target: &'a str,
    pub session: &'a dyn RemoteSession,
    pub profile: PlatformProfile,
    pub options: &'a SyncOptions,
}

/// A way of materializing a project tree on the remote host
#[async_trait]
pub trait SyncStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bring the target in line with the project. Progress is reported
    /// through `reporter`; terminal events are left to the engine.
    async fn run(
        &self,
        ctx: &SyncContext<'_>,
        reporter: &ProgressReporter,
    ) -> Result<SyncReport, DeployError>;
}

/// Picks the strategy for a project and runs it
#[derive(Debug, Clone, Default)]
pub struct SyncEngine {
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn strategy_for(project: &Project) -> Box<dyn SyncStrategy> {
        match project.repository_type {
            RepositoryType::VersionControl => Box::new(VersionControlStrategy),
            RepositoryType::PlainCopy => Box::new(PlainCopyStrategy),
        }
    }

    /// Sync `project` into `target`.
    ///
    /// Emits one `start`, milestone progress, and exactly one `complete`
    /// or `error` through `reporter`.
    pub async fn sync(
        &self,
        project: &Project,
        target: &str,
        session: &dyn RemoteSession,
        profile: PlatformProfile,
        reporter: &ProgressReporter,
    ) -> Result<SyncReport, DeployError> {
        reporter.start(&format!("Syncing {} to {}", project.name, target));
        let result = self
            .sync_steps(project, target, session, profile, reporter)
            .await;
        match &result {
            Ok(report) => reporter.complete(&report.summary()),
            Err(e) => reporter.fail(&e.to_string()),
        }
        result
    }

    /// Prepare the target and run the strategy. Only milestone progress is
    /// emitted; `start` and the terminal event belong to the caller.
    pub async fn sync_steps(
        &self,
        project: &Project,
        target: &str,
        session: &dyn RemoteSession,
        profile: PlatformProfile,
        reporter: &ProgressReporter,
    ) -> Result<SyncReport, DeployError> {
        let strategy = Self::strategy_for(project);
        let ctx = SyncContext {
            project,
            target,
            session,
            profile,
            options: &self.options,
        };

        let result = match ensure_directory(session, &profile, target).await {
            Ok(()) => strategy.run(&ctx, reporter).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(report) => info!(
                "Sync of {} via {} finished: {}",
                project.name,
                strategy.name(),
                report.summary()
            ),
            Err(e) => error!("Sync of {} via {} failed: {}", project.name, strategy.name(), e),
        }
        result
    }
}

/// Create `path` unless it exists
pub(crate) async fn ensure_directory(
    session: &dyn RemoteSession,
    profile: &PlatformProfile,
    path: &str,
) -> Result<(), DeployError> {
    let probe = session.execute(&profile.directory_exists(path)).await?;
    if probe.has_marker(EXISTS_MARKER) {
        return Ok(());
    }
    let command = profile.make_directory(path);
    session.execute(&command).await?.check(&command)?;
    Ok(())
}
