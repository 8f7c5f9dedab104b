//! Deployment coordinator: accepts operations, drives them against the
//! remote host and records the outcome.
//!
//! Every operation holds the deployment's ownership token from the moment
//! it is accepted until its final status and log block are committed.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::deploy::fsm::{transition, DeploymentEvent, DeploymentStatus};
use crate::deploy::launcher::{ProcessController, StopMethod};
use crate::deploy::locks::{DeploymentGuard, DeploymentLocks};
use crate::errors::DeployError;
use crate::models::deployment::LogBlock;
use crate::models::{Deployment, DeploymentUpdate, Machine, Project};
use crate::progress::{ProgressBroadcaster, ProgressReporter, ProgressSink};
use crate::remote::platform::detect;
use crate::remote::session::{ConnectParams, RemoteSession, SessionConnector, SessionGuard};
use crate::storage::settings::Settings;
use crate::storage::store::DeploymentStore;
use crate::sync::engine::SyncEngine;
use crate::sync::setup::install_dependencies;

/// Optional changes carried by a deploy request
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub deploy_path: Option<String>,
    pub environment: Option<String>,
}

/// A unit of work on one deployment
#[derive(Debug, Clone)]
pub enum Operation {
    Sync,
    Deploy(DeployRequest),
    Start,
    Stop,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Sync => "sync",
            Operation::Deploy(_) => "deploy",
            Operation::Start => "start",
            Operation::Stop => "stop",
        }
    }

    fn request_event(&self) -> DeploymentEvent {
        match self {
            Operation::Sync => DeploymentEvent::RequestSync,
            Operation::Deploy(_) => DeploymentEvent::RequestDeploy,
            Operation::Start => DeploymentEvent::RequestStart,
            Operation::Stop => DeploymentEvent::RequestStop,
        }
    }

    /// Event moving `pending` into the working state, for operations that have one
    fn begin_event(&self) -> Option<DeploymentEvent> {
        match self {
            Operation::Sync => Some(DeploymentEvent::BeginSync),
            Operation::Deploy(_) => Some(DeploymentEvent::BeginDeploy),
            Operation::Start | Operation::Stop => None,
        }
    }

    fn outcome_event(&self, succeeded: bool) -> DeploymentEvent {
        match (self, succeeded) {
            (Operation::Sync, true) => DeploymentEvent::SyncSucceeded,
            (Operation::Sync, false) => DeploymentEvent::SyncFailed,
            (Operation::Deploy(_), true) => DeploymentEvent::DeploySucceeded,
            (Operation::Deploy(_), false) => DeploymentEvent::DeployFailed,
            (Operation::Start, true) => DeploymentEvent::StartSucceeded,
            (Operation::Start, false) => DeploymentEvent::StartFailed,
            (Operation::Stop, true) => DeploymentEvent::StopSucceeded,
            (Operation::Stop, false) => DeploymentEvent::StopFailed,
        }
    }

    /// Status recorded when the unit ends without reaching its outcome
    fn failed_status(&self) -> DeploymentStatus {
        match self {
            Operation::Sync => DeploymentStatus::SyncFailed,
            Operation::Deploy(_) => DeploymentStatus::Failed,
            Operation::Start => DeploymentStatus::StartFailed,
            Operation::Stop => DeploymentStatus::StopFailed,
        }
    }

    fn moves_code(&self) -> bool {
        matches!(self, Operation::Sync | Operation::Deploy(_))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An accepted operation, holding the deployment's ownership token
struct Unit {
    guard: DeploymentGuard,
    operation: Operation,
    deployment: Deployment,
    project: Project,
    machine: Machine,
    deploy_path: String,
}

/// Drives sync, deploy, start and stop for deployments
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn DeploymentStore>,
    connector: Arc<dyn SessionConnector>,
    broadcaster: Arc<ProgressBroadcaster>,
    locks: Arc<DeploymentLocks>,
    settings: Arc<Settings>,
    engine: SyncEngine,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        connector: Arc<dyn SessionConnector>,
        broadcaster: Arc<ProgressBroadcaster>,
        settings: Settings,
    ) -> Self {
        let engine = SyncEngine::new(settings.sync.options());
        Self {
            store,
            connector,
            broadcaster,
            locks: Arc::new(DeploymentLocks::new()),
            settings: Arc::new(settings),
            engine,
        }
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    /// Whether an operation currently owns `deployment_id`
    pub fn is_busy(&self, deployment_id: u64) -> bool {
        self.locks.is_held(deployment_id)
    }

    /// Run `operation` to completion.
    ///
    /// `Err` means the request was rejected or the store failed. A remote
    /// failure is not an error here: it is recorded in the returned
    /// deployment's status and log.
    pub async fn execute(
        &self,
        deployment_id: u64,
        operation: Operation,
    ) -> Result<Deployment, DeployError> {
        let unit = self.accept(deployment_id, operation).await?;
        self.run(unit).await
    }

    /// Accept `operation` and run it on a background task.
    ///
    /// Rejections (`Busy`, `StateConflict`, missing records) are returned
    /// before anything is spawned; the accepted status is already persisted
    /// when this returns.
    pub async fn submit(
        &self,
        deployment_id: u64,
        operation: Operation,
    ) -> Result<JoinHandle<Result<Deployment, DeployError>>, DeployError> {
        let unit = self.accept(deployment_id, operation).await?;
        let coordinator = self.clone();
        Ok(tokio::spawn(async move { coordinator.run(unit).await }))
    }

    async fn accept(&self, deployment_id: u64, operation: Operation) -> Result<Unit, DeployError> {
        let guard = self
            .locks
            .try_acquire(deployment_id)
            .ok_or(DeployError::Busy { deployment_id })?;

        let mut deployment = self.store.deployment(deployment_id).await?;
        if deployment.status.is_in_flight() {
            // Nothing holds the token, so the unit that set this status is gone
            deployment = self.recover_interrupted(deployment).await?;
        }
        let accepted = transition(deployment.status, operation.request_event()).ok_or_else(|| {
            DeployError::StateConflict {
                deployment_id,
                status: deployment.status,
                operation: operation.name().to_string(),
            }
        })?;

        let project = self.store.project(deployment.project_id).await?;
        let machine = self.store.machine(deployment.machine_id).await?;

        let requested_path = match &operation {
            Operation::Deploy(request) => request
                .deploy_path
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty()),
            _ => None,
        };
        let deploy_path = match (requested_path, deployment.deploy_path()) {
            (Some(path), _) => path.to_string(),
            (None, Some(path)) => path.to_string(),
            (None, None) => {
                let path = self
                    .settings
                    .paths
                    .default_deploy_path(&machine.host, &project.name);
                info!(
                    "Deployment {} has no deploy path; defaulting to {}",
                    deployment_id, path
                );
                path
            }
        };

        let mut update = DeploymentUpdate::status(accepted);
        if operation.moves_code() && deployment.deploy_path() != Some(deploy_path.as_str()) {
            update = update.with_deploy_path(deploy_path.clone());
        }
        if let Operation::Deploy(request) = &operation {
            if let Some(environment) = &request.environment {
                update = update.with_environment(environment.clone());
            }
            update = update.with_deployed_at(Utc::now());
        }
        let deployment = self.store.commit(deployment_id, update).await?;
        info!(
            "Accepted {} for deployment {} ({} on {})",
            operation, deployment_id, project.name, machine.host
        );

        Ok(Unit {
            guard,
            operation,
            deployment,
            project,
            machine,
            deploy_path,
        })
    }

    /// Record an in-flight status left by a unit that never finished
    async fn recover_interrupted(&self, deployment: Deployment) -> Result<Deployment, DeployError> {
        let status = next_status(deployment.id, deployment.status, DeploymentEvent::Interrupted)?;
        warn!(
            "Deployment {} was left {} by an interrupted operation; marking it {}",
            deployment.id, deployment.status, status
        );
        let mut log = LogBlock::new("interrupted");
        log.line(format!(
            "previous operation ended while {} without recording an outcome",
            deployment.status
        ));
        log.line(format!("status: {}", status));
        self.store
            .commit(deployment.id, DeploymentUpdate::status(status).with_log(log))
            .await
    }

    async fn run(&self, unit: Unit) -> Result<Deployment, DeployError> {
        let Unit {
            guard,
            operation,
            deployment,
            project,
            machine,
            deploy_path,
        } = unit;
        let deployment_id = guard.deployment_id();

        let mut log = LogBlock::new(format!(
            "{} {} on {}@{}:{} -> {}",
            operation, project.name, machine.username, machine.host, machine.port, deploy_path
        ));
        let result = self
            .drive(&operation, deployment, &project, &machine, &deploy_path, &mut log)
            .await;

        let result = match result {
            Ok(deployment) => Ok(deployment),
            Err(e) => {
                self.abandon(deployment_id, &operation, log, &e).await;
                Err(e)
            }
        };
        drop(guard);
        result
    }

    /// Move through the working status, perform the operation and commit
    /// its outcome
    async fn drive(
        &self,
        operation: &Operation,
        deployment: Deployment,
        project: &Project,
        machine: &Machine,
        deploy_path: &str,
        log: &mut LogBlock,
    ) -> Result<Deployment, DeployError> {
        let deployment_id = deployment.id;
        let mut status = deployment.status;
        if let Some(begin) = operation.begin_event() {
            status = next_status(deployment_id, status, begin)?;
            self.store
                .commit(deployment_id, DeploymentUpdate::status(status))
                .await?;
        }

        let sink: Arc<dyn ProgressSink> = self.broadcaster.clone();
        let reporter = ProgressReporter::new(sink, project.id);

        let outcome = self
            .perform(operation, project, machine, deploy_path, &reporter, log)
            .await;

        if let Err(e) = &outcome {
            error!("{} of deployment {} failed: {}", operation, deployment_id, e);
            log.line(format!("error: {}", e));
            reporter.fail(&e.to_string());
        }

        let succeeded = outcome.is_ok();
        let status = next_status(deployment_id, status, operation.outcome_event(succeeded))?;
        let mut block = log.clone();
        block.line(format!("status: {}", status));
        let deployment = self
            .store
            .commit(deployment_id, DeploymentUpdate::status(status).with_log(block))
            .await?;
        info!("Deployment {} is now {}", deployment_id, deployment.status);
        Ok(deployment)
    }

    /// Best-effort commit of the operation's failed status after the unit
    /// could not record its own outcome.
    async fn abandon(
        &self,
        deployment_id: u64,
        operation: &Operation,
        mut log: LogBlock,
        cause: &DeployError,
    ) {
        let status = operation.failed_status();
        log.line(format!("aborted: {}", cause));
        log.line(format!("status: {}", status));
        match self
            .store
            .commit(deployment_id, DeploymentUpdate::status(status).with_log(log))
            .await
        {
            Ok(_) => warn!(
                "{} of deployment {} aborted ({}); recorded as {}",
                operation, deployment_id, cause, status
            ),
            Err(e) => error!(
                "Unable to record {} for deployment {} after {}: {}",
                status, deployment_id, cause, e
            ),
        }
    }

    /// Connect, act, and close. The session is closed on every path that
    /// opened one.
    async fn perform(
        &self,
        operation: &Operation,
        project: &Project,
        machine: &Machine,
        deploy_path: &str,
        reporter: &ProgressReporter,
        log: &mut LogBlock,
    ) -> Result<(), DeployError> {
        let params = ConnectParams::for_machine(machine, self.settings.ssh.connect_timeout());
        let guard = match SessionGuard::open(self.connector.as_ref(), &params).await {
            Ok(guard) => guard,
            Err(e) => {
                log.line(format!("connection failed ({}): {}", e.kind(), e));
                log.line("no remote command was run");
                return Err(e.into());
            }
        };

        let result = self
            .perform_on(guard.session(), operation, project, machine, deploy_path, reporter, log)
            .await;
        guard.close().await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn perform_on(
        &self,
        session: &dyn RemoteSession,
        operation: &Operation,
        project: &Project,
        machine: &Machine,
        deploy_path: &str,
        reporter: &ProgressReporter,
        log: &mut LogBlock,
    ) -> Result<(), DeployError> {
        let detection = detect(session, machine.platform_hint).await;
        let profile = detection.profile;
        log.line(format!(
            "platform: {} ({})",
            profile.family(),
            detection.source
        ));

        match operation {
            Operation::Sync => {
                let report = self
                    .engine
                    .sync(project, deploy_path, session, profile, reporter)
                    .await?;
                for line in report.log_lines() {
                    log.line(line);
                }
            }
            Operation::Deploy(_) => {
                reporter.start(&format!("Deploying {} to {}", project.name, deploy_path));
                let report = self
                    .engine
                    .sync_steps(project, deploy_path, session, profile, reporter)
                    .await?;
                for line in report.log_lines() {
                    log.line(line);
                }
                if self.settings.sync.install_dependencies {
                    reporter.progress(96, "Installing dependencies");
                    let failures = install_dependencies(session, &profile, deploy_path, log).await;
                    if failures > 0 {
                        warn!("{} dependency step(s) failed for {}", failures, project.name);
                    }
                }
                reporter.complete(&report.summary());
            }
            Operation::Start => {
                reporter.start(&format!("Starting {}", project.name));
                let launcher = ProcessController::new(session, profile)
                    .start(deploy_path, log)
                    .await?;
                reporter.complete(&format!("Started via {}", launcher.file_name()));
            }
            Operation::Stop => {
                reporter.start(&format!("Stopping {}", project.name));
                let method = ProcessController::new(session, profile)
                    .stop(deploy_path, project, log)
                    .await?;
                let message = match method {
                    StopMethod::Launcher(launcher) => format!("Stopped via {}", launcher.file_name()),
                    StopMethod::Fallback(_) => "Stopped by process name".to_string(),
                };
                reporter.complete(&message);
            }
        }
        Ok(())
    }
}

fn next_status(
    deployment_id: u64,
    from: DeploymentStatus,
    event: DeploymentEvent,
) -> Result<DeploymentStatus, DeployError> {
    transition(from, event).ok_or_else(|| {
        DeployError::Internal(format!(
            "deployment {}: no transition from {} on {:?}",
            deployment_id, from, event
        ))
    })
}
