//! Starting and stopping deployed applications

use tracing::{info, warn};

use crate::errors::{CommandError, DeployError};
use crate::models::deployment::LogBlock;
use crate::models::project::{Project, ProjectCategory};
use crate::remote::platform::{PlatformFamily, PlatformProfile, EXISTS_MARKER};
use crate::remote::session::{ExecOutput, RemoteSession};

/// Environment applied to every launcher so output decodes the same everywhere
const LAUNCH_ENV: &[(&str, &str)] = &[("PYTHONIOENCODING", "utf-8"), ("PYTHONUTF8", "1")];

/// Multi-service launcher script
pub const MULTI_SERVICE_LAUNCHER: &str = "start_all.py";

/// A start or stop entry point found in the deploy directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
    /// Python launcher that starts every service, and stops them with `--stop`
    MultiService(&'static str),
    /// Platform shell or batch script
    Script(&'static str),
}

impl Launcher {
    pub fn file_name(&self) -> &'static str {
        match self {
            Launcher::MultiService(name) | Launcher::Script(name) => name,
        }
    }
}

/// Start candidates in priority order; the first one present wins
pub fn start_candidates(family: PlatformFamily) -> &'static [Launcher] {
    match family {
        PlatformFamily::Unix => &[
            Launcher::MultiService(MULTI_SERVICE_LAUNCHER),
            Launcher::Script("start.sh"),
            Launcher::Script("start_all.sh"),
            Launcher::Script("run.sh"),
            Launcher::Script("app.sh"),
        ],
        PlatformFamily::Windows => &[
            Launcher::MultiService(MULTI_SERVICE_LAUNCHER),
            Launcher::Script("start.bat"),
            Launcher::Script("start_all.bat"),
            Launcher::Script("run.bat"),
            Launcher::Script("app.bat"),
        ],
    }
}

/// Stop candidates in priority order
pub fn stop_candidates(family: PlatformFamily) -> &'static [Launcher] {
    match family {
        PlatformFamily::Unix => &[
            Launcher::MultiService(MULTI_SERVICE_LAUNCHER),
            Launcher::Script("stop_all.sh"),
        ],
        PlatformFamily::Windows => &[
            Launcher::MultiService(MULTI_SERVICE_LAUNCHER),
            Launcher::Script("stop_all.bat"),
        ],
    }
}

/// Best-effort termination used when no stop launcher exists
pub fn fallback_stop_command(
    profile: &PlatformProfile,
    category: ProjectCategory,
    process_name: &str,
) -> String {
    match profile.family() {
        PlatformFamily::Windows => match category {
            ProjectCategory::Backend => "taskkill /F /IM python.exe".to_string(),
            ProjectCategory::Frontend => "taskkill /F /IM node.exe".to_string(),
            ProjectCategory::Fullstack => {
                "taskkill /F /IM python.exe & taskkill /F /IM node.exe".to_string()
            }
        },
        PlatformFamily::Unix => {
            let pattern = match category {
                ProjectCategory::Backend => format!("python.*{}", process_name),
                ProjectCategory::Frontend => format!("node.*{}", process_name),
                ProjectCategory::Fullstack => process_name.to_string(),
            };
            format!(
                "pkill -f {} || echo 'No process found'",
                profile.quote(&pattern)
            )
        }
    }
}

/// How a stop was carried out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopMethod {
    Launcher(Launcher),
    Fallback(String),
}

/// Finds and runs launchers in a deploy directory
pub struct ProcessController<'a> {
    session: &'a dyn RemoteSession,
    profile: PlatformProfile,
}

impl<'a> ProcessController<'a> {
    pub fn new(session: &'a dyn RemoteSession, profile: PlatformProfile) -> Self {
        Self { session, profile }
    }

    async fn file_present(&self, path: &str) -> Result<bool, CommandError> {
        let output = self.session.execute(&self.profile.file_exists(path)).await?;
        Ok(output.has_marker(EXISTS_MARKER))
    }

    async fn find(
        &self,
        deploy_path: &str,
        candidates: &[Launcher],
    ) -> Result<Option<Launcher>, CommandError> {
        for launcher in candidates {
            let path = self.profile.join(deploy_path, launcher.file_name());
            if self.file_present(&path).await? {
                return Ok(Some(*launcher));
            }
        }
        Ok(None)
    }

    /// Full command line for a launcher, run from `deploy_path`
    fn launch_command(&self, deploy_path: &str, launcher: Launcher, stop: bool) -> String {
        let inner = match launcher {
            Launcher::MultiService(name) => {
                let mode = if stop { "--stop" } else { "--port=0" };
                format!("{} {} {}", self.profile.python(), name, mode)
            }
            Launcher::Script(name) => self.profile.run_script(name),
        };
        self.profile
            .in_directory(deploy_path, &self.profile.with_env(LAUNCH_ENV, &inner))
    }

    async fn run(&self, command: &str, log: &mut LogBlock) -> Result<ExecOutput, CommandError> {
        log.line(format!("$ {}", command));
        let output = self.session.execute(command).await?;
        log.line(format!("exit code: {}", output.exit_code));
        log.output("stdout", &output.stdout);
        log.output("stderr", &output.stderr);
        Ok(output)
    }

    async fn prepare_script(&self, deploy_path: &str, launcher: Launcher) {
        if let Launcher::Script(name) = launcher {
            let path = self.profile.join(deploy_path, name);
            if let Some(chmod) = self.profile.make_executable(&path) {
                if let Err(e) = self.session.execute(&chmod).await {
                    warn!("chmod of {} failed: {}", path, e);
                }
            }
        }
    }

    /// Run the highest-priority start launcher in `deploy_path`.
    ///
    /// Success means the launcher exited zero; the service itself is not
    /// health-checked.
    pub async fn start(&self, deploy_path: &str, log: &mut LogBlock) -> Result<Launcher, DeployError> {
        let probe = self
            .session
            .execute(&self.profile.directory_exists(deploy_path))
            .await?;
        if !probe.has_marker(EXISTS_MARKER) {
            return Err(DeployError::TargetMissing(deploy_path.to_string()));
        }

        let launcher = self
            .find(deploy_path, start_candidates(self.profile.family()))
            .await?
            .ok_or_else(|| DeployError::NoLauncher(deploy_path.to_string()))?;
        log.line(format!("launcher: {}", launcher.file_name()));
        info!("Starting {} in {}", launcher.file_name(), deploy_path);

        self.prepare_script(deploy_path, launcher).await;
        let command = self.launch_command(deploy_path, launcher, false);
        self.run(&command, log).await?.check(&command)?;
        Ok(launcher)
    }

    /// Stop the application in `deploy_path`, falling back to process
    /// termination by category and name when no stop launcher exists.
    pub async fn stop(
        &self,
        deploy_path: &str,
        project: &Project,
        log: &mut LogBlock,
    ) -> Result<StopMethod, DeployError> {
        let probe = self
            .session
            .execute(&self.profile.directory_exists(deploy_path))
            .await?;
        let launcher = if probe.has_marker(EXISTS_MARKER) {
            self.find(deploy_path, stop_candidates(self.profile.family()))
                .await?
        } else {
            warn!("{} does not exist; using fallback stop", deploy_path);
            None
        };

        match launcher {
            Some(launcher) => {
                log.line(format!("stop via: {}", launcher.file_name()));
                info!("Stopping via {} in {}", launcher.file_name(), deploy_path);
                self.prepare_script(deploy_path, launcher).await;
                let command = self.launch_command(deploy_path, launcher, true);
                self.run(&command, log).await?.check(&command)?;
                Ok(StopMethod::Launcher(launcher))
            }
            None => {
                let command =
                    fallback_stop_command(&self.profile, project.category, &project.process_name());
                log.line("no stop launcher found; terminating by process name");
                info!("Fallback stop for {}: {}", project.name, command);
                let output = self.run(&command, log).await?;
                if !output.success() {
                    log.line("warning: fallback stop reported failure; treated as stopped");
                }
                Ok(StopMethod::Fallback(command))
            }
        }
    }
}
