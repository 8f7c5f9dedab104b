//! Dependency installation after a deploy's sync

use tracing::{info, warn};

use crate::models::deployment::LogBlock;
use crate::remote::platform::PlatformProfile;
use crate::remote::session::{EntryKind, RemoteSession};

/// A manifest file and the command that installs what it lists
#[derive(Debug, Clone, Copy)]
pub struct SetupStep {
    pub manifest: &'static str,
    pub command: &'static str,
}

/// Steps run in order for every manifest present at the project root
pub const SETUP_STEPS: &[SetupStep] = &[
    SetupStep {
        manifest: "package.json",
        command: "npm install",
    },
    SetupStep {
        manifest: "requirements.txt",
        command: "pip install -r requirements.txt",
    },
];

/// Run the matching setup steps in `target`.
///
/// Failures are written to `log` as warnings and never abort the caller.
/// Returns the number of steps that failed.
pub async fn install_dependencies(
    session: &dyn RemoteSession,
    profile: &PlatformProfile,
    target: &str,
    log: &mut LogBlock,
) -> usize {
    let channel = session.open_file_channel(profile.family());
    let entries = match channel.list_entries(target).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not list {} for dependency setup: {}", target, e);
            log.line(format!("warning: dependency setup skipped: {}", e));
            return 1;
        }
    };

    let mut failures = 0;
    for step in SETUP_STEPS {
        let present = entries
            .iter()
            .any(|e| e.kind == EntryKind::File && e.name == step.manifest);
        if !present {
            continue;
        }

        info!("Running `{}` in {}", step.command, target);
        let command = profile.in_directory(target, step.command);
        match session.execute(&command).await {
            Ok(out) if out.success() => {
                log.line(format!("{}: ok", step.command));
            }
            Ok(out) => {
                failures += 1;
                warn!("`{}` exited with {}", step.command, out.exit_code);
                log.line(format!(
                    "warning: `{}` exited with {}",
                    step.command, out.exit_code
                ));
                log.output("stderr", &out.stderr);
            }
            Err(e) => {
                failures += 1;
                warn!("`{}` failed: {}", step.command, e);
                log.line(format!("warning: `{}` failed: {}", step.command, e));
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::platform::PlatformFamily;
    use crate::remote::session::ExecOutput;
    use crate::remote::testing::FakeRemote;

    #[tokio::test]
    async fn test_only_present_manifests_run_and_failures_are_warnings() {
        let remote = FakeRemote::new("example.com");
        remote.add_file("/srv/app/requirements.txt", b"flask\n", 1);
        remote.respond("pip install", ExecOutput::new(1, "", "No matching distribution"));
        let session = remote.session();
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);
        let mut log = LogBlock::new("deploy");

        let failures = install_dependencies(&session, &profile, "/srv/app", &mut log).await;

        assert_eq!(failures, 1);
        let commands = remote.commands();
        assert!(commands.iter().any(|c| c == "cd '/srv/app' && pip install -r requirements.txt"));
        assert!(!commands.iter().any(|c| c.contains("npm install")));
        assert!(log.lines().iter().any(|l| l.starts_with("warning:")));
    }
}
