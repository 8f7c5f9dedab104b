//! Version-control strategy: the remote host clones or pulls the repository itself

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::{CommandError, DeployError};
use crate::filesys::dir::Dir;
use crate::progress::ProgressReporter;
use crate::remote::platform::EXISTS_MARKER;
use crate::remote::session::{EntryKind, FileChannel};
use crate::sync::engine::{CheckoutAction, SyncContext, SyncReport, SyncStrategy};
use crate::sync::ignore::{is_whitelisted, read_patterns, PatternSet, IGNORE_FILE};

/// Repository metadata directory; never removed by cleanup
const REPOSITORY_MARKER: &str = ".git";

#[derive(Debug, Clone, Copy, Default)]
pub struct VersionControlStrategy;

#[async_trait]
impl SyncStrategy for VersionControlStrategy {
    fn name(&self) -> &'static str {
        "version_control"
    }

    async fn run(
        &self,
        ctx: &SyncContext<'_>,
        reporter: &ProgressReporter,
    ) -> Result<SyncReport, DeployError> {
        let mut report = SyncReport::new(self.name());
        let channel = ctx.session.open_file_channel(ctx.profile.family());

        reporter.progress(20, "Checking for an existing working copy");
        let marker = ctx.profile.join(ctx.target, REPOSITORY_MARKER);
        let has_repository = ctx
            .session
            .execute(&ctx.profile.directory_exists(&marker))
            .await?
            .has_marker(EXISTS_MARKER);

        let action = if has_repository {
            reporter.progress(30, "Updating working copy");
            match update_in_place(ctx).await {
                Ok(()) => CheckoutAction::Updated,
                Err(e) => {
                    warn!("Update of {} failed, re-checking out: {}", ctx.target, e);
                    reporter.progress(50, "Update failed; checking out again");
                    report.restored = checkout(ctx, channel.as_ref()).await?;
                    CheckoutAction::Recheckout
                }
            }
        } else {
            reporter.progress(30, "No working copy; performing fresh checkout");
            report.restored = checkout(ctx, channel.as_ref()).await?;
            reporter.progress(50, "Checkout complete");
            CheckoutAction::FreshCheckout
        };
        report.checkout = Some(action);
        info!("{}: {}", ctx.target, action.describe());

        reporter.progress(70, "Applying ignore rules");
        match cleanup_ignored(ctx, channel.as_ref()).await {
            Ok(removed) => report.removed = removed,
            Err(e) => warn!("Ignore cleanup in {} failed: {}", ctx.target, e),
        }

        reporter.progress(90, "Working copy ready");
        reporter.progress(95, "Finalizing");
        Ok(report)
    }
}

async fn update_in_place(ctx: &SyncContext<'_>) -> Result<(), CommandError> {
    let command = ctx.profile.in_directory(ctx.target, "git pull");
    ctx.session.execute(&command).await?.check(&command)?;
    Ok(())
}

/// Clone into `ctx.target`, keeping whitelisted files that were already there.
///
/// Returns the names of files that had to be put back.
async fn checkout(
    ctx: &SyncContext<'_>,
    channel: &dyn FileChannel,
) -> Result<Vec<String>, DeployError> {
    let existing = match channel.list_entries(ctx.target).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not list {} before checkout: {}", ctx.target, e);
            Vec::new()
        }
    };

    let backup = Dir::create_temp_dir("rdeploy-backup").await?;
    let mut saved = Vec::new();
    for entry in existing
        .iter()
        .filter(|e| e.kind == EntryKind::File && is_whitelisted(&e.name))
    {
        let remote = ctx.profile.join(ctx.target, &entry.name);
        match channel.get(&remote, &backup.path().join(&entry.name)).await {
            Ok(()) => saved.push(entry.name.clone()),
            Err(e) => warn!("Could not back up {}: {}", remote, e),
        }
    }

    let result = clone_fresh(ctx, !existing.is_empty()).await;

    let mut restored = Vec::new();
    if result.is_ok() {
        for name in &saved {
            let remote = ctx.profile.join(ctx.target, name);
            match channel.stat(&remote).await {
                Ok(Some(_)) => debug!("{} recreated by checkout", remote),
                Ok(None) => match channel.put(&backup.path().join(name), &remote).await {
                    Ok(()) => restored.push(name.clone()),
                    Err(e) => warn!("Could not restore {}: {}", remote, e),
                },
                Err(e) => warn!("Could not stat {}: {}", remote, e),
            }
        }
    }

    if let Err(e) = backup.delete().await {
        warn!("Could not remove backup dir {}: {}", backup.path().display(), e);
    }
    result.map(|()| restored)
}

async fn clone_fresh(ctx: &SyncContext<'_>, clear_first: bool) -> Result<(), DeployError> {
    let profile = &ctx.profile;
    if clear_first {
        let command = profile.remove_tree(ctx.target);
        ctx.session.execute(&command).await?.check(&command)?;
    }

    let command = format!(
        "git clone {} {}",
        profile.quote(&ctx.project.repository_location),
        profile.quote(ctx.target)
    );
    ctx.session.execute(&command).await?.check(&command)?;
    Ok(())
}

/// Delete everything in the working copy that the ignore rules exclude
async fn cleanup_ignored(
    ctx: &SyncContext<'_>,
    channel: &dyn FileChannel,
) -> Result<Vec<String>, DeployError> {
    let patterns = remote_patterns(ctx, channel).await?;
    let mut removed = Vec::new();
    let mut pending = vec![String::new()];

    while let Some(relative) = pending.pop() {
        let dir = ctx.profile.join(ctx.target, &relative);
        let entries = match channel.list_entries(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping cleanup of {}: {}", dir, e);
                continue;
            }
        };

        for entry in entries {
            if entry.name == REPOSITORY_MARKER {
                continue;
            }
            let child = if relative.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", relative, entry.name)
            };
            if is_whitelisted(&child) {
                continue;
            }

            let is_dir = entry.kind == EntryKind::Directory;
            if !patterns.is_ignored(&child, is_dir) {
                if is_dir {
                    pending.push(child);
                }
                continue;
            }

            let path = ctx.profile.join(ctx.target, &child);
            let command = if is_dir {
                ctx.profile.remove_tree(&path)
            } else {
                ctx.profile.remove_file(&path)
            };
            match ctx.session.execute(&command).await {
                Ok(out) if out.success() => removed.push(child),
                Ok(out) => warn!("Could not remove {}: {}", path, out.stderr.trim()),
                Err(e) => warn!("Could not remove {}: {}", path, e),
            }
        }
    }
    Ok(removed)
}

/// Root ignore patterns merged with the working copy's own ignore file
async fn remote_patterns(
    ctx: &SyncContext<'_>,
    channel: &dyn FileChannel,
) -> Result<PatternSet, DeployError> {
    let mut patterns = match &ctx.options.root_ignore_file {
        Some(path) => read_patterns(path).await?,
        None => Vec::new(),
    };

    let scratch = Dir::create_temp_dir("rdeploy-ignore").await?;
    let local = scratch.path().join(IGNORE_FILE);
    let remote = ctx.profile.join(ctx.target, IGNORE_FILE);
    match channel.get(&remote, &local).await {
        Ok(()) => patterns.extend(read_patterns(&local).await?),
        Err(e) => debug!("No remote ignore file at {}: {}", remote, e),
    }
    if let Err(e) = scratch.delete().await {
        warn!("Could not remove {}: {}", scratch.path().display(), e);
    }

    PatternSet::new(patterns)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::project::{Project, ProjectCategory, RepositoryType};
    use crate::progress::reporter::recording::RecordingSink;
    use crate::progress::ProgressStatus;
    use crate::remote::platform::{PlatformFamily, PlatformProfile};
    use crate::remote::session::ExecOutput;
    use crate::remote::testing::FakeRemote;
    use crate::sync::engine::{SyncEngine, SyncOptions};

    fn project() -> Project {
        Project {
            id: 1,
            name: "demo".to_string(),
            repository_type: RepositoryType::VersionControl,
            repository_location: "https://example.com/demo.git".to_string(),
            storage_path: std::env::temp_dir(),
            category: ProjectCategory::Fullstack,
        }
    }

    #[tokio::test]
    async fn test_fresh_checkout_when_no_marker() {
        let remote = FakeRemote::new("example.com");
        let session = remote.session();
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new(sink.clone(), 1);
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);

        let report = SyncEngine::new(SyncOptions::default())
            .sync(&project(), "/srv/demo", &session, profile, &reporter)
            .await
            .unwrap();

        assert_eq!(report.checkout, Some(CheckoutAction::FreshCheckout));
        let commands = remote.commands();
        assert!(commands
            .iter()
            .any(|c| c == "git clone 'https://example.com/demo.git' '/srv/demo'"));
        assert!(!commands.iter().any(|c| c.contains("git pull")));

        let events = sink.events();
        assert_eq!(events.first().map(|e| e.status), Some(ProgressStatus::Start));
        assert_eq!(events.last().map(|e| e.status), Some(ProgressStatus::Complete));
        assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
    }

    #[tokio::test]
    async fn test_failed_pull_rechecks_out_and_restores_important_files() {
        let remote = FakeRemote::new("example.com");
        remote.respond("/srv/demo/.git", ExecOutput::new(0, "EXISTS\n", ""));
        remote.respond("git pull", ExecOutput::new(1, "", "fatal: corrupt"));
        remote.add_file("/srv/demo/prompt.txt", b"keep me", 100);
        remote.add_file("/srv/demo/main.py", b"print()", 100);
        let session = remote.session();
        let reporter = ProgressReporter::new(Arc::new(RecordingSink::default()), 1);
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);

        let report = SyncEngine::default()
            .sync(&project(), "/srv/demo", &session, profile, &reporter)
            .await
            .unwrap();

        assert_eq!(report.checkout, Some(CheckoutAction::Recheckout));
        let commands = remote.commands();
        let rm = commands.iter().position(|c| c == "rm -rf '/srv/demo'").unwrap();
        let clone = commands.iter().position(|c| c.starts_with("git clone")).unwrap();
        assert!(rm < clone);
        // the fake does not delete files, so the stat finds prompt.txt again
        assert!(report.restored.is_empty());
    }

    #[tokio::test]
    async fn test_clone_failure_is_terminal() {
        let remote = FakeRemote::new("example.com");
        remote.respond("git clone", ExecOutput::new(128, "", "fatal: repository not found"));
        let session = remote.session();
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new(sink.clone(), 1);
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);

        let err = SyncEngine::default()
            .sync(&project(), "/srv/demo", &session, profile, &reporter)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Command(CommandError::Failed { exit_code: 128, .. })));
        assert_eq!(sink.events().last().map(|e| e.status), Some(ProgressStatus::Error));
    }

    #[tokio::test]
    async fn test_cleanup_removes_ignored_but_keeps_marker_and_whitelist() {
        let remote = FakeRemote::new("example.com");
        remote.add_file("/srv/demo/.git/HEAD", b"ref", 1);
        remote.add_file("/srv/demo/node_modules/x/index.js", b"x", 1);
        remote.add_file("/srv/demo/src/cache.pyc", b"x", 1);
        remote.add_file("/srv/demo/src/main.py", b"x", 1);
        remote.add_file("/srv/demo/README.md", b"x", 1);
        remote.add_file("/srv/demo/.gitignore", b"*.md\n", 1);
        let session = remote.session();
        let reporter = ProgressReporter::new(Arc::new(RecordingSink::default()), 1);
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);

        let report = SyncEngine::default()
            .sync(&project(), "/srv/demo", &session, profile, &reporter)
            .await
            .unwrap();

        let mut removed = report.removed.clone();
        removed.sort();
        assert_eq!(removed, vec!["node_modules", "src/cache.pyc"]);
        assert!(!remote.commands().iter().any(|c| c.contains(".git'") && c.starts_with("rm")));
    }

    fn timed_out(command: &str) -> CommandError {
        CommandError::TimedOut {
            command: command.to_string(),
            after: std::time::Duration::from_secs(1800),
        }
    }

    #[tokio::test]
    async fn test_pull_timeout_rechecks_out() {
        let remote = FakeRemote::new("example.com");
        remote.respond("/srv/demo/.git", ExecOutput::new(0, "EXISTS\n", ""));
        remote.error("git pull", timed_out("git pull"));
        remote.add_file("/srv/demo/main.py", b"print()", 100);
        let session = remote.session();
        let reporter = ProgressReporter::new(Arc::new(RecordingSink::default()), 1);
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);

        let report = SyncEngine::default()
            .sync(&project(), "/srv/demo", &session, profile, &reporter)
            .await
            .unwrap();

        assert_eq!(report.checkout, Some(CheckoutAction::Recheckout));
        assert!(remote.commands().iter().any(|c| c.starts_with("git clone")));
    }

    #[tokio::test]
    async fn test_clone_timeout_is_terminal() {
        let remote = FakeRemote::new("example.com");
        remote.error("git clone", timed_out("git clone"));
        let session = remote.session();
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new(sink.clone(), 1);
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);

        let err = SyncEngine::default()
            .sync(&project(), "/srv/demo", &session, profile, &reporter)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Command(CommandError::TimedOut { .. })));
        let events = sink.events();
        assert_eq!(events.last().map(|e| e.status), Some(ProgressStatus::Error));
        assert_eq!(events.iter().filter(|e| e.status.is_terminal()).count(), 1);
    }
}
