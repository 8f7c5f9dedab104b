//! Plain-copy strategy: walk the local tree and upload what changed

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::errors::{DeployError, FileSyncError};
use crate::progress::ProgressReporter;
use crate::remote::platform::PlatformProfile;
use crate::remote::session::{EntryKind, FileChannel, RemoteSession};
use crate::sync::engine::{SyncContext, SyncReport, SyncStrategy};
use crate::sync::ignore::{load_patterns, PatternSet, IGNORE_FILE};
use crate::utils;

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCopyStrategy;

/// A local file scheduled for upload
#[derive(Debug)]
struct LocalFile {
    path: PathBuf,
    /// Relative path with `/` separators
    relative: String,
    size: u64,
    modified: i64,
}

/// One directory of the local tree and the files directly inside it
#[derive(Debug)]
struct LocalDir {
    relative: String,
    files: Vec<LocalFile>,
}

fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// What a single local directory entry turned out to be
#[derive(Debug)]
enum LocalEntry {
    Dir(String),
    File(LocalFile),
    Skipped,
}

fn local_error(path: &Path, e: std::io::Error) -> FileSyncError {
    FileSyncError::new(path.display().to_string(), e.to_string())
}

/// Classify one entry. Fails when the entry cannot be inspected, e.g. it
/// vanished after the directory was read.
async fn local_entry(
    path: PathBuf,
    child: String,
    patterns: &PatternSet,
) -> Result<LocalEntry, FileSyncError> {
    let link = fs::symlink_metadata(&path).await.map_err(|e| local_error(&path, e))?;

    if link.is_dir() {
        if patterns.is_ignored(&child, true) {
            debug!("Ignoring directory {}", child);
            return Ok(LocalEntry::Skipped);
        }
        return Ok(LocalEntry::Dir(child));
    }
    if link.file_type().is_symlink() {
        // Follow links to files only
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                debug!("Skipping link {}", child);
                return Ok(LocalEntry::Skipped);
            }
        }
    }
    if patterns.is_ignored(&child, false) {
        debug!("Ignoring {}", child);
        return Ok(LocalEntry::Skipped);
    }

    let meta = fs::metadata(&path).await.map_err(|e| local_error(&path, e))?;
    Ok(LocalEntry::File(LocalFile {
        path,
        relative: child,
        size: meta.len(),
        modified: meta.modified().map(utils::unix_seconds).unwrap_or(0),
    }))
}

/// Depth-first listing of everything under `root` that the patterns keep.
/// Symlinked directories are not followed.
///
/// Only an unreadable `root` is an error; entries and subdirectories that
/// cannot be read are returned as failures and the walk goes on.
async fn scan(
    root: &Path,
    patterns: &PatternSet,
) -> Result<(Vec<LocalDir>, Vec<FileSyncError>), DeployError> {
    let mut dirs = Vec::new();
    let mut failed = Vec::new();
    let mut pending = vec![String::new()];

    while let Some(relative) = pending.pop() {
        let dir_path = if relative.is_empty() {
            root.to_path_buf()
        } else {
            root.join(&relative)
        };
        let mut entries = match fs::read_dir(&dir_path).await {
            Ok(entries) => entries,
            Err(e) if relative.is_empty() => return Err(e.into()),
            Err(e) => {
                warn!("Cannot read {}: {}", dir_path.display(), e);
                failed.push(local_error(&dir_path, e));
                continue;
            }
        };
        let mut files = Vec::new();
        let mut subdirs = Vec::new();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Listing {} stopped early: {}", dir_path.display(), e);
                    failed.push(local_error(&dir_path, e));
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = join_relative(&relative, &name);

            match local_entry(entry.path(), child, patterns).await {
                Ok(LocalEntry::Dir(child)) => subdirs.push(child),
                Ok(LocalEntry::File(file)) => files.push(file),
                Ok(LocalEntry::Skipped) => {}
                Err(e) => {
                    warn!("{}", e);
                    failed.push(e);
                }
            }
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        subdirs.sort();
        // Reverse so the stack pops them in name order
        pending.extend(subdirs.into_iter().rev());
        dirs.push(LocalDir { relative, files });
    }
    Ok((dirs, failed))
}

/// Names of regular entries already present in a remote directory
async fn remote_children(
    channel: &dyn FileChannel,
    dir: &str,
) -> HashMap<String, EntryKind> {
    match channel.list_entries(dir).await {
        Ok(entries) => entries.into_iter().map(|e| (e.name, e.kind)).collect(),
        Err(e) => {
            warn!("Could not list {}: {}", dir, e);
            HashMap::new()
        }
    }
}

async fn make_remote_dir(
    session: &dyn RemoteSession,
    profile: &PlatformProfile,
    path: &str,
) -> Result<(), FileSyncError> {
    let command = profile.make_directory(path);
    let output = session
        .execute(&command)
        .await
        .map_err(|e| FileSyncError::new(path, e.to_string()))?;
    if output.success() {
        Ok(())
    } else {
        Err(FileSyncError::new(path, output.stderr.trim()))
    }
}

fn is_unchanged(local: &LocalFile, remote_size: u64, remote_modified: i64, tolerance: i64) -> bool {
    local.size == remote_size && (local.modified - remote_modified).abs() <= tolerance
}

#[async_trait]
impl SyncStrategy for PlainCopyStrategy {
    fn name(&self) -> &'static str {
        "plain_copy"
    }

    async fn run(
        &self,
        ctx: &SyncContext<'_>,
        reporter: &ProgressReporter,
    ) -> Result<SyncReport, DeployError> {
        let mut report = SyncReport::new(self.name());
        let source = &ctx.project.storage_path;

        reporter.progress(20, "Loading ignore rules");
        let patterns = load_patterns(
            ctx.options.root_ignore_file.as_deref(),
            &source.join(IGNORE_FILE),
        )
        .await?;

        reporter.progress(30, &format!("Scanning {}", source.display()));
        let (dirs, unreadable) = scan(source, &patterns).await?;
        report.failed.extend(unreadable);
        let total: usize = dirs.iter().map(|d| d.files.len()).sum();
        debug!("{} file(s) in {} director(ies) to consider", total, dirs.len());

        reporter.progress(50, &format!("Comparing {} file(s)", total));
        let channel = ctx.session.open_file_channel(ctx.profile.family());
        let tolerance = ctx.options.mtime_tolerance_secs;
        let mut listings: HashMap<String, HashMap<String, EntryKind>> = HashMap::new();
        let mut done = 0usize;

        for dir in &dirs {
            let remote_dir = ctx.profile.join(ctx.target, &dir.relative);

            if !dir.relative.is_empty() {
                let (parent, name) = match dir.relative.rsplit_once('/') {
                    Some((parent, name)) => (parent.to_string(), name),
                    None => (String::new(), dir.relative.as_str()),
                };
                let exists = listings
                    .get(&parent)
                    .and_then(|children| children.get(name))
                    .is_some_and(|kind| *kind == EntryKind::Directory);
                if !exists {
                    if let Err(e) = make_remote_dir(ctx.session, &ctx.profile, &remote_dir).await {
                        warn!("{}", e);
                        report.failed.push(e);
                        done += dir.files.len();
                        continue;
                    }
                }
            }

            let children = remote_children(channel.as_ref(), &remote_dir).await;

            for file in &dir.files {
                done += 1;
                let name = file.relative.rsplit('/').next().unwrap_or(&file.relative);
                let remote_path = ctx.profile.join(ctx.target, &file.relative);

                if children.get(name) == Some(&EntryKind::File) {
                    match channel.stat(&remote_path).await {
                        Ok(Some(stat)) if is_unchanged(file, stat.size, stat.modified, tolerance) => {
                            report.skipped += 1;
                            continue;
                        }
                        Ok(_) => {}
                        Err(e) => debug!("stat {} failed, uploading: {}", remote_path, e),
                    }
                }

                match channel.put(&file.path, &remote_path).await {
                    Ok(()) => report.transferred += 1,
                    Err(e) => {
                        warn!("Transfer of {} failed: {}", file.relative, e);
                        report.failed.push(e);
                    }
                }

                if total > 0 {
                    let percent = 50 + (done * 40 / total) as u8;
                    reporter.progress(percent, &format!("Synced {}", file.relative));
                }
            }

            listings.insert(dir.relative.clone(), children);
        }

        reporter.progress(90, "Transfer finished");
        reporter.progress(95, &report.summary());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::filesys::dir::Dir;
    use crate::models::project::{Project, ProjectCategory, RepositoryType};
    use crate::progress::reporter::recording::RecordingSink;
    use crate::remote::platform::PlatformFamily;
    use crate::remote::testing::FakeRemote;
    use crate::sync::engine::{SyncEngine, SyncOptions};

    async fn local_tree() -> Dir {
        let dir = Dir::create_temp_dir("rdeploy-copy").await.unwrap();
        dir.file("main.py").write_string("print('hi')\n").await.unwrap();
        dir.file("src/util.py").write_string("X = 1\n").await.unwrap();
        dir.file("src/util.pyc").write_string("junk").await.unwrap();
        dir.file("node_modules/pkg/index.js").write_string("x").await.unwrap();
        dir.file("logs/today.log").write_string("x").await.unwrap();
        dir.file(".gitignore").write_string("*.log\n").await.unwrap();
        dir
    }

    fn project(storage: &Path) -> Project {
        Project {
            id: 9,
            name: "copy me".to_string(),
            repository_type: RepositoryType::PlainCopy,
            repository_location: storage.display().to_string(),
            storage_path: storage.to_path_buf(),
            category: ProjectCategory::Backend,
        }
    }

    #[tokio::test]
    async fn test_second_run_transfers_nothing() {
        let tree = local_tree().await;
        let project = project(tree.path());
        let remote = FakeRemote::new("example.com");
        let session = remote.session();
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);
        let engine = SyncEngine::new(SyncOptions::default());

        let first = engine
            .sync(
                &project,
                "/srv/copy",
                &session,
                profile,
                &ProgressReporter::new(Arc::new(RecordingSink::default()), 9),
            )
            .await
            .unwrap();
        assert_eq!(first.transferred, 3);
        assert_eq!(first.skipped, 0);

        let mut puts = remote.puts();
        puts.sort();
        assert_eq!(
            puts,
            vec!["/srv/copy/.gitignore", "/srv/copy/main.py", "/srv/copy/src/util.py"]
        );

        let second = engine
            .sync(
                &project,
                "/srv/copy",
                &session,
                profile,
                &ProgressReporter::new(Arc::new(RecordingSink::default()), 9),
            )
            .await
            .unwrap();
        assert_eq!(second.transferred, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(remote.puts().len(), 3);

        tree.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_failure_does_not_abort() {
        let tree = local_tree().await;
        let project = project(tree.path());
        let remote = FakeRemote::new("example.com");
        remote.fail_put("/srv/copy/main.py");
        let session = remote.session();
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);

        let report = SyncEngine::default()
            .sync(
                &project,
                "/srv/copy",
                &session,
                profile,
                &ProgressReporter::new(Arc::new(RecordingSink::default()), 9),
            )
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.transferred, 2);
        assert!(report.summary().contains("1 failed"));

        tree.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_changed_size_is_uploaded_again() {
        let tree = local_tree().await;
        let project = project(tree.path());
        let remote = FakeRemote::new("example.com");
        let session = remote.session();
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);
        let engine = SyncEngine::default();
        let reporter = || ProgressReporter::new(Arc::new(RecordingSink::default()), 9);

        engine.sync(&project, "/srv/copy", &session, profile, &reporter()).await.unwrap();
        tree.file("main.py").write_string("print('changed')\n").await.unwrap();
        let report = engine
            .sync(&project, "/srv/copy", &session, profile, &reporter())
            .await
            .unwrap();

        assert_eq!(report.transferred, 1);
        assert_eq!(report.skipped, 2);
        tree.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_vanished_entry_is_reported_not_fatal() {
        let tree = local_tree().await;
        let patterns = PatternSet::critical_only().unwrap();

        let err = local_entry(tree.path().join("gone.py"), "gone.py".to_string(), &patterns)
            .await
            .unwrap_err();
        assert!(err.path.ends_with("gone.py"));

        let kept = local_entry(tree.path().join("main.py"), "main.py".to_string(), &patterns)
            .await
            .unwrap();
        assert!(matches!(kept, LocalEntry::File(ref f) if f.relative == "main.py"));

        tree.delete().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_subdirectory_does_not_abort() {
        use std::os::unix::fs::PermissionsExt;

        let tree = local_tree().await;
        tree.file("locked/secret.py").write_string("S = 1\n").await.unwrap();
        let locked = tree.path().join("locked");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        let readable_anyway = std::fs::read_dir(&locked).is_ok();

        let project = project(tree.path());
        let remote = FakeRemote::new("example.com");
        let session = remote.session();
        let report = SyncEngine::default()
            .sync(
                &project,
                "/srv/copy",
                &session,
                PlatformProfile::for_family(PlatformFamily::Unix),
                &ProgressReporter::new(Arc::new(RecordingSink::default()), 9),
            )
            .await;

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        let report = report.unwrap();
        if readable_anyway {
            // Running as root: permissions do not stop the walk
            assert_eq!(report.transferred, 4);
        } else {
            assert_eq!(report.transferred, 3);
            assert_eq!(report.failed.len(), 1);
            assert!(report.failed[0].path.ends_with("locked"));
        }

        tree.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_remote_directory_is_not_created_again() {
        let tree = local_tree().await;
        let project = project(tree.path());
        let profile = PlatformProfile::for_family(PlatformFamily::Unix);
        let reporter = || ProgressReporter::new(Arc::new(RecordingSink::default()), 9);
        let mkdir_src = "mkdir -p '/srv/copy/src'";

        let fresh = FakeRemote::new("example.com");
        SyncEngine::default()
            .sync(&project, "/srv/copy", &fresh.session(), profile, &reporter())
            .await
            .unwrap();
        assert!(fresh.commands().iter().any(|c| c == mkdir_src));

        let prepared = FakeRemote::new("example.com");
        prepared.add_dir("/srv/copy/src");
        let report = SyncEngine::default()
            .sync(&project, "/srv/copy", &prepared.session(), profile, &reporter())
            .await
            .unwrap();
        assert!(!prepared.commands().iter().any(|c| c == mkdir_src));
        assert_eq!(report.transferred, 3);

        tree.delete().await.unwrap();
    }
}
