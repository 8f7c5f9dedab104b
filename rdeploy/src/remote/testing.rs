//! In-memory remote host for tests

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::errors::{CommandError, ConnectionError, FileSyncError};
use crate::remote::platform::PlatformFamily;
use crate::remote::session::{
    ConnectParams, EntryKind, ExecOutput, FileChannel, RemoteEntry, RemoteSession, RemoteStat,
    SessionConnector,
};
use crate::utils;

#[derive(Debug, Clone)]
pub struct FakeFile {
    pub contents: Vec<u8>,
    pub modified: i64,
}

#[derive(Default)]
struct State {
    rules: Vec<(String, Result<ExecOutput, CommandError>)>,
    unmatched_exit: i32,
    commands: Vec<String>,
    files: BTreeMap<String, FakeFile>,
    dirs: BTreeSet<String>,
    puts: Vec<String>,
    failing_puts: BTreeSet<String>,
    closes: usize,
}

/// Scripted host: commands answer from substring rules, files live in maps
#[derive(Clone)]
pub struct FakeRemote {
    host: String,
    state: Arc<Mutex<State>>,
}

impl FakeRemote {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Answer any command containing `needle`; earlier rules win
    pub fn respond(&self, needle: &str, output: ExecOutput) {
        self.lock().rules.push((needle.to_string(), Ok(output)));
    }

    /// Fail any command containing `needle` before it produces output
    pub fn error(&self, needle: &str, error: CommandError) {
        self.lock().rules.push((needle.to_string(), Err(error)));
    }

    /// Exit code for commands no rule matches (default 0)
    pub fn fail_unmatched(&self, exit_code: i32) {
        self.lock().unmatched_exit = exit_code;
    }

    pub fn add_file(&self, path: &str, contents: &[u8], modified: i64) {
        self.lock().files.insert(
            path.to_string(),
            FakeFile {
                contents: contents.to_vec(),
                modified,
            },
        );
    }

    pub fn add_dir(&self, path: &str) {
        self.lock().dirs.insert(path.to_string());
    }

    pub fn fail_put(&self, remote: &str) {
        self.lock().failing_puts.insert(remote.to_string());
    }

    pub fn file(&self, path: &str) -> Option<FakeFile> {
        self.lock().files.get(path).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn puts(&self) -> Vec<String> {
        self.lock().puts.clone()
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            remote: self.clone(),
            closed: false,
        }
    }
}

pub struct FakeSession {
    remote: FakeRemote,
    closed: bool,
}

#[async_trait]
impl RemoteSession for FakeSession {
    fn host(&self) -> &str {
        &self.remote.host
    }

    async fn execute(&self, command: &str) -> Result<ExecOutput, CommandError> {
        let mut state = self.remote.lock();
        state.commands.push(command.to_string());
        let hit = state
            .rules
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, out)| out.clone());
        hit.unwrap_or_else(|| Ok(ExecOutput::new(state.unmatched_exit, "", "")))
    }

    fn open_file_channel(&self, _family: PlatformFamily) -> Box<dyn FileChannel + '_> {
        Box::new(FakeChannel {
            remote: &self.remote,
        })
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.remote.lock().closes += 1;
        }
    }
}

struct FakeChannel<'a> {
    remote: &'a FakeRemote,
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_end_matches('/').to_string()
}

#[async_trait]
impl FileChannel for FakeChannel<'_> {
    async fn put(&self, local: &Path, remote: &str) -> Result<(), FileSyncError> {
        let contents = std::fs::read(local)
            .map_err(|e| FileSyncError::new(local.display().to_string(), e.to_string()))?;
        let modified = std::fs::metadata(local)
            .and_then(|m| m.modified())
            .map(utils::unix_seconds)
            .map_err(|e| FileSyncError::new(local.display().to_string(), e.to_string()))?;

        let mut state = self.remote.lock();
        let key = normalize(remote);
        if state.failing_puts.contains(&key) {
            return Err(FileSyncError::new(remote, "scripted failure"));
        }
        state.puts.push(key.clone());
        state.files.insert(key, FakeFile { contents, modified });
        Ok(())
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<(), FileSyncError> {
        let file = self
            .remote
            .file(&normalize(remote))
            .ok_or_else(|| FileSyncError::new(remote, "No such file"))?;
        std::fs::write(local, &file.contents)
            .map_err(|e| FileSyncError::new(remote, e.to_string()))
    }

    async fn list_entries(&self, remote_dir: &str) -> Result<Vec<RemoteEntry>, FileSyncError> {
        let prefix = format!("{}/", normalize(remote_dir));
        let state = self.remote.lock();
        let mut seen = BTreeMap::new();
        for path in state.files.keys() {
            if let Some(rest) = path.strip_prefix(&prefix) {
                match rest.split_once('/') {
                    Some((dir, _)) => seen.insert(dir.to_string(), EntryKind::Directory),
                    None => seen.insert(rest.to_string(), EntryKind::File),
                };
            }
        }
        for path in &state.dirs {
            if let Some(rest) = normalize(path).strip_prefix(&prefix) {
                let name = rest.split('/').next().unwrap_or(rest);
                if !name.is_empty() {
                    seen.insert(name.to_string(), EntryKind::Directory);
                }
            }
        }
        Ok(seen
            .into_iter()
            .map(|(name, kind)| RemoteEntry { name, kind })
            .collect())
    }

    async fn stat(&self, remote: &str) -> Result<Option<RemoteStat>, FileSyncError> {
        Ok(self.remote.file(&normalize(remote)).map(|f| RemoteStat {
            size: f.contents.len() as u64,
            modified: f.modified,
            kind: EntryKind::File,
        }))
    }
}

/// Connector handing out sessions on one [`FakeRemote`]
pub struct FakeConnector {
    remote: FakeRemote,
    failure: Mutex<Option<ConnectionError>>,
    gate: Option<Arc<Semaphore>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(remote: FakeRemote) -> Self {
        Self {
            remote,
            failure: Mutex::new(None),
            gate: None,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn failing(remote: FakeRemote, error: ConnectionError) -> Self {
        let connector = Self::new(remote);
        *connector.failure.lock().unwrap() = Some(error);
        connector
    }

    /// Block every connect until a permit is added to `gate`
    pub fn gated(remote: FakeRemote, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(remote)
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        _params: &ConnectParams<'_>,
    ) -> Result<Box<dyn RemoteSession>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(Box::new(self.remote.session()))
    }
}
