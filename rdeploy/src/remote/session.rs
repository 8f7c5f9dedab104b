//! Remote command and file channel abstraction

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::{CommandError, ConnectionError, FileSyncError};
use crate::models::machine::{Credential, Machine};
use crate::remote::platform::PlatformFamily;

/// Output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// True when some stdout line is exactly `marker`.
    ///
    /// Whole-line comparison keeps `EXISTS` from matching `NOT_EXISTS`.
    pub fn has_marker(&self, marker: &str) -> bool {
        self.stdout.lines().any(|line| line.trim() == marker)
    }

    /// Turn a non-zero exit into a `CommandError::Failed`
    pub fn check(self, command: &str) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::Failed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Size and modification time of a remote path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified: i64,
    pub kind: EntryKind,
}

/// Per-path file operations on the remote host
#[async_trait]
pub trait FileChannel: Send + Sync {
    /// Upload a local file, preserving its modification time
    async fn put(&self, local: &Path, remote: &str) -> Result<(), FileSyncError>;

    /// Download a remote file
    async fn get(&self, remote: &str, local: &Path) -> Result<(), FileSyncError>;

    /// Children of a remote directory; a missing directory lists as empty
    async fn list_entries(&self, remote_dir: &str) -> Result<Vec<RemoteEntry>, FileSyncError>;

    /// `None` when the path does not exist
    async fn stat(&self, remote: &str) -> Result<Option<RemoteStat>, FileSyncError>;
}

/// One command + file channel to one host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn host(&self) -> &str;

    /// Run a command. A non-zero exit is reported in the output, never as an error.
    async fn execute(&self, command: &str) -> Result<ExecOutput, CommandError>;

    /// File operations using the path conventions of `family`
    fn open_file_channel(&self, family: PlatformFamily) -> Box<dyn FileChannel + '_>;

    /// Release the session. Calling it more than once is harmless.
    async fn close(&mut self);
}

/// Connection parameters for one host
#[derive(Debug)]
pub struct ConnectParams<'a> {
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub credential: &'a Credential,
    pub timeout: Duration,
}

impl<'a> ConnectParams<'a> {
    pub fn for_machine(machine: &'a Machine, timeout: Duration) -> Self {
        Self {
            host: &machine.host,
            port: machine.port,
            username: &machine.username,
            credential: &machine.credential,
            timeout,
        }
    }
}

/// Opens sessions; one attempt per call, no retry
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        params: &ConnectParams<'_>,
    ) -> Result<Box<dyn RemoteSession>, ConnectionError>;
}

/// Owns an open session for the length of one unit of work
pub struct SessionGuard {
    session: Option<Box<dyn RemoteSession>>,
}

impl SessionGuard {
    pub async fn open(
        connector: &dyn SessionConnector,
        params: &ConnectParams<'_>,
    ) -> Result<Self, ConnectionError> {
        let session = connector.connect(params).await?;
        Ok(Self {
            session: Some(session),
        })
    }

    pub fn session(&self) -> &dyn RemoteSession {
        match &self.session {
            Some(session) => session.as_ref(),
            None => unreachable!("session is only taken by close()"),
        }
    }

    /// Close the session; consumes the guard
    pub async fn close(mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            // Implementations release their transport on drop as well.
            warn!("Session to {} dropped without close", session.host());
        }
    }
}
