//! OpenSSH-backed sessions.
//!
//! A session is one multiplexing master (`ssh -M`) plus short-lived client
//! invocations that reuse its control socket. File transfer goes through
//! `scp` on the same socket, so authentication happens exactly once.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::errors::{CommandError, ConnectionError, FileSyncError};
use crate::models::machine::Credential;
use crate::remote::platform::{PlatformFamily, PlatformProfile};
use crate::remote::session::{
    ConnectParams, EntryKind, ExecOutput, FileChannel, RemoteEntry, RemoteSession, RemoteStat,
    SessionConnector,
};
use crate::utils;

const MASTER_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MASTER_GRACE: Duration = Duration::from_secs(5);

/// sshpass exit code for a rejected password
const SSHPASS_BAD_PASSWORD: i32 = 5;

/// External programs and limits used by SSH sessions
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub ssh_program: PathBuf,
    pub scp_program: PathBuf,
    pub sshpass_program: PathBuf,
    /// Where control sockets are created; keep it short, socket paths are length-limited
    pub control_dir: PathBuf,
    /// Upper bound for a single remote command; `None` waits forever
    pub command_timeout: Option<Duration>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_program: PathBuf::from("ssh"),
            scp_program: PathBuf::from("scp"),
            sshpass_program: PathBuf::from("sshpass"),
            control_dir: std::env::temp_dir().join("rdeploy-ssh"),
            command_timeout: Some(Duration::from_secs(1800)),
        }
    }
}

/// Opens [`SshSession`]s
#[derive(Debug, Clone)]
pub struct SshConnector {
    options: Arc<SshOptions>,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    async fn connect(
        &self,
        params: &ConnectParams<'_>,
    ) -> Result<Box<dyn RemoteSession>, ConnectionError> {
        let session = SshSession::connect(self.options.clone(), params).await?;
        Ok(Box::new(session))
    }
}

/// Host-key and logging options shared by every invocation
fn common_options(port: u16, control_path: &Path) -> Vec<String> {
    vec![
        "-o".into(),
        "StrictHostKeyChecking=no".into(),
        "-o".into(),
        "UserKnownHostsFile=/dev/null".into(),
        "-o".into(),
        "LogLevel=ERROR".into(),
        "-o".into(),
        format!("ControlPath={}", control_path.display()),
        "-o".into(),
        format!("Port={}", port),
    ]
}

/// `[user@]host`, with IPv6 literals bracketed for scp
fn scp_host(username: &str, host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("{}@[{}]", username, host)
    } else {
        format!("{}@{}", username, host)
    }
}

/// Map a failed master startup to a connection error kind
fn classify_connect_failure(host: &str, exit_code: Option<i32>, stderr: &str) -> ConnectionError {
    let detail = match stderr.trim() {
        "" => format!("ssh exited with {:?}", exit_code),
        s => s.to_string(),
    };
    let lower = stderr.to_lowercase();

    if exit_code == Some(SSHPASS_BAD_PASSWORD)
        || lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("too many authentication failures")
    {
        return ConnectionError::AuthenticationRejected {
            host: host.to_string(),
            detail,
        };
    }

    const UNREACHABLE: &[&str] = &[
        "connection refused",
        "timed out",
        "could not resolve",
        "name or service not known",
        "no route to host",
        "network is unreachable",
    ];
    if UNREACHABLE.iter().any(|needle| lower.contains(needle)) {
        return ConnectionError::Unreachable {
            host: host.to_string(),
            detail,
        };
    }

    ConnectionError::Protocol {
        host: host.to_string(),
        detail,
    }
}

/// A multiplexed SSH connection to one host
pub struct SshSession {
    host: String,
    port: u16,
    username: String,
    destination: String,
    control_path: PathBuf,
    master: Option<Child>,
    options: Arc<SshOptions>,
}

impl SshSession {
    /// Start the master connection and wait until its control socket answers
    pub async fn connect(
        options: Arc<SshOptions>,
        params: &ConnectParams<'_>,
    ) -> Result<Self, ConnectionError> {
        let protocol = |detail: String| ConnectionError::Protocol {
            host: params.host.to_string(),
            detail,
        };

        std::fs::create_dir_all(&options.control_dir)
            .map_err(|e| protocol(format!("cannot create control directory: {}", e)))?;

        let key = format!(
            "{}@{}:{}:{}",
            params.username,
            params.host,
            params.port,
            uuid::Uuid::new_v4()
        );
        let control_path = options
            .control_dir
            .join(format!("{}.sock", utils::short_digest(key.as_bytes(), 16)));
        let destination = format!("{}@{}", params.username, params.host);

        let mut args = common_options(params.port, &control_path);
        args.extend([
            "-M".to_string(),
            "-N".to_string(),
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", params.timeout.as_secs().max(1)),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
        ]);

        let mut command = match params.credential {
            Credential::KeyFile(path) => {
                args.extend([
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-o".to_string(),
                    "IdentitiesOnly=yes".to_string(),
                    "-i".to_string(),
                    path.display().to_string(),
                ]);
                let mut cmd = Command::new(&options.ssh_program);
                cmd.args(&args);
                cmd
            }
            Credential::Password(secret) => {
                args.extend([
                    "-o".to_string(),
                    "PreferredAuthentications=password,keyboard-interactive".to_string(),
                    "-o".to_string(),
                    "PubkeyAuthentication=no".to_string(),
                    "-o".to_string(),
                    "NumberOfPasswordPrompts=1".to_string(),
                ]);
                let mut cmd = Command::new(&options.sshpass_program);
                cmd.arg("-e")
                    .arg(&options.ssh_program)
                    .args(&args)
                    .env("SSHPASS", secret.expose_secret());
                cmd
            }
        };
        command.arg(&destination);

        debug!("Starting ssh master for {}:{}", params.host, params.port);
        let mut master = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                protocol(format!(
                    "failed to launch {}: {}",
                    command.as_std().get_program().to_string_lossy(),
                    e
                ))
            })?;

        let deadline = Instant::now() + params.timeout + MASTER_GRACE;
        loop {
            if let Some(status) = master
                .try_wait()
                .map_err(|e| protocol(format!("failed to poll ssh master: {}", e)))?
            {
                let mut stderr = String::new();
                if let Some(mut pipe) = master.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                let _ = std::fs::remove_file(&control_path);
                return Err(classify_connect_failure(
                    params.host,
                    status.code(),
                    &stderr,
                ));
            }

            if control_check(&options.ssh_program, params.port, &control_path, &destination).await
            {
                break;
            }

            if Instant::now() >= deadline {
                let _ = master.start_kill();
                let _ = std::fs::remove_file(&control_path);
                return Err(ConnectionError::Unreachable {
                    host: params.host.to_string(),
                    detail: format!("no session within {:?}", params.timeout),
                });
            }
            sleep(MASTER_POLL_INTERVAL).await;
        }

        info!("Connected to {}:{}", params.host, params.port);
        Ok(Self {
            host: params.host.to_string(),
            port: params.port,
            username: params.username.to_string(),
            destination,
            control_path,
            master: Some(master),
            options,
        })
    }

    /// Arguments for a client that rides on the master connection
    fn client_args(&self) -> Vec<String> {
        let mut args = common_options(self.port, &self.control_path);
        args.extend([
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ]);
        args
    }

    async fn run_client(&self, command: &str) -> Result<ExecOutput, CommandError> {
        let transport = |detail: String| CommandError::Transport {
            command: command.to_string(),
            detail,
        };

        let child = Command::new(&self.options.ssh_program)
            .args(self.client_args())
            .arg(&self.destination)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| transport(e.to_string()))?;

        let output = match self.options.command_timeout {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(CommandError::TimedOut {
                        command: command.to_string(),
                        after: limit,
                    })
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|e| transport(e.to_string()))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // 255 is also a legal remote exit code; only treat it as transport
        // failure when ssh itself complained.
        if exit_code == 255 && is_ssh_failure(&stderr) {
            return Err(transport(stderr.trim().to_string()));
        }

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    async fn scp(&self, from: &str, to: &str) -> Result<(), String> {
        let mut args = common_options(self.port, &self.control_path);
        args.extend([
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            "-q".to_string(),
        ]);

        let child = Command::new(&self.options.scp_program)
            .args(&args)
            .arg(from)
            .arg(to)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to launch scp: {}", e))?;

        let output = match self.options.command_timeout {
            Some(limit) => timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| format!("scp did not finish within {:?}", limit))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| e.to_string())?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(match stderr.trim() {
                "" => format!("scp exited with {:?}", output.status.code()),
                s => s.to_string(),
            })
        }
    }

    fn remote_spec(&self, family: PlatformFamily, path: &str) -> String {
        let path = match family {
            PlatformFamily::Windows => path.replace('\\', "/"),
            PlatformFamily::Unix => path.to_string(),
        };
        format!("{}:{}", scp_host(&self.username, &self.host), path)
    }

    fn release_master(&mut self) {
        if let Some(mut master) = self.master.take() {
            let _ = master.start_kill();
        }
        let _ = std::fs::remove_file(&self.control_path);
    }
}

fn is_ssh_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("control socket")
        || lower.contains("mux_client")
        || lower.contains("connection closed")
        || lower.contains("connection reset")
        || lower.contains("broken pipe")
}

async fn control_check(ssh: &Path, port: u16, control_path: &Path, destination: &str) -> bool {
    if !control_path.exists() {
        return false;
    }
    Command::new(ssh)
        .args(common_options(port, control_path))
        .args(["-O", "check"])
        .arg(destination)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &str) -> Result<ExecOutput, CommandError> {
        if self.master.is_none() {
            return Err(CommandError::Transport {
                command: command.to_string(),
                detail: "session is closed".to_string(),
            });
        }
        debug!("[{}] $ {}", self.host, command);
        let output = self.run_client(command).await?;
        debug!("[{}] exit {}", self.host, output.exit_code);
        Ok(output)
    }

    fn open_file_channel(&self, family: PlatformFamily) -> Box<dyn FileChannel + '_> {
        Box::new(ScpChannel {
            session: self,
            profile: PlatformProfile::for_family(family),
        })
    }

    async fn close(&mut self) {
        if self.master.is_none() {
            return;
        }
        let _ = Command::new(&self.options.ssh_program)
            .args(common_options(self.port, &self.control_path))
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Some(mut master) = self.master.take() {
            let _ = master.kill().await;
        }
        let _ = std::fs::remove_file(&self.control_path);
        debug!("Closed session to {}", self.host);
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.master.is_some() {
            warn!("Session to {} was not closed; killing master", self.host);
            self.release_master();
        }
    }
}

/// File channel over scp and remote shell commands
struct ScpChannel<'a> {
    session: &'a SshSession,
    profile: PlatformProfile,
}

impl ScpChannel<'_> {
    fn stat_command(&self, path: &str) -> String {
        if self.profile.is_windows() {
            format!(
                "powershell -NoProfile -NonInteractive -Command \"$i = Get-Item -LiteralPath {} -Force -ErrorAction Stop; \
                 Write-Output ('{{0}} {{1}} {{2}}' -f $i.Length, ([DateTimeOffset]$i.LastWriteTimeUtc).ToUnixTimeSeconds(), $i.PSIsContainer)\"",
                ps_quote(path)
            )
        } else {
            let quoted = self.profile.quote(path);
            format!(
                "stat -c '%s %Y %F' {q} 2>/dev/null || stat -f '%z %m %HT' {q}",
                q = quoted
            )
        }
    }

    fn list_command(&self, dir: &str) -> String {
        if self.profile.is_windows() {
            format!(
                "powershell -NoProfile -NonInteractive -Command \"if (Test-Path -LiteralPath {p} -PathType Container) \
                 {{ Get-ChildItem -LiteralPath {p} -Force | ForEach-Object {{ if ($_.PSIsContainer) {{ 'd ' + $_.Name }} else {{ 'f ' + $_.Name }} }} }}\"",
                p = ps_quote(dir)
            )
        } else {
            format!(
                "cd {} 2>/dev/null || exit 0; for e in * .[!.]* ..?*; do \
                 if [ -d \"$e\" ] && [ ! -L \"$e\" ]; then echo \"d $e\"; elif [ -e \"$e\" ]; then echo \"f $e\"; fi; done",
                self.profile.quote(dir)
            )
        }
    }
}

/// Single-quote a value for PowerShell
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Parse `size mtime kind` as printed by the stat commands
pub(crate) fn parse_stat_line(line: &str) -> Option<RemoteStat> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (size, modified, kind) = match tokens.as_slice() {
        // PowerShell prints an empty Length for directories
        [mtime, flag] => (0, mtime.parse().ok()?, flag.to_string()),
        [size, mtime, rest @ ..] => (size.parse().ok()?, mtime.parse().ok()?, rest.join(" ")),
        _ => return None,
    };
    let kind = kind.to_lowercase();
    let kind = if kind == "true" || kind.contains("directory") {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    Some(RemoteStat {
        size,
        modified,
        kind,
    })
}

/// Parse `d name` / `f name` lines
pub(crate) fn parse_listing(stdout: &str) -> Vec<RemoteEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let (tag, name) = line.split_once(' ')?;
            let kind = match tag {
                "d" => EntryKind::Directory,
                "f" => EntryKind::File,
                _ => return None,
            };
            if name.is_empty() || name == "." || name == ".." {
                return None;
            }
            Some(RemoteEntry {
                name: name.to_string(),
                kind,
            })
        })
        .collect()
}

#[async_trait]
impl FileChannel for ScpChannel<'_> {
    async fn put(&self, local: &Path, remote: &str) -> Result<(), FileSyncError> {
        let to = self.session.remote_spec(self.profile.family(), remote);
        self.session
            .scp(&local.display().to_string(), &to)
            .await
            .map_err(|reason| FileSyncError::new(local.display().to_string(), reason))
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<(), FileSyncError> {
        let from = self.session.remote_spec(self.profile.family(), remote);
        self.session
            .scp(&from, &local.display().to_string())
            .await
            .map_err(|reason| FileSyncError::new(remote, reason))
    }

    async fn list_entries(&self, remote_dir: &str) -> Result<Vec<RemoteEntry>, FileSyncError> {
        let output = self
            .session
            .execute(&self.list_command(remote_dir))
            .await
            .map_err(|e| FileSyncError::new(remote_dir, e.to_string()))?;
        if !output.success() {
            return Err(FileSyncError::new(remote_dir, output.stderr.trim()));
        }
        Ok(parse_listing(&output.stdout))
    }

    async fn stat(&self, remote: &str) -> Result<Option<RemoteStat>, FileSyncError> {
        let output = self
            .session
            .execute(&self.stat_command(remote))
            .await
            .map_err(|e| FileSyncError::new(remote, e.to_string()))?;
        if !output.success() {
            return Ok(None);
        }
        Ok(output.stdout.lines().find_map(parse_stat_line))
    }
}
