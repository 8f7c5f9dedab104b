//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::remote::platform::is_local_host;
use crate::remote::ssh::SshOptions;
use crate::sync::engine::SyncOptions;
use crate::utils;

/// Controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// SSH transport configuration
    #[serde(default)]
    pub ssh: SshSettings,

    /// Sync configuration
    #[serde(default)]
    pub sync: SyncSettings,

    /// Default deploy path templates
    #[serde(default)]
    pub paths: PathSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            ssh: SshSettings::default(),
            sync: SyncSettings::default(),
            paths: PathSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from `file`; a missing file yields the defaults
    pub async fn load(file: &File) -> Result<Self, DeployError> {
        if !file.exists().await {
            info!("No settings at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json().await.map_err(|e| {
            DeployError::ConfigError(format!("{}: {}", file.path().display(), e))
        })
    }
}

/// SSH settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_ssh_program")]
    pub ssh_program: PathBuf,

    #[serde(default = "default_scp_program")]
    pub scp_program: PathBuf,

    /// Used only for password credentials
    #[serde(default = "default_sshpass_program")]
    pub sshpass_program: PathBuf,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-command limit; `null` waits forever
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: Option<u64>,

    /// Directory for connection-sharing sockets
    #[serde(default = "default_control_dir")]
    pub control_dir: PathBuf,
}

fn default_ssh_program() -> PathBuf {
    PathBuf::from("ssh")
}

fn default_scp_program() -> PathBuf {
    PathBuf::from("scp")
}

fn default_sshpass_program() -> PathBuf {
    PathBuf::from("sshpass")
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> Option<u64> {
    Some(1800)
}

fn default_control_dir() -> PathBuf {
    std::env::temp_dir().join("rdeploy-ssh")
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_program: default_ssh_program(),
            scp_program: default_scp_program(),
            sshpass_program: default_sshpass_program(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            control_dir: default_control_dir(),
        }
    }
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn options(&self) -> SshOptions {
        SshOptions {
            ssh_program: self.ssh_program.clone(),
            scp_program: self.scp_program.clone(),
            sshpass_program: self.sshpass_program.clone(),
            control_dir: self.control_dir.clone(),
            command_timeout: utils::optional_secs(self.command_timeout_secs),
        }
    }
}

/// Sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Controller-wide ignore file merged into every project's rules
    #[serde(default)]
    pub root_ignore_file: Option<PathBuf>,

    #[serde(default = "default_mtime_tolerance")]
    pub mtime_tolerance_secs: i64,

    /// Run dependency setup after a deploy
    #[serde(default = "default_true")]
    pub install_dependencies: bool,
}

fn default_true() -> bool {
    true
}

fn default_mtime_tolerance() -> i64 {
    2
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            root_ignore_file: None,
            mtime_tolerance_secs: default_mtime_tolerance(),
            install_dependencies: true,
        }
    }
}

impl SyncSettings {
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            root_ignore_file: self.root_ignore_file.clone(),
            mtime_tolerance_secs: self.mtime_tolerance_secs.max(0),
        }
    }
}

/// Templates for a deployment's default remote directory.
/// `{project}` is replaced by the project name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_windows_template")]
    pub windows_template: String,

    #[serde(default = "default_unix_template")]
    pub unix_template: String,
}

fn default_windows_template() -> String {
    r"D:\projects\{project}".to_string()
}

fn default_unix_template() -> String {
    "/root/projects/{project}".to_string()
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            windows_template: default_windows_template(),
            unix_template: default_unix_template(),
        }
    }
}

impl PathSettings {
    /// Local-looking hosts get the Windows template, everything else the Unix one
    pub fn default_deploy_path(&self, host: &str, project_name: &str) -> String {
        let template = if is_local_host(host) {
            &self.windows_template
        } else {
            &self.unix_template
        };
        template.replace("{project}", project_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"log_level":"debug","ssh":{"command_timeout_secs":null}}"#)
                .unwrap();
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.ssh.connect_timeout_secs, 10);
        assert_eq!(settings.ssh.options().command_timeout, None);
        assert_eq!(settings.sync.mtime_tolerance_secs, 2);

        let defaults = Settings::default();
        assert_eq!(
            defaults.ssh.options().command_timeout,
            Some(Duration::from_secs(1800))
        );
    }

    #[test]
    fn test_default_deploy_path_by_host() {
        let paths = PathSettings::default();
        assert_eq!(paths.default_deploy_path("127.0.0.1", "shop"), r"D:\projects\shop");
        assert_eq!(
            paths.default_deploy_path("example.com", "shop"),
            "/root/projects/shop"
        );
    }
}
