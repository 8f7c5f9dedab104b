//! Remote OS detection and per-family command construction

use std::fmt;
use std::net::IpAddr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::remote::session::{ExecOutput, RemoteSession};

/// Marker printed by existence checks when the path is present
pub const EXISTS_MARKER: &str = "EXISTS";
/// Marker printed by existence checks when the path is absent
pub const NOT_EXISTS_MARKER: &str = "NOT_EXISTS";

/// OS family of a remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformFamily {
    Windows,
    Unix,
}

impl PlatformFamily {
    /// The family of the machine running the controller
    pub fn local() -> Self {
        if cfg!(windows) {
            PlatformFamily::Windows
        } else {
            PlatformFamily::Unix
        }
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformFamily::Windows => f.write_str("windows"),
            PlatformFamily::Unix => f.write_str("unix"),
        }
    }
}

/// Path and shell conventions for one family.
///
/// Every command string sent to a host is built here so callers never
/// branch on the family themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformProfile {
    family: PlatformFamily,
    separator: char,
}

impl PlatformProfile {
    pub fn for_family(family: PlatformFamily) -> Self {
        let separator = match family {
            PlatformFamily::Windows => '\\',
            PlatformFamily::Unix => '/',
        };
        Self { family, separator }
    }

    pub fn family(&self) -> PlatformFamily {
        self.family
    }

    pub fn is_windows(&self) -> bool {
        self.family == PlatformFamily::Windows
    }

    pub fn path_separator(&self) -> char {
        self.separator
    }

    /// Join a base directory and a relative path written with `/`
    pub fn join(&self, base: &str, relative: &str) -> String {
        let base = base.trim_end_matches(['/', '\\']);
        let relative = relative.trim_start_matches(['/', '\\']);
        if relative.is_empty() {
            return base.to_string();
        }
        let relative = match self.family {
            PlatformFamily::Windows => relative.replace('/', "\\"),
            PlatformFamily::Unix => relative.to_string(),
        };
        if base.is_empty() {
            return relative;
        }
        format!("{}{}{}", base, self.separator, relative)
    }

    /// Quote a path or argument for the remote shell
    pub fn quote(&self, value: &str) -> String {
        match self.family {
            PlatformFamily::Unix => format!("'{}'", value.replace('\'', r"'\''")),
            // cmd.exe has no escape for `"` inside a quoted argument
            PlatformFamily::Windows => format!("\"{}\"", value.replace('"', "")),
        }
    }

    /// Prints `EXISTS` or `NOT_EXISTS` for a directory
    pub fn directory_exists(&self, path: &str) -> String {
        match self.family {
            PlatformFamily::Windows => format!(
                "if exist \"{}\\\" (echo {}) else (echo {})",
                path.trim_end_matches('\\').replace('"', ""),
                EXISTS_MARKER,
                NOT_EXISTS_MARKER
            ),
            PlatformFamily::Unix => format!(
                "if [ -d {} ]; then echo {}; else echo {}; fi",
                self.quote(path),
                EXISTS_MARKER,
                NOT_EXISTS_MARKER
            ),
        }
    }

    /// Prints `EXISTS` or `NOT_EXISTS` for a regular file
    pub fn file_exists(&self, path: &str) -> String {
        match self.family {
            PlatformFamily::Windows => format!(
                "if exist {} (echo {}) else (echo {})",
                self.quote(path),
                EXISTS_MARKER,
                NOT_EXISTS_MARKER
            ),
            PlatformFamily::Unix => format!(
                "if [ -f {} ]; then echo {}; else echo {}; fi",
                self.quote(path),
                EXISTS_MARKER,
                NOT_EXISTS_MARKER
            ),
        }
    }

    /// Create a directory and its parents; succeeds if it already exists
    pub fn make_directory(&self, path: &str) -> String {
        match self.family {
            PlatformFamily::Windows => {
                let quoted = self.quote(path);
                format!("if not exist {quoted} mkdir {quoted}")
            }
            PlatformFamily::Unix => format!("mkdir -p {}", self.quote(path)),
        }
    }

    /// Remove a directory tree
    pub fn remove_tree(&self, path: &str) -> String {
        match self.family {
            PlatformFamily::Windows => format!("rmdir /s /q {}", self.quote(path)),
            PlatformFamily::Unix => format!("rm -rf {}", self.quote(path)),
        }
    }

    pub fn remove_file(&self, path: &str) -> String {
        match self.family {
            PlatformFamily::Windows => format!("del /f /q {}", self.quote(path)),
            PlatformFamily::Unix => format!("rm -f {}", self.quote(path)),
        }
    }

    /// Run `command` with `dir` as the working directory
    pub fn in_directory(&self, dir: &str, command: &str) -> String {
        match self.family {
            PlatformFamily::Windows => format!("cd /d {} && {}", self.quote(dir), command),
            PlatformFamily::Unix => format!("cd {} && {}", self.quote(dir), command),
        }
    }

    /// Prefix `command` with environment assignments
    pub fn with_env(&self, vars: &[(&str, &str)], command: &str) -> String {
        let mut out = String::new();
        for (key, value) in vars {
            match self.family {
                PlatformFamily::Windows => out.push_str(&format!("set \"{key}={value}\" && ")),
                PlatformFamily::Unix => out.push_str(&format!("export {key}={value} && ")),
            }
        }
        out.push_str(command);
        out
    }

    /// Mark a script executable. Windows has no equivalent.
    pub fn make_executable(&self, path: &str) -> Option<String> {
        match self.family {
            PlatformFamily::Windows => None,
            PlatformFamily::Unix => Some(format!("chmod +x {}", self.quote(path))),
        }
    }

    /// Invoke a script that lives in the current directory
    pub fn run_script(&self, file_name: &str) -> String {
        match self.family {
            PlatformFamily::Windows => format!("call {}", file_name),
            PlatformFamily::Unix => format!("./{}", file_name),
        }
    }

    /// Python interpreter name
    pub fn python(&self) -> &'static str {
        match self.family {
            PlatformFamily::Windows => "python",
            PlatformFamily::Unix => "python3",
        }
    }
}

/// One detection command and how to read its output
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub name: &'static str,
    pub command: &'static str,
    pub family: PlatformFamily,
    /// Substrings of stdout, any of which confirms `family`
    pub signatures: &'static [&'static str],
}

impl Probe {
    fn matches(&self, output: &ExecOutput) -> bool {
        output.success() && self.signatures.iter().any(|sig| output.stdout.contains(sig))
    }
}

/// Detection commands, tried in order; the first match wins.
///
/// Every Windows host gets the `cmd.exe` profile, including one identified
/// only through the `powershell` probe. Profile commands fail on a host whose
/// OpenSSH default shell is PowerShell.
pub const PROBES: &[Probe] = &[
    Probe {
        name: "cmd",
        command: "cmd /c echo %OS%",
        family: PlatformFamily::Windows,
        signatures: &["Windows"],
    },
    Probe {
        name: "powershell",
        command: "powershell -NoProfile -Command \"echo $env:OS\"",
        family: PlatformFamily::Windows,
        signatures: &["Windows"],
    },
    Probe {
        name: "uname",
        command: "uname -s",
        family: PlatformFamily::Unix,
        signatures: &["Linux", "Darwin", "BSD", "SunOS", "AIX"],
    },
];

/// Where a detected family came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    Probe(&'static str),
    MachineHint,
    LocalAddress,
    Default,
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionSource::Probe(name) => write!(f, "probe `{}`", name),
            DetectionSource::MachineHint => f.write_str("machine hint"),
            DetectionSource::LocalAddress => f.write_str("local address"),
            DetectionSource::Default => f.write_str("default"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub profile: PlatformProfile,
    pub source: DetectionSource,
}

/// Whether `host` names the controller itself or a private LAN address
pub fn is_local_host(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => {
            if addr.is_loopback() {
                return true;
            }
            match "192.168.0.0/16".parse::<Ipv4Net>() {
                Ok(lan) => lan.contains(&addr),
                Err(_) => false,
            }
        }
        Ok(IpAddr::V6(addr)) => addr.is_loopback(),
        Err(_) => false,
    }
}

/// Determine the remote OS family.
///
/// Runs each probe in order. When none is conclusive, falls back to the
/// machine's hint, then to the controller's own family for local hosts,
/// then to Unix. Never fails.
pub async fn detect(session: &dyn RemoteSession, hint: Option<PlatformFamily>) -> Detection {
    for probe in PROBES {
        match session.execute(probe.command).await {
            Ok(output) if probe.matches(&output) => {
                info!("Detected {} on {} via {}", probe.family, session.host(), probe.name);
                return Detection {
                    profile: PlatformProfile::for_family(probe.family),
                    source: DetectionSource::Probe(probe.name),
                };
            }
            Ok(output) => {
                debug!(
                    "Probe {} inconclusive on {} (exit {})",
                    probe.name,
                    session.host(),
                    output.exit_code
                );
            }
            Err(e) => {
                warn!("Probe {} failed on {}: {}", probe.name, session.host(), e);
            }
        }
    }

    let (family, source) = if let Some(family) = hint {
        (family, DetectionSource::MachineHint)
    } else if is_local_host(session.host()) {
        (PlatformFamily::local(), DetectionSource::LocalAddress)
    } else {
        (PlatformFamily::Unix, DetectionSource::Default)
    };

    warn!(
        "No probe identified {}; using {} from {}",
        session.host(),
        family,
        source
    );
    Detection {
        profile: PlatformProfile::for_family(family),
        source,
    }
}
