//! Machine models

use std::fmt;
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::remote::platform::PlatformFamily;

/// How the controller authenticates to a machine
pub enum Credential {
    Password(SecretString),
    KeyFile(PathBuf),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password([REDACTED])"),
            Credential::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

#[derive(Deserialize)]
struct RawCredential {
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    key_file: Option<PathBuf>,
}

impl TryFrom<RawCredential> for Credential {
    type Error = String;

    fn try_from(raw: RawCredential) -> Result<Self, Self::Error> {
        match (raw.key_file, raw.password) {
            (Some(path), _) => Ok(Credential::KeyFile(path)),
            (None, Some(password)) => Ok(Credential::Password(SecretString::from(password))),
            (None, None) => Err("credential needs either `password` or `key_file`".to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawCredential::deserialize(deserializer)?;
        Credential::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Credential {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Credential::Password(secret) => map.serialize_entry("password", secret.expose_secret())?,
            Credential::KeyFile(path) => map.serialize_entry("key_file", path)?,
        }
        map.end()
    }
}

/// A remote host; read-only to the deployment engine
#[derive(Debug, Serialize, Deserialize)]
pub struct Machine {
    pub id: u64,

    #[serde(default)]
    pub name: String,

    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    pub credential: Credential,

    /// Operator-supplied OS family, consulted when probing is inconclusive
    #[serde(default)]
    pub platform_hint: Option<PlatformFamily>,
}

fn default_ssh_port() -> u16 {
    22
}

impl Machine {
    /// `user@host:port`, used in logs
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}
