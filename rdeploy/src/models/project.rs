//! Project models

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How a project's code reaches the remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryType {
    /// Checked out from a git remote on the host itself
    #[serde(alias = "git")]
    VersionControl,

    /// Copied file by file from the local storage tree
    #[serde(alias = "local")]
    PlainCopy,
}

/// Project category, used to derive fallback stop commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectCategory {
    Frontend,
    Backend,
    #[default]
    Fullstack,
}

/// A project; read-only to the deployment engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,

    pub name: String,

    pub repository_type: RepositoryType,

    /// Git URL for version-control projects, original local path otherwise
    pub repository_location: String,

    /// Local tree used as the plain-copy source; also holds the project ignore file
    pub storage_path: PathBuf,

    #[serde(default)]
    pub category: ProjectCategory,
}

impl Project {
    /// Lowercased name with spaces replaced, used in process patterns
    pub fn process_name(&self) -> String {
        self.name.trim().replace(' ', "_").to_lowercase()
    }
}
