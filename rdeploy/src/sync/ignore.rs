//! Ignore-pattern loading and matching.
//!
//! Matching follows gitignore semantics through the `ignore` crate. Three
//! fixed lists sit on top of the declared patterns:
//!
//! - the critical set, always ignored and compiled on its own so a declared
//!   negation cannot re-include it;
//! - whitelisted file names, never ignored anywhere in the tree;
//! - protected top-level directory names, never ignored themselves (their
//!   contents still are).

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::file::File;

/// Always ignored, whatever the ignore files say
pub const CRITICAL_PATTERNS: &[&str] = &[
    ".git/",
    "node_modules/",
    ".venv/",
    "venv/",
    "__pycache__/",
    "*.pyc",
    "*.pyo",
    "*.pyd",
    "*.so",
    "*.o",
    "*.a",
    "*.lib",
    "*.dylib",
    "*.dll",
];

/// File names that are never ignored
pub const WHITELIST: &[&str] = &[
    "start_all.py",
    "start_all.bat",
    "README.md",
    "prompt.txt",
    ".gitignore",
];

/// Top-level directories that are never ignored themselves
pub const PROTECTED_DIRS: &[&str] = &["backend", "frontend", "app"];

/// Name of the per-project ignore file
pub const IGNORE_FILE: &str = ".gitignore";

/// A compiled, deduplicated set of ignore patterns
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<String>,
    declared: Gitignore,
    critical: Gitignore,
}

fn compile<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<Gitignore, DeployError> {
    let mut builder = GitignoreBuilder::new("");
    for pattern in patterns {
        builder.add_line(None, pattern)?;
    }
    builder.build().map_err(DeployError::from)
}

/// Forward slashes, no leading `./` or `/`
fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut path = path.as_str();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.trim_start_matches('/').to_string()
}

impl PatternSet {
    /// Compile declared patterns on top of the critical set.
    ///
    /// Blank lines and comments are dropped; later duplicates are removed,
    /// keeping first-seen order.
    pub fn new<I, S>(patterns: I) -> Result<Self, DeployError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() || pattern.starts_with('#') {
                continue;
            }
            if !unique.iter().any(|p| p == pattern) {
                unique.push(pattern.to_string());
            }
        }

        let declared = compile(unique.iter().map(String::as_str))?;
        let critical = compile(CRITICAL_PATTERNS.iter().copied())?;
        Ok(Self {
            patterns: unique,
            declared,
            critical,
        })
    }

    /// Only the critical set
    pub fn critical_only() -> Result<Self, DeployError> {
        Self::new(std::iter::empty::<&str>())
    }

    /// Declared patterns, deduplicated, in load order
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// A new set holding this set's patterns followed by `more`
    pub fn merged_with<I, S>(&self, more: I) -> Result<Self, DeployError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let combined: Vec<String> = self
            .patterns
            .iter()
            .cloned()
            .chain(more.into_iter().map(|s| s.as_ref().to_string()))
            .collect();
        Self::new(combined)
    }

    /// Decide whether a relative path is excluded
    pub fn is_ignored(&self, relative: &str, is_dir: bool) -> bool {
        let path = normalize(relative);
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            return false;
        }
        if is_whitelisted(path) || (is_dir && is_protected(path)) {
            return false;
        }

        let path = Path::new(path);
        self.critical
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
            || self
                .declared
                .matched_path_or_any_parents(path, is_dir)
                .is_ignore()
    }
}

/// Whether the path's file name is on the whitelist
pub fn is_whitelisted(relative: &str) -> bool {
    let path = normalize(relative);
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    WHITELIST.contains(&name)
}

/// Whether the path is exactly one of the protected top-level directories
pub fn is_protected(relative: &str) -> bool {
    let path = normalize(relative);
    PROTECTED_DIRS.contains(&path.trim_end_matches('/'))
}

/// Decide whether `relative` is excluded by `set`.
///
/// A trailing `/` marks the path as a directory.
pub fn should_ignore(relative: &str, set: &PatternSet) -> bool {
    let is_dir = relative.ends_with('/') || relative.ends_with('\\');
    set.is_ignored(relative, is_dir)
}

/// Pattern lines of an ignore file's contents
pub fn parse_patterns(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Pattern lines of a local ignore file; a missing file has none
pub async fn read_patterns(path: &Path) -> Result<Vec<String>, DeployError> {
    let file = File::new(path);
    if !file.exists().await {
        debug!("No ignore file at {}", path.display());
        return Ok(Vec::new());
    }
    Ok(parse_patterns(&file.read_string().await?))
}

/// Merge the root ignore file and the project ignore file
pub async fn load_patterns(
    root_ignore_file: Option<&Path>,
    project_ignore_file: &Path,
) -> Result<PatternSet, DeployError> {
    let mut patterns = match root_ignore_file {
        Some(path) => read_patterns(path).await?,
        None => Vec::new(),
    };
    patterns.extend(read_patterns(project_ignore_file).await?);
    PatternSet::new(patterns)
}
