use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const LOCK_FILE_NAME: &str = "poetry.lock";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct LockFileDocument {
    #[serde(default)]
    package: Vec<LockedPackage>,
}

/// The resolved package set a project's lock file pins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockFile {
    packages: Vec<LockedPackage>,
}

impl LockFile {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let document: LockFileDocument =
            toml::from_str(input).context("failed to parse lock file")?;
        Ok(Self {
            packages: document.package,
        })
    }

    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(LOCK_FILE_NAME);
        let content = fs::read_to_string(&path).with_context(|| {
            format!("filesystem-failed: failed reading lock file {}", path.display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed parsing lock file {}", path.display()))
    }

    pub fn packages(&self) -> &[LockedPackage] {
        &self.packages
    }

    pub fn pinned_version(&self, name: &str) -> Option<&str> {
        let wanted = normalize_package_name(name);
        self.packages
            .iter()
            .find(|package| normalize_package_name(&package.name) == wanted)
            .map(|package| package.version.as_str())
    }
}

/// Index names compare case-insensitively with runs of `-`, `_` and `.` treated as one `-`.
pub fn normalize_package_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_separator = true;
            continue;
        }
        if pending_separator && !normalized.is_empty() {
            normalized.push('-');
        }
        pending_separator = false;
        normalized.push(ch.to_ascii_lowercase());
    }
    normalized
}
