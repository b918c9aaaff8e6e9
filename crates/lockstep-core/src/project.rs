use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::lockfile::LOCK_FILE_NAME;
use crate::manifest::{manifest_version_from_toml_str, MANIFEST_FILE_NAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    name: String,
    root: PathBuf,
}

impl Project {
    pub fn new(run_root: &Path, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name("project", &name)?;
        let root = run_root.join(&name);
        Ok(Self { name, root })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the project is created from.
    pub fn parent(&self) -> &Path {
        self.root.parent().unwrap_or(&self.root)
    }

    pub fn label(&self) -> String {
        self.root.display().to_string()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE_NAME)
    }

    pub fn manifest_version(&self) -> Result<String> {
        let path = self.manifest_path();
        let content = fs::read_to_string(&path).with_context(|| {
            format!("filesystem-failed: failed reading manifest {}", path.display())
        })?;
        manifest_version_from_toml_str(&content)
            .with_context(|| format!("failed reading version from {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySource {
    pub name: String,
    pub url: String,
}

impl RegistrySource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let url = url.into();
        validate_name("source", &name)?;
        if url.trim().is_empty() {
            anyhow::bail!("invalid source url for '{name}': must not be empty");
        }
        if url.chars().any(char::is_whitespace) {
            anyhow::bail!("invalid source url for '{name}': '{url}'");
        }
        Ok(Self { name, url })
    }
}

/// Names double as directory names and package names, so they stay within the characters
/// every package index accepts.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        anyhow::bail!("invalid {kind} name: must not be empty or longer than 64 characters");
    }

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        anyhow::bail!("invalid {kind} name: '{name}'");
    };

    let first_is_valid = first.is_ascii_alphanumeric();
    let rest_is_valid =
        chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.');
    if !first_is_valid || !rest_is_valid || name.contains("..") {
        anyhow::bail!("invalid {kind} name: '{name}'");
    }

    Ok(())
}
