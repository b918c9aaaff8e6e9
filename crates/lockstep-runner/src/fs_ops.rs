use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

/// Creates a uniquely named directory under `base` for one run's projects.
pub fn create_run_root(base: &Path) -> Result<PathBuf> {
    let root = base.join(format!(
        "lockstep-{}-{}",
        std::process::id(),
        unique_suffix()
    ));
    fs::create_dir_all(base)
        .with_context(|| format!("filesystem-failed: failed creating {}", base.display()))?;
    fs::create_dir(&root).with_context(|| {
        format!("filesystem-failed: failed creating run root {}", root.display())
    })?;
    Ok(root)
}

/// Accepts a caller-supplied run root as long as it is missing or empty.
pub fn prepare_existing_root(root: &Path) -> Result<PathBuf> {
    if root.exists() {
        let mut entries = fs::read_dir(root).with_context(|| {
            format!("filesystem-failed: failed reading run root {}", root.display())
        })?;
        if entries.next().is_some() {
            anyhow::bail!(
                "filesystem-failed: run root {} is not empty",
                root.display()
            );
        }
    } else {
        fs::create_dir_all(root).with_context(|| {
            format!("filesystem-failed: failed creating run root {}", root.display())
        })?;
    }
    fs::canonicalize(root)
        .with_context(|| format!("filesystem-failed: failed resolving {}", root.display()))
}

pub fn write_ignore_file(repo_root: &Path, rules: &[&str]) -> Result<()> {
    let path = repo_root.join(".gitignore");
    let mut content = rules.join("\n");
    content.push('\n');
    fs::write(&path, content)
        .with_context(|| format!("filesystem-failed: failed writing {}", path.display()))
}

pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            anyhow::bail!("filesystem-failed: {} does not exist", path.display())
        }
        Err(err) => Err(err)
            .with_context(|| format!("filesystem-failed: failed removing {}", path.display())),
    }
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
