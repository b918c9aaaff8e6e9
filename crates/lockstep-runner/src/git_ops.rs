use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitterIdentity {
    pub name: String,
    pub email: String,
}

/// The version-control surface used to snapshot a project after each operation.
pub trait VersionControl {
    fn init(&self, repo_root: &Path, branch: &str) -> Result<()>;
    fn set_identity(&self, repo_root: &Path, identity: &CommitterIdentity) -> Result<()>;
    /// True when the working tree has staged, unstaged, or untracked changes.
    fn is_dirty(&self, repo_root: &Path) -> Result<bool>;
    fn stage_all(&self, repo_root: &Path) -> Result<()>;
    fn commit(&self, repo_root: &Path, message: &str) -> Result<()>;
    fn short_head_id(&self, repo_root: &Path) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-c")
            .arg("core.autocrlf=false")
            .arg("-c")
            .arg("core.eol=lf");
        if cfg!(windows) {
            command.arg("-c").arg("core.longpaths=true");
        }
        command
    }

    fn run(&self, repo_root: &Path, args: &[&str]) -> Result<String> {
        debug!(repo = %repo_root.display(), "git {}", args.join(" "));
        let output = self
            .base_command()
            .args(args)
            .current_dir(repo_root)
            .output()
            .with_context(|| {
                format!(
                    "external-tool-launch-failed: could not launch {} {} in {}",
                    self.program,
                    args.join(" "),
                    repo_root.display()
                )
            })?;
        if !output.status.success() {
            anyhow::bail!(
                "external-tool-failed: {} {} failed in {}: {}",
                self.program,
                args.join(" "),
                repo_root.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        String::from_utf8(output.stdout).with_context(|| {
            format!(
                "external-tool-failed: {} {} produced non-UTF-8 output",
                self.program,
                args.join(" ")
            )
        })
    }
}

impl VersionControl for GitCli {
    fn init(&self, repo_root: &Path, branch: &str) -> Result<()> {
        self.run(repo_root, &["init", "--quiet", "-b", branch])
            .map(drop)
    }

    fn set_identity(&self, repo_root: &Path, identity: &CommitterIdentity) -> Result<()> {
        self.run(repo_root, &["config", "user.name", &identity.name])?;
        self.run(repo_root, &["config", "user.email", &identity.email])
            .map(drop)
    }

    fn is_dirty(&self, repo_root: &Path) -> Result<bool> {
        let status = self.run(repo_root, &["status", "--porcelain", "--untracked-files=all"])?;
        Ok(!status.trim().is_empty())
    }

    fn stage_all(&self, repo_root: &Path) -> Result<()> {
        self.run(repo_root, &["add", "--all"]).map(drop)
    }

    fn commit(&self, repo_root: &Path, message: &str) -> Result<()> {
        self.run(repo_root, &["commit", "--quiet", "--no-verify", "-m", message])
            .map(drop)
    }

    fn short_head_id(&self, repo_root: &Path) -> Result<String> {
        let output = self.run(repo_root, &["rev-parse", "--short", "HEAD"])?;
        let commit_id = output.trim().to_string();
        validate_short_commit_id(&commit_id).with_context(|| {
            format!(
                "external-tool-failed: git rev-parse returned an invalid HEAD id in {}",
                repo_root.display()
            )
        })?;
        Ok(commit_id)
    }
}

pub fn validate_short_commit_id(commit_id: &str) -> Result<()> {
    if commit_id.len() < 4 || commit_id.len() > 64 {
        anyhow::bail!("commit id has unexpected length: '{commit_id}'");
    }
    if !commit_id.chars().all(|ch| ch.is_ascii_hexdigit()) {
        anyhow::bail!("commit id contains non-hex characters: '{commit_id}'");
    }
    Ok(())
}
