use std::path::Path;
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result};
use lockstep_core::{ToolInvocation, ToolOutput};
use tracing::debug;

/// Executes one external command with a project directory as its working context.
///
/// Implementations return the captured streams on success and an `external-tool-failed`
/// error, carrying both streams, when the command exits non-zero.
pub trait OperationRunner {
    fn run(&self, working_dir: &Path, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl OperationRunner for ProcessRunner {
    fn run(&self, working_dir: &Path, invocation: &ToolInvocation) -> Result<ToolOutput> {
        debug!(
            command = %invocation,
            cwd = %working_dir.display(),
            "running external command"
        );
        let output = Command::new(invocation.program())
            .args(invocation.arguments())
            .current_dir(working_dir)
            .output()
            .with_context(|| {
                format!(
                    "external-tool-launch-failed: could not launch '{}' in {}",
                    invocation,
                    working_dir.display()
                )
            })?;

        let captured = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !output.status.success() {
            anyhow::bail!(describe_failure(
                invocation,
                working_dir,
                &output.status,
                &captured
            ));
        }
        Ok(captured)
    }
}

pub fn describe_failure(
    invocation: &ToolInvocation,
    working_dir: &Path,
    status: &ExitStatus,
    output: &ToolOutput,
) -> String {
    let status = match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    };
    format!(
        "external-tool-failed: '{}' in {} terminated with {}\nstdout:\n{}\nstderr:\n{}",
        invocation,
        working_dir.display(),
        status,
        output.stdout.trim(),
        output.stderr.trim()
    )
}
