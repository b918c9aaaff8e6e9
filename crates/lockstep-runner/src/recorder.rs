use std::path::Path;

use anyhow::Result;
use lockstep_core::{OperationRecord, Outcome, Project, ToolInvocation, ToolOutput};
use tracing::warn;

use crate::audit::{AuditLevel, AuditLog};
use crate::git_ops::{CommitterIdentity, VersionControl};
use crate::process::OperationRunner;

/// Runs operations and snapshots the project's working tree after each one.
///
/// A dirty tree after the command is committed with the command text as the message, so
/// "changed" means the tree was dirty at that point. Residue left by an earlier step lands
/// in the same commit.
pub struct ChangeRecorder {
    runner: Box<dyn OperationRunner>,
    vcs: Box<dyn VersionControl>,
    audit: AuditLog,
}

impl ChangeRecorder {
    pub fn new(
        runner: Box<dyn OperationRunner>,
        vcs: Box<dyn VersionControl>,
        audit: AuditLog,
    ) -> Self {
        Self { runner, vcs, audit }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn audit_mut(&mut self) -> &mut AuditLog {
        &mut self.audit
    }

    pub fn into_audit(self) -> AuditLog {
        self.audit
    }

    /// Run, log output, snapshot, emit. Exactly one record per successful call.
    pub fn record(
        &mut self,
        project: &Project,
        invocation: &ToolInvocation,
    ) -> Result<OperationRecord> {
        let output = self.execute(project, project.root(), invocation)?;
        let outcome = self.snapshot(project, invocation)?;
        self.emit(project, invocation, output, outcome)
    }

    pub fn execute(
        &mut self,
        project: &Project,
        working_dir: &Path,
        invocation: &ToolInvocation,
    ) -> Result<ToolOutput> {
        let output = match self.runner.run(working_dir, invocation) {
            Ok(output) => output,
            Err(err) => return self.fail(project, invocation, err),
        };

        for (stream, text) in output.streams() {
            if text.trim().is_empty() {
                continue;
            }
            self.audit.log(
                AuditLevel::Info,
                &format!(
                    "{}, {}, {}:\n{}",
                    project.label(),
                    invocation,
                    stream,
                    text.trim_end()
                ),
            )?;
        }
        Ok(output)
    }

    pub fn snapshot(&mut self, project: &Project, invocation: &ToolInvocation) -> Result<Outcome> {
        let dirty = match self.vcs.is_dirty(project.root()) {
            Ok(dirty) => dirty,
            Err(err) => return self.fail(project, invocation, err),
        };
        if !dirty {
            return Ok(Outcome::Unchanged);
        }
        let commit_id = self.commit_all(project, invocation)?;
        Ok(Outcome::Committed(commit_id))
    }

    pub fn commit_all(&mut self, project: &Project, invocation: &ToolInvocation) -> Result<String> {
        let root = project.root();
        let committed = self
            .vcs
            .stage_all(root)
            .and_then(|()| self.vcs.commit(root, &invocation.command_text()))
            .and_then(|()| self.vcs.short_head_id(root));
        match committed {
            Ok(commit_id) => Ok(commit_id),
            Err(err) => self.fail(project, invocation, err),
        }
    }

    pub fn initialize_repository(
        &mut self,
        project: &Project,
        invocation: &ToolInvocation,
        branch: &str,
        identity: &CommitterIdentity,
    ) -> Result<()> {
        let root = project.root();
        let initialized = self
            .vcs
            .init(root, branch)
            .and_then(|()| self.vcs.set_identity(root, identity));
        match initialized {
            Ok(()) => Ok(()),
            Err(err) => self.fail(project, invocation, err),
        }
    }

    pub fn emit(
        &mut self,
        project: &Project,
        invocation: &ToolInvocation,
        output: ToolOutput,
        outcome: Outcome,
    ) -> Result<OperationRecord> {
        let record = OperationRecord {
            project: project.label(),
            command: invocation.command_text(),
            output,
            outcome,
        };
        self.audit.record(record.clone())?;
        Ok(record)
    }

    /// Free-form audit line for actions that do not produce a record.
    pub fn note(&mut self, project: &Project, message: &str) -> Result<()> {
        self.audit
            .info(&format!("{}, {}", project.label(), message))
    }

    fn fail<T>(
        &mut self,
        project: &Project,
        invocation: &ToolInvocation,
        err: anyhow::Error,
    ) -> Result<T> {
        // The original error always propagates, even when the audit write fails.
        if let Err(audit_err) = self.audit.log(
            AuditLevel::Error,
            &format!("{}, {}, {:#}", project.label(), invocation, err),
        ) {
            warn!(project = project.name(), error = %format!("{audit_err:#}"), "audit log lost a failure line");
        }
        Err(err)
    }
}
