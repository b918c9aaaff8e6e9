use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lockstep_core::{Action, LockFile, Project, RegistrySource, Scenario, Step};
use lockstep_lifecycle::ProjectLifecycle;
use lockstep_runner::{AuditLevel, AuditLog};
use tracing::{info, warn};

/// Executes a scenario one step at a time against the projects it creates under `run_root`.
/// The first failing step ends the run; nothing already on disk is undone.
pub(crate) struct ScenarioDriver {
    run_root: PathBuf,
    lifecycle: ProjectLifecycle,
    projects: BTreeMap<String, Project>,
}

impl ScenarioDriver {
    pub(crate) fn new(run_root: impl Into<PathBuf>, lifecycle: ProjectLifecycle) -> Self {
        Self {
            run_root: run_root.into(),
            lifecycle,
            projects: BTreeMap::new(),
        }
    }

    pub(crate) fn run_root(&self) -> &Path {
        &self.run_root
    }

    pub(crate) fn audit(&self) -> &AuditLog {
        self.lifecycle.recorder().audit()
    }

    pub(crate) fn into_audit(self) -> AuditLog {
        self.lifecycle.into_recorder().into_audit()
    }

    pub(crate) fn run(
        &mut self,
        scenario: &Scenario,
        mut on_step: impl FnMut(usize, &Step),
    ) -> Result<()> {
        scenario.validate()?;
        info!(
            scenario = %scenario.name,
            steps = scenario.steps.len(),
            root = %self.run_root.display(),
            "running scenario"
        );
        self.lifecycle.recorder_mut().audit_mut().info(&format!(
            "{}, scenario {} with {} steps",
            self.run_root.display(),
            scenario.name,
            scenario.steps.len()
        ))?;

        for (index, step) in scenario.steps.iter().enumerate() {
            on_step(index, step);
            if let Err(err) = self.run_step(step) {
                warn!(step = index + 1, project = %step.project, action = step.action.label(), "step failed");
                let err = err.context(format!(
                    "step {} ({} {}) failed",
                    index + 1,
                    step.project,
                    step.action.label()
                ));
                if let Err(audit_err) = self
                    .lifecycle
                    .recorder_mut()
                    .audit_mut()
                    .log(AuditLevel::Error, &format!("{}, {:#}", self.run_root.display(), err))
                {
                    warn!(error = %format!("{audit_err:#}"), "audit log lost the step failure");
                }
                return Err(err);
            }
        }

        self.lifecycle.recorder_mut().audit_mut().flush()
    }

    fn project(&mut self, step: &Step) -> Result<Project> {
        if let Action::Create = step.action {
            let project = Project::new(&self.run_root, step.project.as_str())?;
            self.projects
                .insert(step.project.clone(), project.clone());
            return Ok(project);
        }
        self.projects
            .get(&step.project)
            .cloned()
            .with_context(|| format!("project '{}' has not been created", step.project))
    }

    fn run_step(&mut self, step: &Step) -> Result<()> {
        let project = self.project(step)?;
        let lifecycle = &mut self.lifecycle;

        match &step.action {
            Action::Create => {
                lifecycle.create(&project)?;
            }
            Action::AddSource { name, url } => {
                let source = RegistrySource::new(name.as_str(), url.as_str())?;
                lifecycle.add_source(&project, &source)?;
            }
            Action::AddDependency { name, source } => {
                lifecycle.add_dependency(&project, name, source.as_deref())?;
            }
            Action::Build { format } => {
                lifecycle.build(&project, format)?;
            }
            Action::Publish { repository } => {
                lifecycle.publish(&project, repository)?;
            }
            Action::BumpVersion { kind } => {
                let record = lifecycle.bump_version(&project, *kind)?;
                let version = project.manifest_version()?;
                info!(project = project.name(), %version, outcome = %record.outcome, "version bumped");
                lifecycle
                    .recorder_mut()
                    .note(&project, &format!("version {version}"))?;
            }
            Action::Lock => {
                lifecycle.lock(&project)?;
            }
            Action::UpdateDependency { name } => {
                lifecycle.update_dependency(&project, name)?;
            }
            Action::UpdateAllDependencies => {
                lifecycle.update_all_dependencies(&project)?;
            }
            Action::RemoveLock => {
                lifecycle.remove_lock(&project)?;
            }
            Action::RemoveEnvironment => {
                lifecycle.remove_environment(&project)?;
            }
            Action::ExpectLocked { package, version } => {
                let lock = LockFile::load(project.root())?;
                match lock.pinned_version(package) {
                    Some(pinned) if pinned == version.as_str() => {
                        lifecycle
                            .recorder_mut()
                            .note(&project, &format!("expect {package}=={version}, ok"))?;
                    }
                    Some(pinned) => anyhow::bail!(
                        "expectation-failed: {} locks {}=={} but {} was expected",
                        project.name(),
                        package,
                        pinned,
                        version
                    ),
                    None => anyhow::bail!(
                        "expectation-failed: {} does not lock {} (expected {})",
                        project.name(),
                        package,
                        version
                    ),
                }
            }
        }

        Ok(())
    }
}
