mod package_manager;

use anyhow::Result;
use lockstep_core::{BumpKind, OperationRecord, Outcome, Project, RegistrySource};
use lockstep_runner::{remove_file, write_ignore_file, ChangeRecorder, CommitterIdentity};
use tracing::info;

pub use package_manager::{PackageManager, Poetry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub branch: String,
    pub identity: CommitterIdentity,
}

/// Named lifecycle actions over a project, each resolving to one package-manager
/// invocation recorded through the change recorder.
pub struct ProjectLifecycle {
    package_manager: Box<dyn PackageManager>,
    recorder: ChangeRecorder,
    settings: LifecycleSettings,
}

impl ProjectLifecycle {
    pub fn new(
        package_manager: Box<dyn PackageManager>,
        recorder: ChangeRecorder,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            package_manager,
            recorder,
            settings,
        }
    }

    pub fn recorder(&self) -> &ChangeRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut ChangeRecorder {
        &mut self.recorder
    }

    pub fn into_recorder(self) -> ChangeRecorder {
        self.recorder
    }

    /// Scaffolds the project from its parent directory, initializes version control with
    /// the configured identity and ignore rules, and commits the scaffold unconditionally.
    pub fn create(&mut self, project: &Project) -> Result<OperationRecord> {
        if project.root().exists() {
            anyhow::bail!(
                "filesystem-failed: project directory {} already exists",
                project.root().display()
            );
        }

        let invocation = self.package_manager.create(project);
        let output = self
            .recorder
            .execute(project, project.parent(), &invocation)?;
        self.recorder.initialize_repository(
            project,
            &invocation,
            &self.settings.branch,
            &self.settings.identity,
        )?;
        write_ignore_file(project.root(), self.package_manager.ignore_rules())?;
        let commit_id = self.recorder.commit_all(project, &invocation)?;
        info!(project = project.name(), commit = %commit_id, "project created");
        self.recorder
            .emit(project, &invocation, output, Outcome::Committed(commit_id))
    }

    pub fn add_source(
        &mut self,
        project: &Project,
        source: &RegistrySource,
    ) -> Result<OperationRecord> {
        let invocation = self.package_manager.add_source(source);
        self.recorder.record(project, &invocation)
    }

    pub fn add_dependency(
        &mut self,
        project: &Project,
        name: &str,
        source: Option<&str>,
    ) -> Result<OperationRecord> {
        validate_argument("dependency name", name)?;
        if let Some(source) = source {
            validate_argument("source name", source)?;
        }
        let invocation = self.package_manager.add_dependency(name, source);
        self.recorder.record(project, &invocation)
    }

    pub fn build(&mut self, project: &Project, format: &str) -> Result<OperationRecord> {
        validate_argument("build format", format)?;
        let invocation = self.package_manager.build(format);
        self.recorder.record(project, &invocation)
    }

    pub fn publish(&mut self, project: &Project, repository: &str) -> Result<OperationRecord> {
        validate_argument("repository name", repository)?;
        let invocation = self.package_manager.publish(repository);
        self.recorder.record(project, &invocation)
    }

    pub fn bump_version(&mut self, project: &Project, kind: BumpKind) -> Result<OperationRecord> {
        let invocation = self.package_manager.bump_version(kind);
        self.recorder.record(project, &invocation)
    }

    pub fn lock(&mut self, project: &Project) -> Result<OperationRecord> {
        let invocation = self.package_manager.lock();
        self.recorder.record(project, &invocation)
    }

    pub fn update_dependency(&mut self, project: &Project, name: &str) -> Result<OperationRecord> {
        validate_argument("dependency name", name)?;
        let invocation = self.package_manager.update_dependency(name);
        self.recorder.record(project, &invocation)
    }

    pub fn update_all_dependencies(&mut self, project: &Project) -> Result<OperationRecord> {
        let invocation = self.package_manager.update_all_dependencies();
        self.recorder.record(project, &invocation)
    }

    pub fn remove_environment(&mut self, project: &Project) -> Result<OperationRecord> {
        let invocation = self.package_manager.remove_environment();
        self.recorder.record(project, &invocation)
    }

    /// Deletes the lock file directly. Leaves no record and no commit; the deletion shows up
    /// in whatever the next recorded action commits.
    pub fn remove_lock(&mut self, project: &Project) -> Result<()> {
        let lock_file_name = self.package_manager.lock_file_name().to_string();
        self.recorder
            .note(project, &format!("removing {lock_file_name}"))?;
        remove_file(&project.root().join(lock_file_name))
    }
}

fn validate_argument(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("invalid-argument: {label} must not be empty");
    }
    if value.chars().any(char::is_whitespace) || value.starts_with('-') {
        anyhow::bail!("invalid-argument: {label} '{value}' is not a single argument");
    }
    Ok(())
}
