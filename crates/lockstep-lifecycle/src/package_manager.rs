use lockstep_core::{BumpKind, Project, RegistrySource, ToolInvocation, LOCK_FILE_NAME};

/// The package-manager command surface. Each method only builds the invocation; running it
/// and recording its effect is the change recorder's job.
pub trait PackageManager {
    fn create(&self, project: &Project) -> ToolInvocation;
    fn add_source(&self, source: &RegistrySource) -> ToolInvocation;
    fn add_dependency(&self, name: &str, source: Option<&str>) -> ToolInvocation;
    fn build(&self, format: &str) -> ToolInvocation;
    fn publish(&self, repository: &str) -> ToolInvocation;
    fn bump_version(&self, kind: BumpKind) -> ToolInvocation;
    fn lock(&self) -> ToolInvocation;
    fn update_dependency(&self, name: &str) -> ToolInvocation;
    fn update_all_dependencies(&self) -> ToolInvocation;
    fn remove_environment(&self) -> ToolInvocation;
    fn lock_file_name(&self) -> &str;
    /// Paths the package manager writes build artifacts to, kept out of version control.
    fn ignore_rules(&self) -> &[&'static str];
}

#[derive(Debug, Clone)]
pub struct Poetry {
    program: String,
}

impl Default for Poetry {
    fn default() -> Self {
        Self::new("poetry")
    }
}

impl Poetry {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> ToolInvocation {
        ToolInvocation::new(self.program.as_str())
    }
}

impl PackageManager for Poetry {
    fn create(&self, project: &Project) -> ToolInvocation {
        self.command().arg("new").arg(project.label())
    }

    fn add_source(&self, source: &RegistrySource) -> ToolInvocation {
        self.command()
            .args(["source", "add"])
            .arg(source.name.as_str())
            .arg(source.url.as_str())
    }

    fn add_dependency(&self, name: &str, source: Option<&str>) -> ToolInvocation {
        let command = self.command().args(["add", "--lock"]);
        let command = match source {
            Some(source) => command.arg("--source").arg(source),
            None => command,
        };
        command.arg(name)
    }

    fn build(&self, format: &str) -> ToolInvocation {
        self.command().args(["build", "--format", format])
    }

    fn publish(&self, repository: &str) -> ToolInvocation {
        self.command().args(["publish", "--repository", repository])
    }

    fn bump_version(&self, kind: BumpKind) -> ToolInvocation {
        self.command().args(["version", kind.as_str()])
    }

    fn lock(&self) -> ToolInvocation {
        self.command().arg("lock")
    }

    fn update_dependency(&self, name: &str) -> ToolInvocation {
        self.command().args(["update", "--lock", name])
    }

    fn update_all_dependencies(&self) -> ToolInvocation {
        self.command().args(["update", "--lock"])
    }

    fn remove_environment(&self) -> ToolInvocation {
        self.command().args(["env", "remove", "--all"])
    }

    fn lock_file_name(&self) -> &str {
        LOCK_FILE_NAME
    }

    fn ignore_rules(&self) -> &[&'static str] {
        &["dist"]
    }
}
