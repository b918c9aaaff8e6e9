use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};

use crate::project::{validate_name, RegistrySource};

pub const DEFAULT_BUILD_FORMAT: &str = "wheel";
pub const INITIAL_PROJECT_VERSION: &str = "0.1.0";
pub const CHAIN_PROJECT_NAMES: [&str; 3] = ["lorito", "gatito", "perrito"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpKind {
    Major,
    Minor,
    #[default]
    Patch,
    Premajor,
    Preminor,
    Prepatch,
    Prerelease,
}

impl BumpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
            Self::Premajor => "premajor",
            Self::Preminor => "preminor",
            Self::Prepatch => "prepatch",
            Self::Prerelease => "prerelease",
        }
    }

    /// Release bumps only; pre-release arithmetic is left to the package manager.
    pub fn apply(self, version: &Version) -> Option<Version> {
        let (major, minor, patch) = match self {
            Self::Major => (version.major + 1, 0, 0),
            Self::Minor => (version.major, version.minor + 1, 0),
            Self::Patch => (version.major, version.minor, version.patch + 1),
            Self::Premajor | Self::Preminor | Self::Prepatch | Self::Prerelease => return None,
        };
        Some(Version {
            major,
            minor,
            patch,
            pre: Prerelease::EMPTY,
            build: BuildMetadata::EMPTY,
        })
    }
}

fn default_build_format() -> String {
    DEFAULT_BUILD_FORMAT.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    Create,
    AddSource {
        name: String,
        url: String,
    },
    AddDependency {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    Build {
        #[serde(default = "default_build_format")]
        format: String,
    },
    Publish {
        repository: String,
    },
    BumpVersion {
        #[serde(default)]
        kind: BumpKind,
    },
    Lock,
    UpdateDependency {
        name: String,
    },
    UpdateAllDependencies,
    RemoveLock,
    RemoveEnvironment,
    ExpectLocked {
        package: String,
        version: String,
    },
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::AddSource { .. } => "add-source",
            Self::AddDependency { .. } => "add-dependency",
            Self::Build { .. } => "build",
            Self::Publish { .. } => "publish",
            Self::BumpVersion { .. } => "bump-version",
            Self::Lock => "lock",
            Self::UpdateDependency { .. } => "update-dependency",
            Self::UpdateAllDependencies => "update-all-dependencies",
            Self::RemoveLock => "remove-lock",
            Self::RemoveEnvironment => "remove-environment",
            Self::ExpectLocked { .. } => "expect-locked",
        }
    }

    /// Whether the action goes through the change recorder and leaves an operation record.
    pub fn is_recorded(&self) -> bool {
        !matches!(self, Self::RemoveLock | Self::ExpectLocked { .. })
    }

    pub fn build() -> Self {
        Self::Build {
            format: default_build_format(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub project: String,
    #[serde(flatten)]
    pub action: Action,
}

impl Step {
    pub fn new(project: impl Into<String>, action: Action) -> Self {
        Self {
            project: project.into(),
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A dependency from outside the scenario, added to the first package of a chain before its
/// first build. Without `source` it resolves from the package manager's default index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalDependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ExternalDependency {
    pub fn new(name: impl Into<String>, source: Option<String>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioTemplate {
    Chain,
    ChainUpdateAll,
}

impl ScenarioTemplate {
    pub fn build(self, source: &RegistrySource) -> Result<Scenario> {
        self.build_with(source, None)
    }

    pub fn build_with(
        self,
        source: &RegistrySource,
        root_dependency: Option<&ExternalDependency>,
    ) -> Result<Scenario> {
        let initial = Version::parse(INITIAL_PROJECT_VERSION)
            .context("initial project version must be valid semver")?;
        let update_all = self == Self::ChainUpdateAll;
        let mut scenario = Scenario::dependency_chain(
            &CHAIN_PROJECT_NAMES,
            source,
            &initial,
            update_all,
            root_dependency,
        )?;
        if update_all {
            scenario.name = "chain-update-all".to_string();
        }
        Ok(scenario)
    }
}

#[derive(Debug, Default)]
struct ProjectPlanState {
    sources: BTreeSet<String>,
    built_this_epoch: bool,
}

impl Scenario {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(input).context("failed to parse scenario")?;
        validate_name("scenario", &scenario.name)?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading scenario file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed loading scenario {}", path.display()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize scenario")
    }

    /// A linear chain where each package depends on the one before it. Bootstraps every
    /// link, bumps every package but the last, and re-resolves each link individually
    /// (or the leaf all at once with `update_all`).
    pub fn dependency_chain(
        names: &[&str],
        source: &RegistrySource,
        initial_version: &Version,
        update_all: bool,
        root_dependency: Option<&ExternalDependency>,
    ) -> Result<Self> {
        if names.len() < 2 {
            anyhow::bail!("dependency chain needs at least two projects");
        }
        if let Some(dependency) = root_dependency {
            if names.contains(&dependency.name.as_str()) {
                anyhow::bail!(
                    "external dependency '{}' is already a package of the chain",
                    dependency.name
                );
            }
        }
        let bumped = BumpKind::Patch
            .apply(initial_version)
            .context("patch bump must produce a version")?;
        let last = names.len() - 1;
        let mut steps = Vec::new();

        for name in names {
            steps.push(Step::new(*name, Action::Create));
            steps.push(Step::new(
                *name,
                Action::AddSource {
                    name: source.name.clone(),
                    url: source.url.clone(),
                },
            ));
        }

        for (index, name) in names.iter().enumerate() {
            if let (0, Some(dependency)) = (index, root_dependency) {
                steps.push(Step::new(
                    *name,
                    Action::AddDependency {
                        name: dependency.name.clone(),
                        source: dependency.source.clone(),
                    },
                ));
            }
            if index > 0 {
                steps.push(Step::new(
                    *name,
                    Action::AddDependency {
                        name: names[index - 1].to_string(),
                        source: Some(source.name.clone()),
                    },
                ));
            }
            if index < last {
                steps.push(Step::new(*name, Action::build()));
                steps.push(Step::new(
                    *name,
                    Action::Publish {
                        repository: source.name.clone(),
                    },
                ));
            }
        }

        for (index, name) in names.iter().enumerate().take(last) {
            steps.push(Step::new(
                *name,
                Action::BumpVersion {
                    kind: BumpKind::Patch,
                },
            ));
            if index > 0 {
                steps.push(Step::new(
                    *name,
                    Action::UpdateDependency {
                        name: names[index - 1].to_string(),
                    },
                ));
            }
            steps.push(Step::new(*name, Action::build()));
            steps.push(Step::new(
                *name,
                Action::Publish {
                    repository: source.name.clone(),
                },
            ));
        }

        let leaf_update = if update_all {
            Action::UpdateAllDependencies
        } else {
            Action::UpdateDependency {
                name: names[last - 1].to_string(),
            }
        };
        steps.push(Step::new(names[last], leaf_update));

        for name in &names[1..] {
            steps.push(Step::new(
                *name,
                Action::ExpectLocked {
                    package: names[0].to_string(),
                    version: bumped.to_string(),
                },
            ));
        }

        Ok(Self {
            name: "chain".to_string(),
            description: Some(format!(
                "{} with each package depending on the previous one",
                names.join(" -> ")
            )),
            steps,
        })
    }

    /// Project names in creation order.
    pub fn projects(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| step.action == Action::Create)
            .map(|step| step.project.as_str())
            .collect()
    }

    pub fn registry_urls(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut urls = Vec::new();
        for step in &self.steps {
            if let Action::AddSource { url, .. } = &step.action {
                if seen.insert(url.as_str()) {
                    urls.push(url.as_str());
                }
            }
        }
        urls
    }

    pub fn recorded_step_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| step.action.is_recorded())
            .count()
    }

    /// Replays the per-project lifecycle over the step list and rejects orderings that
    /// cannot succeed: actions before `create`, publishing without a build in the current
    /// version, and depending on a scenario project before it reached the named index.
    pub fn validate(&self) -> Result<()> {
        let scenario_projects: BTreeSet<&str> = self.projects().into_iter().collect();
        let mut states: BTreeMap<&str, ProjectPlanState> = BTreeMap::new();
        let mut published: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for (index, step) in self.steps.iter().enumerate() {
            let position = index + 1;
            let project = step.project.as_str();
            let label = step.action.label();

            if let Action::Create = step.action {
                validate_name("project", project).with_context(|| {
                    format!("scenario-invalid: step {position} ({project} {label})")
                })?;
                if states.insert(project, ProjectPlanState::default()).is_some() {
                    anyhow::bail!(
                        "scenario-invalid: step {position} creates project '{project}' twice"
                    );
                }
                continue;
            }

            let Some(state) = states.get_mut(project) else {
                anyhow::bail!(
                    "scenario-invalid: step {position} ({project} {label}) runs before '{project}' is created"
                );
            };

            match &step.action {
                Action::Create => {}
                Action::AddSource { name, url } => {
                    RegistrySource::new(name.as_str(), url.as_str()).with_context(|| {
                        format!("scenario-invalid: step {position} ({project} {label})")
                    })?;
                    state.sources.insert(name.clone());
                }
                Action::AddDependency { name, source } => {
                    if name == project {
                        anyhow::bail!(
                            "scenario-invalid: step {position} makes '{project}' depend on itself"
                        );
                    }
                    if let Some(source) = source {
                        if !state.sources.contains(source) {
                            anyhow::bail!(
                                "scenario-invalid: step {position} ({project} {label}) uses source '{source}' that '{project}' never registered"
                            );
                        }
                        let reachable = published
                            .get(source.as_str())
                            .is_some_and(|names| names.contains(name.as_str()));
                        if scenario_projects.contains(name.as_str()) && !reachable {
                            anyhow::bail!(
                                "scenario-invalid: step {position} ({project} {label}) needs '{name}' published to '{source}' first"
                            );
                        }
                    }
                }
                Action::Build { .. } => state.built_this_epoch = true,
                Action::Publish { repository } => {
                    if !state.sources.contains(repository) {
                        anyhow::bail!(
                            "scenario-invalid: step {position} ({project} {label}) targets source '{repository}' that '{project}' never registered"
                        );
                    }
                    if !state.built_this_epoch {
                        anyhow::bail!(
                            "scenario-invalid: step {position} ({project} {label}) has no build for the current version"
                        );
                    }
                    published
                        .entry(repository.as_str())
                        .or_default()
                        .insert(project);
                }
                Action::BumpVersion { .. } => state.built_this_epoch = false,
                Action::UpdateDependency { name } => {
                    if name.trim().is_empty() {
                        anyhow::bail!(
                            "scenario-invalid: step {position} ({project} {label}) names no dependency"
                        );
                    }
                }
                Action::ExpectLocked { package, version } => {
                    if package.trim().is_empty() || version.trim().is_empty() {
                        anyhow::bail!(
                            "scenario-invalid: step {position} ({project} {label}) needs a package and a version"
                        );
                    }
                }
                Action::Lock
                | Action::UpdateAllDependencies
                | Action::RemoveLock
                | Action::RemoveEnvironment => {}
            }
        }

        Ok(())
    }
}
