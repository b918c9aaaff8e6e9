use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lockstep_core::{ExternalDependency, RegistrySource};
use lockstep_lifecycle::LifecycleSettings;
use lockstep_runner::{CommitterIdentity, DEFAULT_LOGGER_NAME};
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct HarnessConfig {
    pub(crate) package_manager: PackageManagerConfig,
    pub(crate) vcs: VcsConfig,
    pub(crate) audit: AuditConfig,
    pub(crate) index: IndexConfig,
    pub(crate) template: TemplateConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct PackageManagerConfig {
    pub(crate) program: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct VcsConfig {
    pub(crate) program: String,
    pub(crate) branch: String,
    pub(crate) user_name: String,
    pub(crate) user_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct AuditConfig {
    pub(crate) log_dir: PathBuf,
    pub(crate) logger: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct IndexConfig {
    pub(crate) name: String,
    pub(crate) url: String,
    pub(crate) preflight: bool,
}

/// Knobs for the built-in templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct TemplateConfig {
    pub(crate) root_dependency: Option<ExternalDependency>,
}

impl Default for PackageManagerConfig {
    fn default() -> Self {
        Self {
            program: "poetry".to_string(),
        }
    }
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
            branch: "main".to_string(),
            user_name: "lockstep".to_string(),
            user_email: "lockstep@localhost".to_string(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("."),
            logger: DEFAULT_LOGGER_NAME.to_string(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            url: "http://localhost/".to_string(),
            preflight: false,
        }
    }
}

impl HarnessConfig {
    pub(crate) fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("config-invalid: failed to parse configuration")
    }

    /// Defaults when no file is given; a named file that cannot be read is an error.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path).with_context(|| {
            format!("config-invalid: failed reading configuration {}", path.display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("config-invalid: failed loading {}", path.display()))
    }

    pub(crate) fn registry_source(&self) -> Result<RegistrySource> {
        RegistrySource::new(self.index.name.as_str(), self.index.url.as_str())
            .context("config-invalid: [index] does not describe a usable registry source")
    }

    pub(crate) fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            branch: self.vcs.branch.clone(),
            identity: CommitterIdentity {
                name: self.vcs.user_name.clone(),
                email: self.vcs.user_email.clone(),
            },
        }
    }
}
