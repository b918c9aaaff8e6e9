use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const MANIFEST_FILE_NAME: &str = "pyproject.toml";

#[derive(Debug, Default, Deserialize)]
struct ManifestDocument {
    project: Option<VersionTable>,
    tool: Option<ToolTable>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolTable {
    poetry: Option<VersionTable>,
}

#[derive(Debug, Default, Deserialize)]
struct VersionTable {
    version: Option<String>,
}

/// Reads the package version, preferring the standard `[project]` table over `[tool.poetry]`.
pub fn manifest_version_from_toml_str(input: &str) -> Result<String> {
    let document: ManifestDocument =
        toml::from_str(input).context("failed to parse project manifest")?;

    let from_project = document.project.and_then(|table| table.version);
    let from_poetry = document
        .tool
        .and_then(|tool| tool.poetry)
        .and_then(|table| table.version);

    from_project
        .or(from_poetry)
        .map(|version| version.trim().to_string())
        .filter(|version| !version.is_empty())
        .ok_or_else(|| anyhow!("project manifest declares no version"))
}
