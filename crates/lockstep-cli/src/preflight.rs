use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

/// Probes every registry URL once so an index that is not running fails the run before any
/// project is created.
pub(crate) fn probe_registries(urls: &[&str]) -> Result<()> {
    if urls.is_empty() {
        return Ok(());
    }
    let client = reqwest::blocking::Client::builder()
        .timeout(PREFLIGHT_TIMEOUT)
        .build()
        .context("failed to build HTTP client for index preflight")?;

    for url in urls {
        debug!(%url, "probing package index");
        let response = client.get(*url).send().with_context(|| {
            format!("external-tool-failed: package index {url} is not reachable")
        })?;
        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            anyhow::bail!("external-tool-failed: package index {url} answered {status}");
        }
        info!(%url, %status, "package index reachable");
    }
    Ok(())
}
