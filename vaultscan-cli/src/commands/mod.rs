//! Command handlers -- one module per subcommand

pub mod config;
pub mod plan;
pub mod reset;
pub mod status;

use vaultscan_artifact_scanner::FsCatalog;

use crate::error::CliError;

/// Repository keys a command operates on.
///
/// An explicit key wins. Otherwise every repository under the catalog root,
/// narrowed to `configured` when that list is non-empty.
pub async fn resolve_repositories(
    catalog: &FsCatalog,
    explicit: Option<&str>,
    configured: &[String],
) -> Result<Vec<String>, CliError> {
    if let Some(key) = explicit {
        return Ok(vec![key.to_owned()]);
    }
    let mut keys = catalog.repositories().await?;
    if !configured.is_empty() {
        keys.retain(|k| configured.contains(k));
    }
    if keys.is_empty() {
        return Err(CliError::Command(format!(
            "no repositories found under {}",
            catalog.root().display()
        )));
    }
    Ok(keys)
}
