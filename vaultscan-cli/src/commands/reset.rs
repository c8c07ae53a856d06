//! `vaultscan reset` command handler

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use vaultscan_artifact_scanner::{FsCatalog, LedgerMaintenance, ScanTaskConfig};
use vaultscan_core::config::VaultscanConfig;

use crate::cli::{ResetAction, ResetArgs};
use crate::commands::resolve_repositories;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `reset` command.
///
/// Only `stale-pending` without `--window-hours` reads the configuration.
pub async fn execute(
    args: ResetArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let window = match args.action {
        ResetAction::StalePending {
            window_hours: Some(hours),
        } => Some(hours_window(hours)?),
        ResetAction::StalePending { window_hours: None } => {
            let config = VaultscanConfig::load(config_path).await?;
            Some(ScanTaskConfig::from_core(&config)?.selection.retry_window())
        }
        ResetAction::All | ResetAction::Failures => None,
    };

    let catalog = FsCatalog::new(&args.catalog.root);
    let keys = resolve_repositories(&catalog, args.catalog.repository.as_deref(), &[]).await?;
    let report = reset(&catalog, &keys, args.action, window, Utc::now()).await?;
    writer.render(&report)
}

fn hours_window(hours: u64) -> Result<chrono::Duration, CliError> {
    i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| CliError::Command(format!("retry window of {hours} hours is out of range")))
}

/// Applies `action` to every repository in `keys`.
pub async fn reset(
    catalog: &FsCatalog,
    keys: &[String],
    action: ResetAction,
    window: Option<chrono::Duration>,
    now: DateTime<Utc>,
) -> Result<ResetReport, CliError> {
    let maintenance = LedgerMaintenance::new(catalog);
    let mut report = ResetReport {
        action: action_name(action).to_owned(),
        repositories: Vec::with_capacity(keys.len()),
    };

    for key in keys {
        let cleared = match (action, window) {
            (ResetAction::All, _) => maintenance.clear_all(key).await?,
            (ResetAction::Failures, _) => maintenance.reset_failures(key).await?,
            (ResetAction::StalePending { .. }, Some(window)) => {
                maintenance.reset_stale_pending(key, now, window).await?
            }
            (ResetAction::StalePending { .. }, None) => {
                return Err(CliError::Command("retry window is required".to_owned()));
            }
        };
        info!(repository = %key, action = %report.action, cleared, "ledger reset");
        report.repositories.push(RepositoryReset {
            repository: key.clone(),
            cleared,
        });
    }
    Ok(report)
}

fn action_name(action: ResetAction) -> &'static str {
    match action {
        ResetAction::All => "all",
        ResetAction::Failures => "failures",
        ResetAction::StalePending { .. } => "stale-pending",
    }
}

#[derive(Debug, Serialize)]
pub struct RepositoryReset {
    pub repository: String,
    pub cleared: usize,
}

#[derive(Debug, Serialize)]
pub struct ResetReport {
    pub action: String,
    pub repositories: Vec<RepositoryReset>,
}

impl Render for ResetReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Reset ({})", self.action.bold())?;
        for repo in &self.repositories {
            writeln!(w, "  {:<40} cleared {}", repo.repository, repo.cleared)?;
        }
        Ok(())
    }
}
