//! `vaultscan status` command handler

use std::collections::BTreeMap;
use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use vaultscan_artifact_scanner::ledger::format_timestamp;
use vaultscan_artifact_scanner::{FsCatalog, LedgerMaintenance, TaskStatus};

use crate::cli::StatusArgs;
use crate::commands::resolve_repositories;
use crate::error::CliError;
use crate::output::{OutputWriter, Render, status_label, truncate};

/// Execute the `status` command.
pub async fn execute(args: StatusArgs, writer: &OutputWriter) -> Result<(), CliError> {
    let catalog = FsCatalog::new(&args.catalog.root);
    let keys = resolve_repositories(&catalog, args.catalog.repository.as_deref(), &[]).await?;

    let mut report = StatusReport {
        repositories: Vec::with_capacity(keys.len()),
    };
    for key in keys {
        report
            .repositories
            .push(repository_status(&catalog, &key, args.failed).await?);
    }
    writer.render(&report)
}

/// Reads the ledger of one repository.
///
/// Artifacts without a panel are counted but not listed.
pub async fn repository_status(
    catalog: &FsCatalog,
    repository: &str,
    failed_only: bool,
) -> Result<RepositoryStatus, CliError> {
    let entries = LedgerMaintenance::new(catalog).entries(repository).await?;

    let mut status = RepositoryStatus {
        repository: repository.to_owned(),
        total: entries.len(),
        ..RepositoryStatus::default()
    };
    for (artifact, entry) in entries {
        let row = match entry {
            Ok(entry) => {
                let Some(task_status) = entry.status else {
                    status.unprocessed += 1;
                    continue;
                };
                *status.counts.entry(task_status.as_str().to_owned()).or_default() += 1;
                if failed_only && task_status != TaskStatus::Failure {
                    continue;
                }
                StatusRow {
                    artifact: artifact.name,
                    status: Some(task_status),
                    finished: entry.finished.map(format_timestamp),
                    description: entry.description,
                    policy_status: entry.policy_status,
                    critical: entry.critical,
                    high: entry.high,
                    medium: entry.medium,
                    low: entry.low,
                }
            }
            Err(e) => {
                status.corrupt += 1;
                StatusRow {
                    artifact: artifact.name,
                    description: Some(e.to_string()),
                    ..StatusRow::default()
                }
            }
        };
        status.rows.push(row);
    }
    Ok(status)
}

#[derive(Debug, Default, Serialize)]
pub struct StatusRow {
    pub artifact: String,
    pub status: Option<TaskStatus>,
    pub finished: Option<String>,
    pub description: Option<String>,
    pub policy_status: Option<String>,
    pub critical: Option<u64>,
    pub high: Option<u64>,
    pub medium: Option<u64>,
    pub low: Option<u64>,
}

#[derive(Debug, Default, Serialize)]
pub struct RepositoryStatus {
    pub repository: String,
    pub total: usize,
    pub unprocessed: usize,
    pub corrupt: usize,
    /// status name -> count
    pub counts: BTreeMap<String, usize>,
    pub rows: Vec<StatusRow>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub repositories: Vec<RepositoryStatus>,
}

impl Render for StatusReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        for (i, repo) in self.repositories.iter().enumerate() {
            if i > 0 {
                writeln!(w)?;
            }
            let counts: Vec<String> = repo
                .counts
                .iter()
                .map(|(status, n)| format!("{status}={n}"))
                .collect();
            writeln!(
                w,
                "{}  total={} unprocessed={} {}",
                repo.repository.bold(),
                repo.total,
                repo.unprocessed,
                counts.join(" ")
            )?;
            if repo.corrupt > 0 {
                writeln!(w, "  {}", format!("{} unreadable panel(s)", repo.corrupt).red())?;
            }
            if repo.rows.is_empty() {
                continue;
            }
            writeln!(
                w,
                "  {:<50} {:<20} {:<25} {:>4} {:>4} {:>4} {:>4}  {}",
                "ARTIFACT", "STATUS", "FINISHED", "CRIT", "HIGH", "MED", "LOW", "DESCRIPTION"
            )?;
            for row in &repo.rows {
                let count = |n: Option<u64>| n.map_or_else(|| "-".to_owned(), |n| n.to_string());
                writeln!(
                    w,
                    "  {:<50} {:<20} {:<25} {:>4} {:>4} {:>4} {:>4}  {}",
                    truncate(&row.artifact, 50),
                    status_label(row.status),
                    row.finished.as_deref().unwrap_or("-"),
                    count(row.critical),
                    count(row.high),
                    count(row.medium),
                    count(row.low),
                    row.description.as_deref().map(|d| truncate(d, 80)).unwrap_or_default()
                )?;
            }
        }
        Ok(())
    }
}
