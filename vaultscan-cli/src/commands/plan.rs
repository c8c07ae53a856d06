//! `vaultscan plan` command handler
//!
//! Runs the eligibility filter over a directory-backed catalog without
//! touching the ledger or the analysis service.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use tracing::{debug, info};

use vaultscan_artifact_scanner::{
    CatalogCursor, EligibilityFilter, FilterMode, FsCatalog, InspectTaskConfig, ScanTaskConfig,
    SelectionSettings, Verdict,
};
use vaultscan_core::config::VaultscanConfig;

use crate::cli::{PlanArgs, TaskKindArg};
use crate::commands::resolve_repositories;
use crate::error::CliError;
use crate::output::{OutputWriter, Render, truncate};

/// Execute the `plan` command.
pub async fn execute(
    args: PlanArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = VaultscanConfig::load(config_path).await?;
    let catalog = FsCatalog::new(&args.catalog.root);
    let report = plan(
        &config,
        &catalog,
        args.task,
        args.catalog.repository.as_deref(),
        args.verbose,
        Utc::now(),
    )
    .await?;
    writer.render(&report)
}

/// Evaluates every artifact of the selected repositories.
pub async fn plan(
    config: &VaultscanConfig,
    catalog: &FsCatalog,
    task: TaskKindArg,
    repository: Option<&str>,
    verbose: bool,
    now: DateTime<Utc>,
) -> Result<PlanReport, CliError> {
    let (selection, configured, mode) = task_selection(config, task)?;
    let filter = EligibilityFilter::new(&selection, mode)?;
    let keys = resolve_repositories(catalog, repository, &configured).await?;

    let mut report = PlanReport {
        task: task_name(task).to_owned(),
        root: catalog.root().display().to_string(),
        repositories: Vec::with_capacity(keys.len()),
    };
    for key in keys {
        let plan = plan_repository(catalog, &key, &filter, selection.page_size, verbose, now).await?;
        info!(
            repository = %key,
            process = plan.process,
            skipped = plan.skipped,
            errors = plan.errors,
            "planned repository"
        );
        report.repositories.push(plan);
    }
    Ok(report)
}

fn task_name(task: TaskKindArg) -> &'static str {
    match task {
        TaskKindArg::Scan => "scan",
        TaskKindArg::Inspect => "inspect",
    }
}

fn task_selection(
    config: &VaultscanConfig,
    task: TaskKindArg,
) -> Result<(SelectionSettings, Vec<String>, FilterMode), CliError> {
    Ok(match task {
        TaskKindArg::Scan => {
            let c = ScanTaskConfig::from_core(config)?;
            (c.selection, c.repositories, FilterMode::Scan)
        }
        TaskKindArg::Inspect => {
            let c = InspectTaskConfig::from_core(config)?;
            (c.selection, c.repositories, FilterMode::Inspection)
        }
    })
}

async fn plan_repository(
    catalog: &FsCatalog,
    repository: &str,
    filter: &EligibilityFilter,
    page_size: usize,
    verbose: bool,
    now: DateTime<Utc>,
) -> Result<RepositoryPlan, CliError> {
    let mut plan = RepositoryPlan {
        repository: repository.to_owned(),
        ..RepositoryPlan::default()
    };
    let mut cursor = CatalogCursor::new(catalog, repository, page_size);

    while let Some(page) = cursor.next_page().await? {
        for artifact in page.items {
            plan.examined += 1;
            let (action, reason) = match filter.evaluate(&artifact, now) {
                Ok(Verdict::Process(reason)) => {
                    plan.process += 1;
                    (PlanAction::Process, reason.to_string())
                }
                Ok(Verdict::Skip(reason)) => {
                    plan.skipped += 1;
                    debug!(repository, artifact = %artifact.name, reason = %reason, "would skip");
                    if !verbose {
                        continue;
                    }
                    (PlanAction::Skip, reason.to_string())
                }
                Err(e) => {
                    plan.errors += 1;
                    (PlanAction::Error, e.to_string())
                }
            };
            plan.items.push(PlanItem {
                artifact: artifact.name,
                action,
                reason,
            });
        }
    }
    Ok(plan)
}

/// What the next run would do with an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Process,
    Skip,
    /// Ledger panel could not be read; the run would record FAILURE.
    Error,
}

#[derive(Debug, Serialize)]
pub struct PlanItem {
    pub artifact: String,
    pub action: PlanAction,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct RepositoryPlan {
    pub repository: String,
    pub examined: usize,
    pub process: usize,
    pub skipped: usize,
    pub errors: usize,
    pub items: Vec<PlanItem>,
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub task: String,
    pub root: String,
    pub repositories: Vec<RepositoryPlan>,
}

impl Render for PlanReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Plan for {} task (catalog: {})", self.task.bold(), self.root)?;
        for repo in &self.repositories {
            writeln!(w)?;
            writeln!(
                w,
                "{}  examined={} process={} skipped={} errors={}",
                repo.repository.bold(),
                repo.examined,
                repo.process.to_string().green(),
                repo.skipped,
                if repo.errors > 0 {
                    repo.errors.to_string().red()
                } else {
                    repo.errors.to_string().normal()
                }
            )?;
            for item in &repo.items {
                let action = match item.action {
                    PlanAction::Process => "process".green(),
                    PlanAction::Skip => "skip".dimmed(),
                    PlanAction::Error => "error".red(),
                };
                writeln!(
                    w,
                    "  {:<8} {:<60} {}",
                    action,
                    truncate(&item.artifact, 60),
                    item.reason
                )?;
            }
        }
        Ok(())
    }
}
