//! `vaultscan config` command handler

use std::io::Write;
use std::path::Path;

use colored::Colorize;
use serde::Serialize;
use tracing::info;

use vaultscan_artifact_scanner::{InspectTaskConfig, ScanTaskConfig};
use vaultscan_core::config::VaultscanConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Section names accepted by `config show --section`.
pub const SECTIONS: &[&str] = &["general", "server", "scan", "inspect"];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

/// Loads the file and derives both task configurations.
///
/// Errors from the file and from each task section are collected, so one
/// report lists every problem.
async fn execute_validate(config_path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %config_path.display(), "validating configuration");

    let report = validate(config_path).await;
    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }
    Ok(())
}

/// Builds the validation report for `config_path`.
pub async fn validate(config_path: &Path) -> ConfigValidationReport {
    let source = config_path.display().to_string();
    let config = match VaultscanConfig::load(config_path).await {
        Ok(config) => config,
        Err(e) => {
            return ConfigValidationReport {
                source,
                valid: false,
                errors: vec![e.to_string()],
                tasks: Vec::new(),
            };
        }
    };

    let mut errors = Vec::new();
    let mut tasks = Vec::new();

    match ScanTaskConfig::from_core(&config).and_then(|c| c.validate().map(|()| c)) {
        Ok(c) => tasks.push(TaskSummary {
            task: "scan".to_owned(),
            enabled: c.enabled,
            repositories: c.repositories,
            name_patterns: c.selection.name_patterns,
        }),
        Err(e) => errors.push(e.to_string()),
    }
    match InspectTaskConfig::from_core(&config).and_then(|c| c.validate().map(|()| c)) {
        Ok(c) => tasks.push(TaskSummary {
            task: "inspect".to_owned(),
            enabled: c.enabled,
            repositories: c.repositories,
            name_patterns: c.selection.name_patterns,
        }),
        Err(e) => errors.push(e.to_string()),
    }

    ConfigValidationReport {
        source,
        valid: errors.is_empty(),
        errors,
        tasks,
    }
}

/// Shows the effective configuration with the API token redacted.
async fn execute_show(
    config_path: &Path,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading configuration");

    let config = VaultscanConfig::load(config_path).await?;
    let report = show(&config, config_path, section.as_deref())?;
    writer.render(&report)
}

/// Renders `config` (or one section of it) as TOML.
pub fn show(
    config: &VaultscanConfig,
    config_path: &Path,
    section: Option<&str>,
) -> Result<ConfigReport, CliError> {
    let mut config = config.clone();
    config.server = config.server.redacted();

    let rendered = match section {
        None => toml::to_string_pretty(&config),
        Some("general") => toml::to_string_pretty(&config.general),
        Some("server") => toml::to_string_pretty(&config.server),
        Some("scan") => toml::to_string_pretty(&config.scan),
        Some("inspect") => toml::to_string_pretty(&config.inspect),
        Some(other) => {
            return Err(CliError::Command(format!(
                "unknown section: {other} (expected: {})",
                SECTIONS.join(", ")
            )));
        }
    }
    .map_err(|e| CliError::Command(format!("failed to serialize configuration: {e}")))?;

    Ok(ConfigReport {
        source: config_path.display().to_string(),
        section: section.map(str::to_owned),
        config_toml: rendered,
    })
}

/// Effective configuration for display.
#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Text output only
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        match &self.section {
            Some(section) => writeln!(
                w,
                "Configuration {} (source: {})",
                format!("[{section}]").bold(),
                self.source
            )?,
            None => writeln!(w, "Configuration (source: {})", self.source.bold())?,
        }
        writeln!(w)?;
        write!(w, "{}", self.config_toml)
    }
}

/// Per-task summary of a valid configuration.
#[derive(Debug, Serialize)]
pub struct TaskSummary {
    pub task: String,
    pub enabled: bool,
    pub repositories: Vec<String>,
    pub name_patterns: Vec<String>,
}

/// Result of `config validate`.
#[derive(Debug, Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub tasks: Vec<TaskSummary>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Config Validation: {}", self.source.bold())?;
        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }
        for task in &self.tasks {
            let repositories = if task.repositories.is_empty() {
                "all".to_owned()
            } else {
                task.repositories.join(", ")
            };
            writeln!(
                w,
                "  {:<8} enabled={} repositories={} patterns={}",
                task.task,
                task.enabled,
                repositories,
                task.name_patterns.join(", ")
            )?;
        }
        Ok(())
    }
}
