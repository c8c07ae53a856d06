//! Text vs JSON rendering
//!
//! Every command payload implements `Serialize` for JSON and [`Render`] for
//! text, so command handlers never branch on the output format.

use std::io::Write;

use colored::{ColoredString, Colorize};
use serde::Serialize;

use vaultscan_artifact_scanner::TaskStatus;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Writes command payloads in the selected format.
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render a payload to stdout.
    pub fn render<T: Render + Serialize>(&self, payload: &T) -> Result<(), CliError> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.render_to(&mut handle, payload)
    }

    /// Render a payload to an arbitrary writer.
    pub fn render_to<T: Render + Serialize>(
        &self,
        w: &mut dyn Write,
        payload: &T,
    ) -> Result<(), CliError> {
        match self.format {
            OutputFormat::Text => payload.render_text(w)?,
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *w, payload)?;
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

/// Human-readable text rendering.
pub trait Render {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()>;
}

/// Colors a ledger status for terminal output.
pub fn status_label(status: Option<TaskStatus>) -> ColoredString {
    match status {
        Some(TaskStatus::Success) => "SUCCESS".green(),
        Some(TaskStatus::Failure) => "FAILURE".red().bold(),
        Some(TaskStatus::Pending) => "PENDING".yellow(),
        Some(TaskStatus::ComponentNotFound) => "COMPONENT_NOT_FOUND".magenta(),
        None => "-".dimmed(),
    }
}

/// Shortens `s` to `max` characters, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
