//! CLI error types and exit code mapping

use vaultscan_artifact_scanner::ScannerError;
use vaultscan_core::error::VaultscanError;

/// CLI error type.
///
/// `exit_code()` maps each variant to a process exit code.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// The catalog could not be read or written.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from vaultscan-core.
    #[error("{0}")]
    Core(#[from] VaultscanError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                     |
    /// |------|-----------------------------|
    /// | 0    | Success                     |
    /// | 1    | General / command error     |
    /// | 2    | Configuration error         |
    /// | 3    | Catalog unavailable         |
    /// | 10   | IO error                    |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(VaultscanError::Config(_)) => 2,
            Self::Catalog(_) | Self::Core(VaultscanError::Storage(_)) => 3,
            Self::Io(_) | Self::Core(VaultscanError::Io(_)) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) => 1,
        }
    }
}

impl From<ScannerError> for CliError {
    fn from(e: ScannerError) -> Self {
        match e {
            ScannerError::Config { .. } => Self::Config(e.to_string()),
            ScannerError::Catalog { .. } | ScannerError::Ledger { .. } => {
                Self::Catalog(e.to_string())
            }
            other => Self::Command(other.to_string()),
        }
    }
}
