use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the savings dashboard.
#[derive(Error, Debug)]
pub enum DashboardError {
    /// A file import was requested without a file.
    #[error("No file selected.")]
    NoFileSelected,

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file content is not well-formed tabular text.
    #[error("Failed to parse CSV: {0}")]
    Parse(String),

    /// The request could not be completed or the response status was not 2xx.
    #[error("Problem fetching data: {status_text}")]
    Transport {
        status: Option<u16>,
        status_text: String,
    },

    /// The endpoint answered successfully but the payload flags an error.
    #[error("API error: {0}")]
    ApiLogical(String),

    /// Parsed input does not have the canonical data shape.
    #[error("Invalid data shape: {0}")]
    Normalization(String),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A refresh interval of zero minutes was requested.
    #[error("Invalid refresh interval: {0} minutes")]
    InvalidInterval(u32),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DashboardError {
    /// `true` for failures of the import path (as opposed to configuration
    /// or local state errors).
    pub fn is_import_failure(&self) -> bool {
        matches!(
            self,
            DashboardError::NoFileSelected
                | DashboardError::FileRead { .. }
                | DashboardError::Parse(_)
                | DashboardError::Transport { .. }
                | DashboardError::ApiLogical(_)
                | DashboardError::Normalization(_)
                | DashboardError::JsonParse(_)
        )
    }
}

/// Convenience alias used throughout the dashboard crates.
pub type Result<T> = std::result::Result<T, DashboardError>;
