use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DashboardError, Result};
use crate::models::ImportSource;
use crate::schema::CsvSchema;

/// Default bound on a single API request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Savings dashboard data core: import from CSV or a live endpoint and keep it fresh
#[derive(Parser, Debug, Clone)]
#[command(
    name = "savings-dashboard",
    about = "Import savings metrics from CSV or a live endpoint and keep them fresh",
    version
)]
pub struct Settings {
    /// Data source to import from
    #[arg(long, default_value = "auto", value_parser = ["auto", "file", "api"])]
    pub source: String,

    /// CSV file to import
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Endpoint returning the dashboard data as JSON
    #[arg(long, env = "SAVINGS_API_URL")]
    pub api_url: Option<String>,

    /// Auto-refresh interval in minutes (1-1440)
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=1440))]
    pub refresh_interval: u32,

    /// Do not poll the endpoint after an API import
    #[arg(long)]
    pub no_auto_refresh: bool,

    /// API request timeout in seconds (1-600)
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..=600))]
    pub timeout_secs: u64,

    /// CSV column holding the record date
    #[arg(long, default_value = "date")]
    pub date_column: String,

    /// CSV column holding the department
    #[arg(long, default_value = "department")]
    pub department_column: String,

    /// CSV column holding the business function
    #[arg(long, default_value = "function")]
    pub function_column: String,

    /// CSV column holding the user
    #[arg(long, default_value = "user")]
    pub user_column: String,

    /// CSV column holding the application
    #[arg(long, default_value = "app")]
    pub app_column: String,

    /// CSV column holding the savings amount
    #[arg(long, default_value = "savings")]
    pub savings_column: String,

    /// CSV column holding the number of uses
    #[arg(long, default_value = "uses")]
    pub uses_column: String,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

// ── PipelineConfig ─────────────────────────────────────────────────────────────

/// Settings consumed by the import pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Upper bound on one API request, connection included.
    pub request_timeout: Duration,
    pub csv_schema: CsvSchema,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            csv_schema: CsvSchema::default(),
        }
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse process arguments and apply the `--debug` flag.
    pub fn load() -> Self {
        Self::load_from_args(std::env::args_os())
    }

    /// Same as [`Settings::load`] with an explicit argument list.
    pub fn load_from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut settings = Settings::parse_from(args);
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// Resolve `--source auto` from whichever input was supplied.
    ///
    /// A file wins over an endpoint when both are given.
    pub fn import_source(&self) -> Result<ImportSource> {
        match self.source.as_str() {
            "file" => Ok(ImportSource::File),
            "api" => Ok(ImportSource::RemoteApi),
            _ if self.file.is_some() => Ok(ImportSource::File),
            _ if self.api_url.is_some() => Ok(ImportSource::RemoteApi),
            _ => Err(DashboardError::Config(
                "either --file or --api-url must be provided".to_string(),
            )),
        }
    }

    /// Column layout assembled from the `--*-column` flags.
    pub fn csv_schema(&self) -> CsvSchema {
        CsvSchema {
            date: self.date_column.clone(),
            department: self.department_column.clone(),
            function: self.function_column.clone(),
            user: self.user_column.clone(),
            app: self.app_column.clone(),
            savings: self.savings_column.clone(),
            uses: self.uses_column.clone(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            request_timeout: Duration::from_secs(self.timeout_secs),
            csv_schema: self.csv_schema(),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
