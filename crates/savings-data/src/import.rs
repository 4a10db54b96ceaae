//! Dual-source import pipeline.
//!
//! Acquires raw data from an uploaded CSV file or the remote endpoint, runs it
//! through [`normalize`] and reports exactly one outcome. The pipeline never
//! touches application state; callers commit the returned [`Imported`].

use std::path::Path;

use savings_core::error::{DashboardError, Result};
use savings_core::models::{AppData, ImportSource};
use savings_core::schema::CsvSchema;
use savings_core::settings::PipelineConfig;
use tracing::{debug, info, warn};

use crate::client::ApiClient;
use crate::normalizer::{api_error_message, normalize, RawPayload};
use crate::reader::parse_rows;

// ── Imported ──────────────────────────────────────────────────────────────────

/// A successfully normalized snapshot and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Imported {
    pub data: AppData,
    pub source: ImportSource,
}

// ── ImportPipeline ────────────────────────────────────────────────────────────

/// Stateless orchestrator of acquisition and normalization.
///
/// Cheap to clone, so the refresh timer can own a copy.
#[derive(Debug, Clone)]
pub struct ImportPipeline {
    client: ApiClient,
    schema: CsvSchema,
}

impl ImportPipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            client: ApiClient::new(config.request_timeout)?,
            schema: config.csv_schema.clone(),
        })
    }

    /// Read `file` fully, then parse and normalize it.
    ///
    /// `None` means the user has not picked a file yet and fails with
    /// [`DashboardError::NoFileSelected`].
    pub async fn import_from_file(&self, file: Option<&Path>) -> Result<Imported> {
        let path = file.ok_or(DashboardError::NoFileSelected)?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| DashboardError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        self.import_from_bytes(&path.display().to_string(), &bytes)
    }

    /// Parse and normalize file content that is already in memory, e.g. an
    /// upload received by a UI shell.
    pub fn import_from_bytes(&self, name: &str, bytes: &[u8]) -> Result<Imported> {
        let rows = parse_rows(bytes)?;
        debug!(file = name, rows = rows.len(), "normalizing CSV rows");

        self.finish(name, RawPayload::File(rows))
    }

    /// Fetch `endpoint` once and normalize the JSON body.
    ///
    /// A body flagging an application error fails with
    /// [`DashboardError::ApiLogical`] carrying its message.
    pub async fn import_from_api(&self, endpoint: &str) -> Result<Imported> {
        debug!(
            endpoint,
            timeout_secs = self.client.timeout().as_secs(),
            "fetching dashboard data"
        );
        let payload = self.client.fetch_json(endpoint).await?;

        if let Some(message) = api_error_message(&payload) {
            return Err(DashboardError::ApiLogical(message));
        }

        self.finish(endpoint, RawPayload::RemoteApi(payload))
    }

    fn finish(&self, origin: &str, raw: RawPayload) -> Result<Imported> {
        let source = raw.source();
        let data = normalize(raw, &self.schema)?;
        if data.is_empty() {
            warn!(origin, %source, "import holds no records");
        }
        info!(
            origin,
            %source,
            departments = data.departments.len(),
            users = data.users.len(),
            "normalized import"
        );
        Ok(Imported { data, source })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
