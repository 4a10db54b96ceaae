//! User-facing command surface.
//!
//! [`Dashboard`] wires the [`ImportPipeline`], the [`Store`] and the
//! [`RefreshController`] together. Every command that can change the refresh
//! guard ends by reconciling the controller, so the timer state always
//! follows the store.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use savings_core::error::{DashboardError, Result};
use savings_core::models::{FiltersUpdate, ImportSource, DEFAULT_REFRESH_MINUTES};
use savings_core::settings::{PipelineConfig, Settings};
use savings_data::import::{ImportPipeline, Imported};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::refresh::{RefreshController, RefreshTick, TimerDriver, TokioTimer, Transition};
use crate::store::{Store, StoreSnapshot};

// ── DashboardConfig ───────────────────────────────────────────────────────────

/// Construction parameters for a [`Dashboard`].
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub pipeline: PipelineConfig,
    /// Remote endpoint; API imports and auto-refresh need one.
    pub endpoint: Option<String>,
    pub refresh_interval_minutes: u32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            endpoint: None,
            refresh_interval_minutes: DEFAULT_REFRESH_MINUTES,
        }
    }
}

impl DashboardConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            pipeline: settings.pipeline_config(),
            endpoint: settings.api_url.clone(),
            refresh_interval_minutes: settings.refresh_interval,
        }
    }
}

// ── Dashboard ─────────────────────────────────────────────────────────────────

/// Owns the store and the single refresh controller of an application.
///
/// Dropping the dashboard cancels any live refresh timer.
pub struct Dashboard<D: TimerDriver = TokioTimer> {
    store: Arc<Store>,
    pipeline: ImportPipeline,
    endpoint: Option<String>,
    controller: Mutex<RefreshController<D>>,
}

impl<D: TimerDriver> Dashboard<D> {
    pub fn new(config: DashboardConfig, driver: D) -> Result<Self> {
        let store = Arc::new(Store::new());
        store.set_refresh_interval(config.refresh_interval_minutes)?;

        let pipeline = ImportPipeline::new(&config.pipeline)?;
        let controller = RefreshController::new(
            driver,
            Arc::clone(&store),
            pipeline.clone(),
            config.endpoint.clone(),
        );

        Ok(Self {
            store,
            pipeline,
            endpoint: config.endpoint,
            controller: Mutex::new(controller),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    pub fn is_refresh_armed(&self) -> bool {
        self.controller().is_armed()
    }

    // ── Imports ───────────────────────────────────────────────────────────

    /// Import a CSV file from disk.
    ///
    /// The file source becomes active before reading starts, which stops any
    /// API polling even if the import then fails.
    pub async fn import_from_file(&self, file: Option<&Path>) -> Result<()> {
        self.switch_source(ImportSource::File);
        self.store.begin_import();
        let result = self.pipeline.import_from_file(file).await;
        self.finish_import(result)
    }

    /// Import CSV content already held in memory.
    pub fn import_from_bytes(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.switch_source(ImportSource::File);
        self.store.begin_import();
        let result = self.pipeline.import_from_bytes(name, bytes);
        self.finish_import(result)
    }

    /// Fetch the configured endpoint once. Success makes the API the active
    /// source and turns auto-refresh on.
    pub async fn import_from_api(&self) -> Result<()> {
        let endpoint = self.endpoint()?;
        self.store.begin_import();
        let result = self.pipeline.import_from_api(endpoint).await;
        self.finish_import(result)
    }

    /// Re-fetch the API now, outside the timer schedule.
    ///
    /// Behaves like a timer tick: flags are untouched and failures leave the
    /// current data in place. Returns `Ok(false)` when the API is not the
    /// active source with loaded data, or the result arrived stale.
    pub async fn refresh_now(&self) -> Result<bool> {
        let endpoint = self.endpoint()?.to_string();
        let guard = self.store.refresh_guard();
        if guard.source != ImportSource::RemoteApi || !guard.data_loaded {
            return Ok(false);
        }
        let tick = RefreshTick::new(
            Arc::clone(&self.store),
            self.pipeline.clone(),
            endpoint,
            self.store.refresh_generation(),
        );
        tick.run().await
    }

    // ── Commands ──────────────────────────────────────────────────────────

    /// Merge a partial filter selection. Never triggers an import.
    pub fn update_filters(&self, update: FiltersUpdate) {
        self.store.update_filters(update);
    }

    /// Flip auto-refresh and return the new value.
    pub fn toggle_auto_refresh(&self) -> bool {
        let enabled = self.store.toggle_auto_refresh();
        self.reconcile();
        enabled
    }

    /// Change the refresh interval; a live timer is replaced by one with the
    /// new period.
    pub fn change_refresh_interval(&self, minutes: u32) -> Result<()> {
        self.store.set_refresh_interval(minutes)?;
        self.reconcile();
        Ok(())
    }

    /// Make `source` active without importing. Switching to the file source
    /// stops polling.
    pub fn switch_source(&self, source: ImportSource) -> bool {
        let changed = self.store.set_active_source(source);
        if changed {
            info!(%source, "switched active source");
        }
        self.reconcile();
        changed
    }

    /// Cancel any live refresh timer. Safe to call more than once.
    pub fn shutdown(&self) {
        self.controller().disarm();
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn finish_import(&self, result: Result<Imported>) -> Result<()> {
        match result {
            Ok(imported) => {
                self.store.commit(imported.data, imported.source);
                self.store.end_import(None);
                self.reconcile();
                Ok(())
            }
            Err(e) => {
                if e.is_import_failure() {
                    warn!(error = %e, "import failed");
                } else {
                    error!(error = %e, "import aborted");
                }
                self.store.end_import(Some(e.to_string()));
                self.reconcile();
                Err(e)
            }
        }
    }

    fn endpoint(&self) -> Result<&str> {
        self.endpoint
            .as_deref()
            .ok_or_else(|| DashboardError::Config("no API endpoint configured".to_string()))
    }

    fn reconcile(&self) -> Transition {
        self.controller().reconcile()
    }

    fn controller(&self) -> MutexGuard<'_, RefreshController<D>> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: TimerDriver> Drop for Dashboard<D> {
    fn drop(&mut self) {
        self.controller
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .disarm();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
