//! Application state store.
//!
//! Holds the current [`AppData`] snapshot together with the filter selection
//! and the load / source / refresh flags. Data is swapped wholesale behind an
//! [`Arc`], so readers never observe a partially applied import.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use savings_core::error::{DashboardError, Result};
use savings_core::models::{AppData, Filters, FiltersUpdate, ImportSource, RefreshPolicy};
use tokio::sync::watch;
use tracing::{debug, info};

// ── Public types ──────────────────────────────────────────────────────────────

/// Consistent read-only view of the store for presentational collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub app_data: Arc<AppData>,
    pub filters: Filters,
    pub data_loaded: bool,
    pub data_source: ImportSource,
    pub auto_refresh: bool,
    pub refresh_interval_minutes: u32,
    /// `true` while any manual import is in flight. Refresh ticks never set it.
    pub loading: bool,
    /// Message of the last failed manual import, cleared by the next success.
    pub last_error: Option<String>,
}

/// The inputs the refresh controller's guard is evaluated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshGuard {
    pub auto_refresh: bool,
    pub source: ImportSource,
    pub data_loaded: bool,
    pub period: Duration,
}

impl RefreshGuard {
    /// Polling runs only for loaded API data with auto-refresh enabled.
    pub fn should_arm(&self) -> bool {
        self.auto_refresh && self.source == ImportSource::RemoteApi && self.data_loaded
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct StoreState {
    app_data: Arc<AppData>,
    filters: Filters,
    data_loaded: bool,
    active_source: ImportSource,
    refresh: RefreshPolicy,
    /// Manual imports begun and not yet ended.
    pending_imports: usize,
    last_error: Option<String>,
    /// Identifies the currently armed refresh timer.
    refresh_generation: u64,
}

/// Process-wide holder of canonical data and UI-facing flags.
///
/// Construct one per application and share it as `Arc<Store>`.
#[derive(Debug)]
pub struct Store {
    state: RwLock<StoreState>,
    /// Bumped after every state change.
    revision: watch::Sender<u64>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Empty store: zeroed data, default filters, file source, auto-refresh
    /// off at the default interval.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(StoreState {
                app_data: Arc::new(AppData::default()),
                filters: Filters::default(),
                data_loaded: false,
                active_source: ImportSource::File,
                refresh: RefreshPolicy::default(),
                pending_imports: 0,
                last_error: None,
                refresh_generation: 0,
            }),
            revision,
        }
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.read();
        StoreSnapshot {
            app_data: Arc::clone(&state.app_data),
            filters: state.filters.clone(),
            data_loaded: state.data_loaded,
            data_source: state.active_source,
            auto_refresh: state.refresh.enabled,
            refresh_interval_minutes: state.refresh.interval_minutes,
            loading: state.pending_imports > 0,
            last_error: state.last_error.clone(),
        }
    }

    pub fn app_data(&self) -> Arc<AppData> {
        Arc::clone(&self.read().app_data)
    }

    pub fn refresh_guard(&self) -> RefreshGuard {
        let state = self.read();
        RefreshGuard {
            auto_refresh: state.refresh.enabled,
            source: state.active_source,
            data_loaded: state.data_loaded,
            period: state.refresh.period(),
        }
    }

    pub fn refresh_generation(&self) -> u64 {
        self.read().refresh_generation
    }

    /// Receiver notified with a new revision number after every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // ── Commits ───────────────────────────────────────────────────────────

    /// Replace the data after a successful manual import.
    ///
    /// Stamps `meta.lastUpdate`, marks data as loaded and makes `source`
    /// active. An API import also turns auto-refresh on.
    pub fn commit(&self, mut data: AppData, source: ImportSource) {
        data.meta.last_update = Some(Utc::now());
        {
            let mut state = self.write();
            state.app_data = Arc::new(data);
            state.data_loaded = true;
            state.active_source = source;
            if source == ImportSource::RemoteApi {
                state.refresh.enabled = true;
            }
        }
        info!(%source, "committed imported data");
        self.bump();
    }

    /// Replace the data from a refresh tick without touching any flag.
    ///
    /// Applied only while `generation` is the current refresh generation and
    /// the API is still the active source; returns whether it was applied.
    pub fn commit_refresh(&self, mut data: AppData, generation: u64) -> bool {
        data.meta.last_update = Some(Utc::now());
        {
            let mut state = self.write();
            if state.refresh_generation != generation
                || state.active_source != ImportSource::RemoteApi
            {
                debug!(
                    generation,
                    current = state.refresh_generation,
                    "discarding stale refresh result"
                );
                return false;
            }
            state.app_data = Arc::new(data);
        }
        self.bump();
        true
    }

    // ── Flags ─────────────────────────────────────────────────────────────

    /// Shallow-merge a partial filter selection. Never triggers an import.
    pub fn update_filters(&self, update: FiltersUpdate) {
        self.write().filters.merge(update);
        self.bump();
    }

    /// Set the auto-refresh interval. Zero minutes is rejected.
    pub fn set_refresh_interval(&self, minutes: u32) -> Result<()> {
        if minutes == 0 {
            return Err(DashboardError::InvalidInterval(minutes));
        }
        self.write().refresh.interval_minutes = minutes;
        self.bump();
        Ok(())
    }

    /// Flip auto-refresh and return the new value.
    pub fn toggle_auto_refresh(&self) -> bool {
        let enabled = {
            let mut state = self.write();
            state.refresh.enabled = !state.refresh.enabled;
            state.refresh.enabled
        };
        self.bump();
        enabled
    }

    /// Make `source` active; returns `true` if it changed.
    pub fn set_active_source(&self, source: ImportSource) -> bool {
        let changed = {
            let mut state = self.write();
            let changed = state.active_source != source;
            state.active_source = source;
            changed
        };
        if changed {
            self.bump();
        }
        changed
    }

    /// Mark a manual import as in flight. Each call must be paired with one
    /// [`Store::end_import`].
    pub fn begin_import(&self) {
        self.write().pending_imports += 1;
        self.bump();
    }

    /// Finish one manual import and record its outcome message. `loading`
    /// stays set while other imports are still in flight.
    pub fn end_import(&self, error: Option<String>) {
        {
            let mut state = self.write();
            state.pending_imports = state.pending_imports.saturating_sub(1);
            state.last_error = error;
        }
        self.bump();
    }

    /// Start a new refresh generation, invalidating ticks of the previous one.
    pub fn advance_refresh_generation(&self) -> u64 {
        let mut state = self.write();
        state.refresh_generation += 1;
        state.refresh_generation
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
