mod bootstrap;

use std::sync::Arc;

use anyhow::Result;
use savings_core::models::{AppData, ImportSource};
use savings_core::settings::Settings;
use savings_runtime::{Dashboard, DashboardConfig, StoreSnapshot, TokioTimer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load();

    bootstrap::ensure_directories()?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    info!("Savings Dashboard v{} starting", env!("CARGO_PKG_VERSION"));

    let source = settings.import_source()?;
    let dashboard = Dashboard::new(
        DashboardConfig::from_settings(&settings),
        TokioTimer::current()?,
    )?;

    match source {
        ImportSource::File => dashboard.import_from_file(settings.file.as_deref()).await?,
        ImportSource::RemoteApi => dashboard.import_from_api().await?,
    }

    if settings.no_auto_refresh && dashboard.snapshot().auto_refresh {
        dashboard.toggle_auto_refresh();
    }

    let mut shown = log_summary(&dashboard.snapshot());

    if !dashboard.is_refresh_armed() {
        info!("auto-refresh inactive; exiting");
        dashboard.shutdown();
        return Ok(());
    }

    info!(
        "Polling every {} minute(s); press Ctrl+C to stop",
        dashboard.snapshot().refresh_interval_minutes
    );

    let mut revisions = dashboard.subscribe();
    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    warn!("store closed; stopping");
                    break;
                }
                let snapshot = dashboard.snapshot();
                if !Arc::ptr_eq(&shown, &snapshot.app_data) {
                    shown = log_summary(&snapshot);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received; stopping auto-refresh");
                break;
            }
        }
    }

    dashboard.shutdown();
    Ok(())
}

/// Log the headline figures of the current snapshot and return its data.
fn log_summary(snapshot: &StoreSnapshot) -> Arc<AppData> {
    let data = &snapshot.app_data;
    info!(
        source = %snapshot.data_source,
        total_savings = data.general_number("totalSavings").unwrap_or(0.0),
        departments = data.departments.len(),
        functions = data.functions.len(),
        users = data.users.len(),
        last_update = data
            .meta
            .last_update
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
        "dashboard data"
    );
    Arc::clone(data)
}
