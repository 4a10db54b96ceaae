use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use savings_core::error::DashboardError;
use savings_core::models::{AppData, ImportSource};
use savings_data::import::ImportPipeline;
use savings_runtime::refresh::RefreshTick;
use savings_runtime::{Dashboard, DashboardConfig, ManualTimer, Store, TimerDriver, TokioTimer};
use serde_json::{json, Value};
use tiny_http::{Header, Response, Server};

// ── Mock endpoint ─────────────────────────────────────────────────────────────

/// Serves queued responses in order, repeating the last one once the queue
/// runs dry.
struct MockApi {
    url: String,
    hits: Arc<AtomicUsize>,
}

impl MockApi {
    fn start(responses: Vec<(u16, String)>) -> Self {
        let server = Server::http("127.0.0.1:0").expect("start mock server");
        let url = format!("http://{}/exec", server.server_addr());
        let hits = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            let mut last = (200, payload(0.0).to_string());
            for request in server.incoming_requests() {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(next) = queue.lock().unwrap().pop_front() {
                    last = next;
                }
                let response = Response::from_string(last.1.clone())
                    .with_status_code(last.0)
                    .with_header(
                        Header::from_bytes("Content-Type", "application/json")
                            .expect("valid content type header"),
                    );
                let _ = request.respond(response);
            }
        });

        Self { url, hits }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn payload(total: f64) -> Value {
    json!({
        "general": { "totalSavings": total, "userCount": 3 },
        "departments": [],
        "functions": [],
        "users": [],
        "timeTrends": { "quarters": [], "weeks": [], "days": [] },
        "meta": { "lastUpdate": "2025-03-01T08:00:00Z", "availableFunctions": ["Reporting"] }
    })
}

fn ok(total: f64) -> (u16, String) {
    (200, payload(total).to_string())
}

fn dashboard(endpoint: &str) -> (Dashboard<ManualTimer>, ManualTimer) {
    let timer = ManualTimer::new();
    let config = DashboardConfig {
        endpoint: Some(endpoint.to_string()),
        ..DashboardConfig::default()
    };
    let dash = Dashboard::new(config, timer.clone()).expect("dashboard should build");
    (dash, timer)
}

const THREE_ROWS: &str = "\
date,department,function,user,app,savings,uses
2025-01-15,Finance,Reporting,anna,Excel,100,2
2025-01-16,Finance,Controlling,bartek,Excel,50.5,1
2025-04-02,HR,Reporting,anna,Word,200,3
";

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_csv_upload_commits_file_source() {
    let (dash, timer) = dashboard("http://127.0.0.1:1/exec");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(THREE_ROWS.as_bytes()).unwrap();

    dash.import_from_file(Some(file.path())).await.unwrap();

    let snap = dash.snapshot();
    assert!(snap.data_loaded);
    assert_eq!(snap.data_source, ImportSource::File);
    assert!(!snap.auto_refresh);
    assert_eq!(snap.app_data.general["recordCount"], json!(3));
    assert_eq!(timer.live_count(), 0);

    // Turning auto-refresh on for file data never starts polling.
    assert!(dash.toggle_auto_refresh());
    assert_eq!(timer.live_count(), 0);
}

#[tokio::test]
async fn test_api_import_enables_auto_refresh_and_arms() {
    let api = MockApi::start(vec![ok(42.0)]);
    let (dash, timer) = dashboard(&api.url);

    dash.import_from_api().await.unwrap();

    let snap = dash.snapshot();
    assert!(snap.data_loaded);
    assert_eq!(snap.data_source, ImportSource::RemoteApi);
    assert!(snap.auto_refresh);
    assert_eq!(snap.app_data.general_number("totalSavings"), Some(42.0));
    assert!(snap.app_data.meta.last_update.is_some());
    assert_eq!(timer.live_periods(), vec![Duration::from_millis(300_000)]);
}

#[tokio::test]
async fn test_server_error_leaves_data_unchanged() {
    let api = MockApi::start(vec![ok(42.0), (500, "boom".to_string())]);
    let (dash, timer) = dashboard(&api.url);
    dash.import_from_api().await.unwrap();
    let before = dash.store().app_data();

    match dash.import_from_api().await {
        Err(DashboardError::Transport { status, .. }) => assert_eq!(status, Some(500)),
        other => panic!("expected transport error, got {other:?}"),
    }

    let snap = dash.snapshot();
    assert!(Arc::ptr_eq(&before, &snap.app_data));
    assert!(!snap.loading);
    assert!(snap.last_error.is_some());
    // The failure does not disturb the running schedule.
    assert_eq!(timer.live_count(), 1);
    assert_eq!(timer.cancel_count(), 0);
}

#[tokio::test]
async fn test_interval_change_replaces_timer_once() {
    let api = MockApi::start(vec![ok(1.0)]);
    let (dash, timer) = dashboard(&api.url);
    dash.import_from_api().await.unwrap();
    assert_eq!(dash.snapshot().refresh_interval_minutes, 5);

    dash.change_refresh_interval(1).unwrap();

    assert_eq!(timer.cancel_count(), 1);
    assert_eq!(timer.live_count(), 1);
    assert_eq!(timer.live_periods(), vec![Duration::from_millis(60_000)]);
    assert_eq!(
        timer.started_periods(),
        vec![Duration::from_millis(300_000), Duration::from_millis(60_000)]
    );
}

// ── Refresh ticks ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tick_replaces_data_without_touching_flags() {
    let api = MockApi::start(vec![ok(1.0), ok(2.0)]);
    let (dash, timer) = dashboard(&api.url);
    dash.import_from_api().await.unwrap();
    dash.update_filters(savings_core::models::FiltersUpdate {
        app: Some("Excel".into()),
        ..Default::default()
    });
    let before = dash.snapshot();

    let outcomes = timer.fire().await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Ok(true)));

    let after = dash.snapshot();
    assert_eq!(after.app_data.general_number("totalSavings"), Some(2.0));
    assert_eq!(after.filters, before.filters);
    assert_eq!(after.auto_refresh, before.auto_refresh);
    assert_eq!(after.data_source, before.data_source);
    assert!(!after.loading);
    assert_eq!(api.hits(), 2);
}

#[tokio::test]
async fn test_failed_tick_keeps_data_and_schedule() {
    let api = MockApi::start(vec![ok(1.0), (503, String::new())]);
    let (dash, timer) = dashboard(&api.url);
    dash.import_from_api().await.unwrap();
    let before = dash.store().app_data();

    let outcomes = timer.fire().await;
    assert!(outcomes[0].is_err());
    assert!(Arc::ptr_eq(&before, &dash.store().app_data()));
    assert!(dash.is_refresh_armed());
    assert!(dash.snapshot().last_error.is_none());
}

#[tokio::test]
async fn test_switch_to_file_disarms_and_drops_stale_tick() {
    let api = MockApi::start(vec![ok(1.0), ok(9.0)]);
    let (dash, timer) = dashboard(&api.url);
    dash.import_from_api().await.unwrap();
    let stale = timer.live_ticks();
    assert_eq!(stale.len(), 1);

    assert!(dash.switch_source(ImportSource::File));
    assert_eq!(timer.live_count(), 0);
    assert_eq!(timer.cancel_count(), 1);

    // A tick that was already running when the timer was cancelled.
    assert!(stale[0].generation() < dash.store().refresh_generation());
    assert!(!stale[0].run().await.unwrap());
    assert_eq!(dash.store().app_data().general_number("totalSavings"), Some(1.0));
}

#[tokio::test]
async fn test_failed_file_import_still_stops_polling() {
    let api = MockApi::start(vec![ok(1.0)]);
    let (dash, timer) = dashboard(&api.url);
    dash.import_from_api().await.unwrap();

    let err = dash.import_from_file(None).await.unwrap_err();
    assert!(matches!(err, DashboardError::NoFileSelected));

    let snap = dash.snapshot();
    assert_eq!(snap.data_source, ImportSource::File);
    assert_eq!(snap.app_data.general_number("totalSavings"), Some(1.0));
    assert_eq!(timer.live_count(), 0);
}

#[tokio::test]
async fn test_refresh_now_updates_api_data() {
    let api = MockApi::start(vec![ok(1.0), ok(5.0)]);
    let (dash, timer) = dashboard(&api.url);
    dash.import_from_api().await.unwrap();

    assert!(dash.refresh_now().await.unwrap());
    assert_eq!(dash.store().app_data().general_number("totalSavings"), Some(5.0));
    assert_eq!(timer.live_count(), 1);
}

#[tokio::test]
async fn test_live_timer_count_over_command_sequences() {
    let api = MockApi::start(vec![ok(1.0)]);
    let (dash, timer) = dashboard(&api.url);

    for step in 0..40u32 {
        match step % 6 {
            0 => dash.import_from_api().await.unwrap(),
            1 => dash.change_refresh_interval(step % 4 + 1).unwrap(),
            2 => {
                dash.toggle_auto_refresh();
            }
            3 => dash.import_from_bytes("upload.csv", THREE_ROWS.as_bytes()).unwrap(),
            4 => {
                dash.switch_source(ImportSource::RemoteApi);
            }
            _ => {
                dash.toggle_auto_refresh();
            }
        }

        let live = timer.live_count();
        let should_arm = dash.store().refresh_guard().should_arm();
        assert!(live <= 1, "step {step}: {live} live timers");
        assert_eq!(live == 1, should_arm, "step {step}");
        assert_eq!(dash.is_refresh_armed(), should_arm, "step {step}");
    }
}

#[tokio::test]
async fn test_drop_cancels_live_timer() {
    let api = MockApi::start(vec![ok(1.0)]);
    let (dash, timer) = dashboard(&api.url);
    dash.import_from_api().await.unwrap();
    assert_eq!(timer.live_count(), 1);

    drop(dash);
    assert_eq!(timer.live_count(), 0);
    assert_eq!(timer.cancel_count(), 1);
}

// ── Tokio timer ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tokio_timer_ticks_until_cancelled() {
    let api = MockApi::start(vec![ok(7.0)]);
    let store = Arc::new(Store::new());
    store.commit(AppData::default(), ImportSource::RemoteApi);
    let generation = store.advance_refresh_generation();

    let pipeline = ImportPipeline::new(&Default::default()).unwrap();
    let tick = RefreshTick::new(Arc::clone(&store), pipeline, api.url.clone(), generation);

    let mut rx = store.subscribe();
    rx.borrow_and_update();

    let mut driver = TokioTimer::current().unwrap();
    let handle = driver.start(Duration::from_millis(50), tick);

    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("a tick should commit within the timeout")
        .unwrap();
    assert_eq!(store.app_data().general_number("totalSavings"), Some(7.0));

    driver.cancel(handle);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let settled = api.hits();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(api.hits(), settled);
}
