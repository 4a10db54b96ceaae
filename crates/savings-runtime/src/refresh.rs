//! Auto-refresh controller.
//!
//! An explicit `Idle` / `Armed` state machine that owns at most one repeating
//! timer. [`RefreshController::reconcile`] re-evaluates the guard held in the
//! [`Store`] after every relevant change and arms, re-arms or disarms
//! accordingly. Each arm starts a new refresh generation in the store, so a
//! tick belonging to a cancelled timer can never commit.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use savings_core::error::{DashboardError, Result};
use savings_data::import::ImportPipeline;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::Store;

// ── RefreshTick ───────────────────────────────────────────────────────────────

/// One silent re-import, bound to the generation of the timer that owns it.
#[derive(Debug, Clone)]
pub struct RefreshTick {
    store: Arc<Store>,
    pipeline: ImportPipeline,
    endpoint: String,
    generation: u64,
}

impl RefreshTick {
    pub fn new(
        store: Arc<Store>,
        pipeline: ImportPipeline,
        endpoint: String,
        generation: u64,
    ) -> Self {
        Self {
            store,
            pipeline,
            endpoint,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fetch the endpoint and commit the result without touching any flag.
    ///
    /// Returns `Ok(false)` when the result was discarded because the
    /// generation is no longer current. On error the store is untouched.
    pub async fn run(&self) -> Result<bool> {
        let imported = self.pipeline.import_from_api(&self.endpoint).await?;
        let applied = self.store.commit_refresh(imported.data, self.generation);
        if applied {
            info!(generation = self.generation, "data refreshed from API");
        }
        Ok(applied)
    }

    /// Run once from a timer: failures are logged and otherwise ignored so
    /// the schedule continues and the current data stays in place.
    async fn fire(&self) {
        if let Err(e) = self.run().await {
            warn!(
                generation = self.generation,
                error = %e,
                "auto-refresh failed; keeping current data"
            );
        }
    }
}

// ── TimerDriver ───────────────────────────────────────────────────────────────

/// Starts and cancels repeating timers on behalf of the controller.
pub trait TimerDriver: Send {
    type Handle: Send;

    /// Start a timer that runs `tick` every `period`, first after one period.
    fn start(&mut self, period: Duration, tick: RefreshTick) -> Self::Handle;

    /// Stop a timer previously returned by [`TimerDriver::start`].
    fn cancel(&mut self, handle: Self::Handle);
}

/// Timer driver backed by a tokio task per armed timer.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    /// Bind to the tokio runtime of the calling context.
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| DashboardError::Config(format!("no tokio runtime available: {e}")))?;
        Ok(Self { runtime })
    }
}

impl TimerDriver for TokioTimer {
    type Handle = JoinHandle<()>;

    fn start(&mut self, period: Duration, tick: RefreshTick) -> JoinHandle<()> {
        self.runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            // A slow fetch pushes the next tick back instead of bursting.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick.fire().await;
            }
        })
    }

    fn cancel(&mut self, handle: JoinHandle<()>) {
        handle.abort();
    }
}

/// Timer driver that never fires on its own.
///
/// Records every start and cancel and keeps the ticks of live timers so they
/// can be fired explicitly. Clones share state, so a copy can be kept for
/// inspection after the driver is handed to a controller.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    inner: Arc<Mutex<ManualTimerState>>,
}

#[derive(Debug, Default)]
struct ManualTimerState {
    next_id: u64,
    live: BTreeMap<u64, (Duration, RefreshTick)>,
    started: Vec<Duration>,
    cancelled: usize,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers started and not yet cancelled.
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Periods of every timer ever started, in order.
    pub fn started_periods(&self) -> Vec<Duration> {
        self.lock().started.clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.lock().cancelled
    }

    /// Periods of the live timers.
    pub fn live_periods(&self) -> Vec<Duration> {
        self.lock().live.values().map(|(period, _)| *period).collect()
    }

    /// Ticks of the live timers.
    pub fn live_ticks(&self) -> Vec<RefreshTick> {
        self.lock().live.values().map(|(_, tick)| tick.clone()).collect()
    }

    /// Fire every live timer once, returning each tick's outcome.
    pub async fn fire(&self) -> Vec<Result<bool>> {
        let mut outcomes = Vec::new();
        for tick in self.live_ticks() {
            outcomes.push(tick.run().await);
        }
        outcomes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualTimerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TimerDriver for ManualTimer {
    type Handle = u64;

    fn start(&mut self, period: Duration, tick: RefreshTick) -> u64 {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id, (period, tick));
        state.started.push(period);
        id
    }

    fn cancel(&mut self, handle: u64) {
        let mut state = self.lock();
        if state.live.remove(&handle).is_some() {
            state.cancelled += 1;
        }
    }
}

// ── RefreshController ─────────────────────────────────────────────────────────

enum RefreshState<H> {
    Idle,
    Armed {
        period: Duration,
        generation: u64,
        handle: H,
    },
}

/// What a call to [`RefreshController::reconcile`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Armed { period: Duration },
    Rearmed { from: Duration, to: Duration },
    Disarmed,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Unchanged => write!(f, "unchanged"),
            Transition::Armed { period } => write!(f, "armed every {}s", period.as_secs()),
            Transition::Rearmed { from, to } => write!(
                f,
                "re-armed from every {}s to every {}s",
                from.as_secs(),
                to.as_secs()
            ),
            Transition::Disarmed => write!(f, "disarmed"),
        }
    }
}

/// Owner of the single auto-refresh timer.
pub struct RefreshController<D: TimerDriver> {
    driver: D,
    state: RefreshState<D::Handle>,
    store: Arc<Store>,
    pipeline: ImportPipeline,
    endpoint: Option<String>,
}

impl<D: TimerDriver> RefreshController<D> {
    pub fn new(
        driver: D,
        store: Arc<Store>,
        pipeline: ImportPipeline,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            driver,
            state: RefreshState::Idle,
            store,
            pipeline,
            endpoint,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, RefreshState::Armed { .. })
    }

    /// Period of the live timer, if armed.
    pub fn period(&self) -> Option<Duration> {
        match &self.state {
            RefreshState::Armed { period, .. } => Some(*period),
            RefreshState::Idle => None,
        }
    }

    /// Generation of the live timer, if armed.
    pub fn generation(&self) -> Option<u64> {
        match &self.state {
            RefreshState::Armed { generation, .. } => Some(*generation),
            RefreshState::Idle => None,
        }
    }

    /// Bring the timer in line with the store's current guard.
    ///
    /// The old timer is always cancelled before a new one starts, so at most
    /// one is ever live.
    pub fn reconcile(&mut self) -> Transition {
        let guard = self.store.refresh_guard();
        let desired = guard.should_arm().then_some(guard.period);

        let transition = match (std::mem::replace(&mut self.state, RefreshState::Idle), desired) {
            (RefreshState::Idle, None) => Transition::Unchanged,
            (
                RefreshState::Armed {
                    period: current,
                    generation,
                    handle,
                },
                Some(period),
            ) if current == period => {
                self.state = RefreshState::Armed {
                    period,
                    generation,
                    handle,
                };
                Transition::Unchanged
            }
            (RefreshState::Idle, Some(period)) => {
                if self.arm(period) {
                    Transition::Armed { period }
                } else {
                    Transition::Unchanged
                }
            }
            (RefreshState::Armed { handle, period: from, .. }, Some(to)) => {
                self.driver.cancel(handle);
                self.store.advance_refresh_generation();
                if self.arm(to) {
                    Transition::Rearmed { from, to }
                } else {
                    Transition::Disarmed
                }
            }
            (RefreshState::Armed { handle, .. }, None) => {
                self.driver.cancel(handle);
                self.store.advance_refresh_generation();
                Transition::Disarmed
            }
        };

        match transition {
            Transition::Unchanged => debug!(?guard, "refresh timer unchanged"),
            other => info!(%other, "refresh timer transition"),
        }
        transition
    }

    /// Cancel the live timer, if any. Calling it while idle is a no-op.
    pub fn disarm(&mut self) -> Transition {
        match std::mem::replace(&mut self.state, RefreshState::Idle) {
            RefreshState::Idle => Transition::Unchanged,
            RefreshState::Armed { handle, .. } => {
                self.driver.cancel(handle);
                self.store.advance_refresh_generation();
                info!("refresh timer disarmed");
                Transition::Disarmed
            }
        }
    }

    /// Start a timer for a fresh generation. Returns `false` (staying idle)
    /// when no endpoint is configured.
    fn arm(&mut self, period: Duration) -> bool {
        let Some(endpoint) = self.endpoint.clone() else {
            warn!("auto-refresh requested but no API endpoint is configured");
            return false;
        };
        let generation = self.store.advance_refresh_generation();
        let tick = RefreshTick::new(
            Arc::clone(&self.store),
            self.pipeline.clone(),
            endpoint,
            generation,
        );
        let handle = self.driver.start(period, tick);
        self.state = RefreshState::Armed {
            period,
            generation,
            handle,
        };
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
