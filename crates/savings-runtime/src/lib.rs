//! Runtime layer of the savings dashboard.
//!
//! - [`store`] holds the canonical data snapshot and UI-facing flags.
//! - [`refresh`] owns the single auto-refresh timer.
//! - [`dashboard`] exposes the commands a shell calls.

pub mod dashboard;
pub mod refresh;
pub mod store;

pub use savings_core as core;
pub use savings_data as data;

pub use dashboard::{Dashboard, DashboardConfig};
pub use refresh::{ManualTimer, RefreshController, TimerDriver, TokioTimer, Transition};
pub use store::{Store, StoreSnapshot};
