use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A flat per-entity or per-period aggregate record.
pub type Record = Map<String, Value>;

/// Default auto-refresh interval in minutes.
pub const DEFAULT_REFRESH_MINUTES: u32 = 5;

// ── AppData ───────────────────────────────────────────────────────────────────

/// Canonical, normalized snapshot of the savings metrics.
///
/// Every value handed to readers is complete: the normalizer is the only
/// place that builds one from untrusted input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    /// Scalar summary metrics such as totals.
    pub general: Map<String, Value>,
    pub departments: Vec<Record>,
    pub functions: Vec<Record>,
    pub users: Vec<Record>,
    pub time_trends: TimeTrends,
    pub meta: Meta,
}

/// Time-bucketed aggregates, each in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeTrends {
    pub quarters: Vec<Record>,
    pub weeks: Vec<Record>,
    pub days: Vec<Record>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// When the snapshot was committed, absent until the first commit.
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    /// Function labels present in the data, used to populate filter choices.
    #[serde(default)]
    pub available_functions: BTreeSet<String>,
}

impl AppData {
    /// `true` when the snapshot holds no entity or trend records.
    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
            && self.functions.is_empty()
            && self.users.is_empty()
            && self.time_trends.quarters.is_empty()
            && self.time_trends.weeks.is_empty()
            && self.time_trends.days.is_empty()
    }

    /// Numeric summary metric from `general`, if present.
    pub fn general_number(&self, key: &str) -> Option<f64> {
        self.general.get(key).and_then(Value::as_f64)
    }
}

// ── ImportSource ──────────────────────────────────────────────────────────────

/// Origin of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportSource {
    /// An uploaded CSV file.
    #[default]
    #[serde(rename = "file")]
    File,
    /// The polled remote JSON endpoint.
    #[serde(rename = "api")]
    RemoteApi,
}

impl fmt::Display for ImportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportSource::File => write!(f, "file"),
            ImportSource::RemoteApi => write!(f, "api"),
        }
    }
}

// ── RefreshPolicy ─────────────────────────────────────────────────────────────

/// Auto-refresh settings. Only meaningful while the active source is
/// [`ImportSource::RemoteApi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPolicy {
    pub enabled: bool,
    /// Always at least 1.
    pub interval_minutes: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: DEFAULT_REFRESH_MINUTES,
        }
    }
}

impl RefreshPolicy {
    /// Timer period derived from the interval.
    pub fn period(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_minutes) * 60_000)
    }
}

// ── Filters ───────────────────────────────────────────────────────────────────

/// Sentinel label meaning "no filtering on this dimension".
pub const FILTER_ALL: &str = "all";

/// One filter dimension: either everything or a concrete selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterValue {
    #[default]
    All,
    Value(String),
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        if s == FILTER_ALL {
            FilterValue::All
        } else {
            FilterValue::Value(s)
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::from(s.to_string())
    }
}

impl From<FilterValue> for String {
    fn from(v: FilterValue) -> Self {
        match v {
            FilterValue::All => FILTER_ALL.to_string(),
            FilterValue::Value(s) => s,
        }
    }
}

/// Active filter selection. Independent of the imported data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    pub period: FilterValue,
    pub app: FilterValue,
    pub function: FilterValue,
}

/// Partial filter change; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FiltersUpdate {
    pub period: Option<FilterValue>,
    pub app: Option<FilterValue>,
    pub function: Option<FilterValue>,
}

impl Filters {
    /// Shallow-merge `update` into `self`.
    pub fn merge(&mut self, update: FiltersUpdate) {
        if let Some(period) = update.period {
            self.period = period;
        }
        if let Some(app) = update.app {
            self.app = app;
        }
        if let Some(function) = update.function {
            self.function = function;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
