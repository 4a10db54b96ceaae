//! Single entry point turning raw import payloads into [`AppData`].
//!
//! This is the only boundary that builds an [`AppData`] from untrusted input:
//! anything that does not have the full canonical shape is rejected here so
//! that a half-built snapshot can never be committed.

use std::collections::BTreeSet;

use savings_core::error::{DashboardError, Result};
use savings_core::models::{AppData, ImportSource, Meta, Record, TimeTrends};
use savings_core::schema::CsvSchema;
use savings_core::time_utils::parse_timestamp;
use serde_json::{Map, Value};

use crate::aggregator::SavingsAggregator;
use crate::reader::CsvRow;

// ── RawPayload ────────────────────────────────────────────────────────────────

/// Acquired but not yet normalized import data.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Rows parsed from an uploaded CSV file.
    File(Vec<CsvRow>),
    /// JSON body returned by the remote endpoint.
    RemoteApi(Value),
}

impl RawPayload {
    pub fn source(&self) -> ImportSource {
        match self {
            RawPayload::File(_) => ImportSource::File,
            RawPayload::RemoteApi(_) => ImportSource::RemoteApi,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Normalize `raw` into a complete [`AppData`].
///
/// Pure: the same input always yields the same output, and `meta.lastUpdate`
/// is left for the store to stamp at commit time (API payloads keep any
/// RFC 3339 value they carry).
///
/// Fails with [`DashboardError::Normalization`] when required keys or columns
/// are missing, have the wrong shape, or the API payload flags an error.
pub fn normalize(raw: RawPayload, schema: &CsvSchema) -> Result<AppData> {
    match raw {
        RawPayload::File(rows) => SavingsAggregator::aggregate(&rows, schema),
        RawPayload::RemoteApi(value) => normalize_api(value),
    }
}

/// Message of an application-level error flagged in an API body.
///
/// The body flags an error when its `error` field is truthy (`true`, a
/// non-zero number, a non-empty string, or any array/object). The message is
/// taken from `message`, falling back to `"unknown error"`.
pub fn api_error_message(payload: &Value) -> Option<String> {
    let flag = payload.get("error")?;
    if !is_truthy(flag) {
        return None;
    }
    let message = match payload.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "unknown error".to_string(),
        Some(other) => other.to_string(),
    };
    Some(message)
}

// ── API payloads ──────────────────────────────────────────────────────────────

fn normalize_api(value: Value) -> Result<AppData> {
    if let Some(message) = api_error_message(&value) {
        return Err(shape_error(format!("payload flags an error: {message}")));
    }

    let Value::Object(mut root) = value else {
        return Err(shape_error("payload must be a JSON object".to_string()));
    };

    let general = take_object(&mut root, "general", "general")?;
    if let Some((key, _)) = general
        .iter()
        .find(|(_, v)| v.is_object() || v.is_array())
    {
        return Err(shape_error(format!("'general.{key}' must be a scalar")));
    }

    let departments = take_records(&mut root, "departments", "departments")?;
    let functions = take_records(&mut root, "functions", "functions")?;
    let users = take_records(&mut root, "users", "users")?;

    let mut trends = take_object(&mut root, "timeTrends", "timeTrends")?;
    let time_trends = TimeTrends {
        quarters: take_records(&mut trends, "quarters", "timeTrends.quarters")?,
        weeks: take_records(&mut trends, "weeks", "timeTrends.weeks")?,
        days: take_records(&mut trends, "days", "timeTrends.days")?,
    };

    let meta = take_object(&mut root, "meta", "meta")?;

    Ok(AppData {
        general,
        departments,
        functions,
        users,
        time_trends,
        meta: normalize_meta(&meta)?,
    })
}

fn normalize_meta(meta: &Map<String, Value>) -> Result<Meta> {
    let last_update = meta
        .get("lastUpdate")
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    let available_functions = match meta.get("availableFunctions") {
        None | Some(Value::Null) => BTreeSet::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    shape_error("'meta.availableFunctions' must contain strings".to_string())
                })
            })
            .collect::<Result<BTreeSet<String>>>()?,
        Some(_) => {
            return Err(shape_error(
                "'meta.availableFunctions' must be an array".to_string(),
            ))
        }
    };

    Ok(Meta {
        last_update,
        available_functions,
    })
}

fn take_object(
    parent: &mut Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Map<String, Value>> {
    match parent.remove(key) {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(shape_error(format!("'{path}' must be an object"))),
        None => Err(shape_error(format!("missing required key '{path}'"))),
    }
}

fn take_records(parent: &mut Map<String, Value>, key: &str, path: &str) -> Result<Vec<Record>> {
    let items = match parent.remove(key) {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(shape_error(format!("'{path}' must be an array"))),
        None => return Err(shape_error(format!("missing required key '{path}'"))),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(record) => Ok(record),
            _ => Err(shape_error(format!("'{path}[{idx}]' must be an object"))),
        })
        .collect()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn shape_error(message: String) -> DashboardError {
    DashboardError::Normalization(message)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
