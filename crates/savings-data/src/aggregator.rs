//! Aggregation of flat CSV rows into the canonical [`AppData`] buckets.
//!
//! Rows are grouped by department, function and user, and bucketed by
//! quarter, ISO week and day. Entity lists are ordered by savings (largest
//! first); trend lists are chronological.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use savings_core::error::{DashboardError, Result};
use savings_core::models::{AppData, Meta, Record, TimeTrends};
use savings_core::schema::CsvSchema;
use savings_core::time_utils::{day_key, parse_date, quarter_key, week_key};
use serde_json::{json, Map, Value};

use crate::reader::CsvRow;

// ── Stats ─────────────────────────────────────────────────────────────────────

/// Savings and usage totals for one department, function or user.
#[derive(Debug, Clone, Default)]
struct EntityStats {
    savings: f64,
    uses: u64,
    users: BTreeSet<String>,
    /// First department / function seen, only tracked for users.
    department: Option<String>,
    function: Option<String>,
}

/// Totals for one time bucket.
#[derive(Debug, Clone, Default)]
struct PeriodStats {
    savings: f64,
    uses: u64,
}

/// One validated CSV row.
#[derive(Debug, Clone)]
struct SavingsEntry {
    date: NaiveDate,
    department: String,
    function: String,
    user: String,
    app: String,
    savings: f64,
    uses: u64,
}

/// Actual header labels resolved from the schema for a given file.
struct Columns {
    date: String,
    department: Option<String>,
    function: Option<String>,
    user: Option<String>,
    app: String,
    savings: String,
    uses: Option<String>,
}

// ── SavingsAggregator ─────────────────────────────────────────────────────────

/// Stateless helper that folds CSV rows into an [`AppData`] snapshot.
pub struct SavingsAggregator;

impl SavingsAggregator {
    /// Aggregate `rows` according to `schema`.
    ///
    /// Fails with [`DashboardError::Normalization`] when a required column is
    /// missing or a date / number cell cannot be parsed. An empty row list
    /// yields a complete, zeroed snapshot.
    pub fn aggregate(rows: &[CsvRow], schema: &CsvSchema) -> Result<AppData> {
        let entries = match rows.first() {
            Some(first) => {
                let columns = Columns::resolve(first, schema)?;
                rows.iter()
                    .map(|row| columns.entry(row))
                    .collect::<Result<Vec<_>>>()?
            }
            None => Vec::new(),
        };

        Self::build(&entries)
    }

    fn build(entries: &[SavingsEntry]) -> Result<AppData> {
        let mut departments: BTreeMap<String, EntityStats> = BTreeMap::new();
        let mut functions: BTreeMap<String, EntityStats> = BTreeMap::new();
        let mut users: BTreeMap<String, EntityStats> = BTreeMap::new();
        let mut quarters: BTreeMap<String, PeriodStats> = BTreeMap::new();
        let mut weeks: BTreeMap<String, PeriodStats> = BTreeMap::new();
        let mut days: BTreeMap<String, PeriodStats> = BTreeMap::new();
        let mut apps: BTreeSet<&str> = BTreeSet::new();

        let mut total_savings = 0.0;
        let mut total_uses = 0u64;

        for entry in entries {
            total_savings += entry.savings;
            total_uses = add_uses(total_uses, entry.uses)?;

            if !entry.app.is_empty() {
                apps.insert(entry.app.as_str());
            }
            if !entry.department.is_empty() {
                departments
                    .entry(entry.department.clone())
                    .or_default()
                    .add(entry)?;
            }
            if !entry.function.is_empty() {
                functions
                    .entry(entry.function.clone())
                    .or_default()
                    .add(entry)?;
            }
            if !entry.user.is_empty() {
                let stats = users.entry(entry.user.clone()).or_default();
                stats.add(entry)?;
                if stats.department.is_none() && !entry.department.is_empty() {
                    stats.department = Some(entry.department.clone());
                }
                if stats.function.is_none() && !entry.function.is_empty() {
                    stats.function = Some(entry.function.clone());
                }
            }

            quarters
                .entry(quarter_key(entry.date))
                .or_default()
                .add(entry)?;
            weeks.entry(week_key(entry.date)).or_default().add(entry)?;
            days.entry(day_key(entry.date)).or_default().add(entry)?;
        }

        let user_count = users.len();
        let mut general = Map::new();
        general.insert("totalSavings".into(), json!(round2(total_savings)));
        general.insert("totalUses".into(), json!(total_uses));
        general.insert("recordCount".into(), json!(entries.len()));
        general.insert("userCount".into(), json!(user_count));
        general.insert("departmentCount".into(), json!(departments.len()));
        general.insert("functionCount".into(), json!(functions.len()));
        general.insert("appCount".into(), json!(apps.len()));
        general.insert(
            "averageSavingsPerUser".into(),
            json!(if user_count == 0 {
                0.0
            } else {
                round2(total_savings / user_count as f64)
            }),
        );
        let period_start = entries.iter().map(|e| e.date).min();
        let period_end = entries.iter().map(|e| e.date).max();
        general.insert("periodStart".into(), date_value(period_start));
        general.insert("periodEnd".into(), date_value(period_end));

        let available_functions = functions.keys().cloned().collect();

        Ok(AppData {
            general,
            departments: entity_records(departments, total_savings, false),
            functions: entity_records(functions, total_savings, false),
            users: entity_records(users, total_savings, true),
            time_trends: TimeTrends {
                quarters: period_records(quarters),
                weeks: period_records(weeks),
                days: period_records(days),
            },
            meta: Meta {
                last_update: None,
                available_functions,
            },
        })
    }
}

// ── Stats impls ───────────────────────────────────────────────────────────────

impl EntityStats {
    fn add(&mut self, entry: &SavingsEntry) -> Result<()> {
        self.savings += entry.savings;
        self.uses = add_uses(self.uses, entry.uses)?;
        if !entry.user.is_empty() {
            self.users.insert(entry.user.clone());
        }
        Ok(())
    }
}

impl PeriodStats {
    fn add(&mut self, entry: &SavingsEntry) -> Result<()> {
        self.savings += entry.savings;
        self.uses = add_uses(self.uses, entry.uses)?;
        Ok(())
    }
}

fn add_uses(total: u64, uses: u64) -> Result<u64> {
    total.checked_add(uses).ok_or_else(|| {
        DashboardError::Normalization("total uses exceed the supported range".to_string())
    })
}

impl Columns {
    fn resolve(row: &CsvRow, schema: &CsvSchema) -> Result<Self> {
        let required = |label: &str| {
            find_column(row, label).ok_or_else(|| {
                DashboardError::Normalization(format!("missing required column '{label}'"))
            })
        };

        Ok(Self {
            date: required(&schema.date)?,
            department: find_column(row, &schema.department),
            function: find_column(row, &schema.function),
            user: find_column(row, &schema.user),
            app: required(&schema.app)?,
            savings: required(&schema.savings)?,
            uses: find_column(row, &schema.uses),
        })
    }

    /// Validate and convert one row.
    fn entry(&self, row: &CsvRow) -> Result<SavingsEntry> {
        let line = row.line();
        let optional = |column: &Option<String>| {
            column
                .as_deref()
                .map(|c| cell(row, c).to_string())
                .unwrap_or_default()
        };

        let raw_date = cell(row, &self.date);
        let date = parse_date(raw_date)
            .ok_or_else(|| invalid_cell(line, &self.date, raw_date, "date"))?;

        let raw_savings = cell(row, &self.savings);
        let savings = parse_number(raw_savings)
            .ok_or_else(|| invalid_cell(line, &self.savings, raw_savings, "number"))?;

        let uses = match &self.uses {
            Some(column) => {
                let raw = cell(row, column);
                parse_count(raw).ok_or_else(|| invalid_cell(line, column, raw, "count"))?
            }
            None => 1,
        };

        Ok(SavingsEntry {
            date,
            department: optional(&self.department),
            function: optional(&self.function),
            user: optional(&self.user),
            app: cell(row, &self.app).to_string(),
            savings,
            uses,
        })
    }
}

// ── Record builders ───────────────────────────────────────────────────────────

fn entity_records(
    map: BTreeMap<String, EntityStats>,
    total_savings: f64,
    with_assignment: bool,
) -> Vec<Record> {
    let mut items: Vec<(String, EntityStats)> = map.into_iter().collect();
    items.sort_by(|(a_name, a), (b_name, b)| {
        b.savings
            .total_cmp(&a.savings)
            .then_with(|| a_name.cmp(b_name))
    });

    items
        .into_iter()
        .map(|(name, stats)| {
            let share = if total_savings == 0.0 {
                0.0
            } else {
                round2(stats.savings / total_savings * 100.0)
            };
            let mut record = Map::new();
            record.insert("name".into(), json!(name));
            record.insert("savings".into(), json!(round2(stats.savings)));
            record.insert("uses".into(), json!(stats.uses));
            record.insert("users".into(), json!(stats.users.len()));
            record.insert("share".into(), json!(share));
            if with_assignment {
                record.insert("department".into(), json!(stats.department));
                record.insert("function".into(), json!(stats.function));
            }
            record
        })
        .collect()
}

fn period_records(map: BTreeMap<String, PeriodStats>) -> Vec<Record> {
    map.into_iter()
        .map(|(period, stats)| {
            let mut record = Map::new();
            record.insert("period".into(), json!(period));
            record.insert("savings".into(), json!(round2(stats.savings)));
            record.insert("uses".into(), json!(stats.uses));
            record
        })
        .collect()
}

// ── Cell helpers ──────────────────────────────────────────────────────────────

fn cell<'a>(row: &'a CsvRow, column: &str) -> &'a str {
    row.get(column).unwrap_or("")
}

/// Header label in `row` matching `label` case-insensitively.
fn find_column(row: &CsvRow, label: &str) -> Option<String> {
    let wanted = label.trim().to_lowercase();
    row.columns()
        .find(|k| k.trim().to_lowercase() == wanted)
        .map(str::to_string)
}

/// Parse a numeric cell. Empty cells count as 0.
///
/// Spaces (including NBSP) are treated as thousands separators; a lone comma
/// is a decimal separator, and commas are dropped when a dot is also present.
fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\u{202f}')
        .collect();
    if cleaned.is_empty() {
        return Some(0.0);
    }
    let normalised = if cleaned.contains('.') {
        cleaned.replace(',', "")
    } else {
        cleaned.replace(',', ".")
    };
    normalised.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Largest per-row use count accepted.
const MAX_USES_PER_ROW: u64 = 1_000_000_000_000;

/// Parse a non-negative whole-number cell no larger than [`MAX_USES_PER_ROW`].
fn parse_count(s: &str) -> Option<u64> {
    let value = parse_number(s)?;
    if value < 0.0 || value.fract() != 0.0 || value > MAX_USES_PER_ROW as f64 {
        return None;
    }
    Some(value as u64)
}

fn invalid_cell(line: u64, column: &str, value: &str, kind: &str) -> DashboardError {
    DashboardError::Normalization(format!(
        "line {line}: invalid {kind} '{value}' in column '{column}'"
    ))
}

fn date_value(date: Option<NaiveDate>) -> Value {
    date.map(|d| json!(day_key(d))).unwrap_or(Value::Null)
}

fn round2(v: f64) -> f64 {
    let rounded = (v * 100.0).round() / 100.0;
    // Avoid serialising "-0.0".
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn row(line: u64, cells: &[(&str, &str)]) -> CsvRow {
        CsvRow::new(line, cells.iter().copied())
    }

    fn sample_rows() -> Vec<CsvRow> {
        vec![
            row(2, &[
                ("date", "2025-01-15"),
                ("department", "Finance"),
                ("function", "Reporting"),
                ("user", "anna"),
                ("app", "Excel"),
                ("savings", "100"),
                ("uses", "2"),
            ]),
            row(3, &[
                ("date", "2025-01-16"),
                ("department", "Finance"),
                ("function", "Controlling"),
                ("user", "bartek"),
                ("app", "Excel"),
                ("savings", "50,5"),
                ("uses", "1"),
            ]),
            row(4, &[
                ("date", "2025-04-02"),
                ("department", "HR"),
                ("function", "Reporting"),
                ("user", "anna"),
                ("app", "Word"),
                ("savings", "200"),
                ("uses", "3"),
            ]),
        ]
    }

    #[test]
    fn test_general_totals() {
        let data = SavingsAggregator::aggregate(&sample_rows(), &CsvSchema::default()).unwrap();

        assert_eq!(data.general["totalSavings"], json!(350.5));
        assert_eq!(data.general["totalUses"], json!(6));
        assert_eq!(data.general["recordCount"], json!(3));
        assert_eq!(data.general["userCount"], json!(2));
        assert_eq!(data.general["departmentCount"], json!(2));
        assert_eq!(data.general["functionCount"], json!(2));
        assert_eq!(data.general["appCount"], json!(2));
        assert_eq!(data.general["averageSavingsPerUser"], json!(175.25));
        assert_eq!(data.general["periodStart"], json!("2025-01-15"));
        assert_eq!(data.general["periodEnd"], json!("2025-04-02"));
    }

    #[test]
    fn test_departments_sorted_by_savings() {
        let data = SavingsAggregator::aggregate(&sample_rows(), &CsvSchema::default()).unwrap();

        assert_eq!(data.departments.len(), 2);
        assert_eq!(data.departments[0]["name"], json!("HR"));
        assert_eq!(data.departments[0]["savings"], json!(200.0));
        assert_eq!(data.departments[1]["name"], json!("Finance"));
        assert_eq!(data.departments[1]["savings"], json!(150.5));
        assert_eq!(data.departments[1]["users"], json!(2));
        assert_eq!(data.departments[1]["uses"], json!(3));
    }

    #[test]
    fn test_users_carry_first_assignment() {
        let data = SavingsAggregator::aggregate(&sample_rows(), &CsvSchema::default()).unwrap();

        let anna = &data.users[0];
        assert_eq!(anna["name"], json!("anna"));
        assert_eq!(anna["savings"], json!(300.0));
        assert_eq!(anna["department"], json!("Finance"));
        assert_eq!(anna["function"], json!("Reporting"));
        assert_eq!(anna["users"], json!(1));
    }

    #[test]
    fn test_share_is_percent_of_total() {
        let data = SavingsAggregator::aggregate(&sample_rows(), &CsvSchema::default()).unwrap();
        let reporting = data
            .functions
            .iter()
            .find(|r| r["name"] == json!("Reporting"))
            .unwrap();
        // 300 / 350.5
        assert_eq!(reporting["share"], json!(85.59));
    }

    #[test]
    fn test_time_trends_are_chronological() {
        let data = SavingsAggregator::aggregate(&sample_rows(), &CsvSchema::default()).unwrap();

        let quarters: Vec<&Value> = data.time_trends.quarters.iter().map(|r| &r["period"]).collect();
        assert_eq!(quarters, vec![&json!("2025-Q1"), &json!("2025-Q2")]);
        assert_eq!(data.time_trends.quarters[0]["savings"], json!(150.5));

        let weeks: Vec<&Value> = data.time_trends.weeks.iter().map(|r| &r["period"]).collect();
        assert_eq!(weeks, vec![&json!("2025-W03"), &json!("2025-W14")]);

        assert_eq!(data.time_trends.days.len(), 3);
        assert_eq!(data.time_trends.days[2]["period"], json!("2025-04-02"));
    }

    #[test]
    fn test_available_functions() {
        let data = SavingsAggregator::aggregate(&sample_rows(), &CsvSchema::default()).unwrap();
        let functions: Vec<&str> = data
            .meta
            .available_functions
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(functions, vec!["Controlling", "Reporting"]);
        assert!(data.meta.last_update.is_none());
    }

    #[test]
    fn test_empty_rows_yield_zeroed_snapshot() {
        let data = SavingsAggregator::aggregate(&[], &CsvSchema::default()).unwrap();
        assert!(data.is_empty());
        assert_eq!(data.general["totalSavings"], json!(0.0));
        assert_eq!(data.general["periodStart"], Value::Null);
    }

    #[test]
    fn test_missing_required_column() {
        let rows = vec![row(2, &[("date", "2025-01-15"), ("savings", "1")])];
        let err = SavingsAggregator::aggregate(&rows, &CsvSchema::default()).unwrap_err();
        match err {
            DashboardError::Normalization(msg) => assert!(msg.contains("'app'"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_optional_columns_may_be_absent() {
        let rows = vec![row(2, &[("Date", "2025-01-15"), ("APP", "Excel"), ("Savings", "12")])];
        let data = SavingsAggregator::aggregate(&rows, &CsvSchema::default()).unwrap();

        assert!(data.departments.is_empty());
        assert!(data.users.is_empty());
        assert_eq!(data.general["totalUses"], json!(1));
        assert_eq!(data.general["totalSavings"], json!(12.0));
    }

    #[test]
    fn test_invalid_date_names_line_and_column() {
        let mut rows = sample_rows();
        rows[1].insert("date", "someday");
        let err = SavingsAggregator::aggregate(&rows, &CsvSchema::default()).unwrap_err();
        match err {
            DashboardError::Normalization(msg) => {
                assert!(msg.contains("line 3"), "{msg}");
                assert!(msg.contains("'date'"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_fractional_uses_rejected() {
        let mut rows = sample_rows();
        rows[0].insert("uses", "1,5");
        assert!(SavingsAggregator::aggregate(&rows, &CsvSchema::default()).is_err());
    }

    #[test]
    fn test_huge_uses_rejected() {
        let mut rows = sample_rows();
        rows[0].insert("uses", "10000000000000000000");
        rows[1].insert("uses", "10000000000000000000");
        match SavingsAggregator::aggregate(&rows, &CsvSchema::default()) {
            Err(DashboardError::Normalization(msg)) => {
                assert!(msg.contains("line 2"), "{msg}");
                assert!(msg.contains("invalid count"), "{msg}");
            }
            other => panic!("expected normalization error, got {other:?}"),
        }

        assert_eq!(parse_count("1e30"), None);
        assert_eq!(parse_count("1000000000000"), Some(MAX_USES_PER_ROW));
    }

    #[test]
    fn test_uses_overflow_is_normalization_error() {
        let entry = SavingsEntry {
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            department: "Finance".into(),
            function: "Reporting".into(),
            user: "anna".into(),
            app: "Excel".into(),
            savings: 1.0,
            uses: u64::MAX,
        };
        let err = SavingsAggregator::build(&[entry.clone(), entry]).unwrap_err();
        assert!(matches!(err, DashboardError::Normalization(_)));
    }

    #[test]
    fn test_parse_number_formats() {
        assert_eq!(parse_number("12"), Some(12.0));
        assert_eq!(parse_number("12,5"), Some(12.5));
        assert_eq!(parse_number("1 234,56"), Some(1234.56));
        assert_eq!(parse_number("1\u{a0}234,5"), Some(1234.5));
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number(""), Some(0.0));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_custom_schema_labels() {
        let schema = CsvSchema {
            date: "data".into(),
            app: "aplikacja".into(),
            savings: "oszczednosci".into(),
            ..CsvSchema::default()
        };
        let rows = vec![row(2, &[
            ("data", "01.02.2025"),
            ("aplikacja", "Excel"),
            ("oszczednosci", "7"),
        ])];
        let data = SavingsAggregator::aggregate(&rows, &schema).unwrap();
        assert_eq!(data.time_trends.days[0]["period"], json!("2025-02-01"));
    }
}
