//! Column layout expected in uploaded CSV files.

use serde::{Deserialize, Serialize};

/// Column labels used to aggregate CSV rows.
///
/// Labels are matched case-insensitively after trimming. `department`,
/// `function` and `user` may be missing from a file, in which case their
/// aggregates are empty; the other columns are required. `uses` defaults to
/// one per row when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvSchema {
    pub date: String,
    pub department: String,
    pub function: String,
    pub user: String,
    pub app: String,
    pub savings: String,
    pub uses: String,
}

impl Default for CsvSchema {
    fn default() -> Self {
        Self {
            date: "date".to_string(),
            department: "department".to_string(),
            function: "function".to_string(),
            user: "user".to_string(),
            app: "app".to_string(),
            savings: "savings".to_string(),
            uses: "uses".to_string(),
        }
    }
}
