//! Shared tabular metadata types.

use serde::{Deserialize, Serialize};

/// Column profile inferred when a dataset is loaded: dtype plus null and
/// cardinality counts. Stored as `columns_json` on the dataset row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: String,
    pub non_null: i64,
    pub null_count: i64,
    pub unique: i64,
}
