//! Result models for catalog queries.

use crate::query::ColumnFilter;
use serde::{Deserialize, Serialize};

/// One row of `information_schema.columns`, reduced to what the probe reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRow {
    /// Schema containing the table
    pub table_schema: String,
    /// Table or view name
    pub table_name: String,
    /// Column name as stored in the catalog
    pub column_name: String,
    /// SQL data type, e.g. `numeric` or `character varying`
    pub data_type: String,
}

impl ColumnRow {
    /// Creates a row from its parts.
    pub fn new(
        table_schema: impl Into<String>,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            table_schema: table_schema.into(),
            table_name: table_name.into(),
            column_name: column_name.into(),
            data_type: data_type.into(),
        }
    }
}

impl std::fmt::Display for ColumnRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.table_name, self.column_name, self.data_type
        )
    }
}

/// The complete result of one probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReport {
    /// Filter the rows were selected with
    pub filter: ColumnFilter,
    /// Matching rows in catalog order
    pub rows: Vec<ColumnRow>,
}

impl QueryReport {
    /// Creates a report for `filter`.
    pub fn new(filter: ColumnFilter, rows: Vec<ColumnRow>) -> Self {
        Self { filter, rows }
    }

    /// Number of matching rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True when no column matched. This is a successful outcome.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
