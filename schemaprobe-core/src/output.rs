//! Rendering of query results for standard output.
//!
//! Rendering is a pure function of the rows, so identical result sets
//! always produce identical text.

use crate::error::ProbeError;
use crate::models::{ColumnRow, QueryReport};
use crate::Result;

const HEADERS: [&str; 4] = ["table_schema", "table_name", "column_name", "data_type"];

/// Output format options for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Aligned columns with a header and row count
    #[default]
    Table,
    /// Pretty-printed JSON array of rows
    Json,
    /// Tab-separated values with a header row
    Tsv,
}

/// Renders `report` in `format`. The result always ends with a newline.
///
/// # Errors
/// Returns a serialization error if JSON encoding fails.
pub fn render(report: &QueryReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(render_table(&report.rows)),
        OutputFormat::Json => render_json(&report.rows),
        OutputFormat::Tsv => Ok(render_tsv(&report.rows)),
    }
}

fn fields(row: &ColumnRow) -> [&str; 4] {
    [
        row.table_schema.as_str(),
        row.table_name.as_str(),
        row.column_name.as_str(),
        row.data_type.as_str(),
    ]
}

fn render_table(rows: &[ColumnRow]) -> String {
    let mut widths = HEADERS.map(str::len);
    for row in rows {
        for (width, value) in widths.iter_mut().zip(fields(row)) {
            *width = (*width).max(value.chars().count());
        }
    }

    let line = |values: [&str; 4]| -> String {
        let cells: Vec<String> = values
            .iter()
            .zip(widths)
            .map(|(value, width)| format!("{:<width$}", value, width = width))
            .collect();
        format!("{}\n", cells.join(" | ").trim_end())
    };

    let mut out = line(HEADERS);
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&separator.join("-+-"));
    out.push('\n');
    for row in rows {
        out.push_str(&line(fields(row)));
    }
    match rows.len() {
        1 => out.push_str("(1 row)\n"),
        n => out.push_str(&format!("({} rows)\n", n)),
    }
    out
}

fn render_json(rows: &[ColumnRow]) -> Result<String> {
    let mut json = serde_json::to_string_pretty(rows).map_err(|e| ProbeError::Serialization {
        context: "JSON serialization of query results".to_string(),
        source: e,
    })?;
    json.push('\n');
    Ok(json)
}

fn render_tsv(rows: &[ColumnRow]) -> String {
    let mut out = HEADERS.join("\t");
    out.push('\n');
    for row in rows {
        let escaped: Vec<String> = fields(row)
            .iter()
            .map(|v| v.replace(['\t', '\n'], " "))
            .collect();
        out.push_str(&escaped.join("\t"));
        out.push('\n');
    }
    out
}
