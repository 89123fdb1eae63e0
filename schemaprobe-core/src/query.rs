//! Schema query runner for `information_schema.columns`.
//!
//! Both catalog lookups the probe supports go through one parameterized
//! function. Search terms and schema names are always sent as bound
//! parameters; only the fixed query text below is ever sent as SQL.
//!
//! Results are ordered by schema, table and ordinal position so two runs
//! against an unchanged catalog produce identical output.

use crate::connection::ConnectionProvider;
use crate::error::ProbeError;
use crate::models::{ColumnRow, QueryReport};
use crate::Result;
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::future::Future;

/// Column-name patterns used when none are given.
pub const DEFAULT_PATTERNS: [&str; 2] = ["%market%cap%", "%sector%"];

/// Schema listed by `columns` when none is given.
pub const DEFAULT_SCHEMA: &str = "public";

/// Longest accepted search term, in characters, before substring wrapping.
pub const MAX_PATTERN_LEN: usize = 128;

/// Longest Postgres identifier, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Columns whose name matches any pattern. `$1` is an optional schema,
/// `$2` a text array of `ILIKE` patterns. Without a schema, system
/// schemas are skipped.
const NAME_PATTERN_QUERY: &str = r#"
    SELECT
        table_schema::text AS table_schema,
        table_name::text AS table_name,
        column_name::text AS column_name,
        data_type::text AS data_type
    FROM information_schema.columns
    WHERE (
            ($1::text IS NULL AND table_schema NOT IN ('pg_catalog', 'information_schema'))
            OR table_schema = $1::text
        )
        AND column_name ILIKE ANY($2::text[])
    ORDER BY table_schema, table_name, ordinal_position
"#;

/// Every column of the schema bound to `$1`.
const SCHEMA_COLUMNS_QUERY: &str = r#"
    SELECT
        table_schema::text AS table_schema,
        table_name::text AS table_name,
        column_name::text AS column_name,
        data_type::text AS data_type
    FROM information_schema.columns
    WHERE table_schema = $1::text
    ORDER BY table_schema, table_name, ordinal_position
"#;

/// Which columns a probe run reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnFilter {
    /// Columns whose name matches any `ILIKE` pattern, optionally within one schema
    NamePatterns {
        /// Schema to search, or every non-system schema when `None`
        schema: Option<String>,
        /// Search terms as given; terms without `%` match as substrings
        patterns: Vec<String>,
    },
    /// Every column in a schema
    Schema {
        /// Schema to list
        schema: String,
    },
}

impl Default for ColumnFilter {
    fn default() -> Self {
        Self::NamePatterns {
            schema: None,
            patterns: default_patterns(),
        }
    }
}

fn default_patterns() -> Vec<String> {
    DEFAULT_PATTERNS.iter().map(|p| (*p).to_string()).collect()
}

/// `ILIKE` pattern for a search term. Terms without `%` become substrings.
fn ilike_pattern(term: &str) -> String {
    if term.contains('%') {
        term.to_string()
    } else {
        format!("%{}%", term)
    }
}

fn ilike_patterns(terms: &[String]) -> Vec<String> {
    terms.iter().map(|term| ilike_pattern(term)).collect()
}

impl std::fmt::Display for ColumnFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NamePatterns { schema, patterns } => {
                write!(
                    f,
                    "column name ILIKE any of [{}]",
                    ilike_patterns(patterns).join(", ")
                )?;
                if let Some(schema) = schema {
                    write!(f, " in schema {}", schema)?;
                }
                Ok(())
            }
            Self::Schema { schema } => write!(f, "all columns in schema {}", schema),
        }
    }
}

impl ColumnFilter {
    /// Builds a name-pattern filter.
    ///
    /// Terms are kept as given. Terms without a `%` wildcard are matched as
    /// substrings, so `sector` is sent as `%sector%`. An empty list selects
    /// the defaults.
    pub fn name_patterns<I, S>(schema: Option<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();

        Self::NamePatterns {
            schema,
            patterns: if patterns.is_empty() {
                default_patterns()
            } else {
                patterns
            },
        }
    }

    /// Builds a filter listing every column of `schema`.
    pub fn schema(schema: impl Into<String>) -> Self {
        Self::Schema {
            schema: schema.into(),
        }
    }

    /// Checks the filter before any query is sent.
    ///
    /// # Errors
    /// Returns a configuration error for empty or oversized inputs.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::NamePatterns { schema, patterns } => {
                if let Some(schema) = schema {
                    validate_identifier(schema)?;
                }
                if patterns.is_empty() {
                    return Err(ProbeError::configuration(
                        "at least one column name pattern is required",
                    ));
                }
                for pattern in patterns {
                    if pattern.trim_matches('%').is_empty() {
                        return Err(ProbeError::configuration(
                            "column name patterns cannot be empty",
                        ));
                    }
                    if pattern.chars().count() > MAX_PATTERN_LEN {
                        return Err(ProbeError::configuration(format!(
                            "column name pattern too long: maximum {} characters",
                            MAX_PATTERN_LEN
                        )));
                    }
                }
                Ok(())
            }
            Self::Schema { schema } => validate_identifier(schema),
        }
    }
}

fn validate_identifier(schema: &str) -> Result<()> {
    if schema.trim().is_empty() {
        return Err(ProbeError::configuration("schema name cannot be empty"));
    }
    if schema.len() > MAX_IDENTIFIER_LEN {
        return Err(ProbeError::configuration(format!(
            "schema name too long: maximum {} bytes",
            MAX_IDENTIFIER_LEN
        )));
    }
    Ok(())
}

/// Runs catalog queries over a [`ConnectionProvider`].
#[derive(Debug, Clone, Copy)]
pub struct SchemaQueryRunner<'a> {
    provider: &'a ConnectionProvider,
}

impl<'a> SchemaQueryRunner<'a> {
    /// Creates a runner borrowing `provider`.
    pub const fn new(provider: &'a ConnectionProvider) -> Self {
        Self { provider }
    }

    /// Executes the query for `filter` and collects every matching row.
    ///
    /// Connectivity failures are retried per the provider's retry policy.
    /// Query failures are returned immediately.
    ///
    /// # Errors
    /// Returns a configuration error for an invalid filter, a connection
    /// error if the database is unreachable, or a query error otherwise.
    pub async fn run(&self, filter: &ColumnFilter) -> Result<QueryReport> {
        filter.validate()?;
        tracing::info!("Querying {} for {}", self.provider.target(), filter);

        let rows = self
            .provider
            .with_retry("catalog query", || self.fetch(filter))
            .await?;

        tracing::info!("Catalog query returned {} rows", rows.len());
        Ok(QueryReport::new(filter.clone(), rows))
    }

    async fn fetch(&self, filter: &ColumnFilter) -> Result<Vec<ColumnRow>> {
        let query = match filter {
            ColumnFilter::NamePatterns { schema, patterns } => sqlx::query(NAME_PATTERN_QUERY)
                .bind(schema.as_deref())
                .bind(ilike_patterns(patterns)),
            ColumnFilter::Schema { schema } => {
                sqlx::query(SCHEMA_COLUMNS_QUERY).bind(schema.as_str())
            }
        };

        let rows = self.provider.fetch_all("catalog query", query).await?;

        rows.iter().map(column_row).collect()
    }
}

fn column_row(row: &PgRow) -> Result<ColumnRow> {
    let field = |name: &str| -> Result<String> {
        row.try_get::<String, _>(name)
            .map_err(|e| ProbeError::parse_field(name, e))
    };

    Ok(ColumnRow {
        table_schema: field("table_schema")?,
        table_name: field("table_name")?,
        column_name: field("column_name")?,
        data_type: field("data_type")?,
    })
}

/// Awaits `work`, then closes `provider` whether the work succeeded or not.
///
/// # Errors
/// Returns the error produced by `work`.
pub async fn scoped<T, Fut>(provider: &ConnectionProvider, work: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let result = work.await;
    provider.close().await;
    result
}
