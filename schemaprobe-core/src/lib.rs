//! Core library for schemaprobe.
//!
//! schemaprobe answers one question: which columns in a Postgres-compatible
//! database match a naming pattern, or which columns a schema contains. It
//! reads `information_schema.columns` over a single TLS session and prints
//! the rows.
//!
//! # Security Guarantees
//! - TLS is always required; plaintext `sslmode` values are rejected
//! - Sessions are read-only with a server-side statement timeout
//! - Connection strings are never logged and are redacted in errors
//! - Search terms are bound parameters, never interpolated into SQL
//!
//! # Flow
//! [`DatabaseConfig`] (fail fast) → [`ConnectionProvider`] (one lazy
//! session) → [`SchemaQueryRunner`] → [`output::render`], with
//! [`query::scoped`] guaranteeing the provider is closed afterwards.

pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod models;
pub mod output;
pub mod query;

// Re-export commonly used types
pub use config::{DATABASE_URL_ENV, DatabaseConfig, RetryPolicy, TlsMode};
pub use connection::ConnectionProvider;
pub use error::{ProbeError, Result};
pub use logging::init_logging;
pub use models::{ColumnRow, QueryReport};
pub use output::{OutputFormat, render};
pub use query::{ColumnFilter, SchemaQueryRunner, scoped};
