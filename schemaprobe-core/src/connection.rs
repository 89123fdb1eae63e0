//! Connection provider owning the single session of a probe run.
//!
//! # Security Features
//! - TLS is enforced on every session (`sslmode` never weaker than `require`)
//! - Sessions are read-only and carry a statement timeout
//! - Connection strings are redacted in all error messages
//!
//! The session is opened lazily: constructing a provider performs no network
//! I/O, the handshake happens on the first query. Each connect is a single
//! attempt bounded by the connect timeout, so a refused or failed handshake
//! surfaces its driver error immediately. Only [`RetryPolicy`] retries.

use crate::config::{DatabaseConfig, RetryPolicy, TlsMode};
use crate::error::{ProbeError, redact_database_url};
use crate::Result;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{ConnectOptions, Connection, PgConnection, Postgres};
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

enum Session {
    Idle,
    Open(PgConnection),
    Closed,
}

/// Owns the one database session a probe run uses.
pub struct ConnectionProvider {
    options: PgConnectOptions,
    session: Mutex<Session>,
    connected: AtomicBool,
    closed: AtomicBool,
    target: String,
    connect_timeout: Duration,
    statement_timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("target", &self.target)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionProvider {
    /// Creates a provider from validated configuration.
    ///
    /// # Errors
    /// Returns a configuration error if the connection string cannot be
    /// turned into connect options. No connection is attempted here.
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let options = Self::connect_options(config)?;

        tracing::debug!(
            "Prepared lazy session for {} (tls={}, max_connections={})",
            config,
            config.tls_mode,
            config.max_connections
        );

        Ok(Self {
            options,
            session: Mutex::new(Session::Idle),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            target: config.to_string(),
            connect_timeout: config.connect_timeout,
            statement_timeout: config.statement_timeout,
            retry: config.retry,
        })
    }

    /// Builds driver connect options with the configured TLS mode.
    fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
        let options = PgConnectOptions::from_str(config.database_url()).map_err(|e| {
            ProbeError::configuration(format!(
                "Invalid PostgreSQL connection string {}: {}",
                redact_database_url(config.database_url()),
                sanitize(&e.to_string(), config.database_url())
            ))
        })?;

        let ssl_mode = match config.tls_mode {
            TlsMode::Require => PgSslMode::Require,
            TlsMode::VerifyCa => PgSslMode::VerifyCa,
            TlsMode::VerifyFull => PgSslMode::VerifyFull,
        };

        let application_name = format!("schemaprobe-{}", env!("CARGO_PKG_VERSION"));
        Ok(options
            .ssl_mode(ssl_mode)
            .application_name(&application_name))
    }

    /// Host, port and database of the target, without credentials.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Makes one connection attempt and configures the new session.
    async fn connect(&self) -> Result<PgConnection> {
        tracing::debug!("Connecting to {}", self.target);

        let mut conn = tokio::time::timeout(self.connect_timeout, self.options.connect())
            .await
            .map_err(|_| {
                ProbeError::connection_failed(
                    format!("connecting to {}", self.target),
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no response within {:?}", self.connect_timeout),
                    ),
                )
            })?
            .map_err(|e| self.classify("connecting", e))?;

        for statement in session_settings(self.statement_timeout) {
            if let Err(e) = sqlx::query(&statement).execute(&mut conn).await {
                let error = self.classify("configuring session", e);
                if let Err(close_error) = conn.close().await {
                    tracing::debug!("Closing unconfigured session failed: {}", close_error);
                }
                return Err(error);
            }
        }

        Ok(conn)
    }

    /// Returns the open session, connecting first if needed.
    async fn open<'s>(&self, session: &'s mut Session) -> Result<&'s mut PgConnection> {
        if matches!(session, Session::Idle) {
            *session = Session::Open(self.connect().await?);
            self.connected.store(true, Ordering::SeqCst);
        }

        match session {
            Session::Open(conn) => Ok(conn),
            Session::Idle | Session::Closed => Err(ProbeError::connection_failed(
                format!("using connection to {}", self.target),
                std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "connection already closed",
                ),
            )),
        }
    }

    /// Runs `query` on the session and collects every row.
    pub(crate) async fn fetch_all<'q>(
        &self,
        operation: &str,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Result<Vec<PgRow>> {
        let mut session = self.session.lock().await;
        let conn = self.open(&mut session).await?;
        query
            .fetch_all(conn)
            .await
            .map_err(|e| self.classify(operation, e))
    }

    /// Runs `SELECT 1` to confirm the session works.
    ///
    /// # Errors
    /// Returns a connection error if the database is unreachable, or a
    /// query error if the server answers with something unexpected.
    pub async fn ping(&self) -> Result<()> {
        self.with_retry("connectivity check", || async move {
            let mut session = self.session.lock().await;
            let conn = self.open(&mut session).await?;
            let value: i32 = sqlx::query_scalar("SELECT 1")
                .fetch_one(conn)
                .await
                .map_err(|e| self.classify("connectivity check", e))?;

            check_ping_result(&self.target, value)
        })
        .await
    }

    /// Runs `operation`, retrying connectivity failures per the retry policy.
    ///
    /// Errors that are not retryable are returned immediately.
    ///
    /// # Errors
    /// Returns the last error once retries are exhausted.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0u32;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && retry < self.retry.max_retries => {
                    let delay = self.retry.backoff(retry);
                    retry = retry.saturating_add(1);
                    tracing::warn!(
                        "{} against {} failed ({}), retry {}/{} in {:?}",
                        operation,
                        self.target,
                        error,
                        retry,
                        self.retry.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Maps a driver error, attaching the redacted target as context.
    fn classify(&self, operation: &str, error: sqlx::Error) -> ProbeError {
        ProbeError::from_sqlx(format!("{} against {}", operation, self.target), error)
    }

    /// Closes the session and marks the provider closed.
    ///
    /// Safe to call more than once; a closed provider never reconnects.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        if let Session::Open(conn) = std::mem::replace(&mut *session, Session::Closed) {
            tracing::debug!("Closing connection to {}", self.target);
            if let Err(e) = conn.close().await {
                tracing::debug!("Closing connection to {} failed: {}", self.target, e);
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether a session is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Statements run on every new session before it is used.
fn session_settings(statement_timeout: Duration) -> [String; 2] {
    [
        format!(
            "SET statement_timeout = '{}ms'",
            statement_timeout.as_millis()
        ),
        "SET default_transaction_read_only = on".to_string(),
    ]
}

/// `SELECT 1` answered with anything else means the server misbehaved.
fn check_ping_result(target: &str, value: i32) -> Result<()> {
    if value == 1 {
        Ok(())
    } else {
        Err(ProbeError::query_failed(
            format!("connectivity check against {}", target),
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("SELECT 1 returned {}", value),
            ),
        ))
    }
}

/// Strips a raw connection string out of a driver message.
fn sanitize(message: &str, database_url: &str) -> String {
    if database_url.is_empty() {
        message.to_string()
    } else {
        message.replace(database_url, "<redacted>")
    }
}
