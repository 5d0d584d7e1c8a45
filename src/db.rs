//! Pool construction and the tracked transaction handle.

use std::{
    str::FromStr,
    time::{Duration, Instant},
};

use sqlx::{
    PgConnection, PgPool, Postgres, Transaction,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Pool options derived from configuration. The pool is created once at
/// startup and handed to request handlers through `AppState`.
///
/// # Errors
/// Returns an error if `DATABASE_URL` cannot be parsed.
pub fn connect_options(config: &Config) -> Result<(PgPoolOptions, PgConnectOptions), sqlx::Error> {
    let statement_timeout = config.db_statement_timeout.as_millis().to_string();
    let connect = PgConnectOptions::from_str(&config.database_url)?
        .options([("statement_timeout", statement_timeout.as_str())]);
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .idle_timeout(Duration::from_secs(30));
    Ok((pool, connect))
}

/// Connect, retrying with capped exponential backoff while the database comes up.
///
/// # Errors
/// Returns the last connection error after all attempts fail.
pub async fn connect_with_retry(config: &Config) -> Result<PgPool, sqlx::Error> {
    let mut delay = Duration::from_millis(500);
    let max_attempts = 30;
    let mut attempt = 1;

    loop {
        let (pool_options, connect_options) = connect_options(config)?;
        match pool_options.connect_with(connect_options).await {
            Ok(pool) => {
                info!("Connected to PostgreSQL on attempt {attempt}");
                return Ok(pool);
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    "Database connection failed (attempt {}/{}): {e}, retrying in {:?}",
                    attempt, max_attempts, delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Aborts the hold-time watchdog when the transaction handle goes away.
struct Watchdog(AbortHandle);

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A transaction on a dedicated pooled connection that knows how long it
/// has been held. A warning is logged once the hold time passes `budget`,
/// and again on release if it was exceeded.
pub struct TrackedTransaction {
    inner: Transaction<'static, Postgres>,
    label: &'static str,
    acquired_at: Instant,
    budget: Duration,
    last_statement: &'static str,
    _watchdog: Watchdog,
}

impl TrackedTransaction {
    /// Check out a connection and open a transaction on it.
    ///
    /// # Errors
    /// Returns an error if no connection can be acquired or `BEGIN` fails.
    pub async fn begin(
        pool: &PgPool,
        label: &'static str,
        budget: Duration,
    ) -> Result<Self, sqlx::Error> {
        let inner = pool.begin().await?;
        let acquired_at = Instant::now();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            warn!(
                transaction = label,
                budget_ms = budget.as_millis() as u64,
                "transaction has been checked out longer than its budget"
            );
        });
        debug!(transaction = label, "transaction started");

        Ok(Self {
            inner,
            label,
            acquired_at,
            budget,
            last_statement: "BEGIN",
            _watchdog: Watchdog(watchdog.abort_handle()),
        })
    }

    /// Borrow the connection to run `statement`; the name is kept for diagnostics.
    pub fn conn(&mut self, statement: &'static str) -> &mut PgConnection {
        self.last_statement = statement;
        &mut self.inner
    }

    #[must_use]
    pub fn last_statement(&self) -> &'static str {
        self.last_statement
    }

    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// # Errors
    /// Returns an error if `COMMIT` fails; the transaction is then rolled back by the server.
    pub async fn commit(self) -> Result<(), sqlx::Error> {
        let held = self.held_for();
        let (label, last, budget) = (self.label, self.last_statement, self.budget);
        let result = self.inner.commit().await;
        report_release(label, "commit", last, held, budget);
        result
    }

    /// # Errors
    /// Returns an error if `ROLLBACK` fails.
    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        let held = self.held_for();
        let (label, last, budget) = (self.label, self.last_statement, self.budget);
        let result = self.inner.rollback().await;
        report_release(label, "rollback", last, held, budget);
        result
    }
}

fn report_release(
    label: &str,
    outcome: &str,
    last_statement: &str,
    held: Duration,
    budget: Duration,
) {
    let held_ms = held.as_millis() as u64;
    if held > budget {
        warn!(
            transaction = label,
            outcome,
            held_ms,
            last_statement,
            "long-held transaction released"
        );
    } else {
        debug!(transaction = label, outcome, held_ms, "transaction released");
    }
}
