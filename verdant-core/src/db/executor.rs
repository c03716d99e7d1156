//! Transactional executor
//!
//! Every read and write in the service passes through this single choke
//! point. Writes run inside one immediate transaction; transient failures
//! (lock contention, rolled-back transactions) are retried with a fixed
//! multiplier backoff inside an overall deadline; every attempt lands in the
//! health monitor's history and every statement in the performance monitor.

use crate::config::DatabaseConfig;
use crate::db::monitor::{self, HealthMonitor};
use crate::db::perf::{PerfMonitor, StatementClass};
use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Base backoff; the wait before attempt N is `BACKOFF_BASE * N`
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Single choke point for all store operations
pub struct Executor {
    conn: Mutex<Option<Connection>>,
    monitor: Arc<HealthMonitor>,
    perf: Arc<PerfMonitor>,
    max_attempts: u32,
    operation_timeout: Duration,
    query_logging: bool,
}

impl Executor {
    pub fn new(
        conn: Connection,
        monitor: Arc<HealthMonitor>,
        perf: Arc<PerfMonitor>,
        config: &DatabaseConfig,
    ) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            monitor,
            perf,
            max_attempts: config.max_attempts.max(1),
            operation_timeout: config.operation_timeout(),
            query_logging: config.enable_query_logging,
        }
    }

    /// Run a read against the store, outside any explicit transaction
    pub fn read<T>(
        &self,
        operation: &str,
        class: StatementClass,
        f: impl Fn(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        self.run(operation, class, |conn| f(conn))
    }

    /// Run a mutation inside one immediate transaction. Multi-statement
    /// closures commit or roll back as a unit; callers never observe a
    /// partially-applied write.
    pub fn write<T>(
        &self,
        operation: &str,
        class: StatementClass,
        f: impl Fn(&Transaction) -> rusqlite::Result<T>,
    ) -> Result<T> {
        self.run_mut(operation, class, |conn| {
            // Immediate transactions take the write lock up front so lock
            // contention surfaces here, where the retry loop can handle it.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    fn run<T>(
        &self,
        operation: &str,
        class: StatementClass,
        attempt_fn: impl Fn(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        self.run_mut(operation, class, |conn| attempt_fn(conn))
    }

    fn run_mut<T>(
        &self,
        operation: &str,
        class: StatementClass,
        attempt_fn: impl Fn(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let deadline = Instant::now() + self.operation_timeout;
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let backoff = BACKOFF_BASE * (attempt - 1);
                tracing::debug!(
                    operation,
                    attempt,
                    max_attempts = self.max_attempts,
                    "Retrying after {:?}",
                    backoff
                );
                std::thread::sleep(backoff);
            }

            let started = Instant::now();
            let outcome = {
                let mut guard = self.conn.lock().unwrap();
                let conn = guard.as_mut().ok_or(Error::ConnectionClosed)?;
                attempt_fn(conn)
            };
            let elapsed = started.elapsed();
            self.perf.record(class, elapsed);
            if self.query_logging {
                tracing::debug!(operation, class = class.as_str(), ?elapsed, "Statement");
            }

            match outcome {
                Ok(value) => return Ok(value),
                Err(db_err) => {
                    let err = Error::Database(db_err);
                    let kind = monitor::classify(&err);
                    let severity = monitor::assess_severity(kind, &err);
                    let recoverable =
                        self.monitor
                            .record_and_attempt_recovery(kind, severity, operation);

                    if !monitor::is_retryable(kind) || !recoverable {
                        // Fast, accurate failure signal for constraint
                        // violations and malformed statements.
                        return Err(err);
                    }
                    if Instant::now() >= deadline {
                        tracing::warn!(operation, "Operation deadline exceeded, giving up");
                        return Err(Error::OperationFailed {
                            operation: operation.to_string(),
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(Error::OperationFailed {
            operation: operation.to_string(),
            attempts: self.max_attempts,
            source: Box::new(last_error.unwrap_or(Error::ConnectionClosed)),
        })
    }

    /// Direct access for schema setup and maintenance statements that cannot
    /// run inside the retry loop (VACUUM, checkpoints).
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(Error::ConnectionClosed)?;
        f(conn)
    }

    /// Direct mutable access (migrations need `&mut Connection`)
    pub fn with_connection_mut<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().unwrap();
        let conn = guard.as_mut().ok_or(Error::ConnectionClosed)?;
        f(conn)
    }

    /// Close the handle. In-flight operations have already finished because
    /// they hold the lock; the next caller sees `ConnectionClosed`.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| Error::Database(e))?;
        }
        Ok(())
    }

    /// Reopen the handle against `path` (used by restore)
    pub fn reopen(&self, path: &Path, config: &DatabaseConfig) -> Result<()> {
        let mut guard = self.conn.lock().unwrap();
        if guard.is_some() {
            return Err(Error::Backup(
                "cannot reopen: connection is still open".to_string(),
            ));
        }
        *guard = Some(crate::db::schema::open_connection(path, config)?);
        Ok(())
    }

    /// True when the handle is open
    pub fn is_open(&self) -> bool {
        self.conn.lock().unwrap().is_some()
    }
}
