//! Error classification and health monitoring
//!
//! Raw storage errors are folded into a small taxonomy with a fixed severity
//! per kind. Every failed attempt lands in a bounded history, from which a
//! rolling 0-100 health score is derived.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::ErrorCode;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Error history entries retained
const HISTORY_CAP: usize = 1000;

/// Brief wait performed when recovery decides a lock is worth outlasting
const LOCK_RECOVERY_WAIT: Duration = Duration::from_millis(50);

/// Storage error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Query,
    Transaction,
    Constraint,
    Migration,
    Backup,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Query => "query",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Constraint => "constraint",
            ErrorKind::Migration => "migration",
            ErrorKind::Backup => "backup",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Severity assigned by fixed rules per taxonomy kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Health status buckets derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Warning,
    Poor,
    Critical,
}

impl HealthStatus {
    fn from_score(score: u8) -> Self {
        match score {
            90..=100 => HealthStatus::Excellent,
            75..=89 => HealthStatus::Good,
            50..=74 => HealthStatus::Warning,
            25..=49 => HealthStatus::Poor,
            _ => HealthStatus::Critical,
        }
    }
}

/// One recorded failure
#[derive(Debug, Clone)]
struct ErrorEvent {
    at: DateTime<Utc>,
    kind: ErrorKind,
    severity: Severity,
    context: String,
}

/// Rolling health report (read-only JSON surface)
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub score: u8,
    pub status: HealthStatus,
    pub counts_last_hour: HashMap<&'static str, u64>,
    pub counts_last_24h: HashMap<&'static str, u64>,
    pub total_errors_recorded: u64,
    pub recommendations: Vec<String>,
}

/// Classify a raw error into the taxonomy
pub fn classify(err: &Error) -> ErrorKind {
    match err {
        Error::Migration { .. } => ErrorKind::Migration,
        Error::Backup(_) => ErrorKind::Backup,
        Error::ConnectionClosed => ErrorKind::Connection,
        Error::OperationFailed { source, .. } => classify(source),
        Error::Database(db_err) => classify_sqlite(db_err),
        Error::Io(_) => ErrorKind::Connection,
        _ => ErrorKind::Unknown,
    }
}

fn classify_sqlite(err: &rusqlite::Error) -> ErrorKind {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => match code.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorKind::Connection,
            ErrorCode::CannotOpen | ErrorCode::PermissionDenied | ErrorCode::SystemIoFailure => {
                ErrorKind::Connection
            }
            ErrorCode::ConstraintViolation => ErrorKind::Constraint,
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => ErrorKind::Query,
            ErrorCode::OperationInterrupted => ErrorKind::Transaction,
            _ => ErrorKind::Query,
        },
        rusqlite::Error::QueryReturnedNoRows
        | rusqlite::Error::InvalidColumnName(_)
        | rusqlite::Error::InvalidColumnIndex(_)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::InvalidQuery => ErrorKind::Query,
        rusqlite::Error::SqlInputError { .. } => ErrorKind::Query,
        _ => ErrorKind::Unknown,
    }
}

/// True when the underlying engine signalled corruption rather than a
/// malformed statement
fn indicates_corruption(err: &Error) -> bool {
    match err {
        Error::Database(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase
        ),
        Error::OperationFailed { source, .. } => indicates_corruption(source),
        _ => false,
    }
}

/// Assign severity by the fixed per-kind rules
pub fn assess_severity(kind: ErrorKind, err: &Error) -> Severity {
    match kind {
        ErrorKind::Migration => Severity::Critical,
        ErrorKind::Connection => Severity::High,
        ErrorKind::Constraint => Severity::Medium,
        ErrorKind::Transaction => Severity::Medium,
        ErrorKind::Backup => Severity::Medium,
        ErrorKind::Query => {
            if indicates_corruption(err) {
                Severity::High
            } else {
                Severity::Low
            }
        }
        ErrorKind::Unknown => Severity::Medium,
    }
}

/// Whether the executor should retry after this kind of failure
pub fn is_retryable(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Connection | ErrorKind::Transaction)
}

/// Bounded error history plus derived health signal
pub struct HealthMonitor {
    inner: Mutex<MonitorState>,
}

#[derive(Default)]
struct MonitorState {
    history: VecDeque<ErrorEvent>,
    kind_counts: HashMap<ErrorKind, u64>,
    total_recorded: u64,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorState::default()),
        }
    }

    /// Append one failure to the history and bump per-kind counters
    pub fn record(&self, kind: ErrorKind, severity: Severity, context: &str) {
        self.record_at(Utc::now(), kind, severity, context)
    }

    /// Record with an explicit timestamp. Exposed for tests that need to
    /// place events outside the rolling windows.
    pub fn record_at(&self, at: DateTime<Utc>, kind: ErrorKind, severity: Severity, context: &str) {
        let mut state = self.inner.lock().unwrap();
        if state.history.len() == HISTORY_CAP {
            state.history.pop_front();
        }
        state.history.push_back(ErrorEvent {
            at,
            kind,
            severity,
            context: context.to_string(),
        });
        *state.kind_counts.entry(kind).or_insert(0) += 1;
        state.total_recorded += 1;

        tracing::warn!(
            kind = kind.as_str(),
            severity = ?severity,
            context,
            "Storage error recorded"
        );
    }

    /// Record the failure and decide whether a retry is worthwhile.
    ///
    /// For lock contention we wait briefly so the competing writer can
    /// finish; for a bare transaction failure the engine's rollback already
    /// restored consistency, so a clean retry is safe. Everything else is
    /// not automatically recoverable.
    pub fn record_and_attempt_recovery(
        &self,
        kind: ErrorKind,
        severity: Severity,
        context: &str,
    ) -> bool {
        self.record(kind, severity, context);
        match kind {
            ErrorKind::Connection => {
                std::thread::sleep(LOCK_RECOVERY_WAIT);
                true
            }
            ErrorKind::Transaction => true,
            _ => false,
        }
    }

    /// Severity-gated propagation: exhausted-retry and critical failures
    /// re-raise, everything else logs and yields the caller's fallback.
    pub fn resolve<T>(&self, err: Error, context: &str, fallback: T) -> Result<T> {
        let kind = classify(&err);
        let severity = assess_severity(kind, &err);
        if let Error::OperationFailed { .. } = err {
            // The executor already spent its retry budget on this one;
            // degrading to a fallback would hide a persistent failure.
            self.record(kind, severity, context);
            return Err(err);
        }
        if severity == Severity::Critical {
            self.record(kind, severity, context);
            return Err(Error::Fatal {
                context: context.to_string(),
                message: err.to_string(),
            });
        }
        self.record(kind, severity, context);
        tracing::warn!(
            context,
            error = %err,
            "Recoverable storage error, returning fallback"
        );
        Ok(fallback)
    }

    /// Errors recorded since service start
    pub fn total_recorded(&self) -> u64 {
        self.inner.lock().unwrap().total_recorded
    }

    /// Derive the rolling health report.
    ///
    /// Score is a step function of critical/high-severity counts in the last
    /// 24 hours: any critical error zeroes it, repeated high-severity errors
    /// step it down, and raw volume degrades it last.
    pub fn health_report(&self) -> HealthReport {
        let state = self.inner.lock().unwrap();
        let now = Utc::now();
        let hour_ago = now - ChronoDuration::hours(1);
        let day_ago = now - ChronoDuration::hours(24);

        let mut counts_last_hour: HashMap<&'static str, u64> = HashMap::new();
        let mut counts_last_24h: HashMap<&'static str, u64> = HashMap::new();
        let mut critical_24h = 0u64;
        let mut high_24h = 0u64;
        let mut total_24h = 0u64;

        for event in state.history.iter().filter(|e| e.at >= day_ago) {
            total_24h += 1;
            *counts_last_24h.entry(event.kind.as_str()).or_insert(0) += 1;
            if event.at >= hour_ago {
                *counts_last_hour.entry(event.kind.as_str()).or_insert(0) += 1;
            }
            match event.severity {
                Severity::Critical => critical_24h += 1,
                Severity::High => high_24h += 1,
                _ => {}
            }
        }

        let score: u8 = if critical_24h > 0 {
            0
        } else if high_24h > 5 {
            25
        } else if high_24h > 2 {
            50
        } else if total_24h > 50 {
            75
        } else if total_24h > 20 {
            85
        } else {
            100
        };

        let status = HealthStatus::from_score(score);

        let mut recommendations = Vec::new();
        if critical_24h > 0 {
            recommendations
                .push("Critical storage errors detected; inspect logs and consider restoring from the latest backup".to_string());
        }
        if high_24h > 2 {
            recommendations.push(
                "Repeated lock contention or corruption signals; reduce concurrent writers and run maintenance"
                    .to_string(),
            );
        }
        if total_24h > 20 && critical_24h == 0 {
            recommendations
                .push("Elevated error volume in the last 24h; review recent queries".to_string());
        }
        if recommendations.is_empty() && score == 100 {
            recommendations.push("Database is operating normally".to_string());
        }

        HealthReport {
            score,
            status,
            counts_last_hour,
            counts_last_24h,
            total_errors_recorded: state.total_recorded,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_error() -> Error {
        Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        ))
    }

    fn constraint_error() -> Error {
        Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("FOREIGN KEY constraint failed".to_string()),
        ))
    }

    fn corrupt_error() -> Error {
        Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            None,
        ))
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&busy_error()), ErrorKind::Connection);
        assert_eq!(classify(&constraint_error()), ErrorKind::Constraint);
        assert_eq!(classify(&corrupt_error()), ErrorKind::Query);
        assert_eq!(
            classify(&Error::Backup("disk full".into())),
            ErrorKind::Backup
        );
        assert_eq!(
            classify(&Error::Migration {
                version: 2,
                source: rusqlite::Error::InvalidQuery,
            }),
            ErrorKind::Migration
        );
        assert_eq!(classify(&Error::ConnectionClosed), ErrorKind::Connection);
    }

    #[test]
    fn test_severity_rules() {
        let busy = busy_error();
        assert_eq!(
            assess_severity(classify(&busy), &busy),
            Severity::High,
            "lock/timeout is high"
        );

        let constraint = constraint_error();
        assert_eq!(
            assess_severity(classify(&constraint), &constraint),
            Severity::Medium
        );

        let corrupt = corrupt_error();
        assert_eq!(
            assess_severity(classify(&corrupt), &corrupt),
            Severity::High,
            "corruption upgrades a query error"
        );

        let syntax = Error::Database(rusqlite::Error::InvalidQuery);
        assert_eq!(assess_severity(classify(&syntax), &syntax), Severity::Low);

        let migration = Error::Migration {
            version: 2,
            source: rusqlite::Error::InvalidQuery,
        };
        assert_eq!(
            assess_severity(classify(&migration), &migration),
            Severity::Critical
        );
    }

    #[test]
    fn test_retryability() {
        assert!(is_retryable(ErrorKind::Connection));
        assert!(is_retryable(ErrorKind::Transaction));
        assert!(!is_retryable(ErrorKind::Constraint));
        assert!(!is_retryable(ErrorKind::Migration));
        assert!(!is_retryable(ErrorKind::Query));
    }

    #[test]
    fn test_health_score_steps() {
        let monitor = HealthMonitor::new();
        let report = monitor.health_report();
        assert_eq!(report.score, 100);
        assert_eq!(report.status, HealthStatus::Excellent);

        // Six high-severity errors drive the score to 25
        for i in 0..6 {
            monitor.record(
                ErrorKind::Connection,
                Severity::High,
                &format!("lock {}", i),
            );
        }
        let report = monitor.health_report();
        assert_eq!(report.score, 25);
        assert_eq!(report.status, HealthStatus::Poor);

        // One critical zeroes it
        monitor.record(ErrorKind::Migration, Severity::Critical, "migration");
        let report = monitor.health_report();
        assert_eq!(report.score, 0);
        assert_eq!(report.status, HealthStatus::Critical);
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn test_health_score_three_high() {
        let monitor = HealthMonitor::new();
        for i in 0..3 {
            monitor.record(
                ErrorKind::Connection,
                Severity::High,
                &format!("lock {}", i),
            );
        }
        assert_eq!(monitor.health_report().score, 50);
    }

    #[test]
    fn test_old_events_fall_out_of_window() {
        let monitor = HealthMonitor::new();
        monitor.record_at(
            Utc::now() - ChronoDuration::hours(30),
            ErrorKind::Migration,
            Severity::Critical,
            "old failure",
        );
        let report = monitor.health_report();
        assert_eq!(report.score, 100, "events older than 24h do not count");
        assert_eq!(report.total_errors_recorded, 1);
    }

    #[test]
    fn test_history_bounded() {
        let monitor = HealthMonitor::new();
        for i in 0..(HISTORY_CAP + 10) {
            monitor.record_at(
                Utc::now() - ChronoDuration::hours(48),
                ErrorKind::Query,
                Severity::Low,
                &format!("e{}", i),
            );
        }
        assert_eq!(monitor.total_recorded(), (HISTORY_CAP + 10) as u64);
        assert_eq!(monitor.inner.lock().unwrap().history.len(), HISTORY_CAP);
    }

    #[test]
    fn test_resolve_fallback_and_fatal() {
        let monitor = HealthMonitor::new();

        // Medium severity returns the fallback
        let got = monitor
            .resolve(constraint_error(), "plants.create", Vec::<i64>::new())
            .unwrap();
        assert!(got.is_empty());

        // Critical severity re-raises as a typed fatal error
        let err = monitor
            .resolve(
                Error::Migration {
                    version: 2,
                    source: rusqlite::Error::InvalidQuery,
                },
                "startup",
                (),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Fatal { .. }));
    }

    #[test]
    fn test_resolve_reraises_exhausted_retries() {
        let monitor = HealthMonitor::new();
        let exhausted = Error::OperationFailed {
            operation: "rooms.get_all".to_string(),
            attempts: 3,
            source: Box::new(busy_error()),
        };

        // Never downgraded to the fallback, even though the source kind on
        // its own would be
        let err = monitor
            .resolve(exhausted, "rooms.get_all", Vec::<i64>::new())
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed { attempts: 3, .. }));
        assert_eq!(monitor.total_recorded(), 1);
    }
}
