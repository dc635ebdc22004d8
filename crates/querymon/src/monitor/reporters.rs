use super::truncate_sql_bytes;
use super::types::{CallReport, QueryReporter, StatementKind};
use crate::name::QueryNameExtractor;
use serde::Serialize;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const DEFAULT_SLOW_QUERY: Duration = Duration::from_secs(1);
const DEFAULT_SQL_LIMIT: usize = 200;

/// Logs every call through `tracing`, named by a shared [`QueryNameExtractor`].
///
/// Events go to the `querymon.sql` target: a `WARN` for failed calls, a
/// `WARN` for calls slower than the threshold, and a `DEBUG` line for every
/// call.
#[derive(Debug, Clone)]
pub struct LoggingReporter {
    extractor: Arc<QueryNameExtractor>,
    slow_after: Duration,
    sql_limit: Option<usize>,
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new(Arc::new(QueryNameExtractor::new()))
    }
}

impl LoggingReporter {
    pub fn new(extractor: Arc<QueryNameExtractor>) -> Self {
        Self {
            extractor,
            slow_after: DEFAULT_SLOW_QUERY,
            sql_limit: Some(DEFAULT_SQL_LIMIT),
        }
    }

    /// Warn about calls slower than `threshold` (default 1s).
    pub fn slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_after = threshold;
        self
    }

    /// Cut logged SQL after `bytes` bytes (default 200).
    pub fn max_sql_length(mut self, bytes: usize) -> Self {
        self.sql_limit = Some(bytes);
        self
    }

    /// Log SQL in full.
    pub fn no_truncate(mut self) -> Self {
        self.sql_limit = None;
        self
    }

    pub(crate) fn truncate_sql<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        let Some(limit) = self.sql_limit.filter(|&limit| sql.len() > limit) else {
            return Cow::Borrowed(sql);
        };
        let mut cut = truncate_sql_bytes(sql, limit).to_string();
        cut.push_str("...");
        Cow::Owned(cut)
    }
}

impl QueryReporter for LoggingReporter {
    fn report(&self, report: &CallReport<'_>) {
        let query = self.extractor.extract_query_name(report.kind, report.sql);
        let sql = self.truncate_sql(report.sql);

        if let Some(error) = report.error {
            tracing::warn!(
                target: "querymon.sql",
                query,
                kind = %report.kind,
                method = %report.method,
                %error,
                sql = %sql,
                "database call failed"
            );
        }
        if report.elapsed > self.slow_after {
            tracing::warn!(
                target: "querymon.sql",
                query,
                elapsed = ?report.elapsed,
                threshold = ?self.slow_after,
                sql = %sql,
                "slow query"
            );
        }
        tracing::debug!(
            target: "querymon.sql",
            query,
            kind = %report.kind,
            method = %report.method,
            params = report.params.len(),
            elapsed = ?report.elapsed,
            sql = %sql,
        );
    }
}

/// Snapshot of [`StatsReporter`] counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryStats {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub total_duration: Duration,
    pub plain_count: u64,
    pub prepared_count: u64,
    pub callable_count: u64,
    pub max_duration: Duration,
    /// SQL of the call that set `max_duration`.
    pub slowest_query: Option<String>,
}

/// Aggregates call counts and durations in memory.
///
/// Counters are updated with relaxed atomics; a snapshot taken while calls
/// are being reported may mix values from before and after a call.
#[derive(Debug, Default)]
pub struct StatsReporter {
    calls: AtomicU64,
    failures: AtomicU64,
    /// Indexed by [`kind_slot`].
    by_kind: [AtomicU64; 3],
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
    slowest: Mutex<Option<String>>,
}

fn kind_slot(kind: StatementKind) -> Option<usize> {
    match kind {
        StatementKind::Plain => Some(0),
        StatementKind::Prepared => Some(1),
        StatementKind::Callable => Some(2),
        StatementKind::Unrecognized => None,
    }
}

fn saturating_add(counter: &AtomicU64, value: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_add(value))
    });
}

/// Store `value` if it exceeds the current maximum; `true` if it did.
fn raise_max(counter: &AtomicU64, value: u64) -> bool {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            (value > current).then_some(value)
        })
        .is_ok()
}

impl StatsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> QueryStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        QueryStats {
            total_calls: load(&self.calls),
            failed_calls: load(&self.failures),
            total_duration: Duration::from_nanos(load(&self.total_nanos)),
            plain_count: load(&self.by_kind[0]),
            prepared_count: load(&self.by_kind[1]),
            callable_count: load(&self.by_kind[2]),
            max_duration: Duration::from_nanos(load(&self.max_nanos)),
            slowest_query: self.slowest().clone(),
        }
    }

    pub fn reset(&self) {
        let counters = [&self.calls, &self.failures, &self.total_nanos, &self.max_nanos];
        for counter in counters.into_iter().chain(&self.by_kind) {
            counter.store(0, Ordering::Relaxed);
        }
        *self.slowest() = None;
    }

    fn slowest(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.slowest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueryReporter for StatsReporter {
    fn report(&self, report: &CallReport<'_>) {
        let nanos = u64::try_from(report.elapsed.as_nanos()).unwrap_or(u64::MAX);

        self.calls.fetch_add(1, Ordering::Relaxed);
        if report.is_error() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(slot) = kind_slot(report.kind) {
            self.by_kind[slot].fetch_add(1, Ordering::Relaxed);
        }
        saturating_add(&self.total_nanos, nanos);
        if raise_max(&self.max_nanos, nanos) {
            *self.slowest() = Some(report.sql.to_string());
        }
    }
}
