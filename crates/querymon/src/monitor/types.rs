use crate::error::DbError;
use crate::value::SqlValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The kind of statement a monitored call was made through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Stored-procedure call created via `prepare_call`.
    Callable,
    /// Statement created via `prepare_statement`.
    Prepared,
    /// Statement created via `create_statement`; SQL is passed per call.
    Plain,
    /// None of the above.
    Unrecognized,
}

impl StatementKind {
    /// Known kinds, most specific first. A callable statement is also a
    /// prepared statement, so `Callable` must win over `Prepared`.
    pub const PRIORITY: [StatementKind; 3] = [
        StatementKind::Callable,
        StatementKind::Prepared,
        StatementKind::Plain,
    ];

    /// Pick the most specific kind a resource qualifies as.
    ///
    /// Returns [`StatementKind::Unrecognized`] when none of the known kinds
    /// is present.
    pub fn classify(capabilities: &[StatementKind]) -> Self {
        Self::PRIORITY
            .into_iter()
            .find(|kind| capabilities.contains(kind))
            .unwrap_or(StatementKind::Unrecognized)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatementKind::Callable => "callable",
            StatementKind::Prepared => "prepared",
            StatementKind::Plain => "plain",
            StatementKind::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution methods subject to monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecMethod {
    Execute,
    ExecuteQuery,
    ExecuteUpdate,
}

impl ExecMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecMethod::Execute => "execute",
            ExecMethod::ExecuteQuery => "execute_query",
            ExecMethod::ExecuteUpdate => "execute_update",
        }
    }
}

impl fmt::Display for ExecMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one completed execution call.
#[derive(Debug, Clone, Copy)]
pub struct CallReport<'a> {
    /// Kind of statement the call was made through.
    pub kind: StatementKind,
    /// Execution method invoked.
    pub method: ExecMethod,
    /// SQL sent to the database: the creation SQL for prepared/callable
    /// statements, the call argument for plain statements.
    pub sql: &'a str,
    /// Bound parameters from position 1 up to the highest bound position.
    /// Always empty for plain statements.
    pub params: &'a [SqlValue],
    /// Time between starting and finishing the call.
    pub elapsed: Duration,
    /// The error returned by the database, if the call failed.
    pub error: Option<&'a DbError>,
}

impl CallReport<'_> {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Receives a [`CallReport`] for every monitored execution call.
///
/// Reporters run synchronously on the caller's task, so their execution time
/// adds to the latency of the database call. Keep them fast and non-blocking.
pub trait QueryReporter: Send + Sync {
    fn report(&self, report: &CallReport<'_>);
}

impl<R: QueryReporter + ?Sized> QueryReporter for Arc<R> {
    fn report(&self, report: &CallReport<'_>) {
        (**self).report(report);
    }
}

/// Something reporters can be registered with.
pub trait ReporterRegistry {
    /// Append a reporter. Registering the same reporter twice makes it
    /// receive every report twice.
    fn register(&self, reporter: Arc<dyn QueryReporter>);
}
