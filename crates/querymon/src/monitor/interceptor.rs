use super::clock::Clock;
use super::registry::Reporters;
use super::types::{CallReport, ExecMethod, StatementKind};
use crate::error::{DbError, DbResult};
use crate::value::SqlValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Times a forwarded database call and reports its outcome.
///
/// Shared (cheaply cloned) by every handle derived from one
/// [`QueryMonitor`](super::QueryMonitor). Custom wrappers around resources
/// the monitor does not know about can use it directly.
#[derive(Clone)]
pub struct Interceptor {
    clock: Arc<dyn Clock>,
    reporters: Arc<Reporters>,
}

impl Interceptor {
    pub(crate) fn new(clock: Arc<dyn Clock>, reporters: Arc<Reporters>) -> Self {
        Self { clock, reporters }
    }

    pub(crate) fn reporters(&self) -> &Arc<Reporters> {
        &self.reporters
    }

    pub(crate) fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Whether any reporter is registered.
    pub fn is_observed(&self) -> bool {
        !self.reporters.is_empty()
    }

    /// Start the clock, forward the call built by `call`, report it to every
    /// registered reporter, then hand its result back unchanged.
    ///
    /// `call` runs after the start time is taken, so work an implementation
    /// does before returning its future is timed too. If the returned future
    /// is dropped before the call completes (a timeout, `select!`, task
    /// abort), the call is reported once with [`DbError::Cancelled`].
    pub async fn invoke_and_report<T, F, Fut>(
        &self,
        kind: StatementKind,
        method: ExecMethod,
        sql: &str,
        params: Vec<SqlValue>,
        call: F,
    ) -> DbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        if !self.is_observed() {
            return call().await;
        }

        let mut pending = PendingCall {
            interceptor: self,
            kind,
            method,
            sql,
            params,
            start: self.clock.now(),
            reported: false,
        };
        let result = call().await;
        pending.report(result.as_ref().err());
        result
    }
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("reporters", &self.reporters.len())
            .finish_non_exhaustive()
    }
}

/// A call that has been started but not yet reported.
struct PendingCall<'a> {
    interceptor: &'a Interceptor,
    kind: StatementKind,
    method: ExecMethod,
    sql: &'a str,
    params: Vec<SqlValue>,
    start: Instant,
    reported: bool,
}

impl PendingCall<'_> {
    fn report(&mut self, error: Option<&DbError>) {
        self.reported = true;
        let elapsed = self
            .interceptor
            .clock
            .now()
            .saturating_duration_since(self.start);
        self.interceptor.reporters.notify(&CallReport {
            kind: self.kind,
            method: self.method,
            sql: self.sql,
            params: &self.params,
            elapsed,
            error,
        });
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.reported {
            self.report(Some(&DbError::Cancelled));
        }
    }
}
