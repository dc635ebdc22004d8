use super::types::{CallReport, QueryReporter, ReporterRegistry};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

type ReporterList = Arc<[Arc<dyn QueryReporter>]>;

/// Ordered list of reporters shared by every handle derived from one monitor.
///
/// Registration replaces the list; notification only clones the `Arc`.
pub(crate) struct Reporters {
    reporters: RwLock<ReporterList>,
}

impl Default for Reporters {
    fn default() -> Self {
        Self {
            reporters: RwLock::new(Arc::from(Vec::new())),
        }
    }
}

impl Reporters {
    pub(crate) fn push(&self, reporter: Arc<dyn QueryReporter>) {
        let mut reporters = self
            .reporters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = reporters.to_vec();
        next.push(reporter);
        *reporters = next.into();
    }

    fn current(&self) -> ReporterList {
        self.reporters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.reporters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `report` to every reporter in registration order.
    ///
    /// A panicking reporter is logged and skipped; the rest still run.
    pub(crate) fn notify(&self, report: &CallReport<'_>) {
        let reporters = self.current();
        for (position, reporter) in reporters.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| reporter.report(report))).is_err() {
                tracing::error!(
                    target: "querymon",
                    reporter = position,
                    kind = %report.kind,
                    method = %report.method,
                    sql = report.sql,
                    "query reporter panicked; continuing with remaining reporters"
                );
            }
        }
    }
}

/// A registry that discards every reporter. Use it where monitoring is
/// switched off but code still expects somewhere to register reporters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRegistry;

impl ReporterRegistry for NoopRegistry {
    fn register(&self, _reporter: Arc<dyn QueryReporter>) {}
}
