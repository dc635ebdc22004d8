//! Statement monitoring: timing, parameter capture and reporting.
//!
//! This module provides:
//! - [`QueryMonitor`], a [`DataSource`](crate::resource::DataSource) wrapper
//!   whose connections and statements report every execution call
//! - the [`QueryReporter`] callback and the [`ReporterRegistry`] it is
//!   registered with
//! - built-in reporters for `tracing` output and in-memory statistics
//! - injectable clocks for deterministic timing in tests
//!
//! # Example
//!
//! ```rust,ignore
//! use querymon::monitor::{CallReport, QueryMonitor, QueryReporter, StatsReporter};
//! use std::sync::Arc;
//!
//! struct PrintReporter;
//!
//! impl QueryReporter for PrintReporter {
//!     fn report(&self, report: &CallReport<'_>) {
//!         println!("[{:?}] {} {} {:?}", report.elapsed, report.kind, report.sql, report.params);
//!     }
//! }
//!
//! let stats = Arc::new(StatsReporter::new());
//! let monitor = QueryMonitor::new(data_source)
//!     .with_reporter(PrintReporter)
//!     .with_reporter_arc(stats.clone());
//! ```

mod clock;
mod config;
mod interceptor;
mod params;
mod registry;
mod reporters;
mod types;
mod wrapped;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use config::{DEFAULT_MAX_TRACKED_PARAMS, MonitorConfig};
pub use interceptor::Interceptor;
pub use registry::NoopRegistry;
pub use reporters::{LoggingReporter, QueryStats, StatsReporter};
pub use types::{CallReport, ExecMethod, QueryReporter, ReporterRegistry, StatementKind};
pub use wrapped::{MonitoredConnection, MonitoredPreparedStatement, MonitoredStatement, QueryMonitor};

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
