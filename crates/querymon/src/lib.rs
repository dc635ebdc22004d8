//! # querymon
//!
//! Transparent timing, parameter capture and reporting for database calls.
//!
//! ## Features
//!
//! - **Drop-in wrapper**: [`QueryMonitor`] wraps any [`DataSource`] and hands
//!   out connections and statements that behave exactly like the originals
//! - **Per-call reports**: every `execute*` call reports its SQL, bound
//!   parameters, elapsed time and error (if any) to registered reporters
//! - **Query names**: [`QueryNameExtractor`] turns SQL into a low-cardinality
//!   name (`native`, or the stored procedure being called)
//! - **Built-in reporters**: `tracing` output and in-memory statistics
//! - **Postgres adapter**: a `tokio-postgres` backed [`DataSource`], optionally
//!   pooled with `deadpool-postgres`
//!
//! ## Example
//!
//! ```ignore
//! use querymon::pg::PgDataSource;
//! use querymon::{DataSource, LoggingReporter, PreparedStatement, QueryMonitor, Connection};
//!
//! let monitor = QueryMonitor::new(PgDataSource::from_url(&database_url)?)
//!     .with_reporter(LoggingReporter::default());
//!
//! let conn = monitor.connection().await?;
//! let mut stmt = conn.prepare_call("{call refresh_totals(?)}").await?;
//! stmt.set_long(1, 42)?;
//! stmt.execute().await?;
//! ```

pub mod error;
pub mod monitor;
pub mod name;
pub mod pg;
pub mod resource;
pub mod value;

pub use error::{ConstraintKind, DbError, DbResult};
pub use monitor::{
    CallReport, ExecMethod, LoggingReporter, MonitorConfig, NoopRegistry, QueryMonitor,
    QueryReporter, QueryStats, ReporterRegistry, StatementKind, StatsReporter,
};
pub use name::QueryNameExtractor;
pub use resource::{
    CallableStatement, Connection, DataSource, PreparedStatement, Statement, Wrapper,
};
pub use value::{SqlType, SqlValue};
