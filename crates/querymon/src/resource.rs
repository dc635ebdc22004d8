//! Capability traits for data sources, connections and statements.
//!
//! These are the seams the monitor wraps: a [`DataSource`] hands out
//! [`Connection`]s, which in turn create plain [`Statement`]s,
//! [`PreparedStatement`]s and [`CallableStatement`]s. Any type implementing
//! them (the bundled Postgres adapter, a test double, another driver) can be
//! placed behind a [`QueryMonitor`](crate::monitor::QueryMonitor).

use crate::error::{DbError, DbResult};
use crate::value::{SqlType, SqlValue};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::any::{Any, TypeId};
use std::future::Future;
use std::time::Duration;
use tokio_postgres::Row;

/// Access to the object underneath a wrapper.
///
/// Raw resources answer "no" and refuse to unwrap by default. Monitoring
/// wrappers reject both calls with [`DbError::Unsupported`]: handing out the
/// raw object would bypass interception.
pub trait Wrapper {
    /// Whether this handle wraps an object of the given type.
    fn is_wrapper_for(&self, iface: TypeId) -> DbResult<bool> {
        let _ = iface;
        Ok(false)
    }

    /// Return the wrapped object of the given type.
    fn unwrap_to(&self, iface: TypeId) -> DbResult<&dyn Any> {
        Err(DbError::unsupported(format!(
            "unwrap to {iface:?} is not supported"
        )))
    }
}

/// A factory of database connections.
pub trait DataSource: Wrapper + Send + Sync {
    type Connection: Connection;

    /// Obtain a connection using the data source's own credentials.
    fn connection(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Obtain a connection with explicit credentials.
    fn connection_with(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Maximum time to wait while establishing a connection, if configured.
    fn login_timeout(&self) -> Option<Duration> {
        None
    }
}

/// An open database connection.
///
/// Connections are cheap handles: cloning one yields another handle to the
/// same session.
pub trait Connection: Wrapper + Clone + Send + Sync + 'static {
    type Statement: Statement<Connection = Self>;
    type PreparedStatement: PreparedStatement<Connection = Self>;
    type CallableStatement: CallableStatement<Connection = Self>;

    /// Create a statement for executing ad-hoc SQL.
    fn create_statement(&self) -> DbResult<Self::Statement>;

    /// Prepare a parameterized statement.
    fn prepare_statement(
        &self,
        sql: &str,
    ) -> impl Future<Output = DbResult<Self::PreparedStatement>> + Send;

    /// Prepare a stored-procedure call (`{call proc(?, ?)}` and friends).
    fn prepare_call(
        &self,
        sql: &str,
    ) -> impl Future<Output = DbResult<Self::CallableStatement>> + Send;

    /// Whether [`Connection::close`] has been called or the session was lost.
    fn is_closed(&self) -> bool;

    /// Check that the session is still usable.
    fn is_valid(&self) -> impl Future<Output = DbResult<bool>> + Send;

    /// Close the connection.
    fn close(&self) -> impl Future<Output = DbResult<()>> + Send;
}

/// A statement executing SQL passed at call time.
pub trait Statement: Wrapper + Send {
    type Connection: Connection;

    /// Execute SQL; returns `true` if it produced a result set.
    fn execute(&mut self, sql: &str) -> impl Future<Output = DbResult<bool>> + Send;

    /// Execute a query and return its rows.
    fn execute_query(&mut self, sql: &str) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Execute a statement and return the number of affected rows.
    fn execute_update(&mut self, sql: &str) -> impl Future<Output = DbResult<u64>> + Send;

    /// The connection that created this statement.
    fn connection(&self) -> DbResult<Self::Connection>;

    fn set_query_timeout(&mut self, timeout: Option<Duration>);

    fn query_timeout(&self) -> Option<Duration>;

    fn close(&mut self) -> impl Future<Output = DbResult<()>> + Send;
}

/// A statement prepared from SQL at creation time, with positional parameters.
///
/// Parameter positions are 1-based.
pub trait PreparedStatement: Wrapper + Send {
    type Connection: Connection;

    fn set_null(&mut self, index: usize, sql_type: SqlType) -> DbResult<()>;
    fn set_bool(&mut self, index: usize, value: bool) -> DbResult<()>;
    fn set_byte(&mut self, index: usize, value: i8) -> DbResult<()>;
    fn set_short(&mut self, index: usize, value: i16) -> DbResult<()>;
    fn set_int(&mut self, index: usize, value: i32) -> DbResult<()>;
    fn set_long(&mut self, index: usize, value: i64) -> DbResult<()>;
    fn set_float(&mut self, index: usize, value: f32) -> DbResult<()>;
    fn set_double(&mut self, index: usize, value: f64) -> DbResult<()>;
    fn set_decimal(&mut self, index: usize, value: Decimal) -> DbResult<()>;
    fn set_string(&mut self, index: usize, value: &str) -> DbResult<()>;
    fn set_date(&mut self, index: usize, value: NaiveDate) -> DbResult<()>;
    fn set_time(&mut self, index: usize, value: NaiveTime) -> DbResult<()>;
    fn set_timestamp(&mut self, index: usize, value: NaiveDateTime) -> DbResult<()>;
    fn set_object(&mut self, index: usize, value: SqlValue) -> DbResult<()>;
    fn set_bytes(&mut self, index: usize, value: &[u8]) -> DbResult<()>;
    fn set_json(&mut self, index: usize, value: serde_json::Value) -> DbResult<()>;

    /// Reset all parameter values on the underlying statement.
    fn clear_parameters(&mut self) -> DbResult<()>;

    /// Execute with the currently bound parameters; returns `true` if it produced a result set.
    fn execute(&mut self) -> impl Future<Output = DbResult<bool>> + Send;

    fn execute_query(&mut self) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    fn execute_update(&mut self) -> impl Future<Output = DbResult<u64>> + Send;

    /// The connection that created this statement.
    fn connection(&self) -> DbResult<Self::Connection>;

    fn set_query_timeout(&mut self, timeout: Option<Duration>);

    fn query_timeout(&self) -> Option<Duration>;

    fn close(&mut self) -> impl Future<Output = DbResult<()>> + Send;
}

/// A prepared stored-procedure call.
pub trait CallableStatement: PreparedStatement {
    /// Declare the type of an OUT parameter.
    fn register_out_parameter(&mut self, index: usize, sql_type: SqlType) -> DbResult<()>;
}
