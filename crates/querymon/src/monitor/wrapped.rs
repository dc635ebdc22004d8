use super::clock::{Clock, SystemClock};
use super::config::MonitorConfig;
use super::interceptor::Interceptor;
use super::params::ParamTable;
use super::registry::Reporters;
use super::types::{ExecMethod, QueryReporter, ReporterRegistry, StatementKind};
use crate::error::{DbError, DbResult};
use crate::resource::{
    CallableStatement, Connection, DataSource, PreparedStatement, Statement, Wrapper,
};
use crate::value::{SqlType, SqlValue};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::any::{Any, TypeId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::Row;

fn unwrap_rejected(handle: &str, iface: TypeId) -> DbError {
    DbError::unsupported(format!(
        "{handle} cannot expose its underlying object ({iface:?}) without bypassing monitoring"
    ))
}

macro_rules! reject_unwrap {
    ($handle:literal) => {
        fn is_wrapper_for(&self, iface: TypeId) -> DbResult<bool> {
            Err(unwrap_rejected($handle, iface))
        }

        fn unwrap_to(&self, iface: TypeId) -> DbResult<&dyn Any> {
            Err(unwrap_rejected($handle, iface))
        }
    };
}

/// A [`DataSource`] wrapper that monitors every statement executed through
/// the connections it hands out.
///
/// Inject the monitor wherever the real data source was used before.
/// Connections, and statements created from them, stay wrapped: each
/// `execute*` call is timed and reported to all registered reporters.
///
/// # Example
///
/// ```rust,ignore
/// use querymon::monitor::{LoggingReporter, QueryMonitor};
///
/// let monitor = QueryMonitor::new(data_source).with_reporter(LoggingReporter::default());
///
/// let conn = monitor.connection().await?;
/// let mut stmt = conn.prepare_statement("SELECT * FROM users WHERE id = $1").await?;
/// stmt.set_long(1, 42)?;
/// let rows = stmt.execute_query().await?;
/// ```
pub struct QueryMonitor<D> {
    inner: D,
    interceptor: Interceptor,
    config: MonitorConfig,
}

impl<D: DataSource> QueryMonitor<D> {
    /// Wrap a data source. No reporters are registered yet.
    pub fn new(data_source: D) -> Self {
        Self {
            inner: data_source,
            interceptor: Interceptor::new(Arc::new(SystemClock), Arc::new(Reporters::default())),
            config: MonitorConfig::default(),
        }
    }

    /// Replace the time source used to measure calls.
    pub fn with_clock<K: Clock + 'static>(mut self, clock: K) -> Self {
        self.interceptor.set_clock(Arc::new(clock));
        self
    }

    /// Set the monitor configuration.
    ///
    /// Applies to connections obtained afterwards.
    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a reporter.
    pub fn with_reporter<R: QueryReporter + 'static>(self, reporter: R) -> Self {
        self.register(Arc::new(reporter));
        self
    }

    /// Register an Arc-wrapped reporter.
    pub fn with_reporter_arc(self, reporter: Arc<dyn QueryReporter>) -> Self {
        self.register(reporter);
        self
    }

    /// Number of registered reporters.
    pub fn reporter_count(&self) -> usize {
        self.interceptor.reporters().len()
    }

    /// Get the current configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// The interceptor shared by every handle of this monitor, for wrapping
    /// resources the monitor does not know about.
    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    fn wrap(&self, connection: D::Connection) -> MonitoredConnection<D::Connection> {
        MonitoredConnection {
            inner: connection,
            interceptor: self.interceptor.clone(),
            max_tracked_params: self.config.max_tracked_params,
        }
    }
}

impl<D> ReporterRegistry for QueryMonitor<D> {
    fn register(&self, reporter: Arc<dyn QueryReporter>) {
        self.interceptor.reporters().push(reporter);
    }
}

impl<D> Wrapper for QueryMonitor<D> {
    reject_unwrap!("QueryMonitor");
}

impl<D: DataSource> DataSource for QueryMonitor<D> {
    type Connection = MonitoredConnection<D::Connection>;

    async fn connection(&self) -> DbResult<Self::Connection> {
        let connection = self.inner.connection().await?;
        Ok(self.wrap(connection))
    }

    async fn connection_with(&self, username: &str, password: &str) -> DbResult<Self::Connection> {
        let connection = self.inner.connection_with(username, password).await?;
        Ok(self.wrap(connection))
    }

    fn login_timeout(&self) -> Option<Duration> {
        self.inner.login_timeout()
    }
}

/// A connection whose statements are monitored.
#[derive(Clone)]
pub struct MonitoredConnection<C> {
    inner: C,
    interceptor: Interceptor,
    max_tracked_params: usize,
}

impl<C> Wrapper for MonitoredConnection<C> {
    reject_unwrap!("MonitoredConnection");
}

impl<C: Connection> Connection for MonitoredConnection<C> {
    type Statement = MonitoredStatement<C::Statement, C>;
    type PreparedStatement = MonitoredPreparedStatement<C::PreparedStatement, C>;
    type CallableStatement = MonitoredPreparedStatement<C::CallableStatement, C>;

    fn create_statement(&self) -> DbResult<Self::Statement> {
        let inner = self.inner.create_statement()?;
        Ok(MonitoredStatement {
            inner,
            connection: self.clone(),
        })
    }

    async fn prepare_statement(&self, sql: &str) -> DbResult<Self::PreparedStatement> {
        let inner = self.inner.prepare_statement(sql).await?;
        Ok(MonitoredPreparedStatement::new(
            inner,
            self.clone(),
            sql,
            StatementKind::classify(&[StatementKind::Prepared]),
        ))
    }

    async fn prepare_call(&self, sql: &str) -> DbResult<Self::CallableStatement> {
        let inner = self.inner.prepare_call(sql).await?;
        Ok(MonitoredPreparedStatement::new(
            inner,
            self.clone(),
            sql,
            StatementKind::classify(&[StatementKind::Prepared, StatementKind::Callable]),
        ))
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn is_valid(&self) -> impl Future<Output = DbResult<bool>> + Send {
        self.inner.is_valid()
    }

    fn close(&self) -> impl Future<Output = DbResult<()>> + Send {
        self.inner.close()
    }
}

/// A monitored plain statement. SQL is reported per call.
pub struct MonitoredStatement<S, C> {
    inner: S,
    connection: MonitoredConnection<C>,
}

impl<S, C> Wrapper for MonitoredStatement<S, C> {
    reject_unwrap!("MonitoredStatement");
}

impl<S: Statement, C: Connection> Statement for MonitoredStatement<S, C> {
    type Connection = MonitoredConnection<C>;

    async fn execute(&mut self, sql: &str) -> DbResult<bool> {
        self.connection
            .interceptor
            .invoke_and_report(
                StatementKind::Plain,
                ExecMethod::Execute,
                sql,
                Vec::new(),
                || self.inner.execute(sql),
            )
            .await
    }

    async fn execute_query(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        self.connection
            .interceptor
            .invoke_and_report(
                StatementKind::Plain,
                ExecMethod::ExecuteQuery,
                sql,
                Vec::new(),
                || self.inner.execute_query(sql),
            )
            .await
    }

    async fn execute_update(&mut self, sql: &str) -> DbResult<u64> {
        self.connection
            .interceptor
            .invoke_and_report(
                StatementKind::Plain,
                ExecMethod::ExecuteUpdate,
                sql,
                Vec::new(),
                || self.inner.execute_update(sql),
            )
            .await
    }

    /// Returns the monitored connection, so statements created through it
    /// stay monitored too.
    fn connection(&self) -> DbResult<Self::Connection> {
        Ok(self.connection.clone())
    }

    fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.inner.set_query_timeout(timeout);
    }

    fn query_timeout(&self) -> Option<Duration> {
        self.inner.query_timeout()
    }

    fn close(&mut self) -> impl Future<Output = DbResult<()>> + Send {
        self.inner.close()
    }
}

/// A monitored prepared or callable statement.
///
/// Recognized setters are captured so reports carry the bound values.
pub struct MonitoredPreparedStatement<S, C> {
    inner: S,
    connection: MonitoredConnection<C>,
    sql: String,
    kind: StatementKind,
    params: ParamTable,
}

impl<S, C> MonitoredPreparedStatement<S, C> {
    fn new(inner: S, connection: MonitoredConnection<C>, sql: &str, kind: StatementKind) -> Self {
        let params = ParamTable::new(connection.max_tracked_params);
        Self {
            inner,
            connection,
            sql: sql.to_string(),
            kind,
            params,
        }
    }

    /// SQL this statement was prepared with.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Kind reported for calls made through this statement.
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    // Nobody will see the values without a reporter.
    fn captured_params(&self) -> Vec<SqlValue> {
        if self.connection.interceptor.is_observed() {
            self.params.snapshot()
        } else {
            Vec::new()
        }
    }
}

impl<S, C> Wrapper for MonitoredPreparedStatement<S, C> {
    reject_unwrap!("MonitoredPreparedStatement");
}

impl<S: PreparedStatement, C: Connection> PreparedStatement for MonitoredPreparedStatement<S, C> {
    type Connection = MonitoredConnection<C>;

    fn set_null(&mut self, index: usize, sql_type: SqlType) -> DbResult<()> {
        self.params.store(index, SqlValue::Null);
        self.inner.set_null(index, sql_type)
    }

    fn set_bool(&mut self, index: usize, value: bool) -> DbResult<()> {
        self.params.store(index, SqlValue::Bool(value));
        self.inner.set_bool(index, value)
    }

    fn set_byte(&mut self, index: usize, value: i8) -> DbResult<()> {
        self.params.store(index, SqlValue::Byte(value));
        self.inner.set_byte(index, value)
    }

    fn set_short(&mut self, index: usize, value: i16) -> DbResult<()> {
        self.params.store(index, SqlValue::Short(value));
        self.inner.set_short(index, value)
    }

    fn set_int(&mut self, index: usize, value: i32) -> DbResult<()> {
        self.params.store(index, SqlValue::Int(value));
        self.inner.set_int(index, value)
    }

    fn set_long(&mut self, index: usize, value: i64) -> DbResult<()> {
        self.params.store(index, SqlValue::Long(value));
        self.inner.set_long(index, value)
    }

    fn set_float(&mut self, index: usize, value: f32) -> DbResult<()> {
        self.params.store(index, SqlValue::Float(value));
        self.inner.set_float(index, value)
    }

    fn set_double(&mut self, index: usize, value: f64) -> DbResult<()> {
        self.params.store(index, SqlValue::Double(value));
        self.inner.set_double(index, value)
    }

    fn set_decimal(&mut self, index: usize, value: Decimal) -> DbResult<()> {
        self.params.store(index, SqlValue::Decimal(value));
        self.inner.set_decimal(index, value)
    }

    fn set_string(&mut self, index: usize, value: &str) -> DbResult<()> {
        self.params.store(index, SqlValue::Text(value.to_string()));
        self.inner.set_string(index, value)
    }

    fn set_date(&mut self, index: usize, value: NaiveDate) -> DbResult<()> {
        self.params.store(index, SqlValue::Date(value));
        self.inner.set_date(index, value)
    }

    fn set_time(&mut self, index: usize, value: NaiveTime) -> DbResult<()> {
        self.params.store(index, SqlValue::Time(value));
        self.inner.set_time(index, value)
    }

    fn set_timestamp(&mut self, index: usize, value: NaiveDateTime) -> DbResult<()> {
        self.params.store(index, SqlValue::Timestamp(value));
        self.inner.set_timestamp(index, value)
    }

    fn set_object(&mut self, index: usize, value: SqlValue) -> DbResult<()> {
        self.params.store(index, value.clone());
        self.inner.set_object(index, value)
    }

    // Not captured.
    fn set_bytes(&mut self, index: usize, value: &[u8]) -> DbResult<()> {
        self.inner.set_bytes(index, value)
    }

    // Not captured.
    fn set_json(&mut self, index: usize, value: serde_json::Value) -> DbResult<()> {
        self.inner.set_json(index, value)
    }

    /// Forwarded only. Captured values are kept and overwritten by the next
    /// bindings.
    fn clear_parameters(&mut self) -> DbResult<()> {
        self.inner.clear_parameters()
    }

    async fn execute(&mut self) -> DbResult<bool> {
        let params = self.captured_params();
        self.connection
            .interceptor
            .invoke_and_report(
                self.kind,
                ExecMethod::Execute,
                &self.sql,
                params,
                || self.inner.execute(),
            )
            .await
    }

    async fn execute_query(&mut self) -> DbResult<Vec<Row>> {
        let params = self.captured_params();
        self.connection
            .interceptor
            .invoke_and_report(
                self.kind,
                ExecMethod::ExecuteQuery,
                &self.sql,
                params,
                || self.inner.execute_query(),
            )
            .await
    }

    async fn execute_update(&mut self) -> DbResult<u64> {
        let params = self.captured_params();
        self.connection
            .interceptor
            .invoke_and_report(
                self.kind,
                ExecMethod::ExecuteUpdate,
                &self.sql,
                params,
                || self.inner.execute_update(),
            )
            .await
    }

    fn connection(&self) -> DbResult<Self::Connection> {
        Ok(self.connection.clone())
    }

    fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.inner.set_query_timeout(timeout);
    }

    fn query_timeout(&self) -> Option<Duration> {
        self.inner.query_timeout()
    }

    fn close(&mut self) -> impl Future<Output = DbResult<()>> + Send {
        self.inner.close()
    }
}

impl<S: CallableStatement, C: Connection> CallableStatement for MonitoredPreparedStatement<S, C> {
    fn register_out_parameter(&mut self, index: usize, sql_type: SqlType) -> DbResult<()> {
        self.inner.register_out_parameter(index, sql_type)
    }
}
