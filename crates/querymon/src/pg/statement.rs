use super::PgConnection;
use crate::error::{DbError, DbResult};
use crate::resource::{CallableStatement, PreparedStatement, Statement, Wrapper};
use crate::value::{SqlType, SqlValue};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

static NULL: SqlValue = SqlValue::Null;

/// Run `future`, giving up after `timeout` and asking the server to cancel
/// the running query.
async fn with_timeout<T, F>(client: &Client, timeout: Option<Duration>, future: F) -> DbResult<T>
where
    F: Future<Output = Result<T, tokio_postgres::Error>> + Send,
{
    match timeout {
        Some(timeout) => {
            tokio::pin!(future);
            tokio::select! {
                result = &mut future => result.map_err(DbError::from_db_error),
                _ = tokio::time::sleep(timeout) => {
                    let cancel_token = client.cancel_token();
                    tokio::spawn(async move {
                        if let Err(e) = cancel_token.cancel_query(NoTls).await {
                            tracing::debug!(target: "querymon", error = %e, "query cancellation failed");
                        }
                    });
                    Err(DbError::Timeout(timeout))
                }
            }
        }
        None => future.await.map_err(DbError::from_db_error),
    }
}

/// Ad-hoc SQL over a [`PgConnection`].
#[derive(Debug)]
pub struct PgStatement {
    connection: PgConnection,
    query_timeout: Option<Duration>,
    closed: bool,
}

impl PgStatement {
    pub(super) fn new(connection: PgConnection, query_timeout: Option<Duration>) -> Self {
        Self {
            connection,
            query_timeout,
            closed: false,
        }
    }

    fn client(&self) -> DbResult<&Client> {
        if self.closed {
            return Err(DbError::Closed("statement"));
        }
        self.connection.ensure_open()
    }
}

impl Wrapper for PgStatement {}

impl Statement for PgStatement {
    type Connection = PgConnection;

    async fn execute(&mut self, sql: &str) -> DbResult<bool> {
        let client = self.client()?;
        let timeout = self.query_timeout;
        let statement = with_timeout(client, timeout, client.prepare(sql)).await?;
        if statement.columns().is_empty() {
            with_timeout(client, timeout, client.execute(&statement, &[])).await?;
            Ok(false)
        } else {
            with_timeout(client, timeout, client.query(&statement, &[])).await?;
            Ok(true)
        }
    }

    async fn execute_query(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        let client = self.client()?;
        with_timeout(client, self.query_timeout, client.query(sql, &[])).await
    }

    async fn execute_update(&mut self, sql: &str) -> DbResult<u64> {
        let client = self.client()?;
        with_timeout(client, self.query_timeout, client.execute(sql, &[])).await
    }

    fn connection(&self) -> DbResult<PgConnection> {
        Ok(self.connection.clone())
    }

    fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.query_timeout = timeout;
    }

    fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    async fn close(&mut self) -> DbResult<()> {
        self.closed = true;
        Ok(())
    }
}

/// A server-side prepared statement over a [`PgConnection`].
///
/// Also serves as the callable statement: Postgres procedures and functions
/// are invoked through ordinary `CALL` / `SELECT` statements.
pub struct PgPreparedStatement {
    connection: PgConnection,
    statement: tokio_postgres::Statement,
    params: Vec<SqlValue>,
    query_timeout: Option<Duration>,
    closed: bool,
}

impl PgPreparedStatement {
    pub(super) fn new(
        connection: PgConnection,
        statement: tokio_postgres::Statement,
        query_timeout: Option<Duration>,
    ) -> Self {
        Self {
            connection,
            statement,
            params: Vec::new(),
            query_timeout,
            closed: false,
        }
    }

    /// Number of parameters the server expects.
    pub fn param_count(&self) -> usize {
        self.statement.params().len()
    }

    fn bind(&mut self, index: usize, value: SqlValue) -> DbResult<()> {
        let expected = self.param_count();
        if index == 0 || index > expected {
            return Err(DbError::parameter(
                index,
                format!("out of range, statement has {expected} parameters"),
            ));
        }
        if self.params.len() < index {
            self.params.resize(index, SqlValue::Null);
        }
        self.params[index - 1] = value;
        Ok(())
    }

    fn client(&self) -> DbResult<&Client> {
        if self.closed {
            return Err(DbError::Closed("statement"));
        }
        self.connection.ensure_open()
    }

    /// Bound values padded with NULL up to the parameter count.
    fn bound_params(&self) -> Vec<&(dyn ToSql + Sync)> {
        (0..self.param_count())
            .map(|i| self.params.get(i).unwrap_or(&NULL) as &(dyn ToSql + Sync))
            .collect()
    }
}

impl std::fmt::Debug for PgPreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPreparedStatement")
            .field("param_count", &self.param_count())
            .field("params", &self.params)
            .field("query_timeout", &self.query_timeout)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Wrapper for PgPreparedStatement {}

impl PreparedStatement for PgPreparedStatement {
    type Connection = PgConnection;

    fn set_null(&mut self, index: usize, _sql_type: SqlType) -> DbResult<()> {
        self.bind(index, SqlValue::Null)
    }

    fn set_bool(&mut self, index: usize, value: bool) -> DbResult<()> {
        self.bind(index, SqlValue::Bool(value))
    }

    fn set_byte(&mut self, index: usize, value: i8) -> DbResult<()> {
        self.bind(index, SqlValue::Byte(value))
    }

    fn set_short(&mut self, index: usize, value: i16) -> DbResult<()> {
        self.bind(index, SqlValue::Short(value))
    }

    fn set_int(&mut self, index: usize, value: i32) -> DbResult<()> {
        self.bind(index, SqlValue::Int(value))
    }

    fn set_long(&mut self, index: usize, value: i64) -> DbResult<()> {
        self.bind(index, SqlValue::Long(value))
    }

    fn set_float(&mut self, index: usize, value: f32) -> DbResult<()> {
        self.bind(index, SqlValue::Float(value))
    }

    fn set_double(&mut self, index: usize, value: f64) -> DbResult<()> {
        self.bind(index, SqlValue::Double(value))
    }

    fn set_decimal(&mut self, index: usize, value: Decimal) -> DbResult<()> {
        self.bind(index, SqlValue::Decimal(value))
    }

    fn set_string(&mut self, index: usize, value: &str) -> DbResult<()> {
        self.bind(index, SqlValue::Text(value.to_string()))
    }

    fn set_date(&mut self, index: usize, value: NaiveDate) -> DbResult<()> {
        self.bind(index, SqlValue::Date(value))
    }

    fn set_time(&mut self, index: usize, value: NaiveTime) -> DbResult<()> {
        self.bind(index, SqlValue::Time(value))
    }

    fn set_timestamp(&mut self, index: usize, value: NaiveDateTime) -> DbResult<()> {
        self.bind(index, SqlValue::Timestamp(value))
    }

    fn set_object(&mut self, index: usize, value: SqlValue) -> DbResult<()> {
        self.bind(index, value)
    }

    fn set_bytes(&mut self, index: usize, value: &[u8]) -> DbResult<()> {
        self.bind(index, SqlValue::Bytes(value.to_vec()))
    }

    fn set_json(&mut self, index: usize, value: serde_json::Value) -> DbResult<()> {
        self.bind(index, SqlValue::Json(value))
    }

    fn clear_parameters(&mut self) -> DbResult<()> {
        self.params.clear();
        Ok(())
    }

    async fn execute(&mut self) -> DbResult<bool> {
        let client = self.client()?;
        let params = self.bound_params();
        if self.statement.columns().is_empty() {
            with_timeout(client, self.query_timeout, client.execute(&self.statement, &params))
                .await?;
            Ok(false)
        } else {
            with_timeout(client, self.query_timeout, client.query(&self.statement, &params))
                .await?;
            Ok(true)
        }
    }

    async fn execute_query(&mut self) -> DbResult<Vec<Row>> {
        let client = self.client()?;
        let params = self.bound_params();
        with_timeout(client, self.query_timeout, client.query(&self.statement, &params)).await
    }

    async fn execute_update(&mut self) -> DbResult<u64> {
        let client = self.client()?;
        let params = self.bound_params();
        with_timeout(client, self.query_timeout, client.execute(&self.statement, &params)).await
    }

    fn connection(&self) -> DbResult<PgConnection> {
        Ok(self.connection.clone())
    }

    fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.query_timeout = timeout;
    }

    fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    async fn close(&mut self) -> DbResult<()> {
        self.closed = true;
        Ok(())
    }
}

impl CallableStatement for PgPreparedStatement {
    /// OUT parameters come back as result columns in Postgres; nothing to
    /// register.
    fn register_out_parameter(&mut self, index: usize, _sql_type: SqlType) -> DbResult<()> {
        if index == 0 {
            return Err(DbError::parameter(index, "positions start at 1"));
        }
        Ok(())
    }
}
