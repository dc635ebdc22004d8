use super::*;
use crate::error::{DbError, DbResult};
use crate::name::QueryNameExtractor;
use crate::resource::{
    CallableStatement, Connection, DataSource, PreparedStatement, Statement, Wrapper,
};
use crate::value::{SqlType, SqlValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::any::TypeId;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_postgres::Row;

// ── In-memory resources that record every forwarded call ──

struct MockEnv {
    log: Mutex<Vec<String>>,
    clock: Arc<ManualClock>,
    latency: Duration,
}

impl MockEnv {
    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Simulate a round trip. SQL containing `boom` fails.
    fn run(&self, entry: String, sql: &str) -> DbResult<()> {
        self.record(entry);
        self.clock.advance(self.latency);
        if sql.contains("boom") {
            return Err(DbError::Other("boom".to_string()));
        }
        Ok(())
    }
}

struct MockSource {
    env: Arc<MockEnv>,
}

impl Wrapper for MockSource {
    fn is_wrapper_for(&self, iface: TypeId) -> DbResult<bool> {
        Ok(iface == TypeId::of::<MockSource>())
    }
}

impl DataSource for MockSource {
    type Connection = MockConnection;

    async fn connection(&self) -> DbResult<MockConnection> {
        self.env.record("connection");
        Ok(MockConnection::new(self.env.clone()))
    }

    async fn connection_with(&self, username: &str, _password: &str) -> DbResult<MockConnection> {
        self.env.record(format!("connection_with({username})"));
        Ok(MockConnection::new(self.env.clone()))
    }

    fn login_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(5))
    }
}

#[derive(Clone)]
struct MockConnection {
    env: Arc<MockEnv>,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    fn new(env: Arc<MockEnv>) -> Self {
        Self {
            env,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Wrapper for MockConnection {}

impl Connection for MockConnection {
    type Statement = MockStatement;
    type PreparedStatement = MockPrepared;
    type CallableStatement = MockPrepared;

    fn create_statement(&self) -> DbResult<MockStatement> {
        self.env.record("create_statement");
        Ok(MockStatement {
            connection: self.clone(),
            timeout: None,
        })
    }

    async fn prepare_statement(&self, sql: &str) -> DbResult<MockPrepared> {
        self.env.record(format!("prepare_statement({sql})"));
        Ok(MockPrepared::new(self.clone(), sql))
    }

    async fn prepare_call(&self, sql: &str) -> DbResult<MockPrepared> {
        self.env.record(format!("prepare_call({sql})"));
        Ok(MockPrepared::new(self.clone(), sql))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn is_valid(&self) -> DbResult<bool> {
        Ok(!self.is_closed())
    }

    async fn close(&self) -> DbResult<()> {
        self.env.record("close_connection");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockStatement {
    connection: MockConnection,
    timeout: Option<Duration>,
}

impl Wrapper for MockStatement {}

impl Statement for MockStatement {
    type Connection = MockConnection;

    /// SQL containing `stall` never completes.
    async fn execute(&mut self, sql: &str) -> DbResult<bool> {
        self.connection.env.run(format!("execute({sql})"), sql)?;
        if sql.contains("stall") {
            std::future::pending::<()>().await;
        }
        Ok(true)
    }

    async fn execute_query(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        self.connection.env.run(format!("execute_query({sql})"), sql)?;
        Ok(Vec::new())
    }

    /// Does the round trip before handing back an already completed future.
    fn execute_update(&mut self, sql: &str) -> impl Future<Output = DbResult<u64>> + Send {
        let outcome = self.connection.env.run(format!("execute_update({sql})"), sql);
        std::future::ready(outcome.map(|()| 7))
    }

    fn connection(&self) -> DbResult<MockConnection> {
        Ok(self.connection.clone())
    }

    fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn query_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn close(&mut self) -> DbResult<()> {
        self.connection.env.record("close_statement");
        Ok(())
    }
}

struct MockPrepared {
    connection: MockConnection,
    sql: String,
    timeout: Option<Duration>,
}

impl MockPrepared {
    fn new(connection: MockConnection, sql: &str) -> Self {
        Self {
            connection,
            sql: sql.to_string(),
            timeout: None,
        }
    }

    fn set(&mut self, name: &str, index: usize, value: impl std::fmt::Display) -> DbResult<()> {
        self.connection
            .env
            .record(format!("{name}({index}, {value})"));
        Ok(())
    }
}

impl Wrapper for MockPrepared {}

impl PreparedStatement for MockPrepared {
    type Connection = MockConnection;

    fn set_null(&mut self, index: usize, sql_type: SqlType) -> DbResult<()> {
        self.set("set_null", index, format!("{sql_type:?}"))
    }
    fn set_bool(&mut self, index: usize, value: bool) -> DbResult<()> {
        self.set("set_bool", index, value)
    }
    fn set_byte(&mut self, index: usize, value: i8) -> DbResult<()> {
        self.set("set_byte", index, value)
    }
    fn set_short(&mut self, index: usize, value: i16) -> DbResult<()> {
        self.set("set_short", index, value)
    }
    fn set_int(&mut self, index: usize, value: i32) -> DbResult<()> {
        self.set("set_int", index, value)
    }
    fn set_long(&mut self, index: usize, value: i64) -> DbResult<()> {
        self.set("set_long", index, value)
    }
    fn set_float(&mut self, index: usize, value: f32) -> DbResult<()> {
        self.set("set_float", index, value)
    }
    fn set_double(&mut self, index: usize, value: f64) -> DbResult<()> {
        self.set("set_double", index, value)
    }
    fn set_decimal(&mut self, index: usize, value: Decimal) -> DbResult<()> {
        self.set("set_decimal", index, value)
    }
    fn set_string(&mut self, index: usize, value: &str) -> DbResult<()> {
        self.set("set_string", index, value)
    }
    fn set_date(&mut self, index: usize, value: NaiveDate) -> DbResult<()> {
        self.set("set_date", index, value)
    }
    fn set_time(&mut self, index: usize, value: NaiveTime) -> DbResult<()> {
        self.set("set_time", index, value)
    }
    fn set_timestamp(&mut self, index: usize, value: NaiveDateTime) -> DbResult<()> {
        self.set("set_timestamp", index, value)
    }
    fn set_object(&mut self, index: usize, value: SqlValue) -> DbResult<()> {
        self.set("set_object", index, value)
    }
    fn set_bytes(&mut self, index: usize, value: &[u8]) -> DbResult<()> {
        self.set("set_bytes", index, value.len())
    }
    fn set_json(&mut self, index: usize, value: serde_json::Value) -> DbResult<()> {
        self.set("set_json", index, value)
    }

    fn clear_parameters(&mut self) -> DbResult<()> {
        self.connection.env.record("clear_parameters");
        Ok(())
    }

    async fn execute(&mut self) -> DbResult<bool> {
        self.connection
            .env
            .run(format!("execute({})", self.sql), &self.sql)?;
        Ok(false)
    }

    async fn execute_query(&mut self) -> DbResult<Vec<Row>> {
        self.connection
            .env
            .run(format!("execute_query({})", self.sql), &self.sql)?;
        Ok(Vec::new())
    }

    async fn execute_update(&mut self) -> DbResult<u64> {
        self.connection
            .env
            .run(format!("execute_update({})", self.sql), &self.sql)?;
        Ok(3)
    }

    fn connection(&self) -> DbResult<MockConnection> {
        Ok(self.connection.clone())
    }

    fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn query_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn close(&mut self) -> DbResult<()> {
        self.connection.env.record("close_statement");
        Ok(())
    }
}

impl CallableStatement for MockPrepared {
    fn register_out_parameter(&mut self, index: usize, sql_type: SqlType) -> DbResult<()> {
        self.set("register_out_parameter", index, format!("{sql_type:?}"))
    }
}

// ── Reporters that remember what they saw ──

#[derive(Debug, Clone, PartialEq)]
struct Captured {
    kind: StatementKind,
    method: ExecMethod,
    sql: String,
    params: Vec<SqlValue>,
    elapsed: Duration,
    error: Option<String>,
}

#[derive(Clone, Default)]
struct Capture {
    seen: Arc<Mutex<Vec<Captured>>>,
}

impl Capture {
    fn take(&self) -> Vec<Captured> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }

    fn single(&self) -> Captured {
        let mut seen = self.take();
        assert_eq!(seen.len(), 1, "expected exactly one report: {seen:?}");
        seen.remove(0)
    }
}

impl QueryReporter for Capture {
    fn report(&self, report: &CallReport<'_>) {
        self.seen.lock().unwrap().push(Captured {
            kind: report.kind,
            method: report.method,
            sql: report.sql.to_string(),
            params: report.params.to_vec(),
            elapsed: report.elapsed,
            error: report.error.map(|e| e.to_string()),
        });
    }
}

struct Tagged {
    tag: &'static str,
    order: Arc<Mutex<Vec<&'static str>>>,
}

impl QueryReporter for Tagged {
    fn report(&self, _report: &CallReport<'_>) {
        self.order.lock().unwrap().push(self.tag);
    }
}

struct Panicking;

impl QueryReporter for Panicking {
    fn report(&self, _report: &CallReport<'_>) {
        panic!("reporter failure");
    }
}

fn env_with_latency(latency: Duration) -> Arc<MockEnv> {
    Arc::new(MockEnv {
        log: Mutex::new(Vec::new()),
        clock: Arc::new(ManualClock::new()),
        latency,
    })
}

/// A monitor over fresh mocks, timed by a clock that never moves.
fn setup() -> (QueryMonitor<MockSource>, Arc<MockEnv>, Capture) {
    let env = env_with_latency(Duration::ZERO);
    let capture = Capture::default();
    let monitor = QueryMonitor::new(MockSource { env: env.clone() })
        .with_clock(FixedClock::new())
        .with_reporter(capture.clone());
    (monitor, env, capture)
}

fn epoch_millis(millis: i64) -> NaiveDateTime {
    DateTime::from_timestamp_millis(millis).unwrap().naive_utc()
}

#[tokio::test]
async fn test_prepared_without_bindings() {
    let (monitor, _env, capture) = setup();
    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_statement("prepare world").await.unwrap();

    assert!(!stmt.execute().await.unwrap());

    assert_eq!(
        capture.single(),
        Captured {
            kind: StatementKind::Prepared,
            method: ExecMethod::Execute,
            sql: "prepare world".to_string(),
            params: vec![],
            elapsed: Duration::ZERO,
            error: None,
        }
    );
}

#[tokio::test]
async fn test_prepared_snapshot_fills_gaps_with_null() {
    let (monitor, _env, capture) = setup();
    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_statement("prepare world").await.unwrap();

    stmt.set_bool(1, true).unwrap();
    stmt.set_double(2, 12.5).unwrap();
    stmt.set_timestamp(4, epoch_millis(4000)).unwrap();
    stmt.set_decimal(6, Decimal::TEN).unwrap();
    stmt.set_null(5, SqlType::Numeric).unwrap();
    stmt.execute_update().await.unwrap();

    let report = capture.single();
    assert_eq!(
        report.params,
        vec![
            SqlValue::Bool(true),
            SqlValue::Double(12.5),
            SqlValue::Null,
            SqlValue::Timestamp(epoch_millis(4000)),
            SqlValue::Null,
            SqlValue::Decimal(Decimal::TEN),
        ]
    );
    let rendered: Vec<String> = report.params.iter().map(ToString::to_string).collect();
    assert_eq!(
        rendered.join(", "),
        "true, 12.5, null, 1970-01-01 00:00:04, null, 10"
    );
    assert_eq!(report.method, ExecMethod::ExecuteUpdate);
}

#[tokio::test]
async fn test_callable_statement_reports_callable_kind() {
    let (monitor, env, capture) = setup();
    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_call("{call pr_abc5(?,?)}").await.unwrap();
    assert_eq!(stmt.kind(), StatementKind::Callable);

    stmt.set_string(1, "a").unwrap();
    stmt.register_out_parameter(2, SqlType::Integer).unwrap();
    stmt.execute().await.unwrap();

    let report = capture.single();
    assert_eq!(report.kind, StatementKind::Callable);
    assert_eq!(report.params, vec![SqlValue::from("a")]);

    let extractor = QueryNameExtractor::new();
    assert_eq!(extractor.extract_query_name(report.kind, &report.sql), "pr_abc5");
    assert!(
        env.log()
            .contains(&"register_out_parameter(2, Integer)".to_string())
    );
}

#[tokio::test]
async fn test_plain_statement_reports_call_sql() {
    let (monitor, env, capture) = setup();
    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.create_statement().unwrap();

    assert_eq!(stmt.execute_update("update t set x = 1").await.unwrap(), 7);
    assert!(stmt.execute_query("select 1").await.unwrap().is_empty());

    let reports = capture.take();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].kind, StatementKind::Plain);
    assert_eq!(reports[0].method, ExecMethod::ExecuteUpdate);
    assert_eq!(reports[0].sql, "update t set x = 1");
    assert!(reports[0].params.is_empty());
    assert_eq!(reports[1].method, ExecMethod::ExecuteQuery);
    assert_eq!(reports[1].sql, "select 1");
    assert_eq!(
        env.log(),
        vec![
            "connection",
            "create_statement",
            "execute_update(update t set x = 1)",
            "execute_query(select 1)",
        ]
    );
}

#[tokio::test]
async fn test_reporters_run_in_registration_order() {
    let env = env_with_latency(Duration::ZERO);
    let order = Arc::new(Mutex::new(Vec::new()));
    let a: Arc<dyn QueryReporter> = Arc::new(Tagged {
        tag: "a",
        order: order.clone(),
    });
    let monitor = QueryMonitor::new(MockSource { env })
        .with_reporter_arc(a.clone())
        .with_reporter(Tagged {
            tag: "b",
            order: order.clone(),
        })
        .with_reporter_arc(a);
    assert_eq!(monitor.reporter_count(), 3);

    let conn = monitor.connection().await.unwrap();
    conn.create_statement()
        .unwrap()
        .execute("select 1")
        .await
        .unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "a"]);
}

#[tokio::test]
async fn test_reporter_registered_later_sees_existing_connections() {
    let (monitor, _env, capture) = setup();
    let conn = monitor.connection().await.unwrap();

    let late = Capture::default();
    monitor.register(Arc::new(late.clone()));

    let mut stmt = conn.prepare_statement("select 1").await.unwrap();
    stmt.execute_query().await.unwrap();

    assert_eq!(capture.take().len(), 1);
    assert_eq!(late.take().len(), 1);
}

#[tokio::test]
async fn test_error_is_reported_then_returned() {
    let (monitor, env, capture) = setup();
    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_statement("select boom").await.unwrap();
    stmt.set_int(1, 1).unwrap();

    let err = stmt.execute_query().await.unwrap_err();
    assert!(matches!(err, DbError::Other(ref msg) if msg == "boom"));

    let report = capture.single();
    assert_eq!(report.error.as_deref(), Some("boom"));
    assert_eq!(report.params, vec![SqlValue::Int(1)]);
    assert!(
        env.log()
            .contains(&"execute_query(select boom)".to_string())
    );
}

#[tokio::test]
async fn test_panicking_reporter_does_not_affect_others() {
    let env = env_with_latency(Duration::ZERO);
    let capture = Capture::default();
    let monitor = QueryMonitor::new(MockSource { env })
        .with_reporter(Panicking)
        .with_reporter(capture.clone());

    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.create_statement().unwrap();
    assert_eq!(stmt.execute_update("delete from t").await.unwrap(), 7);

    assert_eq!(capture.single().sql, "delete from t");
}

#[tokio::test]
async fn test_elapsed_is_measured_with_injected_clock() {
    let env = env_with_latency(Duration::from_millis(25));
    let capture = Capture::default();
    let monitor = QueryMonitor::new(MockSource { env: env.clone() })
        .with_clock(env.clock.clone())
        .with_reporter(capture.clone());

    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_statement("select 1").await.unwrap();
    stmt.execute().await.unwrap();
    stmt.execute().await.unwrap();

    let reports = capture.take();
    assert_eq!(reports.len(), 2);
    for report in reports {
        assert_eq!(report.elapsed, Duration::from_millis(25));
    }
}

#[tokio::test]
async fn test_work_done_before_the_future_is_returned_is_timed() {
    let env = env_with_latency(Duration::from_millis(40));
    let capture = Capture::default();
    let monitor = QueryMonitor::new(MockSource { env: env.clone() })
        .with_clock(env.clock.clone())
        .with_reporter(capture.clone());

    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.create_statement().unwrap();
    assert_eq!(stmt.execute_update("update t set x = 1").await.unwrap(), 7);

    assert_eq!(capture.single().elapsed, Duration::from_millis(40));
}

#[tokio::test]
async fn test_call_dropped_by_timeout_is_reported_once() {
    let (monitor, env, capture) = setup();
    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.create_statement().unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(10), stmt.execute("select stall")).await;
    assert!(outcome.is_err());

    let report = capture.single();
    assert_eq!(report.method, ExecMethod::Execute);
    assert_eq!(report.sql, "select stall");
    assert_eq!(report.error, Some(DbError::Cancelled.to_string()));
    assert!(env.log().contains(&"execute(select stall)".to_string()));

    // The statement stays usable and reports normally afterwards.
    stmt.execute("select 1").await.unwrap();
    assert_eq!(capture.single().error, None);
}

#[tokio::test]
async fn test_interceptor_reports_dropped_custom_call() {
    let env = env_with_latency(Duration::ZERO);
    let ticking = env.clock.clone();
    let capture = Capture::default();
    let monitor = QueryMonitor::new(MockSource { env: env.clone() })
        .with_clock(env.clock.clone())
        .with_reporter(capture.clone());

    let call = monitor.interceptor().invoke_and_report(
        StatementKind::Unrecognized,
        ExecMethod::Execute,
        "vacuum",
        vec![SqlValue::Int(1)],
        move || async move {
            ticking.advance(Duration::from_millis(15));
            std::future::pending::<DbResult<()>>().await
        },
    );
    tokio::select! {
        biased;
        _ = call => unreachable!("pending call completed"),
        _ = tokio::task::yield_now() => {}
    }

    let report = capture.single();
    assert_eq!(report.elapsed, Duration::from_millis(15));
    assert_eq!(report.params, vec![SqlValue::Int(1)]);
    assert_eq!(report.error, Some(DbError::Cancelled.to_string()));
}

#[tokio::test]
async fn test_statement_hands_back_monitored_connection() {
    let (monitor, _env, capture) = setup();
    let conn = monitor.connection().await.unwrap();
    let stmt = conn.create_statement().unwrap();

    let again = stmt.connection().unwrap();
    let mut prepared = again.prepare_statement("select 2").await.unwrap();
    prepared.execute().await.unwrap();

    let back = prepared.connection().unwrap();
    back.create_statement()
        .unwrap()
        .execute("select 3")
        .await
        .unwrap();

    let sqls: Vec<String> = capture.take().into_iter().map(|r| r.sql).collect();
    assert_eq!(sqls, vec!["select 2", "select 3"]);
}

#[tokio::test]
async fn test_unwrap_is_rejected_on_every_handle() {
    let (monitor, _env, _capture) = setup();
    let iface = TypeId::of::<MockSource>();

    assert!(monitor.is_wrapper_for(iface).unwrap_err().is_unsupported());
    assert!(monitor.unwrap_to(iface).unwrap_err().is_unsupported());

    let conn = monitor.connection().await.unwrap();
    assert!(conn.is_wrapper_for(iface).unwrap_err().is_unsupported());
    assert!(conn.unwrap_to(iface).unwrap_err().is_unsupported());

    let stmt = conn.create_statement().unwrap();
    assert!(stmt.unwrap_to(iface).unwrap_err().is_unsupported());

    let prepared = conn.prepare_call("{call pr_x}").await.unwrap();
    assert!(prepared.is_wrapper_for(iface).unwrap_err().is_unsupported());
}

#[tokio::test]
async fn test_positions_beyond_capacity_are_forwarded_not_captured() {
    let env = env_with_latency(Duration::ZERO);
    let capture = Capture::default();
    let monitor = QueryMonitor::new(MockSource { env: env.clone() })
        .with_config(MonitorConfig::new().with_max_tracked_params(2))
        .with_reporter(capture.clone());
    assert_eq!(monitor.config().max_tracked_params, 2);

    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_statement("select 1").await.unwrap();
    stmt.set_int(0, 0).unwrap();
    stmt.set_int(1, 1).unwrap();
    stmt.set_int(2, 2).unwrap();
    stmt.set_int(3, 3).unwrap();
    stmt.execute().await.unwrap();

    assert_eq!(capture.single().params, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    let log = env.log();
    for entry in ["set_int(0, 0)", "set_int(3, 3)"] {
        assert!(log.contains(&entry.to_string()), "{entry} not forwarded");
    }
}

#[tokio::test]
async fn test_uncaptured_setters_are_forwarded() {
    let (monitor, env, capture) = setup();
    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_statement("insert into t values ($1, $2, $3)").await.unwrap();

    stmt.set_bytes(1, &[1, 2, 3]).unwrap();
    stmt.set_json(2, serde_json::json!({"a": 1})).unwrap();
    stmt.set_long(3, 9).unwrap();
    stmt.execute_update().await.unwrap();

    assert_eq!(
        capture.single().params,
        vec![SqlValue::Null, SqlValue::Null, SqlValue::Long(9)]
    );
    let log = env.log();
    assert!(log.contains(&"set_bytes(1, 3)".to_string()));
    assert!(log.contains(&r#"set_json(2, {"a":1})"#.to_string()));
}

#[tokio::test]
async fn test_rebinding_overwrites_and_clear_is_forwarded() {
    let (monitor, env, capture) = setup();
    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_statement("select $1, $2").await.unwrap();

    stmt.set_string(1, "first").unwrap();
    stmt.set_object(2, SqlValue::Short(4)).unwrap();
    stmt.execute_query().await.unwrap();

    stmt.clear_parameters().unwrap();
    stmt.set_string(1, "second").unwrap();
    stmt.execute_query().await.unwrap();

    let reports = capture.take();
    assert_eq!(
        reports[0].params,
        vec![SqlValue::from("first"), SqlValue::Short(4)]
    );
    assert_eq!(
        reports[1].params,
        vec![SqlValue::from("second"), SqlValue::Short(4)]
    );
    assert!(env.log().contains(&"clear_parameters".to_string()));
}

#[tokio::test]
async fn test_every_captured_setter() {
    let (monitor, _env, capture) = setup();
    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_statement("select 1").await.unwrap();

    let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    let time = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
    stmt.set_byte(1, -1).unwrap();
    stmt.set_short(2, 2).unwrap();
    stmt.set_float(3, 1.5).unwrap();
    stmt.set_date(4, date).unwrap();
    stmt.set_time(5, time).unwrap();
    stmt.set_object(6, SqlValue::Bytes(vec![0xff])).unwrap();
    stmt.execute().await.unwrap();

    assert_eq!(
        capture.single().params,
        vec![
            SqlValue::Byte(-1),
            SqlValue::Short(2),
            SqlValue::Float(1.5),
            SqlValue::Date(date),
            SqlValue::Time(time),
            SqlValue::Bytes(vec![0xff]),
        ]
    );
}

#[tokio::test]
async fn test_no_reporters_passes_results_through() {
    let env = env_with_latency(Duration::ZERO);
    let monitor = QueryMonitor::new(MockSource { env: env.clone() });
    assert_eq!(monitor.reporter_count(), 0);

    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_statement("update t").await.unwrap();
    assert_eq!(stmt.execute_update().await.unwrap(), 3);

    let mut plain = conn.create_statement().unwrap();
    assert!(plain.execute("select boom").await.is_err());
    assert!(!monitor.interceptor().is_observed());
}

#[tokio::test]
async fn test_bindings_made_while_unobserved_are_reported_later() {
    let env = env_with_latency(Duration::ZERO);
    let monitor = QueryMonitor::new(MockSource { env });
    let conn = monitor.connection().await.unwrap();
    let mut stmt = conn.prepare_statement("select $1").await.unwrap();

    stmt.set_int(1, 5).unwrap();
    stmt.execute().await.unwrap();

    let capture = Capture::default();
    monitor.register(Arc::new(capture.clone()));
    assert!(monitor.interceptor().is_observed());
    stmt.execute().await.unwrap();

    assert_eq!(capture.single().params, vec![SqlValue::Int(5)]);
}

#[tokio::test]
async fn test_lifecycle_calls_are_forwarded() {
    let (monitor, env, capture) = setup();
    assert_eq!(monitor.login_timeout(), Some(Duration::from_secs(5)));

    let conn = monitor.connection_with("alice", "secret").await.unwrap();
    let mut stmt = conn.create_statement().unwrap();
    stmt.set_query_timeout(Some(Duration::from_secs(2)));
    assert_eq!(stmt.query_timeout(), Some(Duration::from_secs(2)));
    stmt.close().await.unwrap();

    assert!(conn.is_valid().await.unwrap());
    conn.close().await.unwrap();
    assert!(conn.is_closed());
    assert!(!conn.is_valid().await.unwrap());

    assert_eq!(
        env.log(),
        vec![
            "connection_with(alice)",
            "create_statement",
            "close_statement",
            "close_connection",
        ]
    );
    assert!(capture.take().is_empty());
}

#[tokio::test]
async fn test_interceptor_reports_custom_calls() {
    let (monitor, _env, capture) = setup();

    let value = monitor
        .interceptor()
        .invoke_and_report(
            StatementKind::Unrecognized,
            ExecMethod::Execute,
            "vacuum",
            vec![SqlValue::Int(1)],
            || async { Ok::<_, DbError>(42) },
        )
        .await
        .unwrap();

    assert_eq!(value, 42);
    let report = capture.single();
    assert_eq!(report.kind, StatementKind::Unrecognized);
    assert_eq!(report.params, vec![SqlValue::Int(1)]);
}

#[tokio::test]
async fn test_stats_reporter_through_monitor() {
    let env = env_with_latency(Duration::from_millis(10));
    let stats = Arc::new(StatsReporter::new());
    let monitor = QueryMonitor::new(MockSource { env: env.clone() })
        .with_clock(env.clock.clone())
        .with_reporter_arc(stats.clone());

    let conn = monitor.connection().await.unwrap();
    conn.create_statement()
        .unwrap()
        .execute("select 1")
        .await
        .unwrap();
    conn.prepare_statement("select 2")
        .await
        .unwrap()
        .execute()
        .await
        .unwrap();
    let _ = conn
        .prepare_call("{call boom}")
        .await
        .unwrap()
        .execute()
        .await;

    let snapshot = stats.stats();
    assert_eq!(snapshot.total_calls, 3);
    assert_eq!(snapshot.failed_calls, 1);
    assert_eq!(snapshot.plain_count, 1);
    assert_eq!(snapshot.prepared_count, 1);
    assert_eq!(snapshot.callable_count, 1);
    assert_eq!(snapshot.total_duration, Duration::from_millis(30));
    assert_eq!(snapshot.max_duration, Duration::from_millis(10));
    assert_eq!(snapshot.slowest_query.as_deref(), Some("select 1"));

    stats.reset();
    assert_eq!(stats.stats().total_calls, 0);
    assert!(stats.stats().slowest_query.is_none());
}

#[test]
fn test_classify_prefers_most_specific_kind() {
    use StatementKind::*;
    assert_eq!(StatementKind::classify(&[Prepared, Callable]), Callable);
    assert_eq!(StatementKind::classify(&[Plain, Prepared]), Prepared);
    assert_eq!(StatementKind::classify(&[Plain]), Plain);
    assert_eq!(StatementKind::classify(&[]), Unrecognized);
    assert_eq!(StatementKind::classify(&[Unrecognized]), Unrecognized);
}

#[test]
fn test_noop_registry_discards_reporters() {
    let reporter: Arc<dyn QueryReporter> = Arc::new(Capture::default());
    NoopRegistry.register(reporter.clone());
    assert_eq!(Arc::strong_count(&reporter), 1);
}

#[test]
fn test_logging_reporter_truncation() {
    let reporter = LoggingReporter::default().max_sql_length(10);
    assert_eq!(reporter.truncate_sql("SELECT * FROM users"), "SELECT * F...");
    assert_eq!(reporter.truncate_sql("SELECT 1"), "SELECT 1");
    assert_eq!(
        reporter.no_truncate().truncate_sql("SELECT * FROM users"),
        "SELECT * FROM users"
    );
}

/// Counts `querymon.sql` events per level.
#[derive(Clone, Default)]
struct EventCounter {
    levels: Arc<Mutex<Vec<tracing::Level>>>,
}

impl EventCounter {
    fn count(&self, level: tracing::Level) -> usize {
        self.levels
            .lock()
            .unwrap()
            .iter()
            .filter(|&&seen| seen == level)
            .count()
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCounter {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if event.metadata().target() == "querymon.sql" {
            self.levels.lock().unwrap().push(*event.metadata().level());
        }
    }
}

#[test]
fn test_logging_reporter_handles_every_outcome() {
    use tracing_subscriber::layer::SubscriberExt;

    let counter = EventCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    let reporter = LoggingReporter::default().slow_query_threshold(Duration::from_millis(1));
    let error = DbError::Other("boom".to_string());
    let params = [SqlValue::Int(1)];

    tracing::subscriber::with_default(subscriber, || {
        for (elapsed, error) in [
            (Duration::ZERO, None),
            (Duration::from_secs(2), None),
            (Duration::ZERO, Some(&error)),
        ] {
            reporter.report(&CallReport {
                kind: StatementKind::Callable,
                method: ExecMethod::Execute,
                sql: "{call pr_abc(?)}",
                params: &params,
                elapsed,
                error,
            });
        }
    });

    // One slow-query warning, one failure warning, a debug line per call.
    assert_eq!(counter.count(tracing::Level::WARN), 2);
    assert_eq!(counter.count(tracing::Level::DEBUG), 3);
}

#[test]
fn test_stats_reporter_counts_unrecognized_only_in_totals() {
    let stats = StatsReporter::new();
    stats.report(&CallReport {
        kind: StatementKind::Unrecognized,
        method: ExecMethod::Execute,
        sql: "vacuum",
        params: &[],
        elapsed: Duration::from_millis(3),
        error: None,
    });

    let snapshot = stats.stats();
    assert_eq!(snapshot.total_calls, 1);
    assert_eq!(
        snapshot.plain_count + snapshot.prepared_count + snapshot.callable_count,
        0
    );
    assert_eq!(snapshot.slowest_query.as_deref(), Some("vacuum"));
}

#[test]
fn test_truncate_sql_bytes_respects_char_boundaries() {
    assert_eq!(truncate_sql_bytes("héllo", 2), "h");
    assert_eq!(truncate_sql_bytes("hello", 10), "hello");
}
