//! Best-effort operation names for SQL text.
//!
//! Reporters use [`QueryNameExtractor`] to group calls: native DML
//! (`SELECT`/`INSERT`/`UPDATE`/`DELETE` through a non-callable statement) is
//! named `"native"`, stored-procedure invocations are named after the
//! procedure.

use crate::monitor::StatementKind;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};

/// Name returned for native DML.
pub const NATIVE: &str = "native";
/// Name returned when the SQL does not match the pattern at all.
pub const UNKNOWN: &str = "unknown";
/// Name returned when the pattern matched but captured nothing.
pub const UNMATCHED: &str = "unmatched";

/// Default cap on the number of distinct unresolvable SQL strings remembered.
pub const DEFAULT_MAX_LOGGED_SQL: usize = 1000;

/// Captured names that hint at a gap in the pattern. They are returned
/// unchanged but logged.
const SUSPICIOUS_NAMES: [&str; 3] = ["call", NATIVE, UNKNOWN];

const NATIVE_PREFIXES: [&str; 4] = ["select ", "insert ", "update ", "delete "];

/// Matches every usual way of invoking a stored procedure and captures its name:
///
/// - `proc_name`, `proc_name p1, p2`
/// - `call proc_name`, `exec proc_name :ref`
/// - `{call proc_name}`, `{call proc_name(?, ?)}`
/// - `{? = call proc_name(?)}`
const DEFAULT_PATTERN: &str = r"(?s)^\s*(?:\{\s*)?(?:\?\s*=\s*)?(?:(?i:call|exec)\s+)?([A-Za-z0-9_]+).*$";

fn default_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(DEFAULT_PATTERN).expect("invalid built-in name pattern"))
}

/// Extracts a short, low-cardinality name from SQL text.
///
/// SQL strings that cannot be resolved to a procedure name are logged once
/// each, up to a configurable number of distinct strings; after that the
/// extractor stops logging. Create one extractor per process and share it.
#[derive(Debug)]
pub struct QueryNameExtractor {
    pattern: Regex,
    max_logged_sql: usize,
    logged_sql: Mutex<HashSet<String>>,
}

impl Default for QueryNameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryNameExtractor {
    /// Create an extractor with the built-in pattern.
    pub fn new() -> Self {
        Self::with_pattern(default_pattern().clone())
    }

    /// Create an extractor with a custom pattern.
    ///
    /// The pattern must match the whole SQL string and put the name in
    /// capture group 1.
    pub fn with_pattern(pattern: Regex) -> Self {
        Self {
            pattern,
            max_logged_sql: DEFAULT_MAX_LOGGED_SQL,
            logged_sql: Mutex::new(HashSet::new()),
        }
    }

    /// Cap the number of distinct unresolvable SQL strings remembered for
    /// log-once deduplication.
    pub fn with_max_logged_sql(mut self, max: usize) -> Self {
        self.max_logged_sql = max;
        self
    }

    /// The pattern used to find procedure names.
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Number of distinct SQL strings logged so far.
    pub fn logged_count(&self) -> usize {
        self.logged_sql
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Name the operation `sql` performs.
    ///
    /// Returns `"native"` for DML through non-callable statements, the
    /// procedure name when one can be found, `"unmatched"` when the pattern
    /// matched without capturing anything, and `"unknown"` otherwise. Never
    /// fails.
    pub fn extract_query_name<'a>(&self, kind: StatementKind, sql: &'a str) -> &'a str {
        // Procedures can also be invoked through plain and prepared statements,
        // so only DML keywords short-circuit here.
        if kind != StatementKind::Callable && is_native_query(sql) {
            return NATIVE;
        }

        let Some(captures) = self.pattern.captures(sql) else {
            self.log_unresolved(sql);
            return UNKNOWN;
        };
        let whole = captures.get(0).map(|m| m.range());
        if whole != Some(0..sql.len()) {
            self.log_unresolved(sql);
            return UNKNOWN;
        }

        match captures.get(1).map(|m| m.as_str()) {
            None | Some("") => {
                self.log_unresolved(sql);
                UNMATCHED
            }
            Some(name) => {
                if SUSPICIOUS_NAMES
                    .iter()
                    .any(|reserved| name.eq_ignore_ascii_case(reserved))
                {
                    self.log_unresolved(sql);
                }
                name
            }
        }
    }

    fn log_unresolved(&self, sql: &str) {
        if self.remember(sql) {
            tracing::warn!(
                target: "querymon",
                sql,
                pattern = self.pattern.as_str(),
                "cannot extract stored procedure name from sql"
            );
        }
    }

    /// Returns `true` the first time `sql` is seen, while below the cap.
    fn remember(&self, sql: &str) -> bool {
        let mut logged = self
            .logged_sql
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if logged.len() >= self.max_logged_sql || logged.contains(sql) {
            return false;
        }
        logged.insert(sql.to_string());
        true
    }
}

fn is_native_query(sql: &str) -> bool {
    let sql = sql.trim();
    NATIVE_PREFIXES.iter().any(|prefix| {
        sql.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}
