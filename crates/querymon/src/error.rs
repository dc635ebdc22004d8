//! Errors returned by data sources, connections and statements.
//!
//! The monitor never produces errors of its own on the call path: whatever the
//! wrapped resource returns is reported and handed back unchanged. The
//! wrappers raise [`DbError::Unsupported`] from `unwrap_to` /
//! `is_wrapper_for`, and report (never return) [`DbError::Cancelled`] for
//! calls dropped before they completed.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_postgres::error::SqlState;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// Establishing a session failed.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error(transparent)]
    Query(#[from] tokio_postgres::Error),

    /// An integrity constraint rejected the statement.
    #[error("{kind} violation on {constraint}: {message}")]
    Constraint {
        kind: ConstraintKind,
        constraint: String,
        message: String,
    },

    /// A parameter position the statement does not have.
    #[error("parameter {index}: {reason}")]
    Parameter { index: usize, reason: String },

    /// The connection or statement was already closed.
    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[cfg(feature = "pool")]
    #[error("pool: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// The query did not finish within the statement's timeout.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// The caller dropped the call before it completed.
    #[error("call cancelled before completion")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Integrity constraints with their own SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    Check,
    NotNull,
}

impl ConstraintKind {
    fn from_sqlstate(code: &SqlState) -> Option<Self> {
        if *code == SqlState::UNIQUE_VIOLATION {
            Some(Self::Unique)
        } else if *code == SqlState::FOREIGN_KEY_VIOLATION {
            Some(Self::ForeignKey)
        } else if *code == SqlState::CHECK_VIOLATION {
            Some(Self::Check)
        } else if *code == SqlState::NOT_NULL_VIOLATION {
            Some(Self::NotNull)
        } else {
            None
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::Check => "check",
            ConstraintKind::NotNull => "not null",
        })
    }
}

impl DbError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub fn parameter(index: usize, reason: impl Into<String>) -> Self {
        Self::Parameter {
            index,
            reason: reason.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The violated constraint kind, for constraint errors.
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            Self::Constraint { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.constraint_kind() == Some(ConstraintKind::Unique)
    }

    /// Classify a driver error, pulling integrity violations out into
    /// [`DbError::Constraint`].
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        let Some(db_err) = err.as_db_error() else {
            return Self::Query(err);
        };
        match ConstraintKind::from_sqlstate(db_err.code()) {
            Some(kind) => Self::Constraint {
                kind,
                constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                message: db_err.message().to_string(),
            },
            None => Self::Query(err),
        }
    }
}
