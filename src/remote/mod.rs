// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Remote Store
//!
//! The authoritative copy of every table lives behind a PostgREST-style HTTP
//! interface. This module defines the row-level contract the repositories
//! speak ([`RemoteStore`]) and the typed error they receive back.
//!
//! ## Protocol
//!
//! | Operation | HTTP | Notes |
//! |-----------|------|-------|
//! | `fetch_all` | `GET /rest/v1/{table}?select=*` | full table |
//! | `upsert` | `POST /rest/v1/{table}?on_conflict={cols}` | returns stored rows |
//! | `delete_by_key` | `DELETE /rest/v1/{table}?{col}=eq.{value}` | idempotent |
//! | `delete_by_filters` | `DELETE` with several `eq` filters | idempotent |
//!
//! Rows cross this boundary as JSON objects. Mapping to typed records happens
//! in [`crate::storage::table`].

pub mod memory;
pub mod rest;

use serde_json::{Map, Value};

pub use memory::MemoryRemote;
pub use rest::RestClient;

/// One row as exchanged with the remote store.
pub type Row = Map<String, Value>;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// PostgREST / Postgres error codes the store reacts to.
const UNIQUE_VIOLATION_CODE: &str = "23505";
const UNDEFINED_TABLE_CODE: &str = "42P01";
const SCHEMA_CACHE_MISS_CODE: &str = "PGRST205";

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote request failed: {0}")]
    Request(String),

    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("remote response was invalid: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// HTTP status of the failed call, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Unique-constraint violation on insert.
    pub fn is_conflict(&self) -> bool {
        match self {
            RemoteError::Status { status, body } => {
                *status == 409 || body.contains(UNIQUE_VIOLATION_CODE)
            }
            _ => false,
        }
    }

    /// The table itself does not exist remotely (schema not migrated).
    pub fn is_missing_relation(&self) -> bool {
        match self {
            RemoteError::Status { status, body } => {
                *status == 404
                    || body.contains(SCHEMA_CACHE_MISS_CODE)
                    || body.contains(UNDEFINED_TABLE_CODE)
            }
            _ => false,
        }
    }
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Render as a PostgREST query pair (`col`, `eq.value`).
    pub fn to_query_pair(&self) -> (String, String) {
        let operand = match &self.value {
            Value::Null => return (self.column.clone(), "is.null".to_string()),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        (self.column.clone(), format!("eq.{operand}"))
    }

    /// Whether a row satisfies this filter.
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        values_equal(actual, &self.value)
    }
}

/// Compare JSON scalars the way an `eq` filter does: numbers by value,
/// everything else structurally.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Row-level access to the remote relational store.
///
/// All calls are blocking. Any non-2xx answer surfaces as
/// [`RemoteError::Status`]; callers decide whether to propagate or degrade.
pub trait RemoteStore: Send + Sync {
    /// Fetch every row of `table`.
    fn fetch_all(&self, table: &str) -> RemoteResult<Vec<Row>>;

    /// Insert-or-update `rows`, resolving conflicts on `conflict_columns`.
    ///
    /// Returns the stored representation of each row, in request order.
    fn upsert(&self, table: &str, conflict_columns: &[&str], rows: &[Row])
        -> RemoteResult<Vec<Row>>;

    /// Delete every row matching all `filters`.
    fn delete_by_filters(&self, table: &str, filters: &[Filter]) -> RemoteResult<()>;

    /// Delete rows where `column` equals `value`.
    fn delete_by_key(&self, table: &str, column: &str, value: &Value) -> RemoteResult<()> {
        self.delete_by_filters(table, &[Filter::eq(column, value.clone())])
    }
}
