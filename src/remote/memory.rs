// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process remote store.
//!
//! Behaves like the PostgREST endpoint closely enough to exercise every
//! repository path without a network: upsert-on-conflict merges, unique
//! constraints (compared case-insensitively, like a `citext` column), column
//! defaults filled on insert, missing tables answering `404 PGRST205`, and
//! failure injection for outages and row-level policy denials.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde_json::{json, Value};

use super::{values_equal, Filter, RemoteError, RemoteResult, RemoteStore, Row};

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<Row>,
    unique_columns: Vec<String>,
    defaults: Row,
    deny_deletes: bool,
    deny_upserts: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    offline: bool,
    injected: HashMap<String, VecDeque<RemoteError>>,
    requests: usize,
}

/// Remote store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with every mailroom table migrated.
    pub fn with_mailroom_schema() -> Self {
        let remote = Self::new();
        remote.create_table("sender", &["address"]);
        remote.create_table("app_password", &[]);
        remote.create_table("recipient", &["address"]);
        remote.create_table("recipient_group", &["name"]);
        remote.create_table("recipient_group_membership", &[]);
        remote
    }

    fn lock(&self) -> RemoteResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| RemoteError::Request("memory remote lock poisoned".to_string()))
    }

    /// Create (or reset) a table with the given unique columns.
    pub fn create_table(&self, table: &str, unique_columns: &[&str]) {
        if let Ok(mut state) = self.lock() {
            state.tables.insert(
                table.to_string(),
                MemoryTable {
                    unique_columns: unique_columns.iter().map(|c| c.to_string()).collect(),
                    ..MemoryTable::default()
                },
            );
        }
    }

    /// Drop a table, as if its migration was never applied.
    pub fn drop_table(&self, table: &str) {
        if let Ok(mut state) = self.lock() {
            state.tables.remove(table);
        }
    }

    /// Column default applied when an inserted row omits `column`.
    pub fn set_default(&self, table: &str, column: &str, value: Value) {
        if let Ok(mut state) = self.lock() {
            if let Some(t) = state.tables.get_mut(table) {
                t.defaults.insert(column.to_string(), value);
            }
        }
    }

    /// Make every call fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.lock() {
            state.offline = offline;
        }
    }

    /// Reject deletes on `table` with `403`, like a row-level policy would.
    pub fn deny_deletes(&self, table: &str, deny: bool) {
        if let Ok(mut state) = self.lock() {
            if let Some(t) = state.tables.get_mut(table) {
                t.deny_deletes = deny;
            }
        }
    }

    /// Reject upserts on `table` with `403`, leaving reads working.
    pub fn deny_upserts(&self, table: &str, deny: bool) {
        if let Ok(mut state) = self.lock() {
            if let Some(t) = state.tables.get_mut(table) {
                t.deny_upserts = deny;
            }
        }
    }

    /// Fail the next call touching `table` with `error`.
    pub fn fail_next(&self, table: &str, error: RemoteError) {
        if let Ok(mut state) = self.lock() {
            state
                .injected
                .entry(table.to_string())
                .or_default()
                .push_back(error);
        }
    }

    /// Insert a row directly, bypassing any client (a concurrent writer).
    pub fn insert_raw(&self, table: &str, row: Value) {
        if let (Ok(mut state), Value::Object(row)) = (self.lock(), row) {
            if let Some(t) = state.tables.get_mut(table) {
                t.rows.push(row);
            }
        }
    }

    /// Current rows of `table` (empty when the table does not exist).
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .ok()
            .and_then(|state| state.tables.get(table).map(|t| t.rows.clone()))
            .unwrap_or_default()
    }

    /// Number of calls served (including failed ones).
    pub fn request_count(&self) -> usize {
        self.lock().map(|state| state.requests).unwrap_or(0)
    }

    fn begin<'a>(state: &'a mut MemoryState, table: &str) -> RemoteResult<&'a mut MemoryTable> {
        state.requests += 1;
        if state.offline {
            return Err(RemoteError::Request("connection refused".to_string()));
        }
        if let Some(error) = state.injected.get_mut(table).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        state.tables.get_mut(table).ok_or_else(|| RemoteError::Status {
            status: 404,
            body: json!({
                "code": "PGRST205",
                "message": format!("Could not find the table 'public.{table}' in the schema cache"),
            })
            .to_string(),
        })
    }
}

fn unique_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.to_lowercase()),
        other => Some(other.to_string()),
    }
}

fn same_conflict_key(a: &Row, b: &Row, columns: &[&str]) -> bool {
    !columns.is_empty()
        && columns.iter().all(|c| {
            let left = a.get(*c).unwrap_or(&Value::Null);
            let right = b.get(*c).unwrap_or(&Value::Null);
            !left.is_null() && values_equal(left, right)
        })
}

fn unique_violation(table: &str, column: &str) -> RemoteError {
    RemoteError::Status {
        status: 409,
        body: json!({
            "code": "23505",
            "message": format!("duplicate key value violates unique constraint \"{table}_{column}_key\""),
        })
        .to_string(),
    }
}

fn forbidden() -> RemoteError {
    RemoteError::Status {
        status: 403,
        body: json!({"code": "42501", "message": "permission denied by row-level security"})
            .to_string(),
    }
}

impl RemoteStore for MemoryRemote {
    fn fetch_all(&self, table: &str) -> RemoteResult<Vec<Row>> {
        let mut state = self.lock()?;
        let t = Self::begin(&mut state, table)?;
        Ok(t.rows.clone())
    }

    fn upsert(
        &self,
        table: &str,
        conflict_columns: &[&str],
        rows: &[Row],
    ) -> RemoteResult<Vec<Row>> {
        let mut state = self.lock()?;
        let t = Self::begin(&mut state, table)?;
        if t.deny_upserts {
            return Err(forbidden());
        }

        // Work on a copy so a violation leaves the table untouched.
        let mut staged = t.rows.clone();
        let mut returned = Vec::with_capacity(rows.len());

        for incoming in rows {
            let position = staged
                .iter()
                .position(|existing| same_conflict_key(existing, incoming, conflict_columns));

            let stored = match position {
                Some(idx) => {
                    let mut merged = staged[idx].clone();
                    for (k, v) in incoming {
                        merged.insert(k.clone(), v.clone());
                    }
                    staged[idx] = merged.clone();
                    merged
                }
                None => {
                    let mut inserted = incoming.clone();
                    for (k, v) in &t.defaults {
                        inserted.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    staged.push(inserted.clone());
                    inserted
                }
            };
            returned.push(stored);
        }

        for column in &t.unique_columns {
            let mut seen = HashSet::new();
            for row in &staged {
                if let Some(value) = row.get(column).and_then(unique_value) {
                    if !seen.insert(value) {
                        return Err(unique_violation(table, column));
                    }
                }
            }
        }

        t.rows = staged;
        Ok(returned)
    }

    fn delete_by_filters(&self, table: &str, filters: &[Filter]) -> RemoteResult<()> {
        let mut state = self.lock()?;
        let t = Self::begin(&mut state, table)?;
        if t.deny_deletes {
            return Err(forbidden());
        }
        if filters.is_empty() {
            return Err(RemoteError::Request(format!(
                "refusing unfiltered delete on `{table}`"
            )));
        }
        t.rows.retain(|row| !filters.iter().all(|f| f.matches(row)));
        Ok(())
    }
}
