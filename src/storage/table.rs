// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Generic Table
//!
//! A [`Table`] owns the in-memory copy of one logical table and persists it
//! remote-first with the local snapshot as fallback.
//!
//! ## Modes
//!
//! | Mode | Remote failure | Local mirror |
//! |------|----------------|--------------|
//! | local-only (no remote) | n/a | always written |
//! | remote with fallback | logged, local snapshot used | written after every mutation |
//! | remote-only | propagated | never written |
//! | schema required | missing relation => [`StoreError::Unavailable`] | as above |
//!
//! ## Identifier Counter
//!
//! - after a remote load: `max(id) + 1`, or 1 for an empty table
//! - after a local load: `max(stored next_id, max(id) + 1)`
//! - after any save or upsert: `max(current, max(id) + 1)`
//!
//! The counter never decreases once a table is open.

use std::cmp;
use std::fmt;
use std::mem;
use std::sync::Arc;

use serde::{de::DeserializeOwned, ser::Error as _, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::context::StoreContext;
use super::snapshot::SnapshotFile;
use crate::error::{StoreError, StoreResult};
use crate::remote::{Filter, RemoteError, RemoteResult, RemoteStore, Row};

/// Static description of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Local name: snapshot file stem and row-list key inside it.
    pub logical: &'static str,
    /// Default remote table name.
    pub remote: &'static str,
    /// Primary-key columns, used as the upsert conflict target.
    pub key_columns: &'static [&'static str],
    /// Numeric identifier column feeding the id counter.
    pub id_column: Option<&'static str>,
}

/// A typed row of one table.
pub trait Record: Serialize + DeserializeOwned + Clone + fmt::Debug {
    const SPEC: TableSpec;

    /// Value of the numeric identifier column, if the table has one.
    fn id(&self) -> Option<i64>;

    /// Whether both records address the same primary key.
    fn same_key(&self, other: &Self) -> bool {
        matches!((self.id(), other.id()), (Some(a), Some(b)) if a == b)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableOptions {
    /// Remote failures propagate and no local mirror is kept.
    pub remote_only: bool,
    /// A missing remote relation is reported as unavailable instead of
    /// degrading to the snapshot.
    pub schema_required: bool,
}

impl TableOptions {
    pub const FALLBACK: Self = Self {
        remote_only: false,
        schema_required: false,
    };

    pub const REMOTE_ONLY: Self = Self {
        remote_only: true,
        schema_required: false,
    };

    pub const SCHEMA_REQUIRED: Self = Self {
        remote_only: false,
        schema_required: true,
    };
}

/// Mode flags resolved when the table was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMode {
    pub remote_enabled: bool,
    pub remote_only: bool,
    pub schema_required: bool,
    pub remote_table: String,
}

pub struct Table<R: Record> {
    remote: Option<Arc<dyn RemoteStore>>,
    snapshot: SnapshotFile,
    mode: TableMode,
    rows: Vec<R>,
    next_id: i64,
}

impl<R: Record> fmt::Debug for Table<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("logical", &R::SPEC.logical)
            .field("mode", &self.mode)
            .field("rows", &self.rows.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

pub(crate) fn encode<R: Serialize>(record: &R) -> StoreResult<Row> {
    match serde_json::to_value(record)? {
        Value::Object(row) => Ok(row),
        other => Err(StoreError::Encode(serde_json::Error::custom(format!(
            "record serialized to a non-object value: {other}"
        )))),
    }
}

fn decode_rows<R: Record>(table: &str, rows: Vec<Row>) -> RemoteResult<Vec<R>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row)).map_err(|e| {
                RemoteError::InvalidResponse(format!("row of `{table}` did not decode: {e}"))
            })
        })
        .collect()
}

/// `max(id) + 1`, saturating at `i64::MAX`.
fn id_ceiling<R: Record>(rows: &[R]) -> i64 {
    rows.iter()
        .filter_map(Record::id)
        .max()
        .map_or(1, |max| cmp::max(max.saturating_add(1), 1))
}

fn matches_all<R: Record>(record: &R, filters: &[Filter]) -> bool {
    encode(record)
        .map(|row| filters.iter().all(|f| f.matches(&row)))
        .unwrap_or(false)
}

impl<R: Record> Table<R> {
    /// Open the table and load its rows.
    pub fn open(ctx: &StoreContext, options: TableOptions) -> StoreResult<Self> {
        let spec = R::SPEC;
        if options.remote_only && !ctx.is_remote() {
            return Err(StoreError::Config(format!(
                "table `{}` is remote-only but no remote store is configured",
                spec.logical
            )));
        }

        let mut table = Self {
            remote: ctx.remote().cloned(),
            snapshot: SnapshotFile::new(ctx.paths().table_snapshot(spec.logical), spec.logical),
            mode: TableMode {
                remote_enabled: ctx.is_remote(),
                remote_only: options.remote_only,
                schema_required: options.schema_required,
                remote_table: ctx.remote_table(&spec),
            },
            rows: Vec::new(),
            next_id: 1,
        };
        table.load()?;
        Ok(table)
    }

    pub fn mode(&self) -> &TableMode {
        &self.mode
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    pub fn find(&self, predicate: impl Fn(&R) -> bool) -> Option<&R> {
        self.rows.iter().find(|r| predicate(r))
    }

    /// Reserve the next identifier.
    ///
    /// Fails once the counter has saturated and `i64::MAX` is taken.
    pub fn allocate_id(&mut self) -> StoreResult<i64> {
        let id = self.next_id;
        // Only a saturated counter can point at a stored row.
        if id == i64::MAX && self.rows.iter().any(|r| r.id() == Some(id)) {
            return Err(StoreError::IdsExhausted {
                table: R::SPEC.logical,
            });
        }
        self.next_id = id.saturating_add(1);
        Ok(id)
    }

    /// Replace the cached rows with the backend's current contents.
    pub fn load(&mut self) -> StoreResult<()> {
        if let Some(remote) = self.remote.clone() {
            let fetched = remote
                .fetch_all(&self.mode.remote_table)
                .and_then(|rows| decode_rows::<R>(&self.mode.remote_table, rows));
            match fetched {
                Ok(rows) => {
                    self.next_id = id_ceiling(&rows);
                    self.rows = rows;
                    debug!(
                        table = %self.mode.remote_table,
                        rows = self.rows.len(),
                        next_id = self.next_id,
                        "loaded from remote"
                    );
                    return Ok(());
                }
                Err(err) => self.degrade_or_raise("load", err)?,
            }
        }
        self.load_local()
    }

    /// Upsert every cached row and mirror the result locally.
    pub fn save(&mut self) -> StoreResult<()> {
        if let Some(remote) = self.remote.clone() {
            let rows = self.rows.iter().map(encode).collect::<StoreResult<Vec<_>>>()?;
            let stored = remote
                .upsert(&self.mode.remote_table, R::SPEC.key_columns, &rows)
                .and_then(|rows| decode_rows::<R>(&self.mode.remote_table, rows));
            match stored {
                Ok(stored) => {
                    if !stored.is_empty() {
                        self.rows = stored;
                    }
                    self.bump_next_id();
                    debug!(table = %self.mode.remote_table, rows = self.rows.len(), "saved to remote");
                    return self.mirror();
                }
                Err(err) => self.degrade_or_raise("save", err)?,
            }
        }
        self.bump_next_id();
        self.write_local()
    }

    /// Persist a single row without a full-table round trip.
    ///
    /// The stored representation (including server-filled columns) replaces
    /// any cached row with the same key, or is appended.
    pub fn upsert_one(&mut self, record: R) -> StoreResult<R> {
        if let Some(remote) = self.remote.clone() {
            let row = encode(&record)?;
            let stored = remote
                .upsert(&self.mode.remote_table, R::SPEC.key_columns, &[row])
                .and_then(|rows| decode_rows::<R>(&self.mode.remote_table, rows));
            match stored {
                Ok(rows) => {
                    let stored = rows.into_iter().next().unwrap_or(record);
                    return self.merge_and(stored, Self::mirror);
                }
                Err(err) => self.degrade_or_raise("upsert", err)?,
            }
        }
        self.merge_and(record, Self::write_local)
    }

    /// Merge `record` and run a full [`Table::save`], undoing the merge if
    /// the save fails.
    pub fn save_including(&mut self, record: R) -> StoreResult<R> {
        let previous = self.merge(record.clone());
        if let Err(err) = self.save() {
            self.rollback(&record, previous);
            return Err(err);
        }
        Ok(self
            .rows
            .iter()
            .find(|r| r.same_key(&record))
            .cloned()
            .unwrap_or(record))
    }

    /// [`Table::upsert_one`], falling back to [`Table::save_including`].
    pub fn persist_one(&mut self, record: R) -> StoreResult<R> {
        match self.upsert_one(record.clone()) {
            Ok(stored) => Ok(stored),
            Err(err) if err.is_unavailable() => Err(err),
            Err(err) => {
                warn!(
                    table = %self.mode.remote_table,
                    error = %err,
                    "single-row upsert failed, falling back to full save"
                );
                self.save_including(record)
            }
        }
    }

    /// Delete rows matching every filter. Returns how many cached rows were
    /// removed.
    ///
    /// The remote delete is issued even when nothing matches locally.
    pub fn delete_where(&mut self, filters: &[Filter]) -> StoreResult<usize> {
        if filters.is_empty() {
            return Err(StoreError::Config(format!(
                "refusing unfiltered delete on `{}`",
                R::SPEC.logical
            )));
        }

        let mut remote_deleted = false;
        if let Some(remote) = self.remote.clone() {
            match remote.delete_by_filters(&self.mode.remote_table, filters) {
                Ok(()) => remote_deleted = true,
                Err(err) => self.degrade_or_raise("delete", err)?,
            }
        }

        let before = self.rows.len();
        self.rows.retain(|r| !matches_all(r, filters));
        let removed = before - self.rows.len();

        if removed > 0 {
            if remote_deleted {
                self.mirror()?;
            } else {
                self.write_local()?;
            }
        }
        Ok(removed)
    }

    /// Delete the row addressed by `record`'s key columns.
    pub fn delete_record(&mut self, record: &R) -> StoreResult<usize> {
        let filters = Self::key_filters(record)?;
        self.delete_where(&filters)
    }

    /// Equality filters on the declared key columns of `record`.
    pub fn key_filters(record: &R) -> StoreResult<Vec<Filter>> {
        let row = encode(record)?;
        Ok(R::SPEC
            .key_columns
            .iter()
            .map(|column| Filter::eq(*column, row.get(*column).cloned().unwrap_or(Value::Null)))
            .collect())
    }

    /// Insert or replace by key. Returns the replaced row.
    pub(crate) fn merge(&mut self, record: R) -> Option<R> {
        match self.rows.iter().position(|r| r.same_key(&record)) {
            Some(idx) => Some(mem::replace(&mut self.rows[idx], record)),
            None => {
                self.rows.push(record);
                None
            }
        }
    }

    /// Undo a [`Table::merge`] of `record`.
    pub(crate) fn rollback(&mut self, record: &R, previous: Option<R>) {
        let position = self.rows.iter().position(|r| r.same_key(record));
        match (position, previous) {
            (Some(idx), Some(previous)) => self.rows[idx] = previous,
            (Some(idx), None) => {
                self.rows.remove(idx);
            }
            (None, Some(previous)) => self.rows.push(previous),
            (None, None) => {}
        }
    }

    fn merge_and(&mut self, record: R, persist: fn(&Self) -> StoreResult<()>) -> StoreResult<R> {
        let previous = self.merge(record.clone());
        self.bump_next_id();
        if let Err(err) = persist(self) {
            self.rollback(&record, previous);
            return Err(err);
        }
        Ok(record)
    }

    fn bump_next_id(&mut self) {
        self.next_id = cmp::max(self.next_id, id_ceiling(&self.rows));
    }

    fn degrade_or_raise(&self, op: &'static str, err: RemoteError) -> StoreResult<()> {
        if self.mode.schema_required && err.is_missing_relation() {
            return Err(StoreError::Unavailable {
                table: self.mode.remote_table.clone(),
                source: err,
            });
        }
        if self.mode.remote_only {
            return Err(err.into());
        }
        warn!(
            table = %self.mode.remote_table,
            op,
            error = %err,
            "remote store unavailable, using local snapshot"
        );
        Ok(())
    }

    fn load_local(&mut self) -> StoreResult<()> {
        match self.snapshot.read::<R>()? {
            Some(snapshot) => {
                self.next_id = cmp::max(snapshot.next_id, id_ceiling(&snapshot.rows));
                self.rows = snapshot.rows;
            }
            None => {
                self.rows.clear();
                self.next_id = 1;
            }
        }
        debug!(
            table = R::SPEC.logical,
            rows = self.rows.len(),
            next_id = self.next_id,
            "loaded from local snapshot"
        );
        Ok(())
    }

    fn mirror(&self) -> StoreResult<()> {
        if self.mode.remote_only {
            return Ok(());
        }
        self.write_local()
    }

    fn write_local(&self) -> StoreResult<()> {
        self.snapshot.write(self.next_id, &self.rows)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use crate::storage::StoragePaths;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        note_id: i64,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    }

    impl Record for Note {
        const SPEC: TableSpec = TableSpec {
            logical: "notes",
            remote: "note",
            key_columns: &["note_id"],
            id_column: Some("note_id"),
        };

        fn id(&self) -> Option<i64> {
            Some(self.note_id)
        }
    }

    fn note(id: i64, title: &str) -> Note {
        Note {
            note_id: id,
            title: title.to_string(),
            color: None,
        }
    }

    fn remote_ctx() -> (TempDir, Arc<MemoryRemote>, StoreContext) {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        remote.create_table("note", &["title"]);
        let ctx = StoreContext::with_remote(StoragePaths::new(dir.path()), remote.clone());
        (dir, remote, ctx)
    }

    #[test]
    fn local_only_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StoreContext::local(StoragePaths::new(dir.path()));

        let mut table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        assert_eq!(table.next_id(), 1);
        let id = table.allocate_id().unwrap();
        table.persist_one(note(id, "first")).unwrap();
        let id = table.allocate_id().unwrap();
        table.persist_one(note(id, "second")).unwrap();

        let reopened = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        assert_eq!(reopened.rows(), table.rows());
        assert_eq!(reopened.next_id(), 3);
    }

    #[test]
    fn remote_load_derives_next_id_from_rows() {
        let (_dir, remote, ctx) = remote_ctx();
        remote.insert_raw("note", json!({"note_id": 3, "title": "a"}));
        remote.insert_raw("note", json!({"note_id": 9, "title": "b"}));

        let table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        assert_eq!(table.rows().len(), 2);
        assert_eq!(table.next_id(), 10);
    }

    #[test]
    fn local_load_keeps_larger_stored_counter() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(dir.path());
        SnapshotFile::new(paths.table_snapshot("notes"), "notes")
            .write(2, &[note(5, "x")])
            .unwrap();
        let table = Table::<Note>::open(&StoreContext::local(paths.clone()), TableOptions::FALLBACK)
            .unwrap();
        assert_eq!(table.next_id(), 6);

        SnapshotFile::new(paths.table_snapshot("notes"), "notes")
            .write(40, &[note(5, "x")])
            .unwrap();
        let table =
            Table::<Note>::open(&StoreContext::local(paths), TableOptions::FALLBACK).unwrap();
        assert_eq!(table.next_id(), 40);
    }

    #[test]
    fn unreachable_remote_falls_back_to_snapshot() {
        let (_dir, remote, ctx) = remote_ctx();
        let mut table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        let id = table.allocate_id().unwrap();
        table.persist_one(note(id, "kept")).unwrap();

        remote.set_offline(true);
        let reopened = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        assert_eq!(reopened.rows(), &[note(1, "kept")]);
        assert_eq!(reopened.next_id(), 2);
    }

    #[test]
    fn remote_only_requires_and_propagates_remote() {
        let dir = tempfile::tempdir().unwrap();
        let local = StoreContext::local(StoragePaths::new(dir.path()));
        let err = Table::<Note>::open(&local, TableOptions::REMOTE_ONLY).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));

        let (_dir, remote, ctx) = remote_ctx();
        remote.set_offline(true);
        let err = Table::<Note>::open(&ctx, TableOptions::REMOTE_ONLY).unwrap_err();
        assert!(matches!(err, StoreError::Remote(RemoteError::Request(_))));
    }

    #[test]
    fn remote_only_never_writes_a_mirror() {
        let (dir, _remote, ctx) = remote_ctx();
        let mut table = Table::<Note>::open(&ctx, TableOptions::REMOTE_ONLY).unwrap();
        let id = table.allocate_id().unwrap();
        table.persist_one(note(id, "remote")).unwrap();
        assert!(!StoragePaths::new(dir.path()).table_snapshot("notes").exists());
    }

    #[test]
    fn upsert_one_adopts_server_defaults() {
        let (_dir, remote, ctx) = remote_ctx();
        remote.set_default("note", "color", json!("blue"));

        let mut table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        let id = table.allocate_id().unwrap();
        let stored = table.upsert_one(note(id, "painted")).unwrap();

        assert_eq!(stored.color.as_deref(), Some("blue"));
        assert_eq!(table.rows()[0].color.as_deref(), Some("blue"));
    }

    #[test]
    fn upsert_one_replaces_in_place() {
        let (_dir, remote, ctx) = remote_ctx();
        let mut table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        table.upsert_one(note(1, "a")).unwrap();
        table.upsert_one(note(2, "b")).unwrap();
        table.upsert_one(note(1, "renamed")).unwrap();

        assert_eq!(table.rows(), &[note(1, "renamed"), note(2, "b")]);
        assert_eq!(remote.rows("note").len(), 2);
    }

    #[test]
    fn schema_required_reports_missing_relation() {
        let (_dir, remote, ctx) = remote_ctx();
        remote.drop_table("note");

        let err = Table::<Note>::open(&ctx, TableOptions::SCHEMA_REQUIRED).unwrap_err();
        assert!(err.is_unavailable());

        // Without the flag the same outage degrades to the (empty) snapshot.
        let table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        assert!(table.rows().is_empty());
    }

    #[test]
    fn save_while_offline_keeps_local_state_and_counter() {
        let (_dir, remote, ctx) = remote_ctx();
        let mut table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        table.persist_one(note(4, "a")).unwrap();
        assert_eq!(table.next_id(), 5);

        remote.set_offline(true);
        table.persist_one(note(2, "b")).unwrap();
        assert_eq!(table.next_id(), 5);

        let reopened = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        assert_eq!(reopened.rows().len(), 2);
        assert_eq!(reopened.next_id(), 5);
    }

    #[test]
    fn remote_only_failure_rolls_back() {
        let (_dir, remote, ctx) = remote_ctx();
        let mut table = Table::<Note>::open(&ctx, TableOptions::REMOTE_ONLY).unwrap();
        table.persist_one(note(1, "a")).unwrap();

        remote.set_offline(true);
        assert!(table.persist_one(note(2, "b")).is_err());
        assert_eq!(table.rows(), &[note(1, "a")]);
    }

    #[test]
    fn delete_removes_remote_and_local_rows() {
        let (dir, remote, ctx) = remote_ctx();
        let mut table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        table.persist_one(note(1, "a")).unwrap();
        table.persist_one(note(2, "b")).unwrap();

        assert_eq!(table.delete_record(&note(1, "a")).unwrap(), 1);
        assert_eq!(table.rows(), &[note(2, "b")]);
        assert_eq!(remote.rows("note").len(), 1);

        let snapshot = SnapshotFile::new(
            StoragePaths::new(dir.path()).table_snapshot("notes"),
            "notes",
        )
        .read::<Note>()
        .unwrap()
        .unwrap();
        assert_eq!(snapshot.rows, vec![note(2, "b")]);

        // Nothing cached, remote delete still issued.
        let requests = remote.request_count();
        assert_eq!(table.delete_where(&[Filter::eq("note_id", 77)]).unwrap(), 0);
        assert_eq!(remote.request_count(), requests + 1);
    }

    #[test]
    fn denied_remote_delete_in_remote_only_mode_keeps_cache() {
        let (_dir, remote, ctx) = remote_ctx();
        let mut table = Table::<Note>::open(&ctx, TableOptions::REMOTE_ONLY).unwrap();
        table.persist_one(note(1, "a")).unwrap();
        remote.deny_deletes("note", true);

        assert!(table.delete_record(&note(1, "a")).is_err());
        assert_eq!(table.rows().len(), 1);
    }

    #[test]
    fn maximal_remote_id_saturates_the_counter() {
        let (_dir, remote, ctx) = remote_ctx();
        remote.insert_raw("note", json!({"note_id": i64::MAX, "title": "last"}));

        let mut table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        assert_eq!(table.next_id(), i64::MAX);
        assert!(matches!(
            table.allocate_id(),
            Err(StoreError::IdsExhausted { table: "notes" })
        ));

        // Lower ids can still be written explicitly.
        table.persist_one(note(1, "first")).unwrap();
        assert_eq!(table.next_id(), i64::MAX);
    }

    #[test]
    fn counter_just_below_the_limit_hands_out_the_last_id() {
        let (_dir, remote, ctx) = remote_ctx();
        remote.insert_raw("note", json!({"note_id": i64::MAX - 1, "title": "a"}));

        let mut table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        let id = table.allocate_id().unwrap();
        assert_eq!(id, i64::MAX);
        table.persist_one(note(id, "b")).unwrap();
        assert!(table.allocate_id().is_err());
    }

    #[test]
    fn unfiltered_delete_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StoreContext::local(StoragePaths::new(dir.path()));
        let mut table = Table::<Note>::open(&ctx, TableOptions::FALLBACK).unwrap();
        table.persist_one(note(1, "a")).unwrap();

        assert!(table.delete_where(&[]).is_err());
        assert_eq!(table.rows().len(), 1);
    }
}
