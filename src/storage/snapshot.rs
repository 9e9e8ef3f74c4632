// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local table snapshots.
//!
//! Each table is mirrored to one JSON file:
//!
//! ```text
//! { "next_id": 4, "<table_name>": [ { ... }, { ... } ] }
//! ```
//!
//! A missing file is an empty table starting at id 1. Writes go to a
//! temporary sibling first and are renamed into place.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

const NEXT_ID_KEY: &str = "next_id";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed snapshot {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn json_error(path: &Path) -> impl FnOnce(serde_json::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    }
}

/// Read and deserialize a JSON file. `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> SnapshotResult<Option<T>> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path)(e)),
    };
    let value = serde_json::from_reader(BufReader::new(file)).map_err(json_error(path))?;
    Ok(Some(value))
}

/// Write a JSON file (atomic write via rename).
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> SnapshotResult<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let file = File::create(&temp_path).map_err(io_error(&temp_path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value).map_err(json_error(&temp_path))?;
        writer.flush().map_err(io_error(&temp_path))?;
    }

    fs::rename(&temp_path, path).map_err(io_error(path))?;
    Ok(())
}

/// Remove a file; `Ok(false)` when it was already gone.
pub fn remove_file(path: impl AsRef<Path>) -> SnapshotResult<bool> {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(path)(e)),
    }
}

/// Contents of one table snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot<R> {
    pub next_id: i64,
    pub rows: Vec<R>,
}

/// One table's snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
    section: String,
}

impl SnapshotFile {
    /// `section` is the key holding the row list inside the file.
    pub fn new(path: impl Into<PathBuf>, section: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            section: section.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the snapshot. `Ok(None)` when no file has been written yet.
    pub fn read<R: DeserializeOwned>(&self) -> SnapshotResult<Option<TableSnapshot<R>>> {
        let Some(value) = read_json::<Value>(&self.path)? else {
            return Ok(None);
        };

        let Value::Object(mut object) = value else {
            return Err(SnapshotError::Malformed {
                path: self.path.clone(),
                reason: "top level is not an object".to_string(),
            });
        };

        let next_id = object
            .get(NEXT_ID_KEY)
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let rows = match object.remove(&self.section) {
            None | Some(Value::Null) => Vec::new(),
            Some(rows) => serde_json::from_value(rows).map_err(json_error(&self.path))?,
        };

        Ok(Some(TableSnapshot { next_id, rows }))
    }

    pub fn write<R: Serialize>(&self, next_id: i64, rows: &[R]) -> SnapshotResult<()> {
        let rows = serde_json::to_value(rows).map_err(json_error(&self.path))?;
        let mut object = Map::new();
        object.insert(NEXT_ID_KEY.to_string(), Value::from(next_id));
        object.insert(self.section.clone(), rows);
        write_json(&self.path, &Value::Object(object))
    }
}
