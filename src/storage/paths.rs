// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the local storage layout.

use std::env;
use std::path::{Path, PathBuf};

use crate::config::DATA_DIR_ENV;

/// Default root for local snapshots and saved configuration.
pub const DATA_ROOT: &str = "mailroom-data";

/// Storage path utilities for the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root from `MAILROOM_DATA_DIR`, falling back to [`DATA_ROOT`].
    pub fn from_env() -> Self {
        match env::var(DATA_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => Self::new(dir.trim()),
            _ => Self::default(),
        }
    }

    /// Root directory for all local data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== Table Snapshots ==========

    /// Directory containing one snapshot file per table.
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Snapshot file for a table's logical name.
    pub fn table_snapshot(&self, logical_name: &str) -> PathBuf {
        self.data_dir().join(format!("{logical_name}.json"))
    }

    // ========== Configuration ==========

    /// Directory holding saved configuration.
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// Saved remote endpoint and key.
    pub fn remote_config(&self) -> PathBuf {
        self.config_dir().join("remote.json")
    }
}
