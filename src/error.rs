// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Crate-level error type.

use crate::crypto::CipherError;
use crate::remote::RemoteError;
use crate::storage::snapshot::SnapshotError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("local snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("table `{table}` is unavailable remotely")]
    Unavailable {
        table: String,
        #[source]
        source: RemoteError,
    },

    #[error("identifiers exhausted for table `{table}`")]
    IdsExhausted { table: &'static str },

    #[error("credential cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Unique-constraint violation reported by the remote store.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Remote(e) if e.is_conflict())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }

    /// The remote relation itself is missing, whether already classified
    /// as [`StoreError::Unavailable`] or still a raw remote error.
    pub fn is_missing_relation(&self) -> bool {
        match self {
            StoreError::Unavailable { .. } => true,
            StoreError::Remote(e) => e.is_missing_relation(),
            _ => false,
        }
    }
}
