// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Recipient repository.
//!
//! Recipients are remote-only: the canonical list lives in the remote store
//! and the local cache is never used as a substitute for it.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use super::same_unique_key;
use crate::error::{StoreError, StoreResult};
use crate::storage::context::StoreContext;
use crate::storage::table::{Record, Table, TableOptions, TableSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub recipient_id: i64,
    /// Unique, compared case-insensitively.
    pub address: String,
    /// Legacy single-group back-reference. Stored `0` reads as unset.
    #[serde(default, deserialize_with = "legacy_group_id")]
    pub group_id: Option<i64>,
}

fn legacy_group_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.filter(|id| *id > 0))
}

impl Record for Recipient {
    const SPEC: TableSpec = TableSpec {
        logical: "recipients",
        remote: "recipient",
        key_columns: &["recipient_id"],
        id_column: Some("recipient_id"),
    };

    fn id(&self) -> Option<i64> {
        Some(self.recipient_id)
    }
}

/// Repository for recipient operations.
#[derive(Debug)]
pub struct RecipientRepository {
    table: Table<Recipient>,
}

impl RecipientRepository {
    /// Create a new RecipientRepository. Fails without a remote store.
    pub fn open(ctx: &StoreContext) -> StoreResult<Self> {
        Ok(Self {
            table: Table::open(ctx, TableOptions::REMOTE_ONLY)?,
        })
    }

    pub fn table(&self) -> &Table<Recipient> {
        &self.table
    }

    /// Re-read the canonical list from the remote store.
    pub fn reload(&mut self) -> StoreResult<()> {
        self.table.load()
    }

    pub fn list_all(&self) -> Vec<Recipient> {
        self.table.rows().to_vec()
    }

    pub fn find_by_id(&self, recipient_id: i64) -> Option<Recipient> {
        self.table
            .find(|r| r.recipient_id == recipient_id)
            .cloned()
    }

    pub fn find_by_address(&self, address: &str) -> Option<Recipient> {
        self.table
            .find(|r| same_unique_key(&r.address, address))
            .cloned()
    }

    /// Recipients whose legacy group field points at `group_id`.
    pub fn legacy_members(&self, group_id: i64) -> Vec<Recipient> {
        self.table
            .rows()
            .iter()
            .filter(|r| r.group_id == Some(group_id))
            .cloned()
            .collect()
    }

    /// Add a recipient, or return the existing one with the same address.
    ///
    /// A unique violation from the remote store means another writer stored
    /// the address first: the table is reloaded and that row returned.
    pub fn add(&mut self, address: &str, group_id: Option<i64>) -> StoreResult<Recipient> {
        if let Some(existing) = self.find_by_address(address) {
            debug!(recipient_id = existing.recipient_id, "recipient already exists");
            return Ok(existing);
        }

        let recipient = Recipient {
            recipient_id: self.table.allocate_id()?,
            address: address.trim().to_string(),
            group_id,
        };

        let stored = match self.table.upsert_one(recipient.clone()) {
            Ok(stored) => stored,
            Err(err) if err.is_conflict() => {
                warn!(address = %recipient.address, "conflict on add, reloading recipients");
                self.table.load()?;
                let existing = self.find_by_address(address).ok_or(err)?;
                info!(
                    recipient_id = existing.recipient_id,
                    "using recipient stored by another writer"
                );
                return Ok(existing);
            }
            Err(err) => {
                warn!(error = %err, "single-row upsert failed, falling back to full save");
                self.table.save_including(recipient)?
            }
        };

        info!(recipient_id = stored.recipient_id, address = %stored.address, "added recipient");
        Ok(stored)
    }

    /// Update the given fields of a recipient. `None` leaves a field as is.
    pub fn update(
        &mut self,
        recipient_id: i64,
        address: Option<&str>,
        group_id: Option<i64>,
    ) -> StoreResult<Recipient> {
        let mut recipient = self
            .find_by_id(recipient_id)
            .ok_or_else(|| StoreError::not_found("recipient", recipient_id))?;
        if let Some(address) = address {
            recipient.address = address.trim().to_string();
        }
        if group_id.is_some() {
            recipient.group_id = group_id;
        }

        let stored = self.table.persist_one(recipient)?;
        debug!(recipient_id, "updated recipient");
        Ok(stored)
    }

    /// Set or clear the legacy group back-reference.
    pub fn set_group(&mut self, recipient_id: i64, group_id: Option<i64>) -> StoreResult<Recipient> {
        let mut recipient = self
            .find_by_id(recipient_id)
            .ok_or_else(|| StoreError::not_found("recipient", recipient_id))?;
        recipient.group_id = group_id;
        let stored = self.table.persist_one(recipient)?;
        debug!(recipient_id, ?group_id, "set legacy group");
        Ok(stored)
    }

    /// Delete a recipient.
    pub fn delete(&mut self, recipient_id: i64) -> StoreResult<()> {
        let recipient = self
            .find_by_id(recipient_id)
            .ok_or_else(|| StoreError::not_found("recipient", recipient_id))?;
        self.table.delete_record(&recipient)?;
        info!(recipient_id, "deleted recipient");
        Ok(())
    }
}
