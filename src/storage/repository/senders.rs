// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sender repository.
//!
//! A sender is a mailbox mail goes out from. Its application password lives
//! in the credential table and is linked through `app_password_id`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::same_unique_key;
use crate::error::{StoreError, StoreResult};
use crate::storage::context::StoreContext;
use crate::storage::table::{Record, Table, TableOptions, TableSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub sender_id: i64,
    /// Unique, compared case-insensitively.
    pub address: String,
    /// Weak reference to the sender's credential, unset until one is attached.
    #[serde(default)]
    pub app_password_id: Option<i64>,
}

impl Record for Sender {
    const SPEC: TableSpec = TableSpec {
        logical: "senders",
        remote: "sender",
        key_columns: &["sender_id"],
        id_column: Some("sender_id"),
    };

    fn id(&self) -> Option<i64> {
        Some(self.sender_id)
    }
}

/// Repository for sender operations.
#[derive(Debug)]
pub struct SenderRepository {
    table: Table<Sender>,
}

impl SenderRepository {
    /// Create a new SenderRepository, loading the table.
    pub fn open(ctx: &StoreContext) -> StoreResult<Self> {
        Ok(Self {
            table: Table::open(ctx, TableOptions::FALLBACK)?,
        })
    }

    pub fn table(&self) -> &Table<Sender> {
        &self.table
    }

    pub fn list_all(&self) -> Vec<Sender> {
        self.table.rows().to_vec()
    }

    pub fn find_by_id(&self, sender_id: i64) -> Option<Sender> {
        self.table.find(|s| s.sender_id == sender_id).cloned()
    }

    pub fn find_by_address(&self, address: &str) -> Option<Sender> {
        self.table
            .find(|s| same_unique_key(&s.address, address))
            .cloned()
    }

    /// Add a sender, or return the existing one with the same address.
    pub fn add(&mut self, address: &str) -> StoreResult<Sender> {
        if let Some(existing) = self.find_by_address(address) {
            debug!(sender_id = existing.sender_id, "sender already exists");
            return Ok(existing);
        }

        let sender = Sender {
            sender_id: self.table.allocate_id()?,
            address: address.trim().to_string(),
            app_password_id: None,
        };
        let stored = self.table.persist_one(sender)?;
        info!(sender_id = stored.sender_id, address = %stored.address, "added sender");
        Ok(stored)
    }

    /// Replace an existing sender.
    pub fn edit(&mut self, sender: Sender) -> StoreResult<Sender> {
        if self.find_by_id(sender.sender_id).is_none() {
            return Err(StoreError::not_found("sender", sender.sender_id));
        }
        let stored = self.table.persist_one(sender)?;
        info!(sender_id = stored.sender_id, "edited sender");
        Ok(stored)
    }

    /// Link a credential to a sender.
    pub fn attach_credential(&mut self, sender_id: i64, credential_id: i64) -> StoreResult<Sender> {
        let mut sender = self
            .find_by_id(sender_id)
            .ok_or_else(|| StoreError::not_found("sender", sender_id))?;
        sender.app_password_id = Some(credential_id);
        self.edit(sender)
    }

    /// Delete a sender.
    pub fn delete(&mut self, sender_id: i64) -> StoreResult<()> {
        let sender = self
            .find_by_id(sender_id)
            .ok_or_else(|| StoreError::not_found("sender", sender_id))?;
        self.table.delete_record(&sender)?;
        info!(sender_id, "deleted sender");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use crate::storage::StoragePaths;
    use std::sync::Arc;

    fn local_repo(dir: &tempfile::TempDir) -> SenderRepository {
        SenderRepository::open(&StoreContext::local(StoragePaths::new(dir.path()))).unwrap()
    }

    #[test]
    fn add_is_idempotent_by_address() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = local_repo(&dir);

        let first = repo.add("news@example.com").unwrap();
        let second = repo.add("NEWS@example.com").unwrap();

        assert_eq!(first.sender_id, second.sender_id);
        assert_eq!(repo.list_all().len(), 1);
    }

    #[test]
    fn attach_credential_persists_link() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = local_repo(&dir);
        let sender = repo.add("news@example.com").unwrap();

        repo.attach_credential(sender.sender_id, 9).unwrap();

        let reopened = local_repo(&dir);
        assert_eq!(
            reopened.find_by_id(sender.sender_id).unwrap().app_password_id,
            Some(9)
        );
    }

    #[test]
    fn edit_and_delete_missing_sender_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = local_repo(&dir);
        let ghost = Sender {
            sender_id: 42,
            address: "ghost@example.com".into(),
            app_password_id: None,
        };

        assert!(repo.edit(ghost).unwrap_err().is_not_found());
        assert!(repo.delete(42).unwrap_err().is_not_found());
        assert!(repo.attach_credential(42, 1).unwrap_err().is_not_found());
    }

    #[test]
    fn maximal_stored_id_opens_and_refuses_new_ids() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::with_mailroom_schema());
        remote.insert_raw(
            "sender",
            serde_json::json!({"sender_id": i64::MAX, "address": "last@example.com"}),
        );
        let ctx = StoreContext::with_remote(StoragePaths::new(dir.path()), remote.clone());

        let mut repo = SenderRepository::open(&ctx).unwrap();
        assert_eq!(repo.list_all().len(), 1);

        let err = repo.add("next@example.com").unwrap_err();
        assert!(matches!(err, StoreError::IdsExhausted { .. }));
        assert_eq!(remote.rows("sender").len(), 1);
        assert_eq!(repo.find_by_address("last@example.com").unwrap().sender_id, i64::MAX);
    }

    #[test]
    fn remote_save_round_trips_through_fresh_instance() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::with_mailroom_schema());
        let ctx = StoreContext::with_remote(StoragePaths::new(dir.path()), remote.clone());

        let mut repo = SenderRepository::open(&ctx).unwrap();
        repo.add("a@example.com").unwrap();
        repo.add("b@example.com").unwrap();
        repo.delete(1).unwrap();

        let fresh = SenderRepository::open(&ctx).unwrap();
        assert_eq!(fresh.list_all(), repo.list_all());
        assert_eq!(remote.rows("sender").len(), 1);
        assert_eq!(fresh.table().next_id(), 3);
    }
}
