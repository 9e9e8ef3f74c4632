// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Recipient/group membership repository.
//!
//! Rows are `(recipient_id, group_id)` pairs with no surrogate key. The remote
//! relation may not exist on older deployments; in that case every operation
//! reports [`Unavailable`](crate::error::StoreError::Unavailable) and callers
//! fall back to the legacy fields on recipients and groups.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StoreResult;
use crate::remote::Filter;
use crate::storage::context::StoreContext;
use crate::storage::table::{Record, Table, TableOptions, TableSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Membership {
    pub recipient_id: i64,
    pub group_id: i64,
}

impl Record for Membership {
    const SPEC: TableSpec = TableSpec {
        logical: "recipient_group_membership",
        remote: "recipient_group_membership",
        key_columns: &["recipient_id", "group_id"],
        id_column: None,
    };

    fn id(&self) -> Option<i64> {
        None
    }

    fn same_key(&self, other: &Self) -> bool {
        self == other
    }
}

/// Repository for membership operations.
#[derive(Debug)]
pub struct MembershipRepository {
    table: Table<Membership>,
}

impl MembershipRepository {
    /// Create a new MembershipRepository.
    ///
    /// Fails with [`Unavailable`](crate::error::StoreError::Unavailable) when
    /// the remote relation is missing.
    pub fn open(ctx: &StoreContext) -> StoreResult<Self> {
        Ok(Self {
            table: Table::open(ctx, TableOptions::SCHEMA_REQUIRED)?,
        })
    }

    pub fn table(&self) -> &Table<Membership> {
        &self.table
    }

    pub fn list_all(&self) -> Vec<Membership> {
        self.table.rows().to_vec()
    }

    pub fn list_group_members(&self, group_id: i64) -> Vec<i64> {
        self.table
            .rows()
            .iter()
            .filter(|m| m.group_id == group_id)
            .map(|m| m.recipient_id)
            .collect()
    }

    pub fn list_recipient_groups(&self, recipient_id: i64) -> Vec<i64> {
        self.table
            .rows()
            .iter()
            .filter(|m| m.recipient_id == recipient_id)
            .map(|m| m.group_id)
            .collect()
    }

    /// Link a recipient to a group. `false` when the pair already exists.
    pub fn add_membership(&mut self, recipient_id: i64, group_id: i64) -> StoreResult<bool> {
        let membership = Membership {
            recipient_id,
            group_id,
        };
        if self.table.rows().contains(&membership) {
            return Ok(false);
        }

        self.table.persist_one(membership)?;
        info!(recipient_id, group_id, "added membership");
        Ok(true)
    }

    /// Unlink a recipient from a group. `false` when no cached row matched;
    /// the remote delete is attempted either way.
    pub fn remove_membership(&mut self, recipient_id: i64, group_id: i64) -> StoreResult<bool> {
        let removed = self.table.delete_where(&[
            Filter::eq("recipient_id", recipient_id),
            Filter::eq("group_id", group_id),
        ])?;
        if removed > 0 {
            info!(recipient_id, group_id, "removed membership");
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::remote::MemoryRemote;
    use crate::storage::StoragePaths;
    use std::sync::Arc;

    #[test]
    fn duplicate_pair_is_not_added_twice() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::with_mailroom_schema());
        let ctx = StoreContext::with_remote(StoragePaths::new(dir.path()), remote.clone());
        let mut repo = MembershipRepository::open(&ctx).unwrap();

        assert!(repo.add_membership(1, 2).unwrap());
        assert!(!repo.add_membership(1, 2).unwrap());
        assert_eq!(repo.list_all().len(), 1);
        assert_eq!(remote.rows("recipient_group_membership").len(), 1);
    }

    #[test]
    fn queries_by_either_side() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo =
            MembershipRepository::open(&StoreContext::local(StoragePaths::new(dir.path()))).unwrap();
        repo.add_membership(1, 10).unwrap();
        repo.add_membership(2, 10).unwrap();
        repo.add_membership(2, 20).unwrap();

        assert_eq!(repo.list_group_members(10), vec![1, 2]);
        assert_eq!(repo.list_recipient_groups(2), vec![10, 20]);

        assert!(repo.remove_membership(2, 10).unwrap());
        assert!(!repo.remove_membership(2, 10).unwrap());
        assert_eq!(repo.list_group_members(10), vec![1]);
    }

    #[test]
    fn missing_relation_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::with_mailroom_schema());
        remote.drop_table("recipient_group_membership");
        let ctx = StoreContext::with_remote(StoragePaths::new(dir.path()), remote);

        let err = MembershipRepository::open(&ctx).unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn relation_dropped_after_open_fails_add_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::with_mailroom_schema());
        let ctx = StoreContext::with_remote(StoragePaths::new(dir.path()), remote.clone());
        let mut repo = MembershipRepository::open(&ctx).unwrap();

        remote.drop_table("recipient_group_membership");
        let err = repo.add_membership(1, 1).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert!(repo.list_all().is_empty());
    }
}
