// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Recipient group repository.
//!
//! Besides the group itself this keeps the legacy member list, which mirrors
//! the membership table for stores that do not have it yet.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use super::same_unique_key;
use crate::error::{StoreError, StoreResult};
use crate::storage::context::StoreContext;
use crate::storage::table::{Record, Table, TableOptions, TableSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: i64,
    /// Unique, compared case-insensitively.
    pub name: String,
    /// Legacy member list.
    #[serde(default, deserialize_with = "member_list")]
    pub recipients: Vec<i64>,
}

fn member_list<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<i64>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Record for Group {
    const SPEC: TableSpec = TableSpec {
        logical: "groups",
        remote: "recipient_group",
        key_columns: &["group_id"],
        id_column: Some("group_id"),
    };

    fn id(&self) -> Option<i64> {
        Some(self.group_id)
    }
}

/// Repository for group operations.
#[derive(Debug)]
pub struct GroupRepository {
    table: Table<Group>,
}

impl GroupRepository {
    /// Create a new GroupRepository, loading the table.
    pub fn open(ctx: &StoreContext) -> StoreResult<Self> {
        Ok(Self {
            table: Table::open(ctx, TableOptions::FALLBACK)?,
        })
    }

    pub fn table(&self) -> &Table<Group> {
        &self.table
    }

    pub fn list_all(&self) -> Vec<Group> {
        self.table.rows().to_vec()
    }

    pub fn find_by_id(&self, group_id: i64) -> Option<Group> {
        self.table.find(|g| g.group_id == group_id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Group> {
        self.table.find(|g| same_unique_key(&g.name, name)).cloned()
    }

    fn get(&self, group_id: i64) -> StoreResult<Group> {
        self.find_by_id(group_id)
            .ok_or_else(|| StoreError::not_found("group", group_id))
    }

    /// Add a group, or return the existing one with the same name.
    pub fn add(&mut self, name: &str) -> StoreResult<Group> {
        if let Some(existing) = self.find_by_name(name) {
            debug!(group_id = existing.group_id, "group already exists");
            return Ok(existing);
        }

        let group = Group {
            group_id: self.table.allocate_id()?,
            name: name.trim().to_string(),
            recipients: Vec::new(),
        };
        let stored = self.table.persist_one(group)?;
        info!(group_id = stored.group_id, name = %stored.name, "added group");
        Ok(stored)
    }

    /// Replace an existing group.
    pub fn update(&mut self, group: Group) -> StoreResult<Group> {
        self.get(group.group_id)?;
        self.table.persist_one(group)
    }

    /// Delete a group record. Memberships are not touched here.
    pub fn delete(&mut self, group_id: i64) -> StoreResult<()> {
        let group = self.get(group_id)?;
        self.table.delete_record(&group)?;
        info!(group_id, "deleted group");
        Ok(())
    }

    /// Append to the legacy member list. `false` when already listed.
    pub fn add_recipient_to_group(&mut self, group_id: i64, recipient_id: i64) -> StoreResult<bool> {
        let mut group = self.get(group_id)?;
        if group.recipients.contains(&recipient_id) {
            return Ok(false);
        }
        group.recipients.push(recipient_id);
        self.update(group)?;
        info!(group_id, recipient_id, "added recipient to legacy member list");
        Ok(true)
    }

    /// Remove from the legacy member list. `false` when not listed.
    pub fn remove_recipient_from_group(
        &mut self,
        group_id: i64,
        recipient_id: i64,
    ) -> StoreResult<bool> {
        let mut group = self.get(group_id)?;
        let before = group.recipients.len();
        group.recipients.retain(|id| *id != recipient_id);
        if group.recipients.len() == before {
            return Ok(false);
        }
        self.update(group)?;
        info!(group_id, recipient_id, "removed recipient from legacy member list");
        Ok(true)
    }

    /// Ids of groups whose legacy member list contains `recipient_id`.
    pub fn groups_containing(&self, recipient_id: i64) -> Vec<i64> {
        self.table
            .rows()
            .iter()
            .filter(|g| g.recipients.contains(&recipient_id))
            .map(|g| g.group_id)
            .collect()
    }
}
