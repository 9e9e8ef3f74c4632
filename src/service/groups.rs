// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Group Membership and Cascade Deletes
//!
//! Multi-table operations over groups, recipients and memberships.
//!
//! The membership table is provisional. When it cannot be opened, or reports
//! its relation missing later on, the service switches to the legacy fields
//! (`Recipient::group_id` and `Group::recipients`) for the rest of its life.
//!
//! ## Deleting a Group
//!
//! 1. Resolve members: membership rows when available, otherwise recipients
//!    whose legacy group points at the group plus the group's legacy list.
//! 2. Remove each member's membership row.
//! 3. Delete every member left without any other group.
//! 4. Repoint legacy `group_id` references to the group at one of the
//!    recipient's remaining groups, or clear them.
//! 5. Delete the group record.
//!
//! Steps 2 to 4 are best-effort per recipient and collected in a
//! [`CascadeReport`]. Only a failure of step 5 fails the operation.

use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::storage::context::StoreContext;
use crate::storage::repository::{
    Group, GroupRepository, MembershipRepository, Recipient, RecipientRepository,
};

/// Cascade sub-step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeStep {
    RemoveMembership,
    ReclaimRecipient,
    /// Repointing a legacy `group_id` away from the deleted group.
    UnlinkLegacyGroup,
}

#[derive(Debug)]
pub struct CascadeFailure {
    pub step: CascadeStep,
    pub recipient_id: i64,
    pub error: StoreError,
}

/// Outcome of [`GroupService::delete_group`].
#[derive(Debug, Default)]
pub struct CascadeReport {
    pub group_id: i64,
    /// Members resolved in step 1.
    pub members: Vec<i64>,
    /// Recipients deleted because the group was their only one.
    pub reclaimed: Vec<i64>,
    /// Recipients kept because they belong to another group.
    pub retained: Vec<i64>,
    pub failures: Vec<CascadeFailure>,
}

impl CascadeReport {
    /// No sub-step failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of [`GroupService::import_addresses`].
#[derive(Debug, Default)]
pub struct ImportSummary {
    /// Addresses offered, duplicates included.
    pub total: usize,
    pub created: usize,
    /// Addresses that resolved to an already stored recipient.
    pub existing: usize,
    /// New links between a recipient and the group.
    pub linked: usize,
    pub failures: Vec<(String, StoreError)>,
}

/// Group, recipient and membership orchestration.
#[derive(Debug)]
pub struct GroupService {
    groups: GroupRepository,
    recipients: RecipientRepository,
    memberships: Option<MembershipRepository>,
}

impl GroupService {
    /// Open all three repositories. A membership table that cannot be opened
    /// puts the service in legacy mode.
    pub fn open(ctx: &StoreContext) -> StoreResult<Self> {
        let groups = GroupRepository::open(ctx)?;
        let recipients = RecipientRepository::open(ctx)?;
        let memberships = match MembershipRepository::open(ctx) {
            Ok(memberships) => Some(memberships),
            Err(err) => {
                warn!(error = %err, "membership table unavailable, using legacy group fields");
                None
            }
        };
        Ok(Self::from_parts(groups, recipients, memberships))
    }

    pub fn from_parts(
        groups: GroupRepository,
        recipients: RecipientRepository,
        memberships: Option<MembershipRepository>,
    ) -> Self {
        Self {
            groups,
            recipients,
            memberships,
        }
    }

    pub fn groups(&self) -> &GroupRepository {
        &self.groups
    }

    pub fn recipients(&self) -> &RecipientRepository {
        &self.recipients
    }

    pub fn memberships(&self) -> Option<&MembershipRepository> {
        self.memberships.as_ref()
    }

    /// Whether the membership table is in use.
    pub fn uses_memberships(&self) -> bool {
        self.memberships.is_some()
    }

    pub fn add_group(&mut self, name: &str) -> StoreResult<Group> {
        self.groups.add(name)
    }

    pub fn list_groups(&self) -> Vec<Group> {
        self.groups.list_all()
    }

    fn group(&self, group_id: i64) -> StoreResult<Group> {
        self.groups
            .find_by_id(group_id)
            .ok_or_else(|| StoreError::not_found("group", group_id))
    }

    /// Add a recipient by address and link it to `group_id` when given.
    ///
    /// A failed link is logged; the recipient is still returned.
    pub fn add_recipient(&mut self, address: &str, group_id: Option<i64>) -> StoreResult<Recipient> {
        if let Some(group_id) = group_id {
            self.group(group_id)?;
        }
        let recipient = self.recipients.add(address, group_id)?;
        if let Some(group_id) = group_id {
            if let Err(err) = self.add_recipient_to_group(recipient.recipient_id, group_id) {
                warn!(
                    recipient_id = recipient.recipient_id,
                    group_id,
                    error = %err,
                    "could not link recipient to group"
                );
            }
        }
        Ok(recipient)
    }

    /// Link a recipient to a group. `false` when it was already linked.
    pub fn add_recipient_to_group(&mut self, recipient_id: i64, group_id: i64) -> StoreResult<bool> {
        self.group(group_id)?;

        if let Some(memberships) = self.memberships.as_mut() {
            match memberships.add_membership(recipient_id, group_id) {
                Ok(added) => return Ok(added),
                Err(err) if err.is_missing_relation() => {
                    warn!(
                        recipient_id,
                        group_id,
                        error = %err,
                        "membership relation missing, falling back to legacy group fields"
                    );
                    self.memberships = None;
                }
                Err(err) => return Err(err),
            }
        }

        self.link_legacy(recipient_id, group_id)
    }

    fn link_legacy(&mut self, recipient_id: i64, group_id: i64) -> StoreResult<bool> {
        let recipient = self
            .recipients
            .find_by_id(recipient_id)
            .ok_or_else(|| StoreError::not_found("recipient", recipient_id))?;

        let mut changed = false;
        if recipient.group_id != Some(group_id) {
            if let Err(err) = self.recipients.update(recipient_id, None, Some(group_id)) {
                warn!(recipient_id, error = %err, "recipient update failed, reloading and retrying");
                self.recipients.reload()?;
                self.recipients.update(recipient_id, None, Some(group_id))?;
            }
            changed = true;
        }

        match self.groups.add_recipient_to_group(group_id, recipient_id) {
            Ok(added) => changed |= added,
            Err(err) => warn!(
                recipient_id,
                group_id,
                error = %err,
                "could not mirror recipient into legacy member list"
            ),
        }
        Ok(changed)
    }

    /// Recipients of a group.
    ///
    /// Membership rows win when there are any for the group; otherwise the
    /// recipients' legacy group field is scanned.
    pub fn list_group_recipients(&self, group_id: i64) -> StoreResult<Vec<Recipient>> {
        self.group(group_id)?;

        if let Some(memberships) = &self.memberships {
            let ids = memberships.list_group_members(group_id);
            if !ids.is_empty() {
                return Ok(ids
                    .into_iter()
                    .filter_map(|id| self.recipients.find_by_id(id))
                    .collect());
            }
        }
        Ok(self.recipients.legacy_members(group_id))
    }

    fn resolve_members(&self, group: &Group) -> Vec<i64> {
        if let Some(memberships) = &self.memberships {
            return memberships.list_group_members(group.group_id);
        }

        let mut members: Vec<i64> = self
            .recipients
            .legacy_members(group.group_id)
            .into_iter()
            .map(|r| r.recipient_id)
            .collect();
        for id in &group.recipients {
            if !members.contains(id) {
                members.push(*id);
            }
        }
        members
    }

    /// Groups other than `deleted` that `recipient_id` still belongs to.
    fn remaining_groups(&self, recipient_id: i64, deleted: i64) -> Vec<i64> {
        if let Some(memberships) = &self.memberships {
            return memberships
                .list_recipient_groups(recipient_id)
                .into_iter()
                .filter(|id| *id != deleted)
                .collect();
        }

        // A legacy reference to a group that no longer exists counts as none.
        let mut groups: Vec<i64> = self
            .recipients
            .find_by_id(recipient_id)
            .and_then(|r| r.group_id)
            .filter(|id| *id != deleted && self.groups.find_by_id(*id).is_some())
            .into_iter()
            .collect();
        for id in self.groups.groups_containing(recipient_id) {
            if id != deleted && !groups.contains(&id) {
                groups.push(id);
            }
        }
        groups
    }

    /// Delete a group, its memberships and every recipient that belonged
    /// to it alone.
    pub fn delete_group(&mut self, group_id: i64) -> StoreResult<CascadeReport> {
        let group = self.group(group_id)?;
        let mut report = CascadeReport {
            group_id,
            members: self.resolve_members(&group),
            ..CascadeReport::default()
        };
        debug!(group_id, members = ?report.members, "deleting group");

        if let Some(memberships) = self.memberships.as_mut() {
            for &recipient_id in &report.members {
                if let Err(error) = memberships.remove_membership(recipient_id, group_id) {
                    warn!(recipient_id, group_id, error = %error, "could not remove membership");
                    report.failures.push(CascadeFailure {
                        step: CascadeStep::RemoveMembership,
                        recipient_id,
                        error,
                    });
                }
            }
        }

        for recipient_id in report.members.clone() {
            if !self.remaining_groups(recipient_id, group_id).is_empty() {
                report.retained.push(recipient_id);
                continue;
            }
            match self.recipients.delete(recipient_id) {
                Ok(()) => report.reclaimed.push(recipient_id),
                Err(error) if error.is_not_found() => {
                    debug!(recipient_id, "orphaned recipient already gone");
                }
                Err(error) => {
                    warn!(recipient_id, error = %error, "could not delete orphaned recipient");
                    report.failures.push(CascadeFailure {
                        step: CascadeStep::ReclaimRecipient,
                        recipient_id,
                        error,
                    });
                }
            }
        }

        // Identifiers are reused once the highest group is gone, so stale
        // back-references would resurface under a future group.
        for recipient in self.recipients.legacy_members(group_id) {
            let recipient_id = recipient.recipient_id;
            let target = self.remaining_groups(recipient_id, group_id).first().copied();
            if let Err(error) = self.recipients.set_group(recipient_id, target) {
                warn!(recipient_id, error = %error, "could not unlink legacy group");
                report.failures.push(CascadeFailure {
                    step: CascadeStep::UnlinkLegacyGroup,
                    recipient_id,
                    error,
                });
            }
        }

        self.groups.delete(group_id)?;
        info!(
            group_id,
            reclaimed = report.reclaimed.len(),
            retained = report.retained.len(),
            failures = report.failures.len(),
            "deleted group"
        );
        Ok(report)
    }

    /// Add every address and link it to the group.
    ///
    /// Duplicates resolve to the same recipient. Per-address failures are
    /// collected; only a missing group fails the call.
    pub fn import_addresses<S: AsRef<str>>(
        &mut self,
        group_id: i64,
        addresses: &[S],
    ) -> StoreResult<ImportSummary> {
        self.group(group_id)?;
        let mut summary = ImportSummary {
            total: addresses.len(),
            ..ImportSummary::default()
        };

        for address in addresses {
            let address = address.as_ref();
            let existed = self.recipients.find_by_address(address).is_some();
            let recipient = match self.recipients.add(address, Some(group_id)) {
                Ok(recipient) => recipient,
                Err(err) => {
                    warn!(address, error = %err, "could not import address");
                    summary.failures.push((address.to_string(), err));
                    continue;
                }
            };
            if existed {
                summary.existing += 1;
            } else {
                summary.created += 1;
            }

            match self.add_recipient_to_group(recipient.recipient_id, group_id) {
                Ok(true) => summary.linked += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(address, error = %err, "could not link imported address");
                    summary.failures.push((address.to_string(), err));
                }
            }
        }

        info!(
            group_id,
            total = summary.total,
            created = summary.created,
            existing = summary.existing,
            failed = summary.failures.len(),
            "import finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteError};
    use crate::storage::StoragePaths;
    use std::sync::Arc;
    use tempfile::TempDir;

    const MEMBERSHIP: &str = "recipient_group_membership";

    fn setup(with_membership: bool) -> (TempDir, Arc<MemoryRemote>, GroupService) {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::with_mailroom_schema());
        if !with_membership {
            remote.drop_table(MEMBERSHIP);
        }
        let ctx = StoreContext::with_remote(StoragePaths::new(dir.path()), remote.clone());
        let service = GroupService::open(&ctx).unwrap();
        (dir, remote, service)
    }

    /// Groups A (1) and B (2); x only in A, y in both.
    fn two_groups_shared_recipient(service: &mut GroupService) -> (i64, i64) {
        let a = service.add_group("A").unwrap();
        let b = service.add_group("B").unwrap();
        let x = service.add_recipient("x@example.com", Some(a.group_id)).unwrap();
        let y = service.add_recipient("y@example.com", Some(a.group_id)).unwrap();
        service
            .add_recipient_to_group(y.recipient_id, b.group_id)
            .unwrap();
        (x.recipient_id, y.recipient_id)
    }

    #[test]
    fn delete_group_reclaims_only_orphans() {
        let (_dir, remote, mut service) = setup(true);
        assert!(service.uses_memberships());
        let (x, y) = two_groups_shared_recipient(&mut service);
        assert_eq!((x, y), (1, 2));

        let report = service.delete_group(1).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.members, vec![x, y]);
        assert_eq!(report.reclaimed, vec![x]);
        assert_eq!(report.retained, vec![y]);

        assert!(service.groups().find_by_id(1).is_none());
        assert!(service.recipients().find_by_id(x).is_none());
        assert_eq!(service.recipients().find_by_id(y).unwrap().group_id, Some(2));
        let memberships = service.memberships().unwrap();
        assert!(memberships.list_group_members(1).is_empty());
        assert_eq!(memberships.list_recipient_groups(y), vec![2]);

        assert_eq!(remote.rows("recipient").len(), 1);
        assert_eq!(remote.rows("recipient_group").len(), 1);
        assert_eq!(remote.rows(MEMBERSHIP).len(), 1);
        let members: Vec<_> = service
            .list_group_recipients(2)
            .unwrap()
            .into_iter()
            .map(|r| r.recipient_id)
            .collect();
        assert_eq!(members, vec![y]);
    }

    #[test]
    fn delete_group_in_legacy_mode() {
        let (_dir, remote, mut service) = setup(false);
        assert!(!service.uses_memberships());
        let (x, y) = two_groups_shared_recipient(&mut service);

        let report = service.delete_group(1).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.reclaimed, vec![x]);
        assert_eq!(report.retained, vec![y]);
        assert!(service.recipients().find_by_id(x).is_none());
        assert_eq!(service.recipients().find_by_id(y).unwrap().group_id, Some(2));
        assert!(service.groups().find_by_id(1).is_none());
        assert_eq!(remote.rows("recipient").len(), 1);
    }

    #[test]
    fn delete_group_with_n_members_removes_exactly_m() {
        let (_dir, _remote, mut service) = setup(true);
        let a = service.add_group("A").unwrap().group_id;
        let b = service.add_group("B").unwrap().group_id;
        for i in 0..4 {
            service
                .add_recipient(&format!("only{i}@example.com"), Some(a))
                .unwrap();
        }
        for i in 0..3 {
            let r = service
                .add_recipient(&format!("shared{i}@example.com"), Some(a))
                .unwrap();
            service.add_recipient_to_group(r.recipient_id, b).unwrap();
        }
        let before = service.recipients().list_all().len();

        let report = service.delete_group(a).unwrap();

        assert_eq!(report.members.len(), 7);
        assert_eq!(service.recipients().list_all().len(), before - 4);
        assert_eq!(service.list_group_recipients(b).unwrap().len(), 3);
    }

    #[test]
    fn denied_recipient_deletes_are_reported_not_raised() {
        let (_dir, remote, mut service) = setup(true);
        let (x, _y) = two_groups_shared_recipient(&mut service);
        remote.deny_deletes("recipient", true);

        let report = service.delete_group(1).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, CascadeStep::ReclaimRecipient);
        assert_eq!(report.failures[0].recipient_id, x);
        assert!(report.reclaimed.is_empty());
        assert!(service.groups().find_by_id(1).is_none());
    }

    #[test]
    fn denied_group_delete_degrades_to_snapshot() {
        let (_dir, remote, mut service) = setup(true);
        two_groups_shared_recipient(&mut service);
        remote.deny_deletes("recipient_group", true);

        // Groups fall back to the local snapshot, so the record still goes.
        assert!(service.delete_group(1).is_ok());
        assert_eq!(remote.rows("recipient_group").len(), 2);
        assert!(service.delete_group(1).unwrap_err().is_not_found());
    }

    #[test]
    fn membership_is_idempotent() {
        let (_dir, _remote, mut service) = setup(true);
        let g = service.add_group("A").unwrap().group_id;
        let r = service.add_recipient("x@example.com", None).unwrap().recipient_id;

        assert!(service.add_recipient_to_group(r, g).unwrap());
        assert!(!service.add_recipient_to_group(r, g).unwrap());
        assert_eq!(service.memberships().unwrap().list_all().len(), 1);
    }

    #[test]
    fn relation_dropped_mid_session_switches_to_legacy() {
        let (_dir, remote, mut service) = setup(true);
        let g = service.add_group("A").unwrap().group_id;
        let r = service.add_recipient("x@example.com", None).unwrap().recipient_id;

        remote.drop_table(MEMBERSHIP);
        assert!(service.add_recipient_to_group(r, g).unwrap());

        assert!(!service.uses_memberships());
        assert_eq!(service.recipients().find_by_id(r).unwrap().group_id, Some(g));
        assert_eq!(service.groups().find_by_id(g).unwrap().recipients, vec![r]);
        assert_eq!(service.list_group_recipients(g).unwrap().len(), 1);
    }

    fn server_error() -> RemoteError {
        RemoteError::Status {
            status: 500,
            body: "internal error".into(),
        }
    }

    #[test]
    fn legacy_link_reloads_and_retries_a_failed_update() {
        let (_dir, remote, mut service) = setup(false);
        let g = service.add_group("A").unwrap().group_id;
        let r = service.add_recipient("x@example.com", None).unwrap().recipient_id;

        // One for the single-row upsert, one for the full-save fallback.
        remote.fail_next("recipient", server_error());
        remote.fail_next("recipient", server_error());

        assert!(service.add_recipient_to_group(r, g).unwrap());
        assert_eq!(service.recipients().find_by_id(r).unwrap().group_id, Some(g));
        assert_eq!(remote.rows("recipient")[0]["group_id"], g);
        assert_eq!(service.groups().find_by_id(g).unwrap().recipients, vec![r]);
    }

    #[test]
    fn legacy_link_raises_when_the_retry_fails_too() {
        let (_dir, remote, mut service) = setup(false);
        let g = service.add_group("A").unwrap().group_id;
        let r = service.add_recipient("x@example.com", None).unwrap().recipient_id;
        remote.deny_upserts("recipient", true);

        let err = service.add_recipient_to_group(r, g).unwrap_err();

        assert!(matches!(&err, StoreError::Remote(e) if e.status() == Some(403)));
        assert_eq!(service.recipients().find_by_id(r).unwrap().group_id, None);
        assert!(service.groups().find_by_id(g).unwrap().recipients.is_empty());
    }

    #[test]
    fn local_membership_failure_is_raised_not_degraded() {
        let (dir, _remote, mut service) = setup(true);
        let g = service.add_group("A").unwrap().group_id;
        let r = service.add_recipient("x@example.com", None).unwrap().recipient_id;
        // A directory where the snapshot file belongs makes the mirror write fail.
        std::fs::create_dir_all(StoragePaths::new(dir.path()).table_snapshot(MEMBERSHIP)).unwrap();

        let err = service.add_recipient_to_group(r, g).unwrap_err();

        assert!(matches!(err, StoreError::Snapshot(_)));
        assert!(service.uses_memberships());
        assert_eq!(service.recipients().find_by_id(r).unwrap().group_id, None);
        assert!(service.groups().find_by_id(g).unwrap().recipients.is_empty());
    }

    #[test]
    fn retained_recipients_drop_references_to_the_deleted_group() {
        let (dir, remote, mut service) = setup(true);
        let a = service.add_group("A").unwrap().group_id;
        let b = service.add_group("B").unwrap().group_id;
        let y = service.add_recipient("y@example.com", Some(b)).unwrap().recipient_id;
        service.add_recipient_to_group(y, a).unwrap();

        let report = service.delete_group(b).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.retained, vec![y]);
        assert_eq!(service.recipients().find_by_id(y).unwrap().group_id, Some(a));

        // A fresh session hands the freed id to the next group.
        let ctx = StoreContext::with_remote(StoragePaths::new(dir.path()), remote.clone());
        let mut reopened = GroupService::open(&ctx).unwrap();
        let c = reopened.add_group("C").unwrap().group_id;
        assert_eq!(c, b);
        assert!(reopened.list_group_recipients(c).unwrap().is_empty());
    }

    #[test]
    fn listing_falls_back_to_legacy_when_membership_has_no_rows() {
        let (_dir, _remote, mut service) = setup(true);
        let g = service.add_group("A").unwrap().group_id;
        // Linked only through the legacy field, as older clients did.
        service.recipients.add("old@example.com", Some(g)).unwrap();

        let members = service.list_group_recipients(g).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].address, "old@example.com");
    }

    #[test]
    fn missing_group_is_not_found() {
        let (_dir, _remote, mut service) = setup(true);
        assert!(service.list_group_recipients(9).unwrap_err().is_not_found());
        assert!(service.add_recipient_to_group(1, 9).unwrap_err().is_not_found());
        assert!(service.delete_group(9).unwrap_err().is_not_found());
        assert!(service.import_addresses(9, &["a@example.com"]).unwrap_err().is_not_found());
    }

    #[test]
    fn import_counts_duplicates_and_existing() {
        let (_dir, _remote, mut service) = setup(true);
        let g = service.add_group("Newsletter").unwrap().group_id;
        service.add_recipient("known@example.com", None).unwrap();

        let summary = service
            .import_addresses(
                g,
                &["a@example.com", "known@example.com", "a@example.com", "b@example.com"],
            )
            .unwrap();

        assert_eq!(summary.total, 4);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.existing, 2);
        assert_eq!(summary.linked, 3);
        assert!(summary.failures.is_empty());
        assert_eq!(service.list_group_recipients(g).unwrap().len(), 3);
    }

    #[test]
    fn import_collects_per_address_failures() {
        let (_dir, remote, mut service) = setup(true);
        let g = service.add_group("A").unwrap().group_id;
        remote.set_offline(true);

        let summary = service.import_addresses(g, &["a@example.com"]).unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.created, 0);
    }
}
