// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Dual-Backend Storage
//!
//! Every table is read from and written to the remote store first, with a
//! JSON snapshot per table kept on disk for offline continuity.
//!
//! ## Storage Layout
//!
//! ```text
//! <root>/
//!   data/
//!     senders.json                     # { "next_id": n, "senders": [...] }
//!     app_passwords.json
//!     recipients.json                  # never written (remote-only table)
//!     groups.json
//!     recipient_group_membership.json
//!   config/
//!     remote.json                      # saved remote endpoint and key
//! ```
//!
//! ## Important Notes
//!
//! - All operations are blocking; there is no cancellation.
//! - One process per data root. Snapshots are not locked.
//! - Table instances hold independent copies and only converge on reload.

pub mod context;
pub mod paths;
pub mod repository;
pub mod snapshot;
pub mod table;

pub use context::StoreContext;
pub use paths::StoragePaths;
pub use repository::{
    Credential, CredentialRepository, Group, GroupRepository, Membership, MembershipRepository,
    NewCredential, Recipient, RecipientRepository, Sender, SenderRepository,
};
pub use snapshot::{SnapshotError, SnapshotFile};
pub use table::{Record, Table, TableMode, TableOptions, TableSpec};
