// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the dual-backend tables.
//!
//! Each repository wraps one [`Table`](super::table::Table) with the
//! entity's uniqueness rules and derived queries.
//!
//! | Repository | Logical table | Remote table | Mode |
//! |------------|---------------|--------------|------|
//! | [`SenderRepository`] | `senders` | `sender` | fallback |
//! | [`CredentialRepository`] | `app_passwords` | `app_password` | fallback |
//! | [`RecipientRepository`] | `recipients` | `recipient` | remote-only |
//! | [`GroupRepository`] | `groups` | `recipient_group` | fallback |
//! | [`MembershipRepository`] | `recipient_group_membership` | `recipient_group_membership` | schema required |

pub mod credentials;
pub mod groups;
pub mod memberships;
pub mod recipients;
pub mod senders;

use unicode_normalization::UnicodeNormalization;

pub use credentials::{Credential, CredentialRepository, NewCredential};
pub use groups::{Group, GroupRepository};
pub use memberships::{Membership, MembershipRepository};
pub use recipients::{Recipient, RecipientRepository};
pub use senders::{Sender, SenderRepository};

/// Comparison key for case-insensitive unique columns (addresses, names).
pub fn unique_key(value: &str) -> String {
    value.trim().nfkc().collect::<String>().to_lowercase()
}

/// Whether two values collide under [`unique_key`].
pub fn same_unique_key(a: &str, b: &str) -> bool {
    unique_key(a) == unique_key(b)
}
