// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Mailroom Store - Dual-Backend Persistence for a Bulk Mailer
//!
//! Senders, their application passwords, recipients and recipient groups,
//! persisted to a PostgREST-style remote store with local JSON snapshots as
//! offline fallback.
//!
//! ## Modules
//!
//! - `config` - Remote credential resolution and saved configuration
//! - `crypto` - Sealing of stored application passwords
//! - `remote` - Remote store seam, REST client and in-memory store
//! - `service` - Group cascade deletes and sender credentials
//! - `storage` - Generic tables, snapshots and typed repositories

pub mod config;
pub mod crypto;
pub mod error;
pub mod remote;
pub mod service;
pub mod storage;

pub use error::{StoreError, StoreResult};
