// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Operations spanning more than one repository.

pub mod groups;
pub mod senders;

pub use groups::{CascadeFailure, CascadeReport, CascadeStep, GroupService, ImportSummary};
pub use senders::SenderService;
