// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Senders together with their application passwords.

use std::sync::Arc;

use tracing::{debug, info};

use crate::crypto::CredentialCipher;
use crate::error::StoreResult;
use crate::storage::context::StoreContext;
use crate::storage::repository::{
    Credential, CredentialRepository, NewCredential, Sender, SenderRepository,
};

#[derive(Debug)]
pub struct SenderService {
    senders: SenderRepository,
    credentials: CredentialRepository,
}

impl SenderService {
    pub fn open(ctx: &StoreContext, cipher: Arc<dyn CredentialCipher>) -> StoreResult<Self> {
        Ok(Self {
            senders: SenderRepository::open(ctx)?,
            credentials: CredentialRepository::open(ctx, cipher)?,
        })
    }

    pub fn senders(&self) -> &SenderRepository {
        &self.senders
    }

    pub fn credentials(&self) -> &CredentialRepository {
        &self.credentials
    }

    /// Add a sender and, when `secret` is given, store its password.
    ///
    /// Re-adding a known address refreshes the password in place.
    pub fn add_sender(&mut self, address: &str, secret: Option<&str>) -> StoreResult<Sender> {
        let sender = self.senders.add(address)?;
        let Some(secret) = secret else {
            return Ok(sender);
        };

        let credential = self.credentials.add(NewCredential {
            app_password_id: sender.app_password_id,
            ..NewCredential::for_sender(sender.sender_id, secret)
        })?;
        if sender.app_password_id == Some(credential.app_password_id) {
            return Ok(sender);
        }
        self.senders
            .attach_credential(sender.sender_id, credential.app_password_id)
    }

    /// Delete a sender and its credential. A credential that is already gone
    /// does not stop the sender from being deleted.
    pub fn delete_sender(&mut self, sender_id: i64) -> StoreResult<()> {
        let credential = self
            .senders
            .find_by_id(sender_id)
            .and_then(|sender| self.credential_for(&sender));
        if let Some(credential) = credential {
            match self.credentials.delete(credential.app_password_id) {
                Err(err) if err.is_not_found() => {
                    debug!(sender_id, "credential already deleted");
                }
                other => other?,
            }
        }
        self.senders.delete(sender_id)?;
        info!(sender_id, "deleted sender with credential");
        Ok(())
    }

    /// The sender's credential, by link first and owner second.
    pub fn credential_for(&self, sender: &Sender) -> Option<Credential> {
        sender
            .app_password_id
            .and_then(|id| self.credentials.find_by_id(id))
            .or_else(|| self.credentials.find_by_sender(sender.sender_id))
    }

    /// Plaintext password for `sender`, `None` when it has no credential.
    pub fn password_for(&self, sender: &Sender) -> StoreResult<Option<String>> {
        self.credential_for(sender)
            .map(|credential| self.credentials.reveal(&credential))
            .transpose()
    }
}
