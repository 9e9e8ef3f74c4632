// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Application credential repository.
//!
//! Secrets are sealed with the configured [`CredentialCipher`] before they
//! reach either backend. When sealing fails (typically no key material on
//! this machine) the secret is stored as-is under the `"plain"` scheme.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crypto::{CipherError, CredentialCipher, PLAIN_SCHEME};
use crate::error::{StoreError, StoreResult};
use crate::storage::context::StoreContext;
use crate::storage::table::{Record, Table, TableOptions, TableSpec};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub app_password_id: i64,
    #[serde(default)]
    pub sender_id: Option<i64>,
    /// Sealed secret, or the secret itself under the `"plain"` scheme.
    #[serde(default)]
    pub ciphertext: Option<String>,
    #[serde(default)]
    pub crypto_scheme: Option<String>,
    #[serde(default)]
    pub key_id: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("app_password_id", &self.app_password_id)
            .field("sender_id", &self.sender_id)
            .field("ciphertext", &self.ciphertext.as_ref().map(|_| "<redacted>"))
            .field("crypto_scheme", &self.crypto_scheme)
            .field("key_id", &self.key_id)
            .finish()
    }
}

impl Credential {
    /// Stored without encryption.
    pub fn is_plain(&self) -> bool {
        self.crypto_scheme.as_deref() == Some(PLAIN_SCHEME)
    }
}

impl Record for Credential {
    const SPEC: TableSpec = TableSpec {
        logical: "app_passwords",
        remote: "app_password",
        key_columns: &["app_password_id"],
        id_column: Some("app_password_id"),
    };

    fn id(&self) -> Option<i64> {
        Some(self.app_password_id)
    }
}

/// Input for [`CredentialRepository::add`].
///
/// With no `crypto_scheme`, `secret` is plaintext and gets sealed. With a
/// scheme, `secret` is stored verbatim as already-sealed text.
#[derive(Clone, Default)]
pub struct NewCredential {
    /// Existing credential to refresh, when known.
    pub app_password_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub secret: Option<String>,
    pub crypto_scheme: Option<String>,
    pub key_id: Option<String>,
}

impl fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewCredential")
            .field("app_password_id", &self.app_password_id)
            .field("sender_id", &self.sender_id)
            .field("crypto_scheme", &self.crypto_scheme)
            .finish_non_exhaustive()
    }
}

impl NewCredential {
    /// Plaintext secret for `sender_id`.
    pub fn for_sender(sender_id: i64, secret: impl Into<String>) -> Self {
        Self {
            sender_id: Some(sender_id),
            secret: Some(secret.into()),
            ..Self::default()
        }
    }
}

struct Sealed {
    ciphertext: Option<String>,
    crypto_scheme: Option<String>,
    key_id: Option<String>,
}

/// Repository for application credentials.
pub struct CredentialRepository {
    table: Table<Credential>,
    cipher: Arc<dyn CredentialCipher>,
}

impl fmt::Debug for CredentialRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRepository")
            .field("table", &self.table)
            .field("scheme", &self.cipher.scheme())
            .finish()
    }
}

impl CredentialRepository {
    /// Create a new CredentialRepository, loading the table.
    pub fn open(ctx: &StoreContext, cipher: Arc<dyn CredentialCipher>) -> StoreResult<Self> {
        Ok(Self {
            table: Table::open(ctx, TableOptions::FALLBACK)?,
            cipher,
        })
    }

    pub fn table(&self) -> &Table<Credential> {
        &self.table
    }

    pub fn list_all(&self) -> Vec<Credential> {
        self.table.rows().to_vec()
    }

    pub fn find_by_id(&self, app_password_id: i64) -> Option<Credential> {
        self.table
            .find(|c| c.app_password_id == app_password_id)
            .cloned()
    }

    pub fn find_by_sender(&self, sender_id: i64) -> Option<Credential> {
        self.table.find(|c| c.sender_id == Some(sender_id)).cloned()
    }

    fn seal(&self, new: NewCredential) -> Sealed {
        let NewCredential {
            secret,
            crypto_scheme,
            key_id,
            ..
        } = new;

        match (secret, crypto_scheme) {
            (Some(secret), None) => {
                let key_id = key_id.unwrap_or_else(|| self.cipher.default_key_id().to_string());
                match self.cipher.encrypt(&secret, &key_id) {
                    Ok(ciphertext) => Sealed {
                        ciphertext: Some(ciphertext),
                        crypto_scheme: Some(self.cipher.scheme().to_string()),
                        key_id: Some(key_id),
                    },
                    Err(e) => {
                        warn!(error = %e, "encryption failed, storing plaintext fallback");
                        Sealed {
                            ciphertext: Some(secret),
                            crypto_scheme: Some(PLAIN_SCHEME.to_string()),
                            key_id: None,
                        }
                    }
                }
            }
            (ciphertext, crypto_scheme) => Sealed {
                ciphertext,
                crypto_scheme,
                key_id,
            },
        }
    }

    /// Store a credential.
    ///
    /// If `app_password_id` names an existing credential, its sealed value
    /// is replaced when it changed and the credential is returned.
    pub fn add(&mut self, new: NewCredential) -> StoreResult<Credential> {
        let existing_id = new.app_password_id;
        let sender_id = new.sender_id;
        let sealed = self.seal(new);

        if let Some(mut existing) = existing_id.and_then(|id| self.find_by_id(id)) {
            if existing.ciphertext != sealed.ciphertext {
                existing.ciphertext = sealed.ciphertext;
                existing.crypto_scheme = sealed.crypto_scheme;
                existing.key_id = sealed.key_id;
                existing = self.table.save_including(existing)?;
                info!(app_password_id = existing.app_password_id, "updated app password");
            }
            return Ok(existing);
        }

        let credential = Credential {
            app_password_id: self.table.allocate_id()?,
            sender_id,
            ciphertext: sealed.ciphertext,
            crypto_scheme: sealed.crypto_scheme,
            key_id: sealed.key_id,
        };
        let stored = self.table.persist_one(credential)?;
        info!(
            app_password_id = stored.app_password_id,
            scheme = stored.crypto_scheme.as_deref().unwrap_or_default(),
            "added app password"
        );
        Ok(stored)
    }

    /// Delete a credential.
    pub fn delete(&mut self, app_password_id: i64) -> StoreResult<()> {
        let credential = self
            .find_by_id(app_password_id)
            .ok_or_else(|| StoreError::not_found("app password", app_password_id))?;
        self.table.delete_record(&credential)?;
        info!(app_password_id, "deleted app password");
        Ok(())
    }

    /// Plaintext secret for mail dispatch.
    pub fn reveal(&self, credential: &Credential) -> StoreResult<String> {
        let ciphertext = credential
            .ciphertext
            .as_deref()
            .ok_or(CipherError::MissingCiphertext)?;
        if credential.is_plain() {
            return Ok(ciphertext.to_string());
        }

        let scheme = credential.crypto_scheme.as_deref().unwrap_or_default();
        let key_id = credential
            .key_id
            .as_deref()
            .unwrap_or_else(|| self.cipher.default_key_id());
        Ok(self.cipher.decrypt(scheme, ciphertext, key_id)?)
    }
}
