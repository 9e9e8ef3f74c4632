// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Sealing
//!
//! Application passwords are stored sealed. The stored text is
//! `base64(nonce || ciphertext || tag)` under AES-256-GCM, with the key id
//! bound in as associated data so a ciphertext cannot be replayed under a
//! different key entry.
//!
//! | Scheme | Meaning |
//! |--------|---------|
//! | `aes-256-gcm:v1` | sealed with [`AeadCipher`] |
//! | `plain` | stored unencrypted (no key material was available) |
//!
//! Callers that receive [`CipherError::MissingKey`] from `encrypt` fall back
//! to [`PLAIN_SCHEME`] storage; see the credential repository.

use std::collections::HashMap;
use std::fmt;

use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

/// Scheme tag written for credentials sealed by [`AeadCipher`].
pub const DEFAULT_SCHEME: &str = "aes-256-gcm:v1";

/// Key id used when the caller does not choose one.
pub const DEFAULT_KEY_ID: &str = "local-v1";

/// Scheme tag for credentials stored without encryption.
pub const PLAIN_SCHEME: &str = "plain";

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("no key material for key id `{0}`")]
    MissingKey(String),

    #[error("unsupported crypto scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("credential has no stored ciphertext")]
    MissingCiphertext,

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Result type for cipher operations.
pub type CipherResult<T> = Result<T, CipherError>;

/// Seals and opens stored application passwords.
pub trait CredentialCipher: Send + Sync {
    /// Scheme tag recorded next to ciphertexts this cipher produces.
    fn scheme(&self) -> &str {
        DEFAULT_SCHEME
    }

    /// Key id used when none is recorded yet.
    fn default_key_id(&self) -> &str {
        DEFAULT_KEY_ID
    }

    fn encrypt(&self, plaintext: &str, key_id: &str) -> CipherResult<String>;

    fn decrypt(&self, scheme: &str, ciphertext: &str, key_id: &str) -> CipherResult<String>;
}

/// AES-256-GCM cipher over a key-id -> key map.
pub struct AeadCipher {
    keys: HashMap<String, [u8; KEY_LEN]>,
    rng: SystemRandom,
}

impl fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("AeadCipher").field("key_ids", &ids).finish()
    }
}

impl Default for AeadCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl AeadCipher {
    /// Create a new AeadCipher with no keys.
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            rng: SystemRandom::new(),
        }
    }

    /// Add (or replace) the key stored under `key_id`.
    pub fn with_key(mut self, key_id: impl Into<String>, key: [u8; KEY_LEN]) -> Self {
        self.keys.insert(key_id.into(), key);
        self
    }

    /// Generate fresh random key material.
    pub fn generate_key() -> CipherResult<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| CipherError::Crypto("system randomness unavailable".to_string()))?;
        Ok(key)
    }

    /// Add a key given as base64 text, such as an environment value.
    pub fn with_base64_key(self, key_id: impl Into<String>, encoded: &str) -> CipherResult<Self> {
        let bytes = Base64::decode_vec(encoded.trim())
            .map_err(|e| CipherError::Malformed(format!("key is not base64: {e}")))?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            CipherError::Malformed(format!("key must be {KEY_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(self.with_key(key_id, key))
    }

    pub fn has_key(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    fn sealing_key(&self, key_id: &str) -> CipherResult<LessSafeKey> {
        let bytes = self
            .keys
            .get(key_id)
            .ok_or_else(|| CipherError::MissingKey(key_id.to_string()))?;
        let unbound = UnboundKey::new(&AES_256_GCM, bytes)
            .map_err(|_| CipherError::Crypto("invalid AES-256 key".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl CredentialCipher for AeadCipher {
    fn encrypt(&self, plaintext: &str, key_id: &str) -> CipherResult<String> {
        let key = self.sealing_key(key_id)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CipherError::Crypto("system randomness unavailable".to_string()))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(key_id.as_bytes()),
            &mut in_out,
        )
        .map_err(|_| CipherError::Crypto("seal failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(Base64::encode_string(&sealed))
    }

    fn decrypt(&self, scheme: &str, ciphertext: &str, key_id: &str) -> CipherResult<String> {
        if scheme != DEFAULT_SCHEME {
            return Err(CipherError::UnsupportedScheme(scheme.to_string()));
        }
        let key = self.sealing_key(key_id)?;

        let sealed = Base64::decode_vec(ciphertext.trim())
            .map_err(|e| CipherError::Malformed(e.to_string()))?;
        if sealed.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CipherError::Malformed("ciphertext too short".to_string()));
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CipherError::Malformed("bad nonce".to_string()))?;
        let mut in_out = body.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::from(key_id.as_bytes()), &mut in_out)
            .map_err(|_| CipherError::Crypto("authentication failed".to_string()))?;

        String::from_utf8(plaintext.to_vec()).map_err(|e| CipherError::Malformed(e.to_string()))
    }
}

/// Cipher for installs without local key material.
///
/// Encryption always fails with [`CipherError::MissingKey`], so every new
/// credential is stored under [`PLAIN_SCHEME`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeyCipher;

impl CredentialCipher for NoKeyCipher {
    fn encrypt(&self, _plaintext: &str, key_id: &str) -> CipherResult<String> {
        Err(CipherError::MissingKey(key_id.to_string()))
    }

    fn decrypt(&self, _scheme: &str, _ciphertext: &str, key_id: &str) -> CipherResult<String> {
        Err(CipherError::MissingKey(key_id.to_string()))
    }
}
