// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is resolved once at process start into a [`StoreConfig`]
//! and passed explicitly to the store. Nothing here mutates the process
//! environment.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SUPABASE_URL` | Remote store endpoint | none (local-only) |
//! | `SUPABASE_KEY` | Remote store API key | none (local-only) |
//! | `MAILROOM_DATA_DIR` | Root for snapshots and saved config | `mailroom-data` |
//! | `MAILROOM_CIPHER_KEY` | Base64 AES-256 key for sealing app passwords | none (plain storage) |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |
//!
//! ## Remote Credential Precedence
//!
//! 1. Saved configuration file (`<root>/config/remote.json`)
//! 2. Static application settings, when enabled
//! 3. `SUPABASE_URL` / `SUPABASE_KEY`
//!
//! The first source providing both an endpoint and a key wins.

use std::collections::HashMap;
use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::StoreResult;
use crate::storage::snapshot::{read_json, remove_file, write_json};
use crate::storage::StoragePaths;

/// Environment variable name for the remote endpoint.
pub const REMOTE_URL_ENV: &str = "SUPABASE_URL";

/// Environment variable name for the remote API key.
pub const REMOTE_KEY_ENV: &str = "SUPABASE_KEY";

/// Environment variable name for the local data directory.
pub const DATA_DIR_ENV: &str = "MAILROOM_DATA_DIR";

/// Environment variable name for the base64 credential sealing key.
pub const CIPHER_KEY_ENV: &str = "MAILROOM_CIPHER_KEY";

/// Environment variable name selecting `json` or `pretty` log output.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Endpoint and key for the remote store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCredentials {
    pub url: String,
    pub key: String,
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Where the resolved remote credentials came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    SavedConfig,
    StaticSettings,
    Environment,
}

/// Compiled-in application settings.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    /// Static credentials are only considered when enabled.
    pub enabled: bool,
    pub url: Option<String>,
    pub key: Option<String>,
    /// Logical table name -> remote table name overrides.
    pub table_names: HashMap<String, String>,
}

/// Contents of the saved configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRemoteConfig {
    #[serde(rename = "SUPABASE_URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "SUPABASE_KEY", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Fully resolved store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub paths: StoragePaths,
    pub remote: Option<RemoteCredentials>,
    pub source: Option<CredentialSource>,
    pub table_names: HashMap<String, String>,
}

impl StoreConfig {
    /// Local-only configuration.
    pub fn local(paths: StoragePaths) -> Self {
        Self {
            paths,
            remote: None,
            source: None,
            table_names: HashMap::new(),
        }
    }

    /// Resolve from the saved file, `settings` and the process environment.
    pub fn resolve(paths: StoragePaths, settings: &StaticSettings) -> Self {
        let saved = match load_saved_remote_config(&paths) {
            Ok(saved) => saved,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable saved remote config");
                None
            }
        };
        Self::resolve_with(paths, saved.as_ref(), settings, |name| env::var(name).ok())
    }

    /// Resolution with every input supplied by the caller.
    pub fn resolve_with(
        paths: StoragePaths,
        saved: Option<&SavedRemoteConfig>,
        settings: &StaticSettings,
        env_lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let candidates = [
            (
                CredentialSource::SavedConfig,
                saved.and_then(|s| s.url.clone()),
                saved.and_then(|s| s.key.clone()),
            ),
            (
                CredentialSource::StaticSettings,
                settings.url.clone().filter(|_| settings.enabled),
                settings.key.clone().filter(|_| settings.enabled),
            ),
            (
                CredentialSource::Environment,
                env_lookup(REMOTE_URL_ENV),
                env_lookup(REMOTE_KEY_ENV),
            ),
        ];

        let mut resolved = None;
        for (source, url, key) in candidates {
            if let Some(credentials) = credentials_from(source, url, key) {
                debug!(?source, url = %credentials.url, "remote store configured");
                resolved = Some((source, credentials));
                break;
            }
        }

        Self {
            paths,
            source: resolved.as_ref().map(|(source, _)| *source),
            remote: resolved.map(|(_, credentials)| credentials),
            table_names: settings.table_names.clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn credentials_from(
    source: CredentialSource,
    url: Option<String>,
    key: Option<String>,
) -> Option<RemoteCredentials> {
    let (url, key) = (non_empty(url)?, non_empty(key)?);
    match Url::parse(&url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Some(RemoteCredentials {
            url: url.trim_end_matches('/').to_string(),
            key,
        }),
        Ok(parsed) => {
            warn!(?source, scheme = parsed.scheme(), "skipping remote url with unsupported scheme");
            None
        }
        Err(e) => {
            warn!(?source, error = %e, "skipping invalid remote url");
            None
        }
    }
}

/// Load the saved remote configuration, if any.
pub fn load_saved_remote_config(paths: &StoragePaths) -> StoreResult<Option<SavedRemoteConfig>> {
    Ok(read_json(paths.remote_config())?)
}

/// Persist remote credentials for future runs.
pub fn save_remote_config(paths: &StoragePaths, credentials: &RemoteCredentials) -> StoreResult<()> {
    let saved = SavedRemoteConfig {
        url: Some(credentials.url.clone()),
        key: Some(credentials.key.clone()),
    };
    write_json(paths.remote_config(), &saved)?;
    Ok(())
}

/// Remove saved remote credentials. Returns whether a file was removed.
pub fn clear_remote_config(paths: &StoragePaths) -> StoreResult<bool> {
    Ok(remove_file(paths.remote_config())?)
}
