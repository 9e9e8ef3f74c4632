// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared handles every table is opened with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::paths::StoragePaths;
use super::table::TableSpec;
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::remote::{RemoteStore, RestClient};

/// Storage paths, the optional remote handle and remote table-name overrides.
#[derive(Clone)]
pub struct StoreContext {
    paths: StoragePaths,
    remote: Option<Arc<dyn RemoteStore>>,
    table_names: HashMap<String, String>,
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext")
            .field("paths", &self.paths)
            .field("remote", &self.remote.is_some())
            .field("table_names", &self.table_names)
            .finish()
    }
}

impl StoreContext {
    /// Build from resolved configuration, connecting the REST client when
    /// credentials are present.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let remote: Option<Arc<dyn RemoteStore>> = match &config.remote {
            Some(credentials) => {
                let client = RestClient::new(credentials)?;
                info!(url = client.base_url(), source = ?config.source, "using remote store");
                Some(Arc::new(client))
            }
            None => {
                info!(root = %config.paths.root().display(), "no remote configured, running local-only");
                None
            }
        };

        Ok(Self {
            paths: config.paths.clone(),
            remote,
            table_names: config.table_names.clone(),
        })
    }

    /// Local snapshots only.
    pub fn local(paths: StoragePaths) -> Self {
        Self {
            paths,
            remote: None,
            table_names: HashMap::new(),
        }
    }

    /// Use an already-built remote store.
    pub fn with_remote(paths: StoragePaths, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            paths,
            remote: Some(remote),
            table_names: HashMap::new(),
        }
    }

    /// Override the remote name of the table whose logical name is `logical`.
    pub fn with_table_name(mut self, logical: impl Into<String>, remote: impl Into<String>) -> Self {
        self.table_names.insert(logical.into(), remote.into());
        self
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote.as_ref()
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Remote table name for `spec`, honoring overrides.
    pub fn remote_table(&self, spec: &TableSpec) -> String {
        self.table_names
            .get(spec.logical)
            .cloned()
            .unwrap_or_else(|| spec.remote.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteCredentials;
    use crate::remote::MemoryRemote;

    const SPEC: TableSpec = TableSpec {
        logical: "recipients",
        remote: "recipient",
        key_columns: &["recipient_id"],
        id_column: Some("recipient_id"),
    };

    #[test]
    fn table_name_overrides_apply_by_logical_name() {
        let ctx = StoreContext::local(StoragePaths::new("/tmp/x"));
        assert_eq!(ctx.remote_table(&SPEC), "recipient");

        let ctx = ctx.with_table_name("recipients", "mail_recipient");
        assert_eq!(ctx.remote_table(&SPEC), "mail_recipient");
    }

    #[test]
    fn from_config_connects_only_with_credentials() {
        let local = StoreConfig::local(StoragePaths::new("/tmp/x"));
        assert!(!StoreContext::from_config(&local).unwrap().is_remote());

        let mut remote = StoreConfig::local(StoragePaths::new("/tmp/x"));
        remote.remote = Some(RemoteCredentials {
            url: "https://db.example.com".into(),
            key: "k".into(),
        });
        assert!(StoreContext::from_config(&remote).unwrap().is_remote());
    }

    #[test]
    fn with_remote_uses_given_store() {
        let ctx = StoreContext::with_remote(
            StoragePaths::new("/tmp/x"),
            Arc::new(MemoryRemote::with_mailroom_schema()),
        );
        assert!(ctx.is_remote());
        assert!(ctx.remote().is_some());
    }
}
