// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blocking PostgREST client.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, error};

use super::{Filter, RemoteError, RemoteResult, RemoteStore, Row};
use crate::config::RemoteCredentials;

const REST_PATH: &str = "rest/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const UPSERT_PREFERENCE: &str = "resolution=merge-duplicates,return=representation";

/// HTTP client for the remote table endpoints.
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl RestClient {
    pub fn new(credentials: &RemoteCredentials) -> RemoteResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: credentials.url.trim_end_matches('/').to_string(),
            api_key: credentials.key.clone(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{REST_PATH}/{table}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn send(&self, method: &str, url: &str, builder: RequestBuilder) -> RemoteResult<Response> {
        let response = self.authorized(builder).send().map_err(|e| {
            error!(method, url, error = %e, "remote request failed");
            RemoteError::Request(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(method, url, status = status.as_u16(), "remote request ok");
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        error!(method, url, status = status.as_u16(), body = %body, "remote returned error status");
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }

    fn parse_rows(response: Response) -> RemoteResult<Vec<Row>> {
        let text = response
            .text()
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(row) => Ok(row),
                    other => Err(RemoteError::InvalidResponse(format!(
                        "expected object row, got {other}"
                    ))),
                })
                .collect(),
            other => Err(RemoteError::InvalidResponse(format!(
                "expected array of rows, got {other}"
            ))),
        }
    }
}

impl RemoteStore for RestClient {
    fn fetch_all(&self, table: &str) -> RemoteResult<Vec<Row>> {
        let url = self.table_url(table);
        let response = self.send("GET", &url, self.http.get(&url).query(&[("select", "*")]))?;
        Self::parse_rows(response)
    }

    fn upsert(
        &self,
        table: &str,
        conflict_columns: &[&str],
        rows: &[Row],
    ) -> RemoteResult<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.table_url(table);
        let mut builder = self
            .http
            .post(&url)
            .header("Prefer", UPSERT_PREFERENCE)
            .json(rows);
        if !conflict_columns.is_empty() {
            builder = builder.query(&[("on_conflict", conflict_columns.join(","))]);
        }

        let response = self.send("POST", &url, builder)?;
        Self::parse_rows(response)
    }

    fn delete_by_filters(&self, table: &str, filters: &[Filter]) -> RemoteResult<()> {
        // An unfiltered DELETE would wipe the table.
        if filters.is_empty() {
            return Err(RemoteError::Request(format!(
                "refusing unfiltered delete on `{table}`"
            )));
        }

        let url = self.table_url(table);
        let pairs: Vec<(String, String)> = filters.iter().map(Filter::to_query_pair).collect();
        self.send("DELETE", &url, self.http.delete(&url).query(&pairs))?;
        Ok(())
    }
}
