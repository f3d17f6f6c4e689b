// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PostgREST-style HTTP adapter for the hosted store.
//!
//! Tables are exposed at `{base}/rest/v1/{table}`; filters are query
//! parameters of the form `column=op.value`. Errors come back as JSON with
//! `code` and `message` fields.
//!
//! The client is blocking and must only be driven from the executor's worker
//! pool. Construct it outside of the async runtime.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use url::Url;

use super::{Filter, RemoteError, RemoteStore, Row};

/// Connect budget for each attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Error payload returned by PostgREST.
#[derive(Debug, Deserialize)]
struct StoreErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct RestStore {
    base: Url,
    http: Client,
}

impl RestStore {
    /// Create an adapter for the store at `base_url`.
    ///
    /// `request_timeout` bounds the read/write phase of each request.
    pub fn new(base_url: &Url, api_key: &str, request_timeout: Duration) -> Result<Self, RemoteError> {
        let base = base_url
            .join("rest/v1/")
            .map_err(|e| RemoteError::malformed(format!("invalid store URL: {e}")))?;

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|_| RemoteError::malformed("store API key is not a valid header value"))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| RemoteError::malformed("store API key is not a valid header value"))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let http = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| RemoteError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { base, http })
    }

    fn table_url(&self, table: &str) -> Result<Url, RemoteError> {
        self.base
            .join(table)
            .map_err(|e| RemoteError::malformed(format!("invalid table name {table}: {e}")))
    }

    fn with_filters(request: RequestBuilder, filters: &[Filter]) -> RequestBuilder {
        let query: Vec<(String, String)> = filters
            .iter()
            .map(|f| (f.column.clone(), format!("{}.{}", f.op.as_str(), f.value)))
            .collect();
        request.query(&query)
    }

    fn send(request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                RemoteError::timeout(e.to_string())
            } else {
                RemoteError::network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.json::<StoreErrorBody>().ok();
        let (code, message) = match body {
            Some(b) => (b.code, b.message),
            None => (None, None),
        };
        Err(RemoteError::status(
            status.as_u16(),
            message.unwrap_or_else(|| format!("store returned HTTP {status}")),
            code,
        ))
    }

    fn rows(response: Response) -> Result<Vec<Row>, RemoteError> {
        response
            .json::<Vec<Row>>()
            .map_err(|e| RemoteError::malformed(format!("invalid store response: {e}")))
    }
}

impl RemoteStore for RestStore {
    fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, RemoteError> {
        let request = self
            .http
            .get(self.table_url(table)?)
            .query(&[("select", "*")]);
        Self::rows(Self::send(Self::with_filters(request, filters))?)
    }

    fn insert(&self, table: &str, row: &Row) -> Result<Row, RemoteError> {
        let request = self.http.post(self.table_url(table)?).json(row);
        Self::rows(Self::send(request)?)?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::malformed("insert returned no representation"))
    }

    fn update(&self, table: &str, filters: &[Filter], patch: &Row) -> Result<Vec<Row>, RemoteError> {
        let request = self.http.patch(self.table_url(table)?).json(patch);
        Self::rows(Self::send(Self::with_filters(request, filters))?)
    }

    fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, RemoteError> {
        let request = self.http.delete(self.table_url(table)?);
        Self::rows(Self::send(Self::with_filters(request, filters))?)
    }

    fn ping(&self) -> Result<(), RemoteError> {
        Self::send(self.http.head(self.base.clone())).map(|_| ())
    }
}
