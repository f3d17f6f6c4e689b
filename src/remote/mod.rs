// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Remote Store
//!
//! All persistent state (users, accounts, transactions, revoked credentials)
//! lives in a hosted relational store reachable over HTTP. This module defines
//! the port the rest of the service talks to and the plumbing around it.
//!
//! - [`RemoteStore`] - `select / insert / update / delete` over JSON rows
//! - [`RestStore`] - PostgREST-style HTTP adapter (production)
//! - [`MemoryStore`] - in-process adapter (development mode and tests)
//! - [`RemoteCallExecutor`] - worker-pool offload with bounded retry
//! - [`Remote`] - cheap, cloneable handle combining a store and an executor
//!
//! Monetary columns travel as decimal strings.

pub mod error;
pub mod executor;
pub mod memory;
pub mod rest;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use error::{FailureKind, RemoteError};
pub use executor::{RemoteCallExecutor, RetryPolicy};
pub use memory::MemoryStore;
pub use rest::RestStore;

/// A single row as returned by the store.
pub type Row = Map<String, Value>;

/// Table names used by the service.
pub mod tables {
    pub const USERS: &str = "users";
    pub const ACCOUNTS: &str = "accounts";
    pub const TRANSACTIONS: &str = "transactions";
    pub const REVOKED_CREDENTIALS: &str = "revoked_credentials";
}

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
        }
    }
}

/// Column predicate. Values are compared in their textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.to_string(),
        }
    }

    pub fn gte(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Gte,
            value: value.to_string(),
        }
    }

    pub fn lte(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Lte,
            value: value.to_string(),
        }
    }
}

/// Port for the hosted data store.
///
/// Calls are blocking; callers go through [`Remote`] so they run on the
/// executor's worker pool.
pub trait RemoteStore: Send + Sync {
    fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, RemoteError>;

    /// Insert a row, returning it as stored (with generated columns).
    fn insert(&self, table: &str, row: &Row) -> Result<Row, RemoteError>;

    /// Patch all rows matching `filters`, returning the updated rows.
    fn update(&self, table: &str, filters: &[Filter], patch: &Row) -> Result<Vec<Row>, RemoteError>;

    /// Delete all rows matching `filters`, returning the deleted rows.
    fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, RemoteError>;

    /// Cheap reachability probe used by readiness checks.
    fn ping(&self) -> Result<(), RemoteError>;
}

/// Handle used by services: every call is routed through the executor.
#[derive(Clone)]
pub struct Remote {
    store: Arc<dyn RemoteStore>,
    executor: Arc<RemoteCallExecutor>,
}

impl Remote {
    pub fn new(store: Arc<dyn RemoteStore>, executor: Arc<RemoteCallExecutor>) -> Self {
        Self { store, executor }
    }

    pub async fn select(&self, table: &'static str, filters: Vec<Filter>) -> Result<Vec<Row>, RemoteError> {
        let store = Arc::clone(&self.store);
        self.executor.execute(move || store.select(table, &filters)).await
    }

    pub async fn insert(&self, table: &'static str, row: Row) -> Result<Row, RemoteError> {
        let store = Arc::clone(&self.store);
        self.executor.execute(move || store.insert(table, &row)).await
    }

    pub async fn update(
        &self,
        table: &'static str,
        filters: Vec<Filter>,
        patch: Row,
    ) -> Result<Vec<Row>, RemoteError> {
        let store = Arc::clone(&self.store);
        self.executor
            .execute(move || store.update(table, &filters, &patch))
            .await
    }

    pub async fn delete(&self, table: &'static str, filters: Vec<Filter>) -> Result<Vec<Row>, RemoteError> {
        let store = Arc::clone(&self.store);
        self.executor.execute(move || store.delete(table, &filters)).await
    }

    pub async fn ping(&self) -> Result<(), RemoteError> {
        let store = Arc::clone(&self.store);
        self.executor.execute(move || store.ping()).await
    }

    /// Select rows and decode them into `T`.
    pub async fn select_as<T: DeserializeOwned>(
        &self,
        table: &'static str,
        filters: Vec<Filter>,
    ) -> Result<Vec<T>, RemoteError> {
        self.select(table, filters)
            .await?
            .into_iter()
            .map(decode_row)
            .collect()
    }

    /// Select at most one row and decode it.
    pub async fn find_as<T: DeserializeOwned>(
        &self,
        table: &'static str,
        filters: Vec<Filter>,
    ) -> Result<Option<T>, RemoteError> {
        match self.select(table, filters).await?.into_iter().next() {
            Some(row) => decode_row(row).map(Some),
            None => Ok(None),
        }
    }
}

/// Decode a store row into a typed record.
pub fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T, RemoteError> {
    serde_json::from_value(Value::Object(row))
        .map_err(|e| RemoteError::malformed(format!("unexpected row shape: {e}")))
}

/// Encode a typed record as a store row.
pub fn encode_row<T: serde::Serialize>(value: &T) -> Result<Row, RemoteError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(RemoteError::malformed("record did not serialize to an object")),
        Err(e) => Err(RemoteError::malformed(format!("failed to encode row: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Named {
        name: String,
    }

    #[tokio::test]
    async fn remote_round_trips_through_executor() {
        let remote = Remote::new(Arc::new(MemoryStore::new()), Arc::new(RemoteCallExecutor::default()));
        let mut row = Row::new();
        row.insert("name".into(), Value::from("Cash"));
        remote.insert(tables::ACCOUNTS, row).await.unwrap();

        let found: Option<Named> = remote
            .find_as(tables::ACCOUNTS, vec![Filter::eq("name", "Cash")])
            .await
            .unwrap();
        assert_eq!(found, Some(Named { name: "Cash".into() }));
    }

    #[test]
    fn decode_row_reports_malformed_rows() {
        let mut row = Row::new();
        row.insert("other".into(), Value::from(1));
        let err = decode_row::<Named>(row).unwrap_err();
        assert_eq!(err.kind, FailureKind::Malformed);
        assert!(!err.is_transient());
    }
}
