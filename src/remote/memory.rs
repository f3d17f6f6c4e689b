// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process implementation of [`RemoteStore`].
//!
//! Used when no `STORE_URL` is configured (development mode) and by tests.
//! Mirrors the subset of PostgREST behaviour the service relies on: `id`
//! and `created_at` are generated on insert, filters compare textual values.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::{Filter, FilterOp, RemoteError, RemoteStore, Row};

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<Row>>>, RemoteError> {
        self.tables
            .lock()
            .map_err(|_| RemoteError::aborted("memory store lock poisoned"))
    }
}

/// Textual form of a column value, as PostgREST compares it.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn matches(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        let Some(actual) = row.get(&filter.column).and_then(text_of) else {
            return false;
        };
        match filter.op {
            FilterOp::Eq => actual == filter.value,
            FilterOp::Gte => actual.as_str() >= filter.value.as_str(),
            FilterOp::Lte => actual.as_str() <= filter.value.as_str(),
        }
    })
}

impl RemoteStore for MemoryStore {
    fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, RemoteError> {
        let tables = self.lock()?;
        Ok(tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| matches(row, filters)).cloned().collect())
            .unwrap_or_default())
    }

    fn insert(&self, table: &str, row: &Row) -> Result<Row, RemoteError> {
        let mut stored = row.clone();
        stored
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        stored
            .entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let mut tables = self.lock()?;
        let rows = tables.entry(table.to_string()).or_default();
        if rows.iter().any(|existing| existing.get("id") == stored.get("id")) {
            return Err(RemoteError::status(
                409,
                "duplicate key value violates unique constraint",
                Some("23505".to_string()),
            ));
        }
        rows.push(stored.clone());
        Ok(stored)
    }

    fn update(&self, table: &str, filters: &[Filter], patch: &Row) -> Result<Vec<Row>, RemoteError> {
        let mut tables = self.lock()?;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };

        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|row| matches(row, filters)) {
            for (column, value) in patch {
                row.insert(column.clone(), value.clone());
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, RemoteError> {
        let mut tables = self.lock()?;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };

        let (removed, kept): (Vec<Row>, Vec<Row>) =
            rows.drain(..).partition(|row| matches(row, filters));
        *rows = kept;
        Ok(removed)
    }

    fn ping(&self) -> Result<(), RemoteError> {
        self.lock().map(|_| ())
    }
}
