// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Store doubles shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Filter, MemoryStore, Remote, RemoteCallExecutor, RemoteError, RemoteStore, RetryPolicy, Row};

/// [`MemoryStore`] that counts reads and can be switched into a failing mode,
/// for every call or for updates of one table.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing: AtomicBool,
    failing_updates: Mutex<Option<&'static str>>,
    selects: AtomicUsize,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    /// Fail every update of `table`; `None` heals.
    pub fn fail_updates_on(&self, table: Option<&'static str>) {
        *self.failing_updates.lock().unwrap() = table;
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RemoteError::network("connection refused"))
        } else {
            Ok(())
        }
    }
}

impl RemoteStore for FlakyStore {
    fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, RemoteError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.select(table, filters)
    }

    fn insert(&self, table: &str, row: &Row) -> Result<Row, RemoteError> {
        self.check()?;
        self.inner.insert(table, row)
    }

    fn update(&self, table: &str, filters: &[Filter], patch: &Row) -> Result<Vec<Row>, RemoteError> {
        self.check()?;
        if self.failing_updates.lock().unwrap().is_some_and(|failing| failing == table) {
            return Err(RemoteError::network("connection reset"));
        }
        self.inner.update(table, filters, patch)
    }

    fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, RemoteError> {
        self.check()?;
        self.inner.delete(table, filters)
    }

    fn ping(&self) -> Result<(), RemoteError> {
        self.check()
    }
}

/// A [`Remote`] over `store` with a fast, two-attempt retry policy.
pub fn fast_remote(store: Arc<FlakyStore>) -> Remote {
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        attempt_timeout: Duration::from_secs(5),
    };
    Remote::new(store, Arc::new(RemoteCallExecutor::new(policy, 4)))
}
