// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{Authenticator, CredentialCodec};
use crate::cache::IdentityCache;
use crate::config::AppConfig;
use crate::ledger::LedgerReconciler;
use crate::rate_limit::RateLimiter;
use crate::remote::{Remote, RemoteCallExecutor, RemoteStore};

/// Services shared by every handler.
///
/// Built once at start-up from [`AppConfig`]; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub remote: Remote,
    pub authenticator: Authenticator,
    pub rate_limiter: Arc<RateLimiter>,
    pub reconciler: LedgerReconciler,
}

impl AppState {
    pub fn new(config: &AppConfig, store: Arc<dyn RemoteStore>) -> Self {
        let executor = Arc::new(RemoteCallExecutor::new(config.retry.clone(), config.pool_size));
        let remote = Remote::new(store, executor);

        let identities = IdentityCache::new(remote.clone(), config.identity.clone());
        let codec = CredentialCodec::new(&config.secret_key, config.credential_ttl);

        Self {
            authenticator: Authenticator::new(codec, identities),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            reconciler: LedgerReconciler::new(remote.clone(), config.ledger_mode),
            remote,
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl AppState {
    /// State over a fresh in-memory store with test configuration.
    pub fn for_tests() -> Self {
        Self::with_config(&AppConfig::for_tests())
    }

    pub fn with_config(config: &AppConfig) -> Self {
        Self::new(config, Arc::new(crate::remote::MemoryStore::new()))
    }

    /// Insert an active user and return it as stored.
    pub async fn seed_user(&self, email: &str, name: &str) -> crate::models::User {
        let mut row = crate::remote::Row::new();
        row.insert("email".into(), email.into());
        row.insert("name".into(), name.into());
        row.insert("is_active".into(), true.into());

        let stored = self
            .remote
            .insert(crate::remote::tables::USERS, row)
            .await
            .unwrap_or_else(|e| panic!("failed to seed user: {e}"));
        crate::remote::decode_row(stored).unwrap_or_else(|e| panic!("seeded user is malformed: {e}"))
    }
}
