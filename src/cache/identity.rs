// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity cache: resolved users and revoked credentials.
//!
//! ## Users
//!
//! Users are cached by identity key (email) for `user_ttl`. Once an entry is
//! older than 75% of its TTL it is still served, and a background refresh is
//! spawned so the next request sees fresher data. Concurrent misses for the
//! same key are not coalesced; each fetches and populates the cache.
//!
//! ## Revocations
//!
//! Revoked credential fingerprints are mirrored in memory and reloaded from
//! the durable list every `revocation_ttl`. A fingerprint missing from the
//! set is double-checked with a point lookup, which covers revocations made
//! by other instances since the last reload.
//!
//! **Operators:** if that point lookup fails, the credential is treated as
//! not revoked (fail open). A store outage therefore reopens a window in which
//! a credential revoked on another instance after the last reload is accepted.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

use super::ExpiringCache;
use crate::clock::{Clock, SystemClock};
use crate::models::{RevokedCredential, User};
use crate::remote::{encode_row, tables, Filter, Remote, RemoteError};

/// Entries older than this fraction of their TTL are refreshed ahead of expiry.
const REFRESH_AHEAD_RATIO: f64 = 0.75;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// No active user for the identity key.
    #[error("unknown or inactive user")]
    Unauthenticated,
    #[error("identity lookup failed: {0}")]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub user_ttl: Duration,
    pub user_capacity: usize,
    pub revocation_ttl: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_ttl: Duration::from_secs(300),
            user_capacity: 1000,
            revocation_ttl: Duration::from_secs(600),
        }
    }
}

/// In-memory mirror of the durable revocation list.
#[derive(Debug, Default)]
pub struct RevokedCredentialSet {
    fingerprints: HashSet<String>,
    last_refreshed_at: Option<Instant>,
}

impl RevokedCredentialSet {
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    pub fn insert(&mut self, fingerprint: String) {
        self.fingerprints.insert(fingerprint);
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Never loaded, or loaded at least `ttl` ago.
    pub fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        match self.last_refreshed_at {
            Some(at) => now.saturating_duration_since(at) >= ttl,
            None => true,
        }
    }

    fn replace(&mut self, fingerprints: HashSet<String>, now: Instant) {
        self.fingerprints = fingerprints;
        self.last_refreshed_at = Some(now);
    }

    fn mark_refreshed(&mut self, now: Instant) {
        self.last_refreshed_at = Some(now);
    }
}

/// Snapshot for the operational diagnostics endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CacheDiagnostics {
    pub hit_ratio: f64,
    /// Cached users.
    pub size: usize,
    pub evictions: u64,
    pub revocation_set_size: usize,
}

#[derive(Clone)]
pub struct IdentityCache {
    remote: Remote,
    users: Arc<ExpiringCache<String, User>>,
    revoked: Arc<Mutex<RevokedCredentialSet>>,
    clock: Arc<dyn Clock>,
    revocation_ttl: Duration,
}

impl IdentityCache {
    pub fn new(remote: Remote, config: IdentityConfig) -> Self {
        Self::with_clock(remote, config, Arc::new(SystemClock))
    }

    pub fn with_clock(remote: Remote, config: IdentityConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            users: Arc::new(ExpiringCache::with_clock(
                config.user_capacity,
                config.user_ttl,
                Arc::clone(&clock),
            )),
            revoked: Arc::new(Mutex::new(RevokedCredentialSet::default())),
            clock,
            revocation_ttl: config.revocation_ttl,
        }
    }

    /// Resolve an identity key to an active user.
    pub async fn resolve(&self, identity_key: &str) -> Result<User, IdentityError> {
        if let Some((user, age)) = self.users.get_with_age(identity_key) {
            if age >= self.users.ttl().mul_f64(REFRESH_AHEAD_RATIO) {
                self.spawn_refresh(identity_key.to_string());
            }
            return Ok(user);
        }

        let user = fetch_user(&self.remote, identity_key)
            .await?
            .filter(|user| user.is_active)
            .ok_or(IdentityError::Unauthenticated)?;
        self.users.put(identity_key.to_string(), user.clone());
        Ok(user)
    }

    fn spawn_refresh(&self, identity_key: String) {
        let remote = self.remote.clone();
        let users = Arc::clone(&self.users);
        tokio::spawn(async move {
            match fetch_user(&remote, &identity_key).await {
                Ok(Some(user)) if user.is_active => users.put(identity_key, user),
                Ok(_) => {
                    users.remove(&identity_key);
                }
                Err(e) => {
                    warn!(error = %e, "Background user refresh failed, serving cached entry until expiry");
                }
            }
        });
    }

    /// Whether the credential with this fingerprint has been revoked.
    ///
    /// Fails open when the durable lookup cannot be performed.
    pub async fn is_revoked(&self, fingerprint: &str) -> bool {
        self.refresh_revocations_if_stale().await;

        let known = self.revoked_set().contains(fingerprint);
        if known {
            return true;
        }

        let lookup = self
            .remote
            .select_as::<RevokedCredential>(
                tables::REVOKED_CREDENTIALS,
                vec![Filter::eq("fingerprint", fingerprint)],
            )
            .await;

        match lookup {
            Ok(records) => {
                let now = Utc::now();
                if records.iter().any(|r| is_live(r, now)) {
                    self.revoked_set().insert(fingerprint.to_string());
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Revocation lookup failed; failing open and accepting the credential"
                );
                false
            }
        }
    }

    /// Durably revoke a credential, then record it locally.
    pub async fn revoke(
        &self,
        fingerprint: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), RemoteError> {
        let record = RevokedCredential {
            fingerprint: fingerprint.to_string(),
            revoked_at: Utc::now(),
            expires_at,
        };

        match self
            .remote
            .insert(tables::REVOKED_CREDENTIALS, encode_row(&record)?)
            .await
        {
            Ok(_) => {}
            // Already on the list.
            Err(e) if e.status_code == Some(409) => {}
            Err(e) => return Err(e),
        }

        self.revoked_set().insert(record.fingerprint);
        Ok(())
    }

    pub fn diagnostics(&self) -> CacheDiagnostics {
        let stats = self.users.stats();
        CacheDiagnostics {
            hit_ratio: stats.hit_ratio(),
            size: self.users.len(),
            evictions: stats.evictions,
            revocation_set_size: self.revoked_set().len(),
        }
    }

    async fn refresh_revocations_if_stale(&self) {
        let now = self.clock.now();
        if !self.revoked_set().is_stale(now, self.revocation_ttl) {
            return;
        }

        let loaded = self
            .remote
            .select_as::<RevokedCredential>(tables::REVOKED_CREDENTIALS, Vec::new())
            .await;

        match loaded {
            Ok(records) => {
                let cutoff = Utc::now();
                let fingerprints: HashSet<String> = records
                    .into_iter()
                    .filter(|r| is_live(r, cutoff))
                    .map(|r| r.fingerprint)
                    .collect();
                debug!(count = fingerprints.len(), "Reloaded revoked credential set");
                self.revoked_set().replace(fingerprints, now);
            }
            Err(e) => {
                // Keep the previous set and wait a full interval before the
                // next reload; point lookups still cover the gap.
                warn!(error = %e, "Failed to reload revoked credential set, keeping previous set");
                self.revoked_set().mark_refreshed(now);
            }
        }
    }

    fn revoked_set(&self) -> MutexGuard<'_, RevokedCredentialSet> {
        self.revoked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Whether a revocation still covers a credential that has not expired.
fn is_live(record: &RevokedCredential, now: DateTime<Utc>) -> bool {
    record.expires_at.is_none_or(|at| at > now)
}

async fn fetch_user(remote: &Remote, identity_key: &str) -> Result<Option<User>, RemoteError> {
    remote
        .find_as(tables::USERS, vec![Filter::eq("email", identity_key)])
        .await
}
