// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # In-process caches
//!
//! - [`ExpiringCache`] - generic TTL + LRU cache with hit/miss accounting
//! - [`IdentityCache`] - resolved users and revoked credential fingerprints
//!
//! Caches are process-local. Running several instances means each keeps its
//! own copy and its own staleness window.

pub mod expiring;
pub mod identity;

pub use expiring::{CacheEntry, CacheStats, ExpiringCache};
pub use identity::{CacheDiagnostics, IdentityCache, IdentityConfig, IdentityError, RevokedCredentialSet};
