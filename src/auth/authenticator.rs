// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential to user resolution.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::credentials::{fingerprint, CredentialCodec};
use super::AuthError;
use crate::cache::{IdentityCache, IdentityError};
use crate::models::User;

/// The caller of a protected route.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    /// Fingerprint of the credential the request carried.
    pub fingerprint: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Verifies credentials and resolves them to users.
///
/// Order of checks: signature/expiry/type, revocation, then the user record.
#[derive(Clone)]
pub struct Authenticator {
    codec: Arc<CredentialCodec>,
    identities: IdentityCache,
}

impl Authenticator {
    pub fn new(codec: CredentialCodec, identities: IdentityCache) -> Self {
        Self {
            codec: Arc::new(codec),
            identities,
        }
    }

    pub fn identities(&self) -> &IdentityCache {
        &self.identities
    }

    /// Issue a credential for an identity key.
    pub fn issue(&self, identity_key: &str) -> Result<String, AuthError> {
        self.codec.issue(identity_key)
    }

    /// Lifetime of issued credentials.
    pub fn credential_ttl(&self) -> Duration {
        self.codec.ttl()
    }

    pub async fn authenticate(&self, credential: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.codec.decode(credential)?;

        let fingerprint = fingerprint(credential);
        if self.identities.is_revoked(&fingerprint).await {
            return Err(AuthError::Revoked);
        }

        let user = self
            .identities
            .resolve(&claims.sub)
            .await
            .map_err(|e| match e {
                IdentityError::Unauthenticated => AuthError::UnknownUser,
                IdentityError::Remote(e) => AuthError::InternalError(e.to_string()),
            })?;

        Ok(AuthenticatedUser {
            user,
            fingerprint,
            expires_at: claims.expires_at(),
        })
    }

    /// Revoke the credential the caller authenticated with.
    pub async fn revoke(&self, caller: &AuthenticatedUser) -> Result<(), AuthError> {
        self.identities
            .revoke(&caller.fingerprint, caller.expires_at)
            .await
            .map_err(|e| AuthError::InternalError(e.to_string()))
    }
}
