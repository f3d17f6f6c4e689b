// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer credential authentication for the API.
//!
//! ## Auth Flow
//!
//! 1. Client sends `Authorization: Bearer <credential>`
//! 2. Server:
//!    - Verifies the HS256 signature, expiry (60 s leeway) and `token_type`
//!    - Fingerprints the credential (SHA-256) and checks the revocation list
//!    - Resolves `sub` to an active user through the identity cache
//!
//! Credentials are obtained from `POST /v1/auth/login` with an email and a
//! password. Passwords are stored as Argon2id PHC strings.
//!
//! ## Security
//!
//! - All non-health endpoints require authentication
//! - Every rejection renders the same 401 response
//! - Raw credentials are never stored, only their fingerprints

pub mod authenticator;
pub mod credentials;
pub mod error;
pub mod extractor;
pub mod password;

pub use authenticator::{AuthenticatedUser, Authenticator};
pub use credentials::{fingerprint, Claims, CredentialCodec};
pub use error::AuthError;
pub use extractor::Auth;
