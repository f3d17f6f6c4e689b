// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Every variant except [`AuthError::InternalError`] renders the same 401
//! response, so callers cannot tell which check rejected them. The specific
//! reason is only logged.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error};

/// Body text of every authentication failure.
pub const UNAUTHENTICATED_MESSAGE: &str = "Could not validate credentials";

#[derive(Debug)]
pub enum AuthError {
    /// No authorization header present
    MissingAuthHeader,
    /// Invalid authorization header format
    InvalidAuthHeader,
    /// Token is malformed
    MalformedToken,
    /// Token signature is invalid
    InvalidSignature,
    /// Token has expired
    TokenExpired,
    /// Token is not an access token
    WrongTokenType,
    /// Token has been revoked
    Revoked,
    /// Token subject is unknown or inactive
    UnknownUser,
    /// Login with an unknown email or a wrong password
    InvalidCredentials,
    /// Identity infrastructure failed
    InternalError(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: &'static str,
}

impl AuthError {
    /// Error code for logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::WrongTokenType => "wrong_token_type",
            AuthError::Revoked => "revoked",
            AuthError::UnknownUser => "unknown_user",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InternalError(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingAuthHeader => write!(f, "Authorization header is required"),
            AuthError::InvalidAuthHeader => {
                write!(f, "Invalid authorization header format (expected 'Bearer <token>')")
            }
            AuthError::MalformedToken => write!(f, "Token is malformed"),
            AuthError::InvalidSignature => write!(f, "Token signature is invalid"),
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::WrongTokenType => write!(f, "Token is not an access token"),
            AuthError::Revoked => write!(f, "Token has been revoked"),
            AuthError::UnknownUser => write!(f, "Token subject is unknown or inactive"),
            AuthError::InvalidCredentials => write!(f, "Email or password is incorrect"),
            AuthError::InternalError(msg) => write!(f, "Internal authentication error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::InternalError(ref msg) = self {
            error!(error = %msg, "Authentication failed on infrastructure error");
            let body = Json(AuthErrorBody {
                error: "Internal server error",
            });
            return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
        }

        debug!(reason = self.error_code(), "Rejected credentials");
        let body = Json(AuthErrorBody {
            error: UNAUTHENTICATED_MESSAGE,
        });
        (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
            body,
        )
            .into_response()
    }
}
