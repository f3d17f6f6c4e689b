// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Registration and session endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{
        password::{hash_password, verify_password, MIN_PASSWORD_LEN},
        Auth, AuthError,
    },
    error::ApiError,
    models::{LoginRequest, RegisterRequest, TokenResponse, User},
    remote::{decode_row, tables, Filter},
    state::AppState,
};

/// The columns of a user row that login needs.
#[derive(Deserialize)]
struct StoredLogin {
    email: String,
    #[serde(default)]
    password_hash: Option<String>,
    #[serde(default = "active")]
    is_active: bool,
}

fn active() -> bool {
    true
}

fn normalize_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.contains('@') => Ok(email),
        _ => Err(ApiError::unprocessable("Invalid email address")),
    }
}

/// Create a user with a password.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    tag = "Auth",
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Email already registered"),
        (status = 422, description = "Invalid email or password too short"),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let email = normalize_email(&request.email)?;
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::unprocessable(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let existing = state
        .remote
        .select(tables::USERS, vec![Filter::eq("email", &email)])
        .await?;
    if !existing.is_empty() {
        return Err(ApiError::conflict("Email already registered"));
    }

    let password = request.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)?;

    let row = json!({
        "id": Uuid::new_v4(),
        "email": email,
        "name": request.name.trim(),
        "password_hash": password_hash,
        "is_active": true,
    });
    let Value::Object(row) = row else {
        return Err(ApiError::internal("user row is not an object"));
    };

    let user: User = decode_row(state.remote.insert(tables::USERS, row).await?)?;
    info!(user_id = %user.id, "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

/// Exchange an email and password for a bearer credential.
///
/// Unknown emails, inactive users and wrong passwords are rejected alike.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    tag = "Auth",
    responses(
        (status = 200, description = "Credential issued", body = TokenResponse),
        (status = 401, description = "Unauthorized - invalid email or password"),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let email = request.email.trim().to_ascii_lowercase();
    let stored: Option<StoredLogin> = state
        .remote
        .find_as(tables::USERS, vec![Filter::eq("email", &email)])
        .await
        .map_err(|e| AuthError::InternalError(e.to_string()))?;

    let Some((email, password_hash)) = stored
        .filter(|user| user.is_active)
        .and_then(|user| user.password_hash.map(|hash| (user.email, hash)))
    else {
        return Err(AuthError::InvalidCredentials);
    };

    let password = request.password;
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
        .await
        .map_err(|e| AuthError::InternalError(e.to_string()))?;
    if !verified {
        return Err(AuthError::InvalidCredentials);
    }

    Ok(Json(TokenResponse {
        access_token: state.authenticator.issue(&email)?,
        token_type: "bearer".to_string(),
        expires_in: state.authenticator.credential_ttl().as_secs(),
    }))
}

/// Get the current authenticated user.
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    tag = "Auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "User information", body = User),
        (status = 401, description = "Unauthorized - invalid or missing credential"),
    )
)]
pub async fn me(Auth(caller): Auth) -> Json<User> {
    Json(caller.user)
}

/// Revoke the credential used for this request.
///
/// Later requests carrying the same credential are rejected with 401.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Credential revoked"),
        (status = 401, description = "Unauthorized - invalid or missing credential"),
    )
)]
pub async fn logout(State(state): State<AppState>, Auth(caller): Auth) -> Result<StatusCode, AuthError> {
    state.authenticator.revoke(&caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::caller;
    use crate::remote::Row;

    fn registration(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            name: "Ada".into(),
        }
    }

    fn credentials(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn me_returns_resolved_user() {
        let state = AppState::for_tests();
        let ada = caller(&state, "ada@example.com").await;

        let Json(user) = me(Auth(ada.clone())).await;
        assert_eq!(user, ada.user);
    }

    #[tokio::test]
    async fn logout_revokes_presented_credential() {
        let state = AppState::for_tests();
        state.seed_user("ada@example.com", "Ada").await;
        let token = state.authenticator.issue("ada@example.com").unwrap();
        let ada = state.authenticator.authenticate(&token).await.unwrap();

        let status = logout(State(state.clone()), Auth(ada)).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let result = state.authenticator.authenticate(&token).await;
        assert!(matches!(result, Err(AuthError::Revoked)));
    }

    #[tokio::test]
    async fn registered_user_can_log_in_and_use_the_credential() {
        let state = AppState::for_tests();

        let (status, Json(user)) = register(State(state.clone()), Json(registration(" Ada@Example.com ", "lovelace1815")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user.email, "ada@example.com");
        assert!(user.is_active);

        let Json(token) = login(State(state.clone()), Json(credentials("ada@example.com", "lovelace1815")))
            .await
            .unwrap();
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.expires_in, 30 * 60);

        let caller = state.authenticator.authenticate(&token.access_token).await.unwrap();
        assert_eq!(caller.user.id, user.id);
    }

    #[tokio::test]
    async fn stored_password_is_hashed() {
        let state = AppState::for_tests();
        register(State(state.clone()), Json(registration("ada@example.com", "lovelace1815")))
            .await
            .unwrap();

        let rows = state
            .remote
            .select(tables::USERS, vec![Filter::eq("email", "ada@example.com")])
            .await
            .unwrap();
        let hash = rows[0]["password_hash"].as_str().unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("lovelace1815"));
    }

    #[tokio::test]
    async fn registration_is_validated() {
        let state = AppState::for_tests();

        let err = register(State(state.clone()), Json(registration("not-an-email", "lovelace1815")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        let err = register(State(state.clone()), Json(registration("ada@example.com", "short")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        register(State(state.clone()), Json(registration("ada@example.com", "lovelace1815")))
            .await
            .unwrap();
        let err = register(State(state), Json(registration("ADA@example.com", "another-one")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let state = AppState::for_tests();
        register(State(state.clone()), Json(registration("ada@example.com", "lovelace1815")))
            .await
            .unwrap();
        register(State(state.clone()), Json(registration("bob@example.com", "babbage1791")))
            .await
            .unwrap();
        let mut deactivate = Row::new();
        deactivate.insert("is_active".into(), false.into());
        state
            .remote
            .update(tables::USERS, vec![Filter::eq("email", "bob@example.com")], deactivate)
            .await
            .unwrap();
        // Seeded without a password: can never log in.
        state.seed_user("eve@example.com", "Eve").await;

        for (email, password) in [
            ("ada@example.com", "wrong-password"),
            ("nobody@example.com", "lovelace1815"),
            ("bob@example.com", "babbage1791"),
            ("eve@example.com", ""),
        ] {
            let result = login(State(state.clone()), Json(credentials(email, password))).await;
            assert!(matches!(result, Err(AuthError::InvalidCredentials)), "{email}");
        }
    }
}
