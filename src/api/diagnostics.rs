// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::{auth::Auth, cache::CacheDiagnostics, state::AppState};

/// Identity cache statistics for operators.
#[utoipa::path(
    get,
    path = "/v1/diagnostics/cache",
    tag = "Diagnostics",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Cache statistics", body = CacheDiagnostics),
        (status = 401, description = "Unauthorized"),
    )
)]
pub async fn cache_diagnostics(State(state): State<AppState>, Auth(_caller): Auth) -> Json<CacheDiagnostics> {
    Json(state.authenticator.identities().diagnostics())
}
