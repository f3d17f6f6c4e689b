// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    cache::CacheDiagnostics,
    models::{
        Account, BalanceSummary, CreateAccountRequest, CreateTransactionRequest, CurrencyBalance,
        LoginRequest, RegisterRequest, TokenResponse, Transaction, TransactionKind, UpdateAccountRequest,
        UpdateTransactionRequest, User,
    },
    rate_limit::enforce_rate_limit,
    state::AppState,
};

pub mod accounts;
pub mod auth;
pub mod diagnostics;
pub mod health;
pub mod transactions;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route(
            "/accounts",
            get(accounts::list_accounts).post(accounts::create_account),
        )
        .route("/accounts/balance", get(accounts::balance_summary))
        .route(
            "/accounts/{account_id}",
            get(accounts::get_account)
                .patch(accounts::update_account)
                .delete(accounts::delete_account),
        )
        .route(
            "/transactions",
            get(transactions::list_transactions).post(transactions::create_transaction),
        )
        .route(
            "/transactions/{transaction_id}",
            get(transactions::get_transaction)
                .patch(transactions::update_transaction)
                .delete(transactions::delete_transaction),
        )
        .route("/diagnostics/cache", get(diagnostics::cache_diagnostics));

    let rate_limiter = state.rate_limiter.clone();

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn_with_state(rate_limiter, enforce_rate_limit))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::register,
        auth::login,
        auth::me,
        auth::logout,
        accounts::list_accounts,
        accounts::create_account,
        accounts::balance_summary,
        accounts::get_account,
        accounts::update_account,
        accounts::delete_account,
        transactions::list_transactions,
        transactions::create_transaction,
        transactions::get_transaction,
        transactions::update_transaction,
        transactions::delete_transaction,
        diagnostics::cache_diagnostics
    ),
    components(
        schemas(
            User,
            RegisterRequest,
            LoginRequest,
            TokenResponse,
            Account,
            CreateAccountRequest,
            UpdateAccountRequest,
            CurrencyBalance,
            BalanceSummary,
            Transaction,
            TransactionKind,
            CreateTransactionRequest,
            UpdateTransactionRequest,
            CacheDiagnostics,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Registration, login, current user and logout"),
        (name = "Accounts", description = "Accounts and balances"),
        (name = "Transactions", description = "Sales, expenses and transfers"),
        (name = "Diagnostics", description = "Operational statistics")
    )
)]
struct ApiDoc;

#[cfg(test)]
pub(crate) mod testing {
    use crate::auth::AuthenticatedUser;
    use crate::state::AppState;

    /// Seed a user and authenticate a freshly issued credential for it.
    pub async fn caller(state: &AppState, email: &str) -> AuthenticatedUser {
        let name = email.split('@').next().unwrap_or(email);
        state.seed_user(email, name).await;
        let token = state.authenticator.issue(email).unwrap();
        state.authenticator.authenticate(&token).await.unwrap()
    }
}
