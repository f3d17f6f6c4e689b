// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account endpoints.
//!
//! Accounts are always scoped to the caller. Balances are read-only here;
//! they only move through ledger reconciliation.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::Auth,
    error::ApiError,
    models::{Account, BalanceSummary, CreateAccountRequest, CurrencyBalance, UpdateAccountRequest},
    remote::{decode_row, tables, Filter, Row},
    state::AppState,
};

fn owned(owner_id: Uuid, account_id: Uuid) -> Vec<Filter> {
    vec![Filter::eq("id", account_id), Filter::eq("owner_id", owner_id)]
}

/// Load one of the caller's accounts.
pub(crate) async fn owned_account(
    state: &AppState,
    owner_id: Uuid,
    account_id: Uuid,
) -> Result<Option<Account>, ApiError> {
    Ok(state
        .remote
        .find_as(tables::ACCOUNTS, owned(owner_id, account_id))
        .await?)
}

/// Whether any of the owner's transactions points at the account.
async fn is_referenced(state: &AppState, owner_id: Uuid, account_id: Uuid) -> Result<bool, ApiError> {
    for column in ["account_id", "from_account_id", "to_account_id"] {
        let rows = state
            .remote
            .select(
                tables::TRANSACTIONS,
                vec![Filter::eq("owner_id", owner_id), Filter::eq(column, account_id)],
            )
            .await?;
        if !rows.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn normalize_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::unprocessable("Account name must not be empty"));
    }
    Ok(name.to_string())
}

fn normalize_currency(currency: &str) -> Result<String, ApiError> {
    let code = currency.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ApiError::unprocessable(format!(
            "Invalid currency code: {currency:?}"
        )));
    }
    Ok(code)
}

#[utoipa::path(
    get,
    path = "/v1/accounts",
    tag = "Accounts",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Accounts of the caller", body = [Account]),
        (status = 401, description = "Unauthorized"),
    )
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    Auth(caller): Auth,
) -> Result<Json<Vec<Account>>, ApiError> {
    let mut accounts: Vec<Account> = state
        .remote
        .select_as(tables::ACCOUNTS, vec![Filter::eq("owner_id", caller.user.id)])
        .await?;
    accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
    Ok(Json(accounts))
}

#[utoipa::path(
    post,
    path = "/v1/accounts",
    request_body = CreateAccountRequest,
    tag = "Accounts",
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Account opened with a zero balance", body = Account),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid name or currency"),
    )
)]
pub async fn create_account(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let name = normalize_name(&request.name)?;
    let currency = normalize_currency(&request.currency)?;

    let row = json!({
        "id": Uuid::new_v4(),
        "owner_id": caller.user.id,
        "name": name,
        "balance": Decimal::new(0, 2),
        "currency": currency,
        "is_active": true,
        "updated_at": Utc::now(),
    });
    let Value::Object(row) = row else {
        return Err(ApiError::internal("account row is not an object"));
    };

    let stored = state.remote.insert(tables::ACCOUNTS, row).await?;
    let account: Account = decode_row(stored)?;
    Ok((StatusCode::CREATED, Json(account)))
}

#[utoipa::path(
    get,
    path = "/v1/accounts/balance",
    tag = "Accounts",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Balance totals per currency", body = BalanceSummary),
        (status = 401, description = "Unauthorized"),
    )
)]
pub async fn balance_summary(
    State(state): State<AppState>,
    Auth(caller): Auth,
) -> Result<Json<BalanceSummary>, ApiError> {
    let accounts: Vec<Account> = state
        .remote
        .select_as(tables::ACCOUNTS, vec![Filter::eq("owner_id", caller.user.id)])
        .await?;
    Ok(Json(summarize(&accounts)))
}

/// Per-currency totals over active accounts, ordered by currency code.
fn summarize(accounts: &[Account]) -> BalanceSummary {
    let mut totals: BTreeMap<&str, (Decimal, usize)> = BTreeMap::new();
    for account in accounts.iter().filter(|a| a.is_active) {
        let entry = totals.entry(account.currency.as_str()).or_default();
        entry.0 += account.balance;
        entry.1 += 1;
    }

    BalanceSummary {
        totals: totals
            .into_iter()
            .map(|(currency, (balance, accounts))| CurrencyBalance {
                currency: currency.to_string(),
                balance,
                accounts,
            })
            .collect(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/accounts/{account_id}",
    params(("account_id" = Uuid, Path, description = "Account identifier")),
    tag = "Accounts",
    security(("bearer" = [])),
    responses(
        (status = 200, body = Account),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Account not found"),
    )
)]
pub async fn get_account(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, ApiError> {
    owned_account(&state, caller.user.id, account_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Account not found"))
}

#[utoipa::path(
    patch,
    path = "/v1/accounts/{account_id}",
    params(("account_id" = Uuid, Path, description = "Account identifier")),
    request_body = UpdateAccountRequest,
    tag = "Accounts",
    security(("bearer" = [])),
    responses(
        (status = 200, body = Account),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Account not found"),
        (status = 422, description = "Invalid name or currency, or currency change on a used account"),
    )
)]
pub async fn update_account(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(account_id): Path<Uuid>,
    Json(request): Json<UpdateAccountRequest>,
) -> Result<Json<Account>, ApiError> {
    let existing = owned_account(&state, caller.user.id, account_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    let mut patch = Row::new();
    if let Some(name) = &request.name {
        patch.insert("name".into(), normalize_name(name)?.into());
    }
    if let Some(currency) = &request.currency {
        let currency = normalize_currency(currency)?;
        if currency != existing.currency
            && (!existing.balance.is_zero() || is_referenced(&state, caller.user.id, account_id).await?)
        {
            return Err(ApiError::unprocessable(
                "Currency can only change on an unused account with a zero balance",
            ));
        }
        patch.insert("currency".into(), currency.into());
    }
    if let Some(is_active) = request.is_active {
        patch.insert("is_active".into(), is_active.into());
    }
    if patch.is_empty() {
        return Ok(Json(existing));
    }
    patch.insert("updated_at".into(), Utc::now().to_rfc3339().into());

    let updated = state
        .remote
        .update(tables::ACCOUNTS, owned(caller.user.id, account_id), patch)
        .await?;
    let row = updated
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("Account not found"))?;
    Ok(Json(decode_row(row)?))
}

#[utoipa::path(
    delete,
    path = "/v1/accounts/{account_id}",
    params(("account_id" = Uuid, Path, description = "Account identifier")),
    tag = "Accounts",
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Account deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Transactions still reference the account"),
    )
)]
pub async fn delete_account(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(account_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if is_referenced(&state, caller.user.id, account_id).await? {
        return Err(ApiError::conflict(
            "Account has transactions; deactivate it instead",
        ));
    }
    let deleted = state
        .remote
        .delete(tables::ACCOUNTS, owned(caller.user.id, account_id))
        .await?;
    if deleted.is_empty() {
        return Err(ApiError::not_found("Account not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}
