// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction endpoints.
//!
//! Every mutation is followed by a ledger event so account balances track
//! transaction history. In sync ledger mode the returned transaction already
//! has `is_reconciled = true`; in deferred mode it is returned pending. A
//! sync-mode delete reverses the effect before the record is removed, so a
//! failed reversal fails the request and keeps the record.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use super::accounts::owned_account;
use crate::{
    auth::Auth,
    config::LedgerMode,
    error::ApiError,
    ledger::LedgerEvent,
    models::{CreateTransactionRequest, Transaction, TransactionKind, UpdateTransactionRequest},
    remote::{decode_row, encode_row, tables, Filter},
    state::AppState,
};

/// Filters for the transaction list. All are optional and combined with AND.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct TransactionQuery {
    pub kind: Option<TransactionKind>,
    pub category: Option<String>,
    /// Transactions touching this account (either side of a transfer).
    pub account_id: Option<Uuid>,
    /// Inclusive lower bound on `date`.
    pub start_date: Option<NaiveDate>,
    /// Inclusive upper bound on `date`.
    pub end_date: Option<NaiveDate>,
    pub is_reconciled: Option<bool>,
}

impl TransactionQuery {
    fn filters(&self, owner_id: Uuid) -> Vec<Filter> {
        let mut filters = vec![Filter::eq("owner_id", owner_id)];
        if let Some(kind) = self.kind {
            filters.push(Filter::eq("kind", kind));
        }
        if let Some(category) = &self.category {
            filters.push(Filter::eq("category", category));
        }
        if let Some(start) = self.start_date {
            filters.push(Filter::gte("date", start));
        }
        if let Some(end) = self.end_date {
            filters.push(Filter::lte("date", end));
        }
        if let Some(reconciled) = self.is_reconciled {
            filters.push(Filter::eq("is_reconciled", reconciled));
        }
        filters
    }
}

fn owned(owner_id: Uuid, transaction_id: Uuid) -> Vec<Filter> {
    vec![Filter::eq("id", transaction_id), Filter::eq("owner_id", owner_id)]
}

async fn owned_transaction(state: &AppState, owner_id: Uuid, transaction_id: Uuid) -> Result<Transaction, ApiError> {
    state
        .remote
        .find_as(tables::TRANSACTIONS, owned(owner_id, transaction_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Transaction not found"))
}

/// Check a transaction before it is written and drop account references its
/// kind does not use.
async fn validate(state: &AppState, transaction: &mut Transaction) -> Result<(), ApiError> {
    if transaction.amount <= Decimal::ZERO {
        return Err(ApiError::unprocessable("Amount must be greater than zero"));
    }

    match transaction.kind {
        TransactionKind::Sale | TransactionKind::Expense => {
            if transaction.account_id.is_none() {
                return Err(ApiError::unprocessable(format!(
                    "A {} requires account_id",
                    transaction.kind
                )));
            }
            transaction.from_account_id = None;
            transaction.to_account_id = None;
        }
        TransactionKind::Transfer => {
            let (Some(from), Some(to)) = (transaction.from_account_id, transaction.to_account_id) else {
                return Err(ApiError::unprocessable(
                    "A transfer requires from_account_id and to_account_id",
                ));
            };
            if from == to {
                return Err(ApiError::unprocessable("A transfer needs two distinct accounts"));
            }
            transaction.account_id = None;
        }
        TransactionKind::Other => {
            transaction.from_account_id = None;
            transaction.to_account_id = None;
        }
    }

    let referenced = transaction
        .account_id
        .into_iter()
        .chain(transaction.from_account_id)
        .chain(transaction.to_account_id);
    let mut currencies = Vec::new();
    for account_id in referenced {
        match owned_account(state, transaction.owner_id, account_id).await? {
            Some(account) => currencies.push(account.currency),
            None => return Err(ApiError::unprocessable(format!("Account {account_id} not found"))),
        }
    }
    // Balances are per currency; a transfer cannot convert.
    if currencies.windows(2).any(|pair| pair[0] != pair[1]) {
        return Err(ApiError::unprocessable(
            "A transfer needs two accounts in the same currency",
        ));
    }
    Ok(())
}

/// Run the ledger for a create or update and reflect sync-mode results.
async fn reconcile(state: &AppState, event: LedgerEvent, mut transaction: Transaction) -> Result<Transaction, ApiError> {
    state.reconciler.record_transaction_effect(event).await?;
    if state.reconciler.mode() == LedgerMode::Sync {
        transaction.is_reconciled = true;
    }
    Ok(transaction)
}

#[utoipa::path(
    get,
    path = "/v1/transactions",
    params(TransactionQuery),
    tag = "Transactions",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Transactions of the caller, newest first", body = [Transaction]),
        (status = 401, description = "Unauthorized"),
    )
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let mut transactions: Vec<Transaction> = state
        .remote
        .select_as(tables::TRANSACTIONS, query.filters(caller.user.id))
        .await?;

    if let Some(account_id) = query.account_id {
        transactions.retain(|tx| tx.account_ids().contains(&account_id));
    }
    transactions.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.created_at.cmp(&a.created_at)));
    Ok(Json(transactions))
}

#[utoipa::path(
    post,
    path = "/v1/transactions",
    request_body = CreateTransactionRequest,
    tag = "Transactions",
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Transaction recorded", body = Transaction),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid amount or account references"),
        (status = 500, description = "Balance update failed; transaction left pending"),
    )
)]
pub async fn create_transaction(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let mut draft = Transaction {
        id: Uuid::new_v4(),
        owner_id: caller.user.id,
        amount: request.amount,
        kind: request.kind,
        description: request.description,
        category: request.category,
        date: request.date.unwrap_or_else(|| Utc::now().date_naive()),
        account_id: request.account_id,
        from_account_id: request.from_account_id,
        to_account_id: request.to_account_id,
        is_reconciled: false,
        created_at: None,
        updated_at: Some(Utc::now()),
    };
    validate(&state, &mut draft).await?;

    let stored = state
        .remote
        .insert(tables::TRANSACTIONS, encode_row(&draft)?)
        .await?;
    let transaction: Transaction = decode_row(stored)?;

    let transaction = reconcile(&state, LedgerEvent::Created(transaction.clone()), transaction).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

#[utoipa::path(
    get,
    path = "/v1/transactions/{transaction_id}",
    params(("transaction_id" = Uuid, Path, description = "Transaction identifier")),
    tag = "Transactions",
    security(("bearer" = [])),
    responses(
        (status = 200, body = Transaction),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Transaction not found"),
    )
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, ApiError> {
    owned_transaction(&state, caller.user.id, transaction_id).await.map(Json)
}

#[utoipa::path(
    patch,
    path = "/v1/transactions/{transaction_id}",
    params(("transaction_id" = Uuid, Path, description = "Transaction identifier")),
    request_body = UpdateTransactionRequest,
    tag = "Transactions",
    security(("bearer" = [])),
    responses(
        (status = 200, body = Transaction),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Transaction not found"),
        (status = 422, description = "Invalid amount or account references"),
        (status = 500, description = "Balance update failed; transaction left pending"),
    )
)]
pub async fn update_transaction(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<UpdateTransactionRequest>,
) -> Result<Json<Transaction>, ApiError> {
    let previous = owned_transaction(&state, caller.user.id, transaction_id).await?;

    let mut current = previous.clone();
    if let Some(amount) = request.amount {
        current.amount = amount;
    }
    if let Some(kind) = request.kind {
        current.kind = kind;
    }
    if let Some(description) = request.description {
        current.description = description;
    }
    if request.category.is_some() {
        current.category = request.category;
    }
    if let Some(date) = request.date {
        current.date = date;
    }
    if request.account_id.is_some() {
        current.account_id = request.account_id;
    }
    if request.from_account_id.is_some() {
        current.from_account_id = request.from_account_id;
    }
    if request.to_account_id.is_some() {
        current.to_account_id = request.to_account_id;
    }
    current.is_reconciled = false;
    current.updated_at = Some(Utc::now());
    validate(&state, &mut current).await?;

    let mut patch = encode_row(&current)?;
    for immutable in ["id", "owner_id", "created_at"] {
        patch.remove(immutable);
    }
    let row = state
        .remote
        .update(tables::TRANSACTIONS, owned(caller.user.id, transaction_id), patch)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("Transaction not found"))?;
    let current: Transaction = decode_row(row)?;

    let event = LedgerEvent::Updated {
        previous,
        current: current.clone(),
    };
    reconcile(&state, event, current).await.map(Json)
}

#[utoipa::path(
    delete,
    path = "/v1/transactions/{transaction_id}",
    params(("transaction_id" = Uuid, Path, description = "Transaction identifier")),
    tag = "Transactions",
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Transaction deleted and its effect reversed"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Transaction not found"),
        (status = 500, description = "Reversal failed; transaction kept"),
    )
)]
pub async fn delete_transaction(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(transaction_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    match state.reconciler.mode() {
        LedgerMode::Sync => {
            // Reverse first so a failed reversal leaves the record in place.
            let previous = owned_transaction(&state, caller.user.id, transaction_id).await?;
            state
                .reconciler
                .record_transaction_effect(LedgerEvent::Deleted(previous))
                .await?;
            let deleted = state
                .remote
                .delete(tables::TRANSACTIONS, owned(caller.user.id, transaction_id))
                .await?;
            if deleted.is_empty() {
                return Err(ApiError::not_found("Transaction not found"));
            }
        }
        LedgerMode::Deferred => {
            let deleted = state
                .remote
                .delete(tables::TRANSACTIONS, owned(caller.user.id, transaction_id))
                .await?;
            let Some(row) = deleted.into_iter().next() else {
                return Err(ApiError::not_found("Transaction not found"));
            };
            let previous: Transaction = decode_row(row)?;
            state
                .reconciler
                .record_transaction_effect(LedgerEvent::Deleted(previous))
                .await?;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}
