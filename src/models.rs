// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! This module defines the records kept in the remote store and the request
//! and response structures used by the REST API. All public types derive
//! `Serialize`/`Deserialize` and `ToSchema` for JSON handling and OpenAPI
//! documentation.
//!
//! ## Money
//!
//! Monetary values are [`Decimal`]s. They are serialized as exact decimal
//! strings (`"250.50"`) both on the wire and in store rows, and accepted as
//! either strings or JSON numbers on input. Binary floats are never used for
//! balances or amounts.
//!
//! ## Model Categories
//!
//! - **Users**: Identities resolved from credentials
//! - **Accounts**: Balances owned by a user, one currency each
//! - **Transactions**: Sales, expenses and transfers that move balances

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn default_true() -> bool {
    true
}

fn default_currency() -> String {
    "USD".to_string()
}

// =============================================================================
// Users
// =============================================================================

/// A registered user as stored in the `users` table.
///
/// Rows may carry more columns (password hashes and the like); they are
/// ignored on decode and never leave the service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    /// Login identity; the `sub` claim of issued credentials.
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Request to create a user.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    /// At least 8 characters.
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Issued bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always `"bearer"`.
    pub token_type: String,
    /// Lifetime of the credential in seconds.
    pub expires_in: u64,
}

/// Entry of the durable revocation list. Only the fingerprint of a
/// credential is ever stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevokedCredential {
    pub fingerprint: String,
    pub revoked_at: DateTime<Utc>,
    /// When the credential would have expired anyway. Entries past this
    /// point no longer need to be held in memory.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Accounts
// =============================================================================

/// A balance-holding account.
///
/// `balance` only ever changes through ledger reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[schema(value_type = String, example = "250.50")]
    pub balance: Decimal,
    /// ISO 4217 currency code.
    pub currency: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Request to open an account. New accounts always start at a zero balance.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateAccountRequest {
    pub name: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Partial update of an account. The balance is not updatable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Sum of balances for one currency.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct CurrencyBalance {
    pub currency: String,
    #[schema(value_type = String, example = "1024.00")]
    pub balance: Decimal,
    pub accounts: usize,
}

/// Response for `GET /v1/accounts/balance`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceSummary {
    pub totals: Vec<CurrencyBalance>,
}

// =============================================================================
// Transactions
// =============================================================================

/// Kind of a transaction, deciding the sign of its ledger effect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Credits `account_id`.
    Sale,
    /// Debits `account_id`.
    Expense,
    /// Moves the amount from `from_account_id` to `to_account_id`.
    Transfer,
    /// Recorded for bookkeeping only; no balance effect.
    Other,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Sale => "sale",
            TransactionKind::Expense => "expense",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Other => "other",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded transaction.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Transaction {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Always positive; the sign comes from `kind`.
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
    pub kind: TransactionKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    pub date: NaiveDate,
    /// Account affected by a sale or an expense.
    #[serde(default)]
    pub account_id: Option<Uuid>,
    /// Source account of a transfer.
    #[serde(default)]
    pub from_account_id: Option<Uuid>,
    /// Destination account of a transfer.
    #[serde(default)]
    pub to_account_id: Option<Uuid>,
    /// Whether the ledger effect of this transaction has been applied.
    #[serde(default)]
    pub is_reconciled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Accounts whose balance this transaction touches.
    pub fn account_ids(&self) -> Vec<Uuid> {
        match self.kind {
            TransactionKind::Sale | TransactionKind::Expense => self.account_id.into_iter().collect(),
            TransactionKind::Transfer => self
                .from_account_id
                .into_iter()
                .chain(self.to_account_id)
                .collect(),
            TransactionKind::Other => Vec::new(),
        }
    }
}

/// Request to record a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTransactionRequest {
    #[schema(value_type = String, example = "250.50")]
    pub amount: Decimal,
    pub kind: TransactionKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Defaults to today (UTC).
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub account_id: Option<Uuid>,
    #[serde(default)]
    pub from_account_id: Option<Uuid>,
    #[serde(default)]
    pub to_account_id: Option<Uuid>,
}

/// Partial update of a transaction. Omitted fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateTransactionRequest {
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub kind: Option<TransactionKind>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub account_id: Option<Uuid>,
    #[serde(default)]
    pub from_account_id: Option<Uuid>,
    #[serde(default)]
    pub to_account_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_transaction(kind: TransactionKind) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            amount: Decimal::from_str("250.50").unwrap(),
            kind,
            description: String::new(),
            category: None,
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            account_id: Some(Uuid::new_v4()),
            from_account_id: Some(Uuid::new_v4()),
            to_account_id: Some(Uuid::new_v4()),
            is_reconciled: false,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn money_serializes_as_exact_string() {
        let tx = sample_transaction(TransactionKind::Sale);
        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["amount"], "250.50");
        assert_eq!(value["kind"], "sale");
    }

    #[test]
    fn money_accepts_strings_and_numbers() {
        let from_string: CreateTransactionRequest =
            serde_json::from_str(r#"{"amount":"0.10","kind":"expense"}"#).unwrap();
        assert_eq!(from_string.amount, Decimal::from_str("0.10").unwrap());

        let from_number: CreateTransactionRequest =
            serde_json::from_str(r#"{"amount":12,"kind":"other"}"#).unwrap();
        assert_eq!(from_number.amount, Decimal::from(12));
    }

    #[test]
    fn user_rows_ignore_extra_columns() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(),
            "email": "ada@example.com",
            "hashed_password": "$argon2id$...",
        }))
        .unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert!(user.is_active);
    }

    #[test]
    fn account_ids_follow_kind() {
        let sale = sample_transaction(TransactionKind::Sale);
        assert_eq!(sale.account_ids(), vec![sale.account_id.unwrap()]);

        let transfer = sample_transaction(TransactionKind::Transfer);
        assert_eq!(
            transfer.account_ids(),
            vec![transfer.from_account_id.unwrap(), transfer.to_account_id.unwrap()]
        );

        assert!(sample_transaction(TransactionKind::Other).account_ids().is_empty());
    }
}
