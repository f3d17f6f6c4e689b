// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger reconciliation
//!
//! Keeps `Account.balance` equal to the sum of the effects of the
//! transactions that touch it.
//!
//! A transaction's effect moves through three states:
//!
//! ```text
//! Pending ──apply──▶ Applied ──reverse──▶ Reversed
//!    ▲                                       │
//!    └────────────── (update) ───────────────┘
//! ```
//!
//! An update reverses whatever effect of the transaction is on the balance
//! and applies the new effect on the new accounts. A delete reverses once.
//! Events of one transaction are applied in the order they were recorded.
//! Reversal is the exact negation of each signed delta, so apply followed by
//! reverse restores the balance to the cent.

pub mod effect;
pub mod reconciler;

use uuid::Uuid;

pub use effect::{LedgerEffect, LedgerLeg};
pub use reconciler::LedgerReconciler;

use crate::models::Transaction;
use crate::remote::RemoteError;

/// Where a transaction's balance effect stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectState {
    /// Recorded, effect not applied yet.
    Pending,
    /// Delta reflected in the account balance(s).
    Applied,
    /// Delta undone.
    Reversed,
}

/// A transaction lifecycle event with balance consequences.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    Created(Transaction),
    /// `previous` is the stored record before the update.
    Updated {
        previous: Transaction,
        current: Transaction,
    },
    Deleted(Transaction),
}

impl LedgerEvent {
    pub fn transaction_id(&self) -> Uuid {
        match self {
            LedgerEvent::Created(tx) | LedgerEvent::Deleted(tx) => tx.id,
            LedgerEvent::Updated { current, .. } => current.id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// An account referenced by a transaction cannot be read.
    #[error("ledger inconsistency: account {0} not found")]
    AccountMissing(Uuid),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
