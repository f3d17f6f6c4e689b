// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signed balance deltas of a transaction.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Transaction, TransactionKind};

/// One account's share of a ledger effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerLeg {
    pub account_id: Uuid,
    pub delta: Decimal,
}

/// The signed deltas a transaction causes.
///
/// - `sale` credits `account_id`
/// - `expense` debits `account_id`
/// - `transfer` debits `from_account_id` and credits `to_account_id`
/// - `other`, and any leg whose account is unset, has no effect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerEffect {
    legs: Vec<LedgerLeg>,
}

impl LedgerEffect {
    pub fn of(transaction: &Transaction) -> Self {
        let amount = transaction.amount;
        let legs = match transaction.kind {
            TransactionKind::Sale => leg(transaction.account_id, amount).into_iter().collect(),
            TransactionKind::Expense => leg(transaction.account_id, -amount).into_iter().collect(),
            TransactionKind::Transfer => leg(transaction.from_account_id, -amount)
                .into_iter()
                .chain(leg(transaction.to_account_id, amount))
                .collect(),
            TransactionKind::Other => Vec::new(),
        };
        Self { legs }
    }

    /// The effect that undoes this one: every delta negated.
    pub fn reversed(&self) -> Self {
        Self {
            legs: self
                .legs
                .iter()
                .map(|leg| LedgerLeg {
                    account_id: leg.account_id,
                    delta: -leg.delta,
                })
                .collect(),
        }
    }

    pub fn legs(&self) -> &[LedgerLeg] {
        &self.legs
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }
}

impl FromIterator<LedgerLeg> for LedgerEffect {
    fn from_iter<I: IntoIterator<Item = LedgerLeg>>(legs: I) -> Self {
        Self {
            legs: legs.into_iter().collect(),
        }
    }
}

fn leg(account_id: Option<Uuid>, delta: Decimal) -> Option<LedgerLeg> {
    account_id.map(|account_id| LedgerLeg { account_id, delta })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn tx(kind: TransactionKind, amount: &str) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            amount: Decimal::from_str(amount).unwrap(),
            kind,
            description: String::new(),
            category: None,
            date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            account_id: Some(Uuid::from_u128(1)),
            from_account_id: Some(Uuid::from_u128(2)),
            to_account_id: Some(Uuid::from_u128(3)),
            is_reconciled: false,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn sale_credits_and_expense_debits() {
        let sale = LedgerEffect::of(&tx(TransactionKind::Sale, "100.00"));
        assert_eq!(
            sale.legs(),
            &[LedgerLeg {
                account_id: Uuid::from_u128(1),
                delta: Decimal::from_str("100.00").unwrap()
            }]
        );

        let expense = LedgerEffect::of(&tx(TransactionKind::Expense, "100.00"));
        assert_eq!(expense.legs()[0].delta, Decimal::from_str("-100.00").unwrap());
    }

    #[test]
    fn transfer_has_two_opposite_legs() {
        let effect = LedgerEffect::of(&tx(TransactionKind::Transfer, "40"));
        let legs = effect.legs();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].account_id, Uuid::from_u128(2));
        assert_eq!(legs[0].delta, Decimal::from(-40));
        assert_eq!(legs[1].account_id, Uuid::from_u128(3));
        assert_eq!(legs[1].delta, Decimal::from(40));
    }

    #[test]
    fn other_and_unassigned_have_no_effect() {
        assert!(LedgerEffect::of(&tx(TransactionKind::Other, "5")).is_empty());

        let mut unassigned = tx(TransactionKind::Sale, "5");
        unassigned.account_id = None;
        assert!(LedgerEffect::of(&unassigned).is_empty());
    }

    #[test]
    fn reversal_negates_every_leg() {
        let effect = LedgerEffect::of(&tx(TransactionKind::Transfer, "0.10"));
        let reversed = effect.reversed();
        for (leg, back) in effect.legs().iter().zip(reversed.legs()) {
            assert_eq!(leg.account_id, back.account_id);
            assert_eq!(leg.delta + back.delta, Decimal::ZERO);
        }
        assert_eq!(reversed.reversed(), effect);
    }

    #[test]
    fn collects_a_subset_of_legs() {
        let effect = LedgerEffect::of(&tx(TransactionKind::Transfer, "40"));
        let credit: LedgerEffect = effect.legs().iter().copied().filter(|leg| leg.delta > Decimal::ZERO).collect();
        assert_eq!(credit.legs().len(), 1);
        assert_eq!(credit.legs()[0].account_id, Uuid::from_u128(3));
    }
}
