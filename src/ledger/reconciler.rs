// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Applies and reverses ledger effects against stored account balances.
//!
//! ## Serialization
//!
//! Each balance update is a read-modify-write through the remote store. A
//! per-account async lease serializes those within the process, so two
//! reconciliations of the same account can no longer clobber each other.
//! Events of one transaction are chained: each waits for the previous event
//! recorded for that transaction, whether it runs inline or deferred.
//! Instances sharing a store are not coordinated.
//!
//! ## What is on the balance
//!
//! The stored `is_reconciled` flag lags behind deferred work and cannot be
//! written atomically with a balance. The reconciler therefore remembers the
//! effect each recent transaction actually left on the balance, including
//! partial transfers, and reverses exactly that. Transactions it has no
//! record of fall back to the stored flag.
//!
//! ## Execution modes
//!
//! - [`LedgerMode::Sync`]: the effect is applied before the mutating request
//!   returns; failures fail the request and leave the transaction pending.
//! - [`LedgerMode::Deferred`]: the effect is applied on a tracked background
//!   task after the response. Failures are logged with the transaction id and
//!   need manual reconciliation. [`LedgerReconciler::shutdown`] waits for
//!   in-flight tasks.
//!
//! Applying an effect is not idempotent. Each lifecycle event of a
//! transaction must be recorded exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{EffectState, LedgerEffect, LedgerError, LedgerEvent};
use crate::cache::ExpiringCache;
use crate::config::LedgerMode;
use crate::models::{Account, Transaction};
use crate::remote::{tables, Filter, Remote, Row};

/// Transactions whose balance effect is remembered.
const LANDED_CAPACITY: usize = 10_000;
/// How long a remembered effect outranks the stored `is_reconciled` flag.
const LANDED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

type Chains = DashMap<Uuid, (u64, oneshot::Receiver<()>)>;

#[derive(Clone)]
pub struct LedgerReconciler {
    remote: Remote,
    mode: LedgerMode,
    leases: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    chains: Arc<Chains>,
    sequence: Arc<AtomicU64>,
    landed: Arc<ExpiringCache<Uuid, LedgerEffect>>,
    tasks: TaskTracker,
}

/// A place in one transaction's event chain.
///
/// Dropping it lets the next event of the transaction proceed.
struct Turn {
    transaction_id: Uuid,
    ticket: u64,
    previous: Option<oneshot::Receiver<()>>,
    chains: Arc<Chains>,
    _done: oneshot::Sender<()>,
}

impl Turn {
    async fn wait(&mut self) {
        if let Some(previous) = self.previous.take() {
            // Resolves once the previous turn is dropped.
            let _ = previous.await;
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        let ticket = self.ticket;
        self.chains
            .remove_if(&self.transaction_id, |_, (tail, _)| *tail == ticket);
    }
}

/// Outcome of applying the legs of an effect one by one.
struct LegOutcome {
    landed: LedgerEffect,
    missed: LedgerEffect,
    error: Option<LedgerError>,
}

impl LedgerReconciler {
    pub fn new(remote: Remote, mode: LedgerMode) -> Self {
        Self {
            remote,
            mode,
            leases: Arc::new(DashMap::new()),
            chains: Arc::new(DashMap::new()),
            sequence: Arc::new(AtomicU64::new(0)),
            landed: Arc::new(ExpiringCache::new(LANDED_CAPACITY, LANDED_TTL)),
            tasks: TaskTracker::new(),
        }
    }

    pub fn mode(&self) -> LedgerMode {
        self.mode
    }

    /// Record a transaction lifecycle event according to the configured mode.
    ///
    /// In deferred mode this returns as soon as the work is scheduled.
    pub async fn record_transaction_effect(&self, event: LedgerEvent) -> Result<(), LedgerError> {
        match self.mode {
            LedgerMode::Sync => self.reconcile(event).await.map(|_| ()),
            LedgerMode::Deferred => {
                self.defer(event);
                Ok(())
            }
        }
    }

    /// Apply the balance consequences of `event` now, after any earlier
    /// event of the same transaction.
    ///
    /// Returns the state the transaction's effect ends in.
    pub async fn reconcile(&self, event: LedgerEvent) -> Result<EffectState, LedgerError> {
        let mut turn = self.enqueue(event.transaction_id());
        turn.wait().await;
        self.settle(event).await
    }

    /// Schedule `event` on the background task set.
    ///
    /// The event takes its place in the transaction's chain immediately, so
    /// events run in the order they were scheduled.
    pub fn defer(&self, event: LedgerEvent) {
        let mut turn = self.enqueue(event.transaction_id());
        let this = self.clone();
        self.tasks.spawn(async move {
            turn.wait().await;
            let transaction_id = event.transaction_id();
            match this.settle(event).await {
                Ok(state) => debug!(%transaction_id, ?state, "Deferred reconciliation complete"),
                Err(e) => error!(
                    %transaction_id,
                    error = %e,
                    "Deferred reconciliation failed, balance needs manual reconciliation"
                ),
            }
            drop(turn);
        });
    }

    fn enqueue(&self, transaction_id: Uuid) -> Turn {
        let (done, next) = oneshot::channel();
        let ticket = self.sequence.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .chains
            .insert(transaction_id, (ticket, next))
            .map(|(_, previous)| previous);
        Turn {
            transaction_id,
            ticket,
            previous,
            chains: Arc::clone(&self.chains),
            _done: done,
        }
    }

    async fn settle(&self, event: LedgerEvent) -> Result<EffectState, LedgerError> {
        match event {
            LedgerEvent::Created(current) => {
                self.replace(current.id, &LedgerEffect::default(), &current).await?;
                self.mark_reconciled(current.id, true).await?;
                Ok(EffectState::Applied)
            }
            LedgerEvent::Updated { previous, current } => {
                let on_balance = self.on_balance(&previous);
                self.replace(current.id, &on_balance, &current).await?;
                self.mark_reconciled(current.id, true).await?;
                Ok(EffectState::Applied)
            }
            LedgerEvent::Deleted(previous) => {
                let on_balance = self.on_balance(&previous);
                self.reverse(previous.id, &on_balance).await?;
                // The row survives when this runs ahead of the delete; its
                // effect is gone, so it must not read as applied.
                self.mark_reconciled(previous.id, false).await?;
                Ok(EffectState::Reversed)
            }
        }
    }

    /// The effect of `transaction` currently on the balance.
    fn on_balance(&self, transaction: &Transaction) -> LedgerEffect {
        match self.landed.get(&transaction.id) {
            Some(effect) => effect,
            None if transaction.is_reconciled => LedgerEffect::of(transaction),
            None => LedgerEffect::default(),
        }
    }

    /// Take `on_balance` off the balance and put `current`'s effect on it.
    async fn replace(&self, transaction_id: Uuid, on_balance: &LedgerEffect, current: &Transaction) -> Result<(), LedgerError> {
        self.reverse(transaction_id, on_balance).await?;

        let applied = self.apply_legs(&LedgerEffect::of(current)).await;
        self.landed.put(transaction_id, applied.landed);
        applied.error.map_or(Ok(()), Err)
    }

    async fn reverse(&self, transaction_id: Uuid, on_balance: &LedgerEffect) -> Result<(), LedgerError> {
        if on_balance.is_empty() {
            self.landed.put(transaction_id, LedgerEffect::default());
            return Ok(());
        }
        let reversal = self.apply_legs(&on_balance.reversed()).await;
        // Legs whose reversal failed are still on the balance.
        self.landed.put(transaction_id, reversal.missed.reversed());
        reversal.error.map_or(Ok(()), Err)
    }

    /// Apply every leg of an effect.
    ///
    /// Legs are independent: all are attempted and the first failure is
    /// returned. A transfer can therefore land on one account only.
    pub async fn apply(&self, effect: &LedgerEffect) -> Result<(), LedgerError> {
        self.apply_legs(effect).await.error.map_or(Ok(()), Err)
    }

    async fn apply_legs(&self, effect: &LedgerEffect) -> LegOutcome {
        let mut landed = Vec::new();
        let mut missed = Vec::new();
        let mut error = None;
        for leg in effect.legs() {
            match self.apply_delta(leg.account_id, leg.delta).await {
                Ok(_) => landed.push(*leg),
                Err(e) => {
                    error!(account_id = %leg.account_id, delta = %leg.delta, error = %e, "Failed to apply ledger leg");
                    missed.push(*leg);
                    error.get_or_insert(e);
                }
            }
        }
        LegOutcome {
            landed: landed.into_iter().collect(),
            missed: missed.into_iter().collect(),
            error,
        }
    }

    /// Add `delta` to one account's balance, returning the new balance.
    pub async fn apply_delta(&self, account_id: Uuid, delta: Decimal) -> Result<Decimal, LedgerError> {
        let lease = self.lease(account_id);
        let result = {
            let _guard = lease.lock().await;
            self.read_modify_write(account_id, delta).await
        };
        drop(lease);
        self.release(account_id);
        result
    }

    async fn read_modify_write(&self, account_id: Uuid, delta: Decimal) -> Result<Decimal, LedgerError> {
        let filters = vec![Filter::eq("id", account_id)];
        let account: Account = self
            .remote
            .find_as(tables::ACCOUNTS, filters.clone())
            .await?
            .ok_or(LedgerError::AccountMissing(account_id))?;

        let balance = account.balance + delta;
        let mut patch = Row::new();
        patch.insert("balance".into(), Value::String(balance.to_string()));
        patch.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));

        let updated = self.remote.update(tables::ACCOUNTS, filters, patch).await?;
        if updated.is_empty() {
            return Err(LedgerError::AccountMissing(account_id));
        }

        info!(%account_id, %delta, %balance, "Applied ledger delta");
        Ok(balance)
    }

    async fn mark_reconciled(&self, transaction_id: Uuid, reconciled: bool) -> Result<(), LedgerError> {
        let mut patch = Row::new();
        patch.insert("is_reconciled".into(), Value::Bool(reconciled));
        // The transaction may have been deleted meanwhile; nothing to mark then.
        if let Err(e) = self
            .remote
            .update(tables::TRANSACTIONS, vec![Filter::eq("id", transaction_id)], patch)
            .await
        {
            warn!(%transaction_id, reconciled, error = %e, "Failed to store reconciliation flag");
            return Err(e.into());
        }
        Ok(())
    }

    fn lease(&self, account_id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(self.leases.entry(account_id).or_default().value())
    }

    /// Drop the lease entry when nobody else holds or waits on it.
    fn release(&self, account_id: Uuid) {
        self.leases
            .remove_if(&account_id, |_, lease| Arc::strong_count(lease) == 1);
    }

    /// Number of accounts with a live lease.
    pub fn active_leases(&self) -> usize {
        self.leases.len()
    }

    /// Stop accepting deferred work and wait for what is in flight.
    pub async fn shutdown(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(pending = self.tasks.len(), "Waiting for deferred ledger tasks");
        }
        self.tasks.wait().await;
    }
}
