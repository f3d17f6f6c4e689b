// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RenPay - Financial Records API
//!
//! Accounts and transactions stored in a hosted relational store, with a
//! resilience layer around every remote call and a ledger that keeps account
//! balances in step with transaction history.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Bearer credential authentication and revocation
//! - `cache` - TTL/LRU cache and the identity cache built on it
//! - `ledger` - Balance reconciliation for transaction lifecycle events
//! - `rate_limit` - Per-client token bucket and its middleware
//! - `remote` - Remote store port, adapters and the retrying executor

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod rate_limit;
pub mod remote;
pub mod state;
