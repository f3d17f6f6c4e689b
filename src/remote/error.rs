// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote store failures.

use std::fmt;

/// What went wrong while talking to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused, reset, DNS failure...
    Network,
    /// The attempt exceeded its time budget.
    Timeout,
    /// The store answered with a non-success status.
    Status,
    /// The store answered but the payload could not be decoded.
    Malformed,
    /// The operation panicked on the worker pool.
    Aborted,
}

/// Error returned by every remote store operation.
///
/// Carries the HTTP-like status and the store's own error code when the
/// store produced them, so the last failure can be inspected after the
/// executor gives up.
#[derive(Debug, Clone, thiserror::Error)]
pub struct RemoteError {
    pub message: String,
    pub status_code: Option<u16>,
    pub error_code: Option<String>,
    pub kind: FailureKind,
    /// Number of attempts made before this error was surfaced.
    pub attempts: u32,
}

impl RemoteError {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            error_code: None,
            kind,
            attempts: 0,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Malformed, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Aborted, message)
    }

    pub fn status(status_code: u16, message: impl Into<String>, error_code: Option<String>) -> Self {
        Self {
            status_code: Some(status_code),
            error_code,
            ..Self::new(FailureKind::Status, message)
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Network errors, timeouts, 5xx, 408 and 429 are transient. Every other
    /// 4xx and any decoding failure is terminal.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            FailureKind::Network | FailureKind::Timeout => true,
            FailureKind::Status => matches!(self.status_code, Some(code) if code >= 500 || code == 408 || code == 429),
            FailureKind::Malformed | FailureKind::Aborted => false,
        }
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(status) = self.status_code {
            write!(f, " (status {status})")?;
        }
        if let Some(code) = &self.error_code {
            write!(f, " [{code}]")?;
        }
        if self.attempts > 1 {
            write!(f, " after {} attempts", self.attempts)?;
        }
        Ok(())
    }
}
