// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transaction metrics.
//!
//! The manager records starts, completions, outcomes, retransmissions and
//! timer firings as transactions move through their lifecycles; `snapshot()`
//! returns a point-in-time copy for export or assertions. All operations are
//! cheap and thread-safe; `TransactionMetrics` is `Clone` and internally
//! shared.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::TransactionTimer;

/// Transaction role (client vs server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionRole {
    Client,
    Server,
}

/// How a transaction left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionOutcome {
    /// Ran its full lifecycle and terminated normally.
    Completed,
    /// Timer B, F or H expired.
    Timeout,
    /// A send failure tore it down.
    TransportError,
    /// Evicted because a transaction limit was reached.
    Evicted,
}

/// Duration aggregate per request method.
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationStats {
    pub count: u64,
    pub total: Duration,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
}

impl DurationStats {
    fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total += duration;
        self.min = Some(self.min.map_or(duration, |m| m.min(duration)));
        self.max = Some(self.max.map_or(duration, |m| m.max(duration)));
    }

    /// Mean duration over all recorded transactions.
    pub fn avg(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

#[derive(Default)]
struct MetricsInner {
    started: HashMap<TransactionRole, u64>,
    completed: HashMap<TransactionRole, u64>,
    outcomes: HashMap<TransactionOutcome, u64>,
    retransmissions: u64,
    timer_fires: HashMap<TransactionTimer, u64>,
    by_method: HashMap<String, DurationStats>,
}

/// Point-in-time copy of the collected metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub started: HashMap<TransactionRole, u64>,
    pub completed: HashMap<TransactionRole, u64>,
    pub outcomes: HashMap<TransactionOutcome, u64>,
    pub retransmissions: u64,
    pub timer_fires: HashMap<TransactionTimer, u64>,
    pub by_method: HashMap<String, DurationStats>,
}

impl MetricsSnapshot {
    /// Transactions started for the given role.
    pub fn started(&self, role: TransactionRole) -> u64 {
        self.started.get(&role).copied().unwrap_or(0)
    }

    /// Transactions completed for the given role.
    pub fn completed(&self, role: TransactionRole) -> u64 {
        self.completed.get(&role).copied().unwrap_or(0)
    }

    /// Count of transactions that ended with the given outcome.
    pub fn outcome(&self, outcome: TransactionOutcome) -> u64 {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    /// Times the given timer kind fired.
    pub fn timer_fired(&self, timer: TransactionTimer) -> u64 {
        self.timer_fires.get(&timer).copied().unwrap_or(0)
    }
}

/// Shared metrics collector owned by a [`TransactionManager`](crate::TransactionManager).
#[derive(Clone, Default)]
pub struct TransactionMetrics {
    inner: Arc<RwLock<MetricsInner>>,
}

impl TransactionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a transaction entering the table.
    pub fn record_start(&self, role: TransactionRole) {
        let mut inner = self.inner.write();
        *inner.started.entry(role).or_insert(0) += 1;
    }

    /// Records a transaction leaving the table with its lifetime and outcome.
    pub fn record_complete(
        &self,
        role: TransactionRole,
        method: &str,
        lifetime: Duration,
        outcome: TransactionOutcome,
    ) {
        let mut inner = self.inner.write();
        *inner.completed.entry(role).or_insert(0) += 1;
        *inner.outcomes.entry(outcome).or_insert(0) += 1;
        inner
            .by_method
            .entry(method.to_owned())
            .or_default()
            .record(lifetime);
    }

    /// Records one retransmission handed to the transport.
    pub fn record_retransmission(&self) {
        self.inner.write().retransmissions += 1;
    }

    /// Records one timer firing.
    pub fn record_timer_fired(&self, timer: TransactionTimer) {
        let mut inner = self.inner.write();
        *inner.timer_fires.entry(timer).or_insert(0) += 1;
    }

    /// Returns a copy of everything collected so far.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read();
        MetricsSnapshot {
            started: inner.started.clone(),
            completed: inner.completed.clone(),
            outcomes: inner.outcomes.clone(),
            retransmissions: inner.retransmissions,
            timer_fires: inner.timer_fires.clone(),
            by_method: inner.by_method.clone(),
        }
    }
}
