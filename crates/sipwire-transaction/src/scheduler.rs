// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Timer scheduler for the transaction layer.
//!
//! One armed entry per (transaction key, timer kind). Arming an already
//! armed kind reschedules it; cancellation is immediate. A firing never
//! touches transaction state from the timer task: it posts a [`TimerEvent`]
//! into the channel the manager's command loop drains, so every timer-driven
//! transition is serialized with message-driven ones. Entries are removed
//! atomically when they fire or are cancelled — a fire that loses the race
//! against cancellation is simply dropped by the loop when the owning
//! machine no longer accepts it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::debug;

use crate::{TransactionKey, TransactionTimer};

/// Fired-timer notification posted into the manager's command loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    pub key: TransactionKey,
    pub timer: TransactionTimer,
}

/// Deadline registry for all live transactions of one manager.
pub struct TimerScheduler {
    entries: Arc<DashMap<(TransactionKey, TransactionTimer), oneshot::Sender<()>>>,
    fire_tx: mpsc::Sender<TimerEvent>,
}

impl TimerScheduler {
    /// Creates a scheduler that posts firings into `fire_tx`.
    pub fn new(fire_tx: mpsc::Sender<TimerEvent>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            fire_tx,
        }
    }

    /// Arms (or re-arms) the given timer kind for a transaction.
    pub fn arm(&self, key: TransactionKey, timer: TransactionTimer, duration: Duration) {
        self.cancel(&key, timer);

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.entries.insert((key.clone(), timer), cancel_tx);

        let entries = Arc::clone(&self.entries);
        let fire_tx = self.fire_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(duration) => {
                    entries.remove(&(key.clone(), timer));
                    let _ = fire_tx.send(TimerEvent { key, timer }).await;
                }
                _ = &mut cancel_rx => {}
            }
        });
    }

    /// Cancels one timer kind for a transaction, if armed.
    pub fn cancel(&self, key: &TransactionKey, timer: TransactionTimer) {
        if let Some((_, cancel)) = self.entries.remove(&(key.clone(), timer)) {
            let _ = cancel.send(());
        }
    }

    /// Cancels every timer belonging to a transaction. Called atomically
    /// with the transition into Terminated.
    pub fn cancel_all(&self, key: &TransactionKey) {
        let armed: Vec<(TransactionKey, TransactionTimer)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == *key)
            .map(|entry| entry.key().clone())
            .collect();
        for entry_key in armed {
            if let Some((_, cancel)) = self.entries.remove(&entry_key) {
                let _ = cancel.send(());
            }
        }
    }

    /// Cancels every armed timer. Used on manager shutdown.
    pub fn shutdown(&self) {
        let armed: Vec<(TransactionKey, TransactionTimer)> = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        debug!(count = armed.len(), "cancelling all pending timers");
        for entry_key in armed {
            if let Some((_, cancel)) = self.entries.remove(&entry_key) {
                let _ = cancel.send(());
            }
        }
    }

    /// Number of currently armed entries.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipwire_core::Method;
    use smol_str::SmolStr;

    fn key(branch: &str) -> TransactionKey {
        TransactionKey {
            branch: SmolStr::new(branch),
            sent_by: SmolStr::new("host.example.com"),
            method: Method::Options,
            is_server: false,
        }
    }

    #[tokio::test]
    async fn armed_timer_fires_and_unregisters() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = TimerScheduler::new(tx);

        scheduler.arm(key("z9hG4bKa"), TransactionTimer::E, Duration::from_millis(5));
        assert_eq!(scheduler.pending(), 1);

        let event = rx.recv().await.expect("fire");
        assert_eq!(event.timer, TransactionTimer::E);
        assert_eq!(event.key.branch.as_str(), "z9hG4bKa");
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = TimerScheduler::new(tx);

        let k = key("z9hG4bKb");
        scheduler.arm(k.clone(), TransactionTimer::F, Duration::from_millis(20));
        scheduler.cancel(&k, TransactionTimer::F);
        assert_eq!(scheduler.pending(), 0);

        time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rearming_replaces_previous_deadline() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = TimerScheduler::new(tx);

        let k = key("z9hG4bKc");
        scheduler.arm(k.clone(), TransactionTimer::A, Duration::from_millis(5));
        scheduler.arm(k.clone(), TransactionTimer::A, Duration::from_millis(30));
        assert_eq!(scheduler.pending(), 1);

        // Only the rescheduled deadline fires.
        let event = rx.recv().await.expect("fire");
        assert_eq!(event.timer, TransactionTimer::A);
        time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_all_sweeps_a_transactions_timers() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = TimerScheduler::new(tx);

        let k = key("z9hG4bKd");
        scheduler.arm(k.clone(), TransactionTimer::A, Duration::from_millis(25));
        scheduler.arm(k.clone(), TransactionTimer::B, Duration::from_millis(25));
        scheduler.arm(key("z9hG4bKe"), TransactionTimer::B, Duration::from_millis(25));
        assert_eq!(scheduler.pending(), 3);

        scheduler.cancel_all(&k);
        assert_eq!(scheduler.pending(), 1);

        // The unrelated transaction still fires.
        let event = rx.recv().await.expect("fire");
        assert_eq!(event.key.branch.as_str(), "z9hG4bKe");
    }

    #[tokio::test]
    async fn shutdown_drains_everything() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = TimerScheduler::new(tx);

        for branch in ["z9hG4bKf", "z9hG4bKg", "z9hG4bKh"] {
            scheduler.arm(key(branch), TransactionTimer::B, Duration::from_millis(20));
        }
        scheduler.shutdown();
        assert_eq!(scheduler.pending(), 0);

        time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }
}
