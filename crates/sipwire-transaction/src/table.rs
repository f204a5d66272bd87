// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The shared registry of live transactions.
//!
//! Lookups, inserts and removals may run concurrently from any number of
//! message-delivery paths; DashMap gives short-held per-shard locking, never
//! a per-message hold. Fingerprint uniqueness is enforced at insertion: a
//! collision is a caller bug and fails fast instead of silently replacing a
//! live transaction.

use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use parking_lot::Mutex;

use sipwire_core::{Request, Response};

use crate::fsm::{ClientMachine, ServerMachine};
use crate::transport::TransportContext;
use crate::{TransactionError, TransactionKey};

/// Caps on the live transaction population, as a resource-exhaustion
/// backstop: without them a flood of unique branch IDs grows the table
/// without bound. When a side is full the oldest entry is evicted.
///
/// Each live transaction costs roughly 1-2 KB, so the default of 10k per
/// side is ~10-20 MB.
#[derive(Debug, Clone, Copy)]
pub struct TransactionLimits {
    /// Maximum number of server transactions (incoming requests).
    pub max_server_transactions: usize,
    /// Maximum number of client transactions (outgoing requests).
    pub max_client_transactions: usize,
}

impl Default for TransactionLimits {
    fn default() -> Self {
        Self {
            max_server_transactions: 10_000,
            max_client_transactions: 10_000,
        }
    }
}

impl TransactionLimits {
    /// Creates limits with custom values for server and client transactions.
    pub fn new(max_server: usize, max_client: usize) -> Self {
        Self {
            max_server_transactions: max_server,
            max_client_transactions: max_client,
        }
    }

    /// Unlimited transactions (use only for testing).
    pub fn unlimited() -> Self {
        Self::new(usize::MAX, usize::MAX)
    }

    /// Small server preset (1-10 concurrent calls).
    pub fn small() -> Self {
        Self::new(1_000, 1_000)
    }

    /// Medium server preset (10-100 concurrent calls) - default.
    pub fn medium() -> Self {
        Self::default()
    }

    /// Large server preset (100-1000 concurrent calls).
    pub fn large() -> Self {
        Self::new(100_000, 100_000)
    }

    /// Carrier-grade preset (1000+ concurrent calls).
    pub fn carrier_grade() -> Self {
        Self::new(500_000, 500_000)
    }
}

/// State kept for one client transaction.
pub(crate) struct ClientEntry {
    pub machine: ClientMachine,
    pub ctx: TransportContext,
    /// The originating request; source for retransmissions and for ACK and
    /// CANCEL synthesis. Immutable for the transaction's lifetime.
    pub request: Request,
    /// First final response received. Shared with the client handle so
    /// `create_ack` keeps working after the entry leaves the table (a 2xx
    /// terminates the INVITE transaction the instant it is delivered).
    pub last_final: Arc<Mutex<Option<Response>>>,
    /// ACK synthesized for a non-2xx final, replayed on duplicate finals.
    pub ack: Option<Request>,
    pub created_at: Instant,
}

/// State kept for one server transaction.
pub(crate) struct ServerEntry {
    pub machine: ServerMachine,
    pub ctx: TransportContext,
    pub request: Request,
    pub created_at: Instant,
}

/// The shared registry, split by transaction side.
#[derive(Default)]
pub struct TransactionTable {
    client: DashMap<TransactionKey, ClientEntry>,
    server: DashMap<TransactionKey, ServerEntry>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_client(
        &self,
        key: TransactionKey,
        entry: ClientEntry,
    ) -> Result<(), TransactionError> {
        match self.client.entry(key) {
            Entry::Occupied(occupied) => Err(TransactionError::Duplicate(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    pub(crate) fn insert_server(
        &self,
        key: TransactionKey,
        entry: ServerEntry,
    ) -> Result<(), TransactionError> {
        match self.server.entry(key) {
            Entry::Occupied(occupied) => Err(TransactionError::Duplicate(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    pub(crate) fn client(&self, key: &TransactionKey) -> Option<Ref<'_, TransactionKey, ClientEntry>> {
        self.client.get(key)
    }

    pub(crate) fn client_mut(
        &self,
        key: &TransactionKey,
    ) -> Option<RefMut<'_, TransactionKey, ClientEntry>> {
        self.client.get_mut(key)
    }

    pub(crate) fn server(&self, key: &TransactionKey) -> Option<Ref<'_, TransactionKey, ServerEntry>> {
        self.server.get(key)
    }

    pub(crate) fn server_mut(
        &self,
        key: &TransactionKey,
    ) -> Option<RefMut<'_, TransactionKey, ServerEntry>> {
        self.server.get_mut(key)
    }

    pub(crate) fn remove_client(&self, key: &TransactionKey) -> Option<ClientEntry> {
        self.client.remove(key).map(|(_, entry)| entry)
    }

    pub(crate) fn remove_server(&self, key: &TransactionKey) -> Option<ServerEntry> {
        self.server.remove(key).map(|(_, entry)| entry)
    }

    /// Returns `true` if a client transaction is registered under this key.
    pub fn contains_client(&self, key: &TransactionKey) -> bool {
        self.client.contains_key(key)
    }

    /// Returns `true` if a server transaction is registered under this key.
    pub fn contains_server(&self, key: &TransactionKey) -> bool {
        self.server.contains_key(key)
    }

    /// Number of live client transactions.
    pub fn client_len(&self) -> usize {
        self.client.len()
    }

    /// Number of live server transactions.
    pub fn server_len(&self) -> usize {
        self.server.len()
    }

    /// Key of the longest-lived client transaction, if any.
    pub(crate) fn oldest_client(&self) -> Option<TransactionKey> {
        self.client
            .iter()
            .min_by_key(|entry| entry.created_at)
            .map(|entry| entry.key().clone())
    }

    /// Key of the longest-lived server transaction, if any.
    pub(crate) fn oldest_server(&self) -> Option<TransactionKey> {
        self.server
            .iter()
            .min_by_key(|entry| entry.created_at)
            .map(|entry| entry.key().clone())
    }

    /// Removes every entry, returning the drained keys. Shutdown path only.
    pub(crate) fn drain_keys(&self) -> Vec<TransactionKey> {
        let mut keys: Vec<TransactionKey> = self.client.iter().map(|e| e.key().clone()).collect();
        keys.extend(self.server.iter().map(|e| e.key().clone()));
        for key in &keys {
            if key.is_server {
                self.server.remove(key);
            } else {
                self.client.remove(key);
            }
        }
        keys
    }
}
