// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The application-facing event contract of the transaction layer.

use async_trait::async_trait;
use sipwire_core::{Request, Response};

use crate::TransactionKey;

/// Callbacks the transaction layer invokes on the transaction user.
///
/// One listener is registered per [`TransactionManager`](crate::TransactionManager)
/// and receives the events of every transaction it owns, keyed by
/// [`TransactionKey`]. Delivery guarantees:
///
/// - `on_request` fires once per server transaction — retransmissions of the
///   initiating request are absorbed below this interface. It also fires for
///   an ACK that matches no INVITE transaction (the 2xx case), which opens
///   no transaction.
/// - `on_response` fires once per provisional and once per distinct final
///   response of a client transaction; duplicate finals are absorbed.
/// - `on_timeout` fires at most once, when Timer B/F expires without a final
///   response or Timer H expires without an ACK.
/// - `on_transport_error` fires when a send failed and the transaction was
///   torn down because of it.
/// - `on_terminated` is the last event a transaction ever emits.
///
/// All methods default to no-ops so implementations only write the ones
/// they consume. Implementations must not block: they run on the manager's
/// event paths.
#[async_trait]
pub trait TransactionListener: Send + Sync + 'static {
    /// A request opened a new server transaction (or an ACK bypassed one).
    async fn on_request(&self, _key: &TransactionKey, _request: &Request) {}

    /// A response was matched to a client transaction.
    async fn on_response(&self, _key: &TransactionKey, _response: &Response) {}

    /// The transaction expired without the far end answering/confirming.
    async fn on_timeout(&self, _key: &TransactionKey) {}

    /// A transport-level send failure terminated the transaction.
    async fn on_transport_error(&self, _key: &TransactionKey) {}

    /// The transaction reached Terminated and left the table.
    async fn on_terminated(&self, _key: &TransactionKey) {}
}

/// Listener that ignores every event. Useful for tests and one-shot tools.
pub struct NoopListener;

#[async_trait]
impl TransactionListener for NoopListener {}
