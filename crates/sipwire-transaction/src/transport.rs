// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The seam between the transaction layer and whatever moves bytes.

use std::net::SocketAddr;

use anyhow::Result;
use async_trait::async_trait;
use sipwire_core::SipMessage;

use crate::timers::Transport;

/// Where a transaction's messages go, captured when it is created so
/// retransmissions and replies reuse the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportContext {
    pub transport: Transport,
    pub peer: SocketAddr,
}

impl TransportContext {
    pub fn new(transport: Transport, peer: SocketAddr) -> Self {
        Self { transport, peer }
    }
}

/// Dispatches outbound messages generated by the transaction layer.
///
/// Implementations serialize and frame the message for their transport. A
/// returned error terminates the owning transaction and surfaces as an
/// `on_transport_error` event; the layer itself never retries a failed send.
#[async_trait]
pub trait TransportDispatcher: Send + Sync + 'static {
    /// Sends the message using the supplied context.
    async fn send(&self, ctx: &TransportContext, message: SipMessage) -> Result<()>;
}
