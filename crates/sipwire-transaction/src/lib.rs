// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 3261 §17 transaction layer.
//!
//! This crate sits between a transport (socket I/O, message framing) and the
//! transaction user (dialog layer, proxy core, application). It owns the four
//! transaction state machines, retransmits requests and responses over
//! unreliable transports, absorbs duplicate network traffic, matches inbound
//! messages to live transactions, and surfaces timeouts — so nothing above it
//! ever deals with wire retransmission directly.
//!
//! The entry point is [`TransactionManager`]; transports feed it with
//! [`TransactionManager::receive_request`] / [`receive_response`](TransactionManager::receive_response),
//! applications drive it through [`TransactionManager::send_request`] and the
//! per-transaction handles, and everything the layer has to say comes back
//! through the [`TransactionListener`] event contract.

use rand::{distributions::Alphanumeric, Rng};
use sipwire_core::{Headers, Method, Request, ViaHeader};
use smol_str::SmolStr;

pub mod builders;
pub mod events;
pub mod fsm;
pub mod manager;
pub mod matcher;
pub mod metrics;
pub mod scheduler;
pub mod table;
pub mod timers;
pub mod transport;

pub use events::{NoopListener, TransactionListener};
pub use fsm::{
    ClientAction, ClientEvent, ClientInviteFsm, ClientMachine, ClientNonInviteFsm, ServerAction,
    ServerEvent, ServerInviteFsm, ServerMachine, ServerNonInviteFsm, TerminationCause,
};
pub use manager::{ClientTransactionHandle, ServerTransactionHandle, TransactionManager};
pub use metrics::{MetricsSnapshot, TransactionMetrics, TransactionOutcome, TransactionRole};
pub use scheduler::{TimerEvent, TimerScheduler};
pub use table::{TransactionLimits, TransactionTable};
pub use timers::{TimerDefaults, Transport, TransportAwareTimers};
pub use transport::{TransportContext, TransportDispatcher};

/// The RFC 3261 branch prefix that marks a transaction-unique Via branch.
pub const MAGIC_COOKIE: &str = "z9hG4bK";

/// Returns `true` if the branch carries the RFC 3261 magic cookie.
///
/// Only such branches participate in transaction matching; RFC 2543-era
/// branches are not supported by this layer.
pub fn is_rfc3261_branch(branch: &str) -> bool {
    branch.starts_with(MAGIC_COOKIE)
}

/// Parses the top-most Via header of the given header collection, if any.
pub fn top_via(headers: &Headers) -> Option<ViaHeader> {
    headers.get_all("Via").next().and_then(|v| ViaHeader::parse(v))
}

/// Extracts the `branch=` parameter from a Via header string.
pub fn branch_from_via(via: &str) -> Option<SmolStr> {
    ViaHeader::parse(via)?.branch().map(SmolStr::new)
}

/// Returns the branch ID for the given request, if one is present.
pub fn request_branch_id(req: &Request) -> Option<SmolStr> {
    top_via(req.headers())?.branch().map(SmolStr::new)
}

/// Generates a new RFC 3261 magic-cookie branch identifier.
pub fn generate_branch_id() -> SmolStr {
    let mut rng = rand::thread_rng();
    let suffix: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    SmolStr::new(format!("{}{}", MAGIC_COOKIE, suffix))
}

/// Timers referenced by the SIP transaction state machines (RFC 3261 §17).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionTimer {
    A,
    B,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
}

/// Client INVITE transaction states (RFC 3261 Figure 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientInviteState {
    Calling,
    Proceeding,
    Completed,
    Terminated,
}

/// Client non-INVITE transaction states (RFC 3261 Figure 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientNonInviteState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// Server INVITE transaction states (RFC 3261 Figure 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerInviteState {
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

/// Server non-INVITE transaction states (RFC 3261 Figure 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerNonInviteState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// Fingerprint identifying a transaction uniquely for its lifetime.
///
/// Derived from the top Via's branch parameter and sent-by, the method, and
/// the side the transaction lives on. The [`TransactionTable`] guarantees at
/// most one live transaction per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: SmolStr,
    pub sent_by: SmolStr,
    pub method: Method,
    pub is_server: bool,
}

impl TransactionKey {
    /// Builds a transaction key from a request's top Via and method.
    ///
    /// Returns `None` if the request has no parsable top Via, no branch, or a
    /// branch without the RFC 3261 magic cookie.
    pub fn from_request(req: &Request, is_server: bool) -> Option<Self> {
        let via = top_via(req.headers())?;
        let branch = via.branch()?;
        if !is_rfc3261_branch(branch) {
            return None;
        }
        Some(Self {
            branch: SmolStr::new(branch),
            sent_by: via.sent_by.clone(),
            method: req.method().clone(),
            is_server,
        })
    }
}

/// Synchronous misuse and lookup errors surfaced by the transaction layer.
///
/// Transport failures and timeouts are *not* represented here; those arrive
/// asynchronously through the [`TransactionListener`] events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// The message carries no usable top Via branch.
    MissingBranch,
    /// A transaction with this fingerprint is already registered.
    Duplicate(TransactionKey),
    /// No live transaction exists for this fingerprint.
    NotFound(TransactionKey),
    /// `create_cancel` was called on a method that cannot be cancelled.
    NotCancellable(Method),
    /// `create_cancel` was called after a final response arrived.
    AlreadyAnswered,
    /// `create_ack` was called before any final response arrived.
    NoFinalResponse,
    /// The server transaction already sent its final response.
    AlreadyResponded,
    /// The response's status class does not fit the operation.
    InvalidStatus { expected: &'static str, code: u16 },
    /// A required header is missing from the originating message.
    MissingHeader(&'static str),
    /// The manager has been shut down.
    ShutDown,
    /// Constructing a derived message failed in the message model.
    Message(sipwire_core::MessageError),
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingBranch => write!(f, "message has no RFC 3261 branch in its top Via"),
            Self::Duplicate(key) => write!(f, "transaction already registered: {:?}", key),
            Self::NotFound(key) => write!(f, "no such transaction: {:?}", key),
            Self::NotCancellable(method) => {
                write!(f, "{} transactions cannot be cancelled", method)
            }
            Self::AlreadyAnswered => {
                write!(f, "cannot cancel: a final response was already received")
            }
            Self::NoFinalResponse => {
                write!(f, "cannot create ACK before a final response is received")
            }
            Self::AlreadyResponded => write!(f, "a final response was already sent"),
            Self::InvalidStatus { expected, code } => {
                write!(f, "expected a {} response, got {}", expected, code)
            }
            Self::MissingHeader(name) => write!(f, "originating request lacks a {} header", name),
            Self::ShutDown => write!(f, "transaction manager is shut down"),
            Self::Message(err) => write!(f, "message construction failed: {}", err),
        }
    }
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Message(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sipwire_core::MessageError> for TransactionError {
    fn from(err: sipwire_core::MessageError) -> Self {
        Self::Message(err)
    }
}
