// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP message types consumed by the sipwire transaction layer.
//!
//! This crate provides the immutable message model the rest of the stack
//! operates on:
//! - **Messages**: [`Request`], [`Response`], [`SipMessage`]
//! - **Headers**: the order-preserving [`Headers`] container plus the typed
//!   [`ViaHeader`] and [`CSeqHeader`] the transaction layer reads
//! - **Methods**: the [`Method`] enum (INVITE, REGISTER, OPTIONS, ...)
//! - **URIs**: [`SipUri`] (sip/sips)
//!
//! Types use [`SmolStr`](smol_str::SmolStr) for header tokens and
//! [`Bytes`](bytes::Bytes) for bodies so cloning a message is cheap.
//! Full-message parsing and wire serialization are not part of this crate;
//! they belong to the transport/parser layers that feed the stack.

pub mod cseq;
pub mod headers;
pub mod method;
pub mod msg;
pub mod uri;
pub mod version;
pub mod via;

pub use cseq::CSeqHeader;
pub use headers::{Header, Headers, HeaderError};
pub use method::Method;
pub use msg::{MessageError, Request, RequestLine, Response, SipMessage, StatusLine};
pub use uri::SipUri;
pub use version::SipVersion;
pub use via::ViaHeader;
