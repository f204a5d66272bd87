// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! ACK and CANCEL synthesis from a client transaction's originating request.
//!
//! Both derived requests reuse the original's top Via — branch included —
//! so the far end correlates them with the transaction they refer to
//! (RFC 3261 §17.1.1.3 for ACK, §9.1 for CANCEL).

use bytes::Bytes;
use sipwire_core::{CSeqHeader, Headers, Method, Request, RequestLine, Response};
use smol_str::SmolStr;

use crate::TransactionError;

/// Builds the ACK acknowledging a final response to an INVITE.
///
/// Request-URI, From, Call-ID, Route and the top Via come from the original
/// INVITE; To comes from the response (it carries the tag the far end
/// assigned); CSeq keeps the original sequence number with method ACK.
pub fn build_ack(original: &Request, response: &Response) -> Result<Request, TransactionError> {
    let to = response
        .headers()
        .get("To")
        .or_else(|| original.headers().get("To"))
        .ok_or(TransactionError::MissingHeader("To"))?
        .clone();
    build_derived(original, Method::Ack, to)
}

/// Builds the CANCEL for a pending INVITE.
///
/// Every dialog-identifying header is copied verbatim from the original so
/// the CANCEL constitutes its own transaction (same branch, method CANCEL)
/// while referencing the request to be cancelled.
pub fn build_cancel(original: &Request) -> Result<Request, TransactionError> {
    let to = original
        .headers()
        .get("To")
        .ok_or(TransactionError::MissingHeader("To"))?
        .clone();
    build_derived(original, Method::Cancel, to)
}

fn build_derived(
    original: &Request,
    method: Method,
    to: SmolStr,
) -> Result<Request, TransactionError> {
    let via = original
        .headers()
        .get("Via")
        .ok_or(TransactionError::MissingHeader("Via"))?
        .clone();
    let from = original
        .headers()
        .get("From")
        .ok_or(TransactionError::MissingHeader("From"))?
        .clone();
    let call_id = original
        .headers()
        .get("Call-ID")
        .ok_or(TransactionError::MissingHeader("Call-ID"))?
        .clone();
    let cseq = original
        .headers()
        .get("CSeq")
        .and_then(|v| CSeqHeader::parse(v))
        .ok_or(TransactionError::MissingHeader("CSeq"))?;

    let mut headers = Headers::new();
    headers.push_unchecked(SmolStr::new("Via"), via);
    let max_forwards = original
        .headers()
        .get("Max-Forwards")
        .cloned()
        .unwrap_or_else(|| SmolStr::new("70"));
    headers.push_unchecked(SmolStr::new("Max-Forwards"), max_forwards);
    headers.push_unchecked(SmolStr::new("From"), from);
    headers.push_unchecked(SmolStr::new("To"), to);
    headers.push_unchecked(SmolStr::new("Call-ID"), call_id);
    headers.push_unchecked(
        SmolStr::new("CSeq"),
        CSeqHeader::new(cseq.seq, method.clone()).to_value(),
    );
    for route in original.headers().get_all("Route") {
        headers.push_unchecked(SmolStr::new("Route"), route.clone());
    }

    let start = RequestLine::new(method, original.uri().clone());
    Ok(Request::new(start, headers, Bytes::new())?)
}
