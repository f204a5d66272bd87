// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transaction matching (RFC 3261 §17.1.3 / §17.2.3).
//!
//! Pure key derivation: an inbound message maps to the fingerprint of the
//! transaction that owns it, or to `None` when the message cannot belong to
//! any transaction (no top Via, no magic-cookie branch, no CSeq). Looking
//! the key up in the table — and creating a transaction when nothing is
//! found — is the manager's job; "no match" here is a normal outcome, not an
//! error.

use sipwire_core::{CSeqHeader, Method, Request, Response};
use smol_str::SmolStr;

use crate::{is_rfc3261_branch, top_via, TransactionKey};

/// Derives the client-transaction key a response belongs to.
///
/// The top Via of a response is the one we wrote into the request, so its
/// branch and sent-by select the originating client transaction; the CSeq
/// method disambiguates the INVITE from the CANCEL sharing that branch.
pub fn response_key(response: &Response) -> Option<TransactionKey> {
    let via = top_via(response.headers())?;
    let branch = via.branch()?;
    if !is_rfc3261_branch(branch) {
        return None;
    }
    let cseq = response
        .headers()
        .get("CSeq")
        .and_then(|v| CSeqHeader::parse(v))?;
    Some(TransactionKey {
        branch: SmolStr::new(branch),
        sent_by: via.sent_by.clone(),
        method: cseq.method,
        is_server: false,
    })
}

/// Derives the server-transaction key an inbound request belongs to.
///
/// ACK and CANCEL keep their own method in the key; the manager additionally
/// consults [`invite_key_for`] to reach the INVITE transaction they refer to.
pub fn request_key(request: &Request) -> Option<TransactionKey> {
    TransactionKey::from_request(request, true)
}

/// Rewrites a key to address the INVITE transaction with the same branch and
/// sent-by. Used to route an ACK or CANCEL to the transaction it targets.
pub fn invite_key_for(key: &TransactionKey) -> TransactionKey {
    TransactionKey {
        branch: key.branch.clone(),
        sent_by: key.sent_by.clone(),
        method: Method::Invite,
        is_server: key.is_server,
    }
}
