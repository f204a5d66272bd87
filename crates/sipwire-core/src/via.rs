// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;

use smol_str::SmolStr;

/// Parsed representation of a Via header (RFC 3261 §20.42).
///
/// Only the fields the transaction layer reads are modeled: the transport
/// token, the sent-by host\[:port\], and the parameter list (most notably
/// `branch`). Parameter names are stored lowercased; lookups are therefore
/// case-insensitive as the RFC requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaHeader {
    pub transport: SmolStr,
    pub sent_by: SmolStr,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl ViaHeader {
    /// Parses a Via header value of the form
    /// `SIP/2.0/<transport> <sent-by>[;param[=value]]*`.
    pub fn parse(input: &str) -> Option<Self> {
        let mut parts = input.split(';');
        let base = parts.next()?.trim();

        let (protocol, sent_by) = base.split_once(char::is_whitespace)?;
        let sent_by = sent_by.trim();
        if sent_by.is_empty() {
            return None;
        }

        // Protocol is SIP/2.0/<transport>; anything else is not ours.
        let mut proto_parts = protocol.splitn(3, '/');
        let name = proto_parts.next()?;
        let version = proto_parts.next()?;
        let transport = proto_parts.next()?.trim();
        if !name.eq_ignore_ascii_case("SIP") || version != "2.0" || transport.is_empty() {
            return None;
        }

        let mut params = BTreeMap::new();
        for param in parts {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            if let Some((k, v)) = param.split_once('=') {
                params.insert(
                    SmolStr::new(k.trim().to_ascii_lowercase()),
                    Some(SmolStr::new(v.trim().to_owned())),
                );
            } else {
                params.insert(SmolStr::new(param.to_ascii_lowercase()), None);
            }
        }

        Some(Self {
            transport: SmolStr::new(transport.to_ascii_uppercase()),
            sent_by: SmolStr::new(sent_by.to_owned()),
            params,
        })
    }

    /// Returns the transport token (e.g. UDP/TCP/TLS) associated with this Via.
    pub fn transport(&self) -> &str {
        self.transport.as_str()
    }

    /// Returns the sent-by host\[:port\] of this Via.
    pub fn sent_by(&self) -> &str {
        self.sent_by.as_str()
    }

    /// Looks up the provided parameter ignoring ASCII case.
    pub fn param(&self, name: &str) -> Option<&Option<SmolStr>> {
        self.params.get(&SmolStr::new(name.to_ascii_lowercase()))
    }

    /// Returns the `branch` parameter value, if present and non-empty.
    pub fn branch(&self) -> Option<&str> {
        match self.param("branch") {
            Some(Some(value)) if !value.is_empty() => Some(value.as_str()),
            _ => None,
        }
    }
}
