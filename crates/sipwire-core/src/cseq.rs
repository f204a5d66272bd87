use smol_str::SmolStr;

use crate::method::Method;

/// Parsed representation of a CSeq header (RFC 3261 §20.16).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeqHeader {
    pub seq: u32,
    pub method: Method,
}

impl CSeqHeader {
    /// Creates a CSeq header value.
    pub fn new(seq: u32, method: Method) -> Self {
        Self { seq, method }
    }

    /// Parses a CSeq value of the form `<sequence> <method>`.
    pub fn parse(input: &str) -> Option<Self> {
        let mut parts = input.split_whitespace();
        let seq = parts.next()?.parse().ok()?;
        let method = Method::from_token(parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        Some(Self { seq, method })
    }

    /// Returns the header value as written on the wire.
    pub fn to_value(&self) -> SmolStr {
        SmolStr::new(format!("{} {}", self.seq, self.method.as_str()))
    }
}

impl std::fmt::Display for CSeqHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.seq, self.method.as_str())
    }
}
