// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::slice::{Iter, IterMut};

use smol_str::SmolStr;

/// Error raised when a header name or value fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    EmptyName,
    InvalidName(String),
    InvalidValue(String),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "header name must not be empty"),
            Self::InvalidName(name) => write!(f, "invalid header name: {:?}", name),
            Self::InvalidValue(value) => write!(f, "invalid header value: {:?}", value),
        }
    }
}

impl std::error::Error for HeaderError {}

/// Represents a single SIP header field as a name/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: SmolStr,
    pub value: SmolStr,
}

/// Collection of SIP headers preserving insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    /// Creates an empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a header collection from the given vector without additional cloning.
    pub fn from_vec(headers: Vec<Header>) -> Self {
        Self(headers)
    }

    /// Appends a header after validating name and value.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, the name contains characters
    /// outside the RFC 3261 token set, or the value contains control
    /// characters (which would allow CRLF injection on the wire).
    pub fn push(&mut self, name: SmolStr, value: SmolStr) -> Result<(), HeaderError> {
        validate_name(&name)?;
        validate_value(&value)?;
        self.0.push(Header { name, value });
        Ok(())
    }

    /// Appends a header without validation.
    ///
    /// Intended for values already validated by a parser or constructed from
    /// known-good constants.
    pub fn push_unchecked(&mut self, name: SmolStr, value: SmolStr) {
        self.0.push(Header { name, value });
    }

    /// Returns an iterator over the stored headers.
    pub fn iter(&self) -> Iter<'_, Header> {
        self.0.iter()
    }

    /// Returns a mutable iterator over the stored headers.
    pub fn iter_mut(&mut self) -> IterMut<'_, Header> {
        self.0.iter_mut()
    }

    /// Returns the number of headers present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the collection does not contain any headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Finds the first header whose name matches ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&SmolStr> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    /// Returns all headers with the given name, preserving original order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SmolStr> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    /// Removes every header whose name matches ignoring ASCII case.
    pub fn remove_all(&mut self, name: &str) {
        self.0.retain(|h| !h.name.eq_ignore_ascii_case(name));
    }

    /// Consumes the collection returning the underlying vector.
    pub fn into_inner(self) -> Vec<Header> {
        self.0
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn validate_name(name: &str) -> Result<(), HeaderError> {
    if name.is_empty() {
        return Err(HeaderError::EmptyName);
    }
    let is_token = name.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                '-' | '.' | '!' | '%' | '*' | '_' | '+' | '`' | '\'' | '~'
            )
    });
    if !is_token {
        return Err(HeaderError::InvalidName(name.to_owned()));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), HeaderError> {
    if value.chars().any(|c| c.is_ascii_control()) {
        return Err(HeaderError::InvalidValue(value.to_owned()));
    }
    Ok(())
}
