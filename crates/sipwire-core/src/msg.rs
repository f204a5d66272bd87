// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::Bytes;
use smol_str::SmolStr;

use crate::{headers::Headers, method::Method, uri::SipUri, version::SipVersion};

const MAX_REASON_LENGTH: usize = 256;
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    InvalidStatusCode { code: u16 },
    ReasonTooLong { max: usize, actual: usize },
    InvalidReason(String),
    BodyTooLarge { max: usize, actual: usize },
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStatusCode { code } => {
                write!(f, "invalid SIP status code: {} (must be 100-699)", code)
            }
            Self::ReasonTooLong { max, actual } => {
                write!(f, "reason phrase too long (max {}, got {})", max, actual)
            }
            Self::InvalidReason(msg) => write!(f, "invalid reason phrase: {}", msg),
            Self::BodyTooLarge { max, actual } => {
                write!(f, "body too large (max {}, got {})", max, actual)
            }
        }
    }
}

impl std::error::Error for MessageError {}

/// First line of a SIP request.
///
/// Per RFC 3261, the request line has the format:
/// `Method SP Request-URI SP SIP-Version CRLF`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    uri: SipUri,
    version: SipVersion,
}

impl RequestLine {
    /// Creates a request line for the given method and target URI.
    ///
    /// Defaults to SIP/2.0 as the version.
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self {
            method,
            uri,
            version: SipVersion::V2,
        }
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URI.
    pub fn uri(&self) -> &SipUri {
        &self.uri
    }

    /// Returns the SIP version.
    pub fn version(&self) -> &SipVersion {
        &self.version
    }

    /// Consumes self and returns the components.
    pub fn into_parts(self) -> (Method, SipUri, SipVersion) {
        (self.method, self.uri, self.version)
    }
}

/// First line of a SIP response.
///
/// Per RFC 3261, the status line has the format:
/// `SIP-Version SP Status-Code SP Reason-Phrase CRLF`
///
/// The constructor validates the status code range (100-699) and rejects
/// control characters in the reason phrase so a response value can never
/// carry a CRLF injection onto the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    version: SipVersion,
    code: u16,
    reason: SmolStr,
}

impl StatusLine {
    /// Creates a status line with the provided code and reason phrase.
    ///
    /// # Errors
    ///
    /// Returns an error if the status code is not in range 100-699, the
    /// reason phrase contains control characters, or the reason phrase
    /// exceeds the length limit.
    pub fn new(code: u16, reason: impl AsRef<str>) -> Result<Self, MessageError> {
        if !(100..=699).contains(&code) {
            return Err(MessageError::InvalidStatusCode { code });
        }

        let reason = reason.as_ref();
        validate_reason_phrase(reason)?;

        Ok(Self {
            version: SipVersion::V2,
            code,
            reason: SmolStr::new(reason),
        })
    }

    /// Returns the SIP version.
    pub fn version(&self) -> &SipVersion {
        &self.version
    }

    /// Returns the status code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Returns the reason phrase.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns true if this is an informational response (1xx).
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Returns true if this is a success response (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true if this is a final response (2xx-6xx).
    pub fn is_final(&self) -> bool {
        self.code >= 200
    }

    /// Consumes self and returns the components.
    pub fn into_parts(self) -> (SipVersion, u16, SmolStr) {
        (self.version, self.code, self.reason)
    }
}

/// Immutable in-memory representation of a SIP request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    start: RequestLine,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Builds a request from its components.
    ///
    /// # Errors
    ///
    /// Returns an error if the body exceeds the size limit.
    pub fn new(start: RequestLine, headers: Headers, body: Bytes) -> Result<Self, MessageError> {
        validate_body_size(&body)?;

        Ok(Self {
            start,
            headers,
            body,
        })
    }

    /// Returns the request line.
    pub fn start_line(&self) -> &RequestLine {
        &self.start
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        self.start.method()
    }

    /// Returns the request URI.
    pub fn uri(&self) -> &SipUri {
        self.start.uri()
    }

    /// Returns the headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a mutable reference to the headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the message body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns true if the message has a body.
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Consumes self and returns the components.
    pub fn into_parts(self) -> (RequestLine, Headers, Bytes) {
        (self.start, self.headers, self.body)
    }
}

/// Immutable in-memory representation of a SIP response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    start: StatusLine,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Builds a response from its components.
    ///
    /// # Errors
    ///
    /// Returns an error if the body exceeds the size limit.
    pub fn new(start: StatusLine, headers: Headers, body: Bytes) -> Result<Self, MessageError> {
        validate_body_size(&body)?;

        Ok(Self {
            start,
            headers,
            body,
        })
    }

    /// Returns the status line.
    pub fn start_line(&self) -> &StatusLine {
        &self.start
    }

    /// Returns the status code.
    pub fn code(&self) -> u16 {
        self.start.code()
    }

    /// Returns the reason phrase.
    pub fn reason(&self) -> &str {
        self.start.reason()
    }

    /// Returns the headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a mutable reference to the headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the message body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns true if this is an informational response (1xx).
    pub fn is_informational(&self) -> bool {
        self.start.is_informational()
    }

    /// Returns true if this is a success response (2xx).
    pub fn is_success(&self) -> bool {
        self.start.is_success()
    }

    /// Returns true if this is a final response (2xx-6xx).
    pub fn is_final(&self) -> bool {
        self.start.is_final()
    }

    /// Consumes self and returns the components.
    pub fn into_parts(self) -> (StatusLine, Headers, Bytes) {
        (self.start, self.headers, self.body)
    }
}

/// Either a SIP request or response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

impl SipMessage {
    /// Returns true if this is a request.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Returns true if this is a response.
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Returns a reference to the request if this is a request.
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Self::Request(req) => Some(req),
            _ => None,
        }
    }

    /// Returns a reference to the response if this is a response.
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Self::Response(res) => Some(res),
            _ => None,
        }
    }

    /// Returns the headers regardless of message type.
    pub fn headers(&self) -> &Headers {
        match self {
            Self::Request(req) => req.headers(),
            Self::Response(res) => res.headers(),
        }
    }

    /// Returns the body regardless of message type.
    pub fn body(&self) -> &Bytes {
        match self {
            Self::Request(req) => req.body(),
            Self::Response(res) => res.body(),
        }
    }
}

impl From<Request> for SipMessage {
    fn from(request: Request) -> Self {
        SipMessage::Request(request)
    }
}

impl From<Response> for SipMessage {
    fn from(response: Response) -> Self {
        SipMessage::Response(response)
    }
}

fn validate_reason_phrase(reason: &str) -> Result<(), MessageError> {
    if reason.len() > MAX_REASON_LENGTH {
        return Err(MessageError::ReasonTooLong {
            max: MAX_REASON_LENGTH,
            actual: reason.len(),
        });
    }

    // Reason phrase is UTF8-TEXT per RFC 3261, which excludes control chars.
    if reason.chars().any(|c| c.is_ascii_control()) {
        return Err(MessageError::InvalidReason(
            "contains control characters".to_string(),
        ));
    }

    Ok(())
}

fn validate_body_size(body: &Bytes) -> Result<(), MessageError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(MessageError::BodyTooLarge {
            max: MAX_BODY_SIZE,
            actual: body.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_uri() -> SipUri {
        SipUri::parse("sip:bob@example.com").expect("failed to parse URI")
    }

    #[test]
    fn create_request_line() {
        let uri = mock_uri();
        let request_line = RequestLine::new(Method::Invite, uri.clone());

        assert_eq!(request_line.method(), &Method::Invite);
        assert_eq!(request_line.uri(), &uri);
        assert_eq!(request_line.version(), &SipVersion::V2);
    }

    #[test]
    fn create_status_line() {
        let status = StatusLine::new(200, "OK").unwrap();

        assert_eq!(status.code(), 200);
        assert_eq!(status.reason(), "OK");
        assert_eq!(status.version(), &SipVersion::V2);
    }

    #[test]
    fn reject_invalid_status_codes() {
        assert!(StatusLine::new(99, "Invalid").is_err());
        assert!(StatusLine::new(700, "Invalid").is_err());
        assert!(StatusLine::new(0, "Invalid").is_err());
    }

    #[test]
    fn accept_boundary_status_codes() {
        assert!(StatusLine::new(100, "Trying").is_ok());
        assert!(StatusLine::new(699, "Unknown").is_ok());
    }

    #[test]
    fn reject_crlf_in_reason() {
        assert!(StatusLine::new(200, "OK\r\nInjected: evil").is_err());
        assert!(StatusLine::new(200, "OK\x00null").is_err());
    }

    #[test]
    fn reject_oversized_reason() {
        let long_reason = "x".repeat(MAX_REASON_LENGTH + 1);
        assert!(StatusLine::new(200, &long_reason).is_err());
    }

    #[test]
    fn status_line_predicates() {
        assert!(StatusLine::new(100, "Trying").unwrap().is_informational());
        assert!(StatusLine::new(200, "OK").unwrap().is_success());
        assert!(StatusLine::new(200, "OK").unwrap().is_final());
        assert!(StatusLine::new(486, "Busy Here").unwrap().is_final());
        assert!(!StatusLine::new(180, "Ringing").unwrap().is_final());
    }

    #[test]
    fn create_request() {
        let request_line = RequestLine::new(Method::Invite, mock_uri());
        let request = Request::new(request_line, Headers::new(), Bytes::new()).unwrap();

        assert_eq!(request.method(), &Method::Invite);
        assert!(!request.has_body());
    }

    #[test]
    fn reject_oversized_request_body() {
        let request_line = RequestLine::new(Method::Invite, mock_uri());
        let huge_body = Bytes::from(vec![0u8; MAX_BODY_SIZE + 1]);

        assert!(Request::new(request_line, Headers::new(), huge_body).is_err());
    }

    #[test]
    fn create_response() {
        let status_line = StatusLine::new(200, "OK").unwrap();
        let response = Response::new(status_line, Headers::new(), Bytes::new()).unwrap();

        assert_eq!(response.code(), 200);
        assert_eq!(response.reason(), "OK");
        assert!(response.is_success());
    }

    #[test]
    fn sip_message_discriminates() {
        let request_line = RequestLine::new(Method::Invite, mock_uri());
        let request = Request::new(request_line, Headers::new(), Bytes::new()).unwrap();
        let message = SipMessage::from(request);

        assert!(message.is_request());
        assert!(!message.is_response());
        assert!(message.as_request().is_some());
        assert!(message.as_response().is_none());
    }

    #[test]
    fn request_with_body() {
        let request_line = RequestLine::new(Method::Invite, mock_uri());
        let body = Bytes::from("SDP content here");
        let request = Request::new(request_line, Headers::new(), body.clone()).unwrap();

        assert!(request.has_body());
        assert_eq!(request.body(), &body);
    }
}
