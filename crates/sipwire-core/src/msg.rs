// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use bytes::Bytes;
use smol_str::SmolStr;

use crate::headers::Headers;
use crate::method::Method;
use crate::uri::Uri;
use crate::version::SipVersion;

const MAX_REASON_LENGTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    InvalidStatusCode { code: u16 },
    ReasonTooLong { max: usize, actual: usize },
    InvalidReason,
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStatusCode { code } => {
                write!(f, "invalid SIP status code: {} (must be 100-699)", code)
            }
            Self::ReasonTooLong { max, actual } => {
                write!(f, "reason phrase too long (max {}, got {})", max, actual)
            }
            Self::InvalidReason => write!(f, "reason phrase contains control characters"),
        }
    }
}

impl std::error::Error for MessageError {}

/// First line of a request: `Method SP Request-URI SP SIP-Version`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLine {
    method: Method,
    uri: Uri,
    version: SipVersion,
}

impl RequestLine {
    pub fn new(method: Method, uri: impl Into<Uri>) -> Self {
        Self {
            method,
            uri: uri.into(),
            version: SipVersion::V2,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> &SipVersion {
        &self.version
    }

    pub fn set_uri(&mut self, uri: impl Into<Uri>) {
        self.uri = uri.into();
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.uri, self.version)
    }
}

/// First line of a response: `SIP-Version SP Status-Code SP Reason-Phrase`.
///
/// The constructor validates the code range and keeps control characters
/// (CRLF injection included) out of the reason phrase.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    version: SipVersion,
    code: u16,
    reason: SmolStr,
}

impl StatusLine {
    pub fn new(code: u16, reason: impl AsRef<str>) -> Result<Self, MessageError> {
        if !(100..=699).contains(&code) {
            return Err(MessageError::InvalidStatusCode { code });
        }
        let reason = reason.as_ref();
        if reason.len() > MAX_REASON_LENGTH {
            return Err(MessageError::ReasonTooLong {
                max: MAX_REASON_LENGTH,
                actual: reason.len(),
            });
        }
        if reason.chars().any(|c| c.is_ascii_control()) {
            return Err(MessageError::InvalidReason);
        }
        Ok(Self {
            version: SipVersion::V2,
            code,
            reason: SmolStr::new(reason),
        })
    }

    pub fn version(&self) -> &SipVersion {
        &self.version
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.version, self.code, self.reason)
    }
}

/// A SIP request: request line, headers, optional body.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    start: RequestLine,
    headers: Headers,
    body: Bytes,
}

impl Request {
    pub fn new(start: RequestLine, headers: Headers, body: Bytes) -> Self {
        Self {
            start,
            headers,
            body,
        }
    }

    pub fn start_line(&self) -> &RequestLine {
        &self.start
    }

    pub fn method(&self) -> &Method {
        self.start.method()
    }

    pub fn uri(&self) -> &Uri {
        self.start.uri()
    }

    pub fn set_uri(&mut self, uri: impl Into<Uri>) {
        self.start.set_uri(uri);
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub fn into_parts(self) -> (RequestLine, Headers, Bytes) {
        (self.start, self.headers, self.body)
    }
}

/// A SIP response: status line, headers, optional body.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    start: StatusLine,
    headers: Headers,
    body: Bytes,
}

impl Response {
    pub fn new(start: StatusLine, headers: Headers, body: Bytes) -> Self {
        Self {
            start,
            headers,
            body,
        }
    }

    pub fn start_line(&self) -> &StatusLine {
        &self.start
    }

    pub fn code(&self) -> u16 {
        self.start.code()
    }

    pub fn reason(&self) -> &str {
        self.start.reason()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.code())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }

    pub fn is_final(&self) -> bool {
        self.code() >= 200
    }

    pub fn into_parts(self) -> (StatusLine, Headers, Bytes) {
        (self.start, self.headers, self.body)
    }
}

/// Either kind of message, as routed by the network layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(req) => Some(req),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(res) => Some(res),
            Message::Request(_) => None,
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(req) => req.headers(),
            Message::Response(res) => res.headers(),
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Message::Request(req) => req.headers_mut(),
            Message::Response(res) => res.headers_mut(),
        }
    }

    pub fn body(&self) -> &Bytes {
        match self {
            Message::Request(req) => req.body(),
            Message::Response(res) => res.body(),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(res: Response) -> Self {
        Message::Response(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::SipUri;

    fn mock_uri() -> Uri {
        Uri::Sip(SipUri::parse("sip:bob@example.com").unwrap())
    }

    #[test]
    fn request_line_display() {
        let line = RequestLine::new(Method::Invite, mock_uri());
        assert_eq!(line.to_string(), "INVITE sip:bob@example.com SIP/2.0");
    }

    #[test]
    fn status_line_validates_code_range() {
        assert!(StatusLine::new(99, "Too Low").is_err());
        assert!(StatusLine::new(700, "Too High").is_err());
        assert!(StatusLine::new(100, "Trying").is_ok());
        assert!(StatusLine::new(699, "Whatever").is_ok());
    }

    #[test]
    fn status_line_rejects_crlf_injection() {
        assert!(StatusLine::new(200, "OK\r\nEvil: yes").is_err());
        assert!(StatusLine::new(200, "OK\x00").is_err());
    }

    #[test]
    fn status_line_display() {
        let line = StatusLine::new(180, "Ringing").unwrap();
        assert_eq!(line.to_string(), "SIP/2.0 180 Ringing");
    }

    #[test]
    fn response_classification() {
        let ringing = Response::new(
            StatusLine::new(180, "Ringing").unwrap(),
            Headers::new(),
            Bytes::new(),
        );
        assert!(ringing.is_provisional());
        assert!(!ringing.is_final());

        let ok = Response::new(
            StatusLine::new(200, "OK").unwrap(),
            Headers::new(),
            Bytes::new(),
        );
        assert!(ok.is_success());
        assert!(ok.is_final());

        let busy = Response::new(
            StatusLine::new(486, "Busy Here").unwrap(),
            Headers::new(),
            Bytes::new(),
        );
        assert!(busy.is_final());
        assert!(!busy.is_success());
    }

    #[test]
    fn message_variant_access() {
        let req = Request::new(
            RequestLine::new(Method::Options, mock_uri()),
            Headers::new(),
            Bytes::new(),
        );
        let msg = Message::from(req);
        assert!(msg.is_request());
        assert!(msg.as_request().is_some());
        assert!(msg.as_response().is_none());
    }
}
