// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP message parser and serializer.
//!
//! Converts a contiguous byte buffer holding one SIP message into a typed
//! [`Message`], or a [`ParseError`] naming what went wrong. Header values
//! are parsed by header-specific grammars (see [`header_values`]); a value
//! that fails its grammar is dropped with a diagnostic and the message
//! still parses, so one bad header never costs the whole message.
//!
//! # Example
//! ```
//! use bytes::Bytes;
//! use sipwire_parse::{parse_message, serialize_message};
//! # let raw = b"INVITE sip:bob@example.com SIP/2.0\r\nVia: SIP/2.0/UDP pc33.example.com;branch=z9hG4bK776asdhds\r\nMax-Forwards: 70\r\nTo: <sip:bob@example.com>\r\nFrom: Alice <sip:alice@example.com>;tag=1928301774\r\nCall-ID: a84b4c76e66710@pc33.example.com\r\nCSeq: 314159 INVITE\r\nContent-Length: 0\r\n\r\n";
//! let message = parse_message(&Bytes::from_static(raw)).unwrap();
//! let bytes = serialize_message(&message);
//! ```

use std::fmt;

use bytes::{Bytes, BytesMut};
use smol_str::SmolStr;
use tracing::debug;

use sipwire_core::{
    Header, Headers, Message, Method, Request, RequestLine, Response, StatusLine, Uri,
};

pub mod header_values;
mod tokenizer;

pub use tokenizer::{split_element_params, split_name_value, split_outside, split_values};

use header_values::*;

/// Default ceiling on one message, matching what a well-behaved UA emits.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Why a buffer failed to parse as a SIP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The first line is neither a valid request line nor a status line.
    MalformedStartLine,
    /// The start line names a protocol other than SIP.
    UnknownVersion,
    /// Strict mode only: the named header failed its grammar.
    HeaderParseFailed(SmolStr),
    /// The body is shorter than the declared Content-Length.
    TruncatedBody,
    /// The buffer exceeds the configured size limit.
    MessageTooLarge { max: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedStartLine => write!(f, "malformed start line"),
            Self::UnknownVersion => write!(f, "unknown protocol version"),
            Self::HeaderParseFailed(name) => write!(f, "header {} failed to parse", name),
            Self::TruncatedBody => write!(f, "body shorter than Content-Length"),
            Self::MessageTooLarge { max } => write!(f, "message exceeds {} bytes", max),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses one SIP message with the default size limit.
pub fn parse_message(raw: &Bytes) -> Result<Message, ParseError> {
    parse_message_with_limit(raw, DEFAULT_MAX_MESSAGE_SIZE)
}

/// Parses one SIP message, dropping headers that fail their grammar.
pub fn parse_message_with_limit(raw: &Bytes, max_size: usize) -> Result<Message, ParseError> {
    parse_inner(raw, max_size, false)
}

/// Parses one SIP message, failing on the first bad header instead of
/// dropping it.
pub fn parse_message_strict(raw: &Bytes) -> Result<Message, ParseError> {
    parse_inner(raw, DEFAULT_MAX_MESSAGE_SIZE, true)
}

fn parse_inner(raw: &Bytes, max_size: usize, strict: bool) -> Result<Message, ParseError> {
    if raw.len() > max_size {
        return Err(ParseError::MessageTooLarge { max: max_size });
    }

    let (head, body_bytes) = split_head_body(raw)?;
    let mut lines = unfold_lines(head);
    if lines.is_empty() {
        return Err(ParseError::MalformedStartLine);
    }
    let start = lines.remove(0);

    let mut message = if is_status_line(&start) {
        let status = parse_status_line(&start)?;
        Message::Response(Response::new(status, Headers::new(), Bytes::new()))
    } else {
        let request_line = parse_request_line(&start)?;
        Message::Request(Request::new(request_line, Headers::new(), Bytes::new()))
    };

    for line in &lines {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => {
                if strict {
                    return Err(ParseError::HeaderParseFailed(SmolStr::new(line.trim())));
                }
                debug!(line = %line, "dropping header line without a colon");
                continue;
            }
        };
        let long_name = canonical_name(name);
        match lookup(&long_name) {
            Some(kind) => match parse_header(kind, value) {
                Some(header) => message.headers_mut().push(header),
                None if kind == HeaderKind::ContentLength => {
                    // Unparseable Content-Length reads as zero.
                    if strict {
                        return Err(ParseError::HeaderParseFailed(SmolStr::new("Content-Length")));
                    }
                    debug!(value = %value, "malformed Content-Length treated as 0");
                    message.headers_mut().push(Header::ContentLength(0));
                }
                None => {
                    if strict {
                        return Err(ParseError::HeaderParseFailed(SmolStr::new(
                            header_name(kind),
                        )));
                    }
                    debug!(name = %header_name(kind), value = %value, "dropping malformed header");
                }
            },
            None => message.headers_mut().push(Header::Generic {
                name: SmolStr::new(name),
                value: SmolStr::new(value),
            }),
        }
    }

    let declared = message.headers().content_length().map(|len| len as usize);
    let body = extract_body(body_bytes, declared)?;
    match &mut message {
        Message::Request(req) => req.set_body(body),
        Message::Response(res) => res.set_body(body),
    }
    Ok(message)
}

/// Splits the buffer at the blank line; without one the whole buffer is
/// header text (datagram with no body).
fn split_head_body(raw: &Bytes) -> Result<(&str, &[u8]), ParseError> {
    let data = raw.as_ref();
    let delim = b"\r\n\r\n";
    match data.windows(delim.len()).position(|window| window == delim) {
        Some(pos) => {
            let head =
                std::str::from_utf8(&data[..pos]).map_err(|_| ParseError::MalformedStartLine)?;
            Ok((head, &data[pos + delim.len()..]))
        }
        None => {
            let head = std::str::from_utf8(data).map_err(|_| ParseError::MalformedStartLine)?;
            Ok((head, &[]))
        }
    }
}

/// Joins folded continuation lines (leading LWS) onto their header line
/// with a single space.
fn unfold_lines(head: &str) -> Vec<String> {
    let mut logical: Vec<String> = Vec::new();
    for line in head.split("\r\n") {
        if (line.starts_with(' ') || line.starts_with('\t')) && !logical.is_empty() {
            let last = logical.last_mut().expect("checked non-empty");
            last.push(' ');
            last.push_str(line.trim_start());
        } else {
            logical.push(line.to_owned());
        }
    }
    logical
}

/// Status-line probe with a four-character slop: up to four leading
/// whitespace bytes are tolerated before a case-insensitive `SIP`, which is
/// laxer than the RFC. The match must sit at the first non-whitespace
/// position — scanning every offset would claim `BYE sip:...`, whose
/// request-URI puts `sip` at offset 4.
fn is_status_line(line: &str) -> bool {
    let bytes = line.as_bytes();
    let offset = bytes
        .iter()
        .take(4)
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    bytes.len() >= offset + 3 && bytes[offset..offset + 3].eq_ignore_ascii_case(b"sip")
}

/// Parses `SIP "/" 1*DIGIT "." 1*DIGIT`, clamping any version to 2.0.
fn parse_version(text: &str) -> Result<(), ParseError> {
    let rest = text
        .get(..3)
        .filter(|prefix| prefix.eq_ignore_ascii_case("sip"))
        .map(|_| &text[3..])
        .ok_or(ParseError::UnknownVersion)?;
    let rest = rest.strip_prefix('/').ok_or(ParseError::MalformedStartLine)?;
    let (major, minor) = rest.split_once('.').ok_or(ParseError::MalformedStartLine)?;
    if major.is_empty()
        || minor.is_empty()
        || !major.bytes().all(|b| b.is_ascii_digit())
        || !minor.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(ParseError::MalformedStartLine);
    }
    if major != "2" || minor != "0" {
        debug!(version = %text, "clamping SIP version to 2.0");
    }
    Ok(())
}

fn parse_status_line(line: &str) -> Result<StatusLine, ParseError> {
    use nom::{
        bytes::complete::take_while1,
        character::complete::space1,
        combinator::rest,
        sequence::tuple,
    };

    let mut parser = tuple((
        take_while1::<_, _, nom::error::Error<&str>>(|c: char| !c.is_whitespace()),
        space1,
        take_while1(|c: char| c.is_ascii_digit()),
        rest,
    ));
    let trimmed = line.trim();
    let (_, (version, _, code_digits, reason)) =
        parser(trimmed).map_err(|_| ParseError::MalformedStartLine)?;

    parse_version(version)?;
    let code: u16 = code_digits
        .parse()
        .map_err(|_| ParseError::MalformedStartLine)?;
    let reason = reason.trim();
    StatusLine::new(code, reason).map_err(|_| ParseError::MalformedStartLine)
}

fn parse_request_line(line: &str) -> Result<RequestLine, ParseError> {
    use nom::{
        bytes::complete::take_while1,
        character::complete::space1,
        combinator::rest,
        sequence::tuple,
    };

    let mut parser = tuple((
        take_while1::<_, _, nom::error::Error<&str>>(|c: char| !c.is_whitespace()),
        space1,
        take_while1(|c: char| !c.is_whitespace()),
        space1,
        rest,
    ));
    // Leading whitespace before the method is skipped.
    let trimmed = line.trim_start();
    let (_, (method_token, _, uri_token, _, version_token)) =
        parser(trimmed).map_err(|_| ParseError::MalformedStartLine)?;

    parse_version(version_token.trim())?;
    let uri = Uri::parse(uri_token).ok_or(ParseError::MalformedStartLine)?;
    Ok(RequestLine::new(Method::from_token(method_token), uri))
}

/// Resolves compact header forms to their long names.
fn canonical_name(name: &str) -> SmolStr {
    if name.len() != 1 {
        return SmolStr::new(name.to_ascii_lowercase());
    }
    let long = match name.to_ascii_lowercase().as_str() {
        "v" => "via",
        "f" => "from",
        "t" => "to",
        "i" => "call-id",
        "m" => "contact",
        "l" => "content-length",
        "c" => "content-type",
        "e" => "content-encoding",
        "s" => "subject",
        "k" => "supported",
        other => return SmolStr::new(other),
    };
    SmolStr::new(long)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderKind {
    Accept,
    AcceptEncoding,
    AcceptLanguage,
    AlertInfo,
    Allow,
    AuthenticationInfo,
    Authorization,
    CallId,
    CallInfo,
    Contact,
    ContentDisposition,
    ContentEncoding,
    ContentLanguage,
    ContentLength,
    ContentType,
    CSeq,
    Date,
    ErrorInfo,
    Expires,
    From,
    InReplyTo,
    MaxForwards,
    MimeVersion,
    MinExpires,
    Organization,
    Priority,
    ProxyAuthenticate,
    ProxyAuthorization,
    ProxyRequire,
    RecordRoute,
    ReplyTo,
    Require,
    RetryAfter,
    Route,
    Server,
    Subject,
    Supported,
    Timestamp,
    To,
    Unsupported,
    UserAgent,
    Via,
    Warning,
    WwwAuthenticate,
}

/// Lower-cased header names, sorted for binary search.
const HEADER_TABLE: [(&str, HeaderKind); 44] = [
    ("accept", HeaderKind::Accept),
    ("accept-encoding", HeaderKind::AcceptEncoding),
    ("accept-language", HeaderKind::AcceptLanguage),
    ("alert-info", HeaderKind::AlertInfo),
    ("allow", HeaderKind::Allow),
    ("authentication-info", HeaderKind::AuthenticationInfo),
    ("authorization", HeaderKind::Authorization),
    ("call-id", HeaderKind::CallId),
    ("call-info", HeaderKind::CallInfo),
    ("contact", HeaderKind::Contact),
    ("content-disposition", HeaderKind::ContentDisposition),
    ("content-encoding", HeaderKind::ContentEncoding),
    ("content-language", HeaderKind::ContentLanguage),
    ("content-length", HeaderKind::ContentLength),
    ("content-type", HeaderKind::ContentType),
    ("cseq", HeaderKind::CSeq),
    ("date", HeaderKind::Date),
    ("error-info", HeaderKind::ErrorInfo),
    ("expires", HeaderKind::Expires),
    ("from", HeaderKind::From),
    ("in-reply-to", HeaderKind::InReplyTo),
    ("max-forwards", HeaderKind::MaxForwards),
    ("mime-version", HeaderKind::MimeVersion),
    ("min-expires", HeaderKind::MinExpires),
    ("organization", HeaderKind::Organization),
    ("priority", HeaderKind::Priority),
    ("proxy-authenticate", HeaderKind::ProxyAuthenticate),
    ("proxy-authorization", HeaderKind::ProxyAuthorization),
    ("proxy-require", HeaderKind::ProxyRequire),
    ("record-route", HeaderKind::RecordRoute),
    ("reply-to", HeaderKind::ReplyTo),
    ("require", HeaderKind::Require),
    ("retry-after", HeaderKind::RetryAfter),
    ("route", HeaderKind::Route),
    ("server", HeaderKind::Server),
    ("subject", HeaderKind::Subject),
    ("supported", HeaderKind::Supported),
    ("timestamp", HeaderKind::Timestamp),
    ("to", HeaderKind::To),
    ("unsupported", HeaderKind::Unsupported),
    ("user-agent", HeaderKind::UserAgent),
    ("via", HeaderKind::Via),
    ("warning", HeaderKind::Warning),
    ("www-authenticate", HeaderKind::WwwAuthenticate),
];

fn lookup(lower_name: &str) -> Option<HeaderKind> {
    HEADER_TABLE
        .binary_search_by(|(name, _)| name.cmp(&lower_name))
        .ok()
        .map(|idx| HEADER_TABLE[idx].1)
}

fn header_name(kind: HeaderKind) -> &'static str {
    HEADER_TABLE
        .iter()
        .find(|(_, k)| *k == kind)
        .map(|(name, _)| *name)
        .expect("kind present in table")
}

fn parse_header(kind: HeaderKind, value: &str) -> Option<Header> {
    let header = match kind {
        HeaderKind::Accept => Header::Accept(parse_media_type_list(value)?),
        HeaderKind::AcceptEncoding => Header::AcceptEncoding(parse_token_params_list(value)?),
        HeaderKind::AcceptLanguage => Header::AcceptLanguage(parse_token_params_list(value)?),
        HeaderKind::AlertInfo => Header::AlertInfo(parse_uri_entry_list(value)?),
        HeaderKind::Allow => Header::Allow(parse_token_list(value)?),
        HeaderKind::AuthenticationInfo => Header::AuthenticationInfo(parse_auth_params(value)?),
        HeaderKind::Authorization => Header::Authorization(parse_auth(value)?),
        HeaderKind::CallId => Header::CallId(parse_call_id(value)?),
        HeaderKind::CallInfo => Header::CallInfo(parse_uri_entry_list(value)?),
        HeaderKind::Contact => Header::Contact(parse_contact(value)?),
        HeaderKind::ContentDisposition => Header::ContentDisposition(parse_token_params(value)?),
        HeaderKind::ContentEncoding => Header::ContentEncoding(parse_token_list(value)?),
        HeaderKind::ContentLanguage => Header::ContentLanguage(parse_token_list(value)?),
        HeaderKind::ContentLength => Header::ContentLength(parse_integer(value)?),
        HeaderKind::ContentType => Header::ContentType(parse_media_type(value)?),
        HeaderKind::CSeq => Header::CSeq(parse_cseq(value)?),
        HeaderKind::Date => Header::Date(sipwire_core::Date(parse_date(value)?)),
        HeaderKind::ErrorInfo => Header::ErrorInfo(parse_uri_entry_list(value)?),
        HeaderKind::Expires => Header::Expires(parse_integer(value)?),
        HeaderKind::From => Header::From(parse_single_address(value)?),
        HeaderKind::InReplyTo => Header::InReplyTo(parse_token_list(value)?),
        HeaderKind::MaxForwards => Header::MaxForwards(parse_integer(value)?),
        HeaderKind::MimeVersion => Header::MimeVersion(parse_mime_version(value)?),
        HeaderKind::MinExpires => Header::MinExpires(parse_integer(value)?),
        HeaderKind::Organization => Header::Organization(parse_trimmed_text(value)),
        HeaderKind::Priority => Header::Priority(parse_single_token(value)?),
        HeaderKind::ProxyAuthenticate => Header::ProxyAuthenticate(parse_auth(value)?),
        HeaderKind::ProxyAuthorization => Header::ProxyAuthorization(parse_auth(value)?),
        HeaderKind::ProxyRequire => Header::ProxyRequire(parse_token_list(value)?),
        HeaderKind::RecordRoute => Header::RecordRoute(parse_address_list(value)?),
        HeaderKind::ReplyTo => Header::ReplyTo(parse_address_list(value)?),
        HeaderKind::Require => Header::Require(parse_token_list(value)?),
        HeaderKind::RetryAfter => Header::RetryAfter(parse_retry_after(value)?),
        HeaderKind::Route => Header::Route(parse_address_list(value)?),
        HeaderKind::Server => Header::Server(parse_trimmed_text(value)),
        HeaderKind::Subject => Header::Subject(parse_trimmed_text(value)),
        HeaderKind::Supported => Header::Supported(parse_token_list(value)?),
        HeaderKind::Timestamp => Header::Timestamp(parse_timestamp(value)?),
        HeaderKind::To => Header::To(parse_single_address(value)?),
        HeaderKind::Unsupported => Header::Unsupported(parse_token_list(value)?),
        HeaderKind::UserAgent => Header::UserAgent(parse_trimmed_text(value)),
        HeaderKind::Via => Header::Via(parse_via_list(value)?),
        HeaderKind::Warning => Header::Warning(parse_warning_list(value)?),
        HeaderKind::WwwAuthenticate => Header::WwwAuthenticate(parse_auth(value)?),
    };
    Some(header)
}

fn extract_body(body_bytes: &[u8], declared: Option<usize>) -> Result<Bytes, ParseError> {
    match declared {
        Some(declared) => {
            if declared > body_bytes.len() {
                return Err(ParseError::TruncatedBody);
            }
            Ok(Bytes::copy_from_slice(&body_bytes[..declared]))
        }
        None => Ok(Bytes::copy_from_slice(body_bytes)),
    }
}

/// Serializes a request with a recomputed `Content-Length`.
pub fn serialize_request(req: &Request) -> Bytes {
    serialize_parts(&req.start_line().to_string(), req.headers(), req.body())
}

/// Serializes a response with a recomputed `Content-Length`.
pub fn serialize_response(res: &Response) -> Bytes {
    serialize_parts(&res.start_line().to_string(), res.headers(), res.body())
}

pub fn serialize_message(message: &Message) -> Bytes {
    match message {
        Message::Request(req) => serialize_request(req),
        Message::Response(res) => serialize_response(res),
    }
}

fn serialize_parts(start_line: &str, headers: &Headers, body: &Bytes) -> Bytes {
    use std::fmt::Write;

    let mut buf = String::new();
    let _ = write!(buf, "{}\r\n", start_line);
    for header in headers.iter() {
        // Content-Length is always recomputed from the actual body.
        if matches!(header, Header::ContentLength(_)) {
            continue;
        }
        let _ = write!(buf, "{}\r\n", header);
    }
    let _ = write!(buf, "Content-Length: {}\r\n\r\n", body.len());

    let mut out = BytesMut::with_capacity(buf.len() + body.len());
    out.extend_from_slice(buf.as_bytes());
    out.extend_from_slice(body);
    out.freeze()
}
