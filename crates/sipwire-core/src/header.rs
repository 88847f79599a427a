// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The typed header set.
//!
//! Each supported header gets its own [`Header`] variant holding a value
//! parsed by its specific grammar; anything unrecognized travels as
//! [`Header::Generic`]. Dispatch is a `match` on the variant, the tagged
//! union rendition of a class-per-header hierarchy.

use std::fmt::{self, Display};

use smol_str::SmolStr;

use crate::auth::{Auth, AuthParams};
use crate::method::Method;
use crate::name_addr::Address;
use crate::params::Params;
use crate::syntax::Quoted;
use crate::uri::{HostPort, Uri};
use crate::via::Via;

/// `CSeq: 314159 INVITE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub sequence: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(sequence: u32, method: Method) -> Self {
        Self { sequence, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.sequence, self.method)
    }
}

/// One `Warning` element: `3DIGIT SP warn-agent SP quoted-text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub code: u16,
    pub agent: HostPort,
    pub text: SmolStr,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.code, self.agent, Quoted(&self.text))
    }
}

/// `type "/" subtype *(";" parameter)`, used by Content-Type and Accept.
///
/// The `Accept` wildcard is stored literally as `*`/`*`; there is no
/// sentinel value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub media_type: SmolStr,
    pub subtype: SmolStr,
    pub params: Params,
}

impl MediaType {
    pub fn new(media_type: impl Into<SmolStr>, subtype: impl Into<SmolStr>) -> Self {
        Self {
            media_type: media_type.into(),
            subtype: subtype.into(),
            params: Params::new(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.media_type == "*" && self.subtype == "*"
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.media_type, self.subtype, self.params)
    }
}

/// A token with optional parameters (Content-Disposition, Accept-Encoding
/// elements, Accept-Language elements).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenParams {
    pub token: SmolStr,
    pub params: Params,
}

impl TokenParams {
    pub fn new(token: impl Into<SmolStr>) -> Self {
        Self {
            token: token.into(),
            params: Params::new(),
        }
    }
}

impl fmt::Display for TokenParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.token, self.params)
    }
}

/// `<URI>;params`, the element shape of Alert-Info, Call-Info, Error-Info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriEntry {
    pub uri: Uri,
    pub params: Params,
}

impl UriEntry {
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            params: Params::new(),
        }
    }
}

impl fmt::Display for UriEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>{}", self.uri, self.params)
    }
}

/// `Retry-After: delta-seconds [comment] *(";" parameter)`; the comment is
/// discarded at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAfter {
    pub delta_seconds: u32,
    pub params: Params,
}

impl fmt::Display for RetryAfter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.delta_seconds, self.params)
    }
}

/// `Timestamp: value [delay]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Timestamp {
    pub value: f64,
    pub delay: Option<f64>,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)?;
        if let Some(delay) = self.delay {
            write!(f, " {}", delay)?;
        }
        Ok(())
    }
}

/// `Mime-Version: major "." minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MimeVersion {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for MimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// `Date` carries its RFC 1123 text verbatim; consumers that need a
/// timestamp parse it themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Date(pub SmolStr);

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contact is either the REGISTER wildcard `*` or a list of addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contact {
    Wildcard,
    Addresses(Vec<Address>),
}

impl Contact {
    pub fn addresses(&self) -> &[Address] {
        match self {
            Contact::Wildcard => &[],
            Contact::Addresses(list) => list,
        }
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contact::Wildcard => f.write_str("*"),
            Contact::Addresses(list) => join(f, list),
        }
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.fmt(f)?;
    }
    Ok(())
}

fn join_tokens(f: &mut fmt::Formatter<'_>, items: &[SmolStr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(item)?;
    }
    Ok(())
}

/// One parsed header, tagged by kind.
///
/// Multi-valued variants hold every element that appeared on one header
/// line; repeating the header across lines yields repeated `Header`
/// entries, and both spellings are legal on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    Accept(Vec<MediaType>),
    AcceptEncoding(Vec<TokenParams>),
    AcceptLanguage(Vec<TokenParams>),
    AlertInfo(Vec<UriEntry>),
    Allow(Vec<SmolStr>),
    AuthenticationInfo(AuthParams),
    Authorization(Auth),
    CallId(SmolStr),
    CallInfo(Vec<UriEntry>),
    Contact(Contact),
    ContentDisposition(TokenParams),
    ContentEncoding(Vec<SmolStr>),
    ContentLanguage(Vec<SmolStr>),
    ContentLength(u32),
    ContentType(MediaType),
    CSeq(CSeq),
    Date(Date),
    ErrorInfo(Vec<UriEntry>),
    Expires(u32),
    From(Address),
    InReplyTo(Vec<SmolStr>),
    MaxForwards(u32),
    MimeVersion(MimeVersion),
    MinExpires(u32),
    Organization(SmolStr),
    Priority(SmolStr),
    ProxyAuthenticate(Auth),
    ProxyAuthorization(Auth),
    ProxyRequire(Vec<SmolStr>),
    RecordRoute(Vec<Address>),
    ReplyTo(Vec<Address>),
    Require(Vec<SmolStr>),
    RetryAfter(RetryAfter),
    Route(Vec<Address>),
    Server(SmolStr),
    Subject(SmolStr),
    Supported(Vec<SmolStr>),
    Timestamp(Timestamp),
    To(Address),
    Unsupported(Vec<SmolStr>),
    UserAgent(SmolStr),
    Via(Vec<Via>),
    Warning(Vec<Warning>),
    WwwAuthenticate(Auth),
    Generic { name: SmolStr, value: SmolStr },
}

impl Header {
    /// The long-form wire name for this header.
    pub fn name(&self) -> &str {
        match self {
            Header::Accept(_) => "Accept",
            Header::AcceptEncoding(_) => "Accept-Encoding",
            Header::AcceptLanguage(_) => "Accept-Language",
            Header::AlertInfo(_) => "Alert-Info",
            Header::Allow(_) => "Allow",
            Header::AuthenticationInfo(_) => "Authentication-Info",
            Header::Authorization(_) => "Authorization",
            Header::CallId(_) => "Call-ID",
            Header::CallInfo(_) => "Call-Info",
            Header::Contact(_) => "Contact",
            Header::ContentDisposition(_) => "Content-Disposition",
            Header::ContentEncoding(_) => "Content-Encoding",
            Header::ContentLanguage(_) => "Content-Language",
            Header::ContentLength(_) => "Content-Length",
            Header::ContentType(_) => "Content-Type",
            Header::CSeq(_) => "CSeq",
            Header::Date(_) => "Date",
            Header::ErrorInfo(_) => "Error-Info",
            Header::Expires(_) => "Expires",
            Header::From(_) => "From",
            Header::InReplyTo(_) => "In-Reply-To",
            Header::MaxForwards(_) => "Max-Forwards",
            Header::MimeVersion(_) => "Mime-Version",
            Header::MinExpires(_) => "Min-Expires",
            Header::Organization(_) => "Organization",
            Header::Priority(_) => "Priority",
            Header::ProxyAuthenticate(_) => "Proxy-Authenticate",
            Header::ProxyAuthorization(_) => "Proxy-Authorization",
            Header::ProxyRequire(_) => "Proxy-Require",
            Header::RecordRoute(_) => "Record-Route",
            Header::ReplyTo(_) => "Reply-To",
            Header::Require(_) => "Require",
            Header::RetryAfter(_) => "Retry-After",
            Header::Route(_) => "Route",
            Header::Server(_) => "Server",
            Header::Subject(_) => "Subject",
            Header::Supported(_) => "Supported",
            Header::Timestamp(_) => "Timestamp",
            Header::To(_) => "To",
            Header::Unsupported(_) => "Unsupported",
            Header::UserAgent(_) => "User-Agent",
            Header::Via(_) => "Via",
            Header::Warning(_) => "Warning",
            Header::WwwAuthenticate(_) => "WWW-Authenticate",
            Header::Generic { name, .. } => name,
        }
    }

    /// Writes the value part of the header line.
    pub fn fmt_value(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Header::Accept(list) => join(f, list),
            Header::AcceptEncoding(list) => join(f, list),
            Header::AcceptLanguage(list) => join(f, list),
            Header::AlertInfo(list) => join(f, list),
            Header::Allow(list) => join_tokens(f, list),
            Header::AuthenticationInfo(params) => params.fmt(f),
            Header::Authorization(auth) => auth.fmt(f),
            Header::CallId(value) => f.write_str(value),
            Header::CallInfo(list) => join(f, list),
            Header::Contact(contact) => contact.fmt(f),
            Header::ContentDisposition(value) => value.fmt(f),
            Header::ContentEncoding(list) => join_tokens(f, list),
            Header::ContentLanguage(list) => join_tokens(f, list),
            Header::ContentLength(value) => value.fmt(f),
            Header::ContentType(value) => value.fmt(f),
            Header::CSeq(value) => value.fmt(f),
            Header::Date(value) => value.fmt(f),
            Header::ErrorInfo(list) => join(f, list),
            Header::Expires(value) => value.fmt(f),
            Header::From(value) => value.fmt(f),
            Header::InReplyTo(list) => join_tokens(f, list),
            Header::MaxForwards(value) => value.fmt(f),
            Header::MimeVersion(value) => value.fmt(f),
            Header::MinExpires(value) => value.fmt(f),
            Header::Organization(value) => f.write_str(value),
            Header::Priority(value) => f.write_str(value),
            Header::ProxyAuthenticate(auth) => auth.fmt(f),
            Header::ProxyAuthorization(auth) => auth.fmt(f),
            Header::ProxyRequire(list) => join_tokens(f, list),
            Header::RecordRoute(list) => join(f, list),
            Header::ReplyTo(list) => join(f, list),
            Header::Require(list) => join_tokens(f, list),
            Header::RetryAfter(value) => value.fmt(f),
            Header::Route(list) => join(f, list),
            Header::Server(value) => f.write_str(value),
            Header::Subject(value) => f.write_str(value),
            Header::Supported(list) => join_tokens(f, list),
            Header::Timestamp(value) => value.fmt(f),
            Header::To(value) => value.fmt(f),
            Header::Unsupported(list) => join_tokens(f, list),
            Header::UserAgent(value) => f.write_str(value),
            Header::Via(list) => join(f, list),
            Header::Warning(list) => join(f, list),
            Header::WwwAuthenticate(auth) => auth.fmt(f),
            Header::Generic { value, .. } => f.write_str(value),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name())?;
        self.fmt_value(f)
    }
}
