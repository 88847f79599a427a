// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP message model: methods, URIs, typed headers, requests and
//! responses.
//!
//! Messages are built once and treated as immutable by the layers above;
//! the only sanctioned mutations are the ones the network layer performs on
//! its way out (Via stamping) and in (received/rport annotation).
//!
//! Headers are a tagged union — one [`Header`] variant per supported header
//! plus [`Header::Generic`] for everything else — kept in an
//! insertion-ordered [`Headers`] list, because for Via and Route the order
//! *is* the routing semantics.
//!
//! # Examples
//!
//! ```
//! use sipwire_core::{Header, Headers, Method, Request, RequestLine, SipUri, Uri};
//! use bytes::Bytes;
//! use smol_str::SmolStr;
//!
//! let uri = SipUri::parse("sip:bob@example.com").unwrap();
//! let mut headers = Headers::new();
//! headers.push(Header::CallId(SmolStr::new("a84b4c76e66710")));
//! let request = Request::new(
//!     RequestLine::new(Method::Invite, Uri::Sip(uri)),
//!     headers,
//!     Bytes::new(),
//! );
//! assert_eq!(request.method(), &Method::Invite);
//! ```

pub mod auth;
pub mod header;
pub mod headers;
pub mod method;
pub mod msg;
pub mod name_addr;
pub mod params;
pub mod syntax;
pub mod uri;
pub mod version;
pub mod via;

pub use auth::{Auth, AuthParams};
pub use header::{
    CSeq, Contact, Date, Header, MediaType, MimeVersion, RetryAfter, Timestamp, TokenParams,
    UriEntry, Warning,
};
pub use headers::Headers;
pub use method::Method;
pub use msg::{Message, MessageError, Request, RequestLine, Response, StatusLine};
pub use name_addr::Address;
pub use params::{Param, Params};
pub use uri::{HostPort, Scheme, SipUri, Uri};
pub use version::SipVersion;
pub use via::{Via, MAGIC_COOKIE};
