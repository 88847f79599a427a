// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact sip/sips URI model.
//!
//! This is the slice of the URI grammar the core consumes: scheme, user,
//! host, port, and the uri-parameters the routing layers read (`transport`,
//! `lr`). Anything with another scheme is carried opaquely in
//! [`Uri::Absolute`] so Contact, Alert-Info, and friends can hold it without
//! the core pretending to understand it.

use std::fmt;

use smol_str::SmolStr;

use crate::params::Params;

/// Host plus optional port, as written in URIs and Via sent-by values.
///
/// IPv6 references keep their brackets in `host`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: SmolStr,
    pub port: Option<u16>,
}

impl HostPort {
    pub fn new(host: impl Into<SmolStr>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[v6]`, or `[v6]:port`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        if let Some(rest) = input.strip_prefix('[') {
            let end = rest.find(']')?;
            let host = &input[..end + 2];
            let remainder = &rest[end + 1..];
            let port = match remainder.strip_prefix(':') {
                Some(p) => Some(p.parse().ok()?),
                None if remainder.is_empty() => None,
                None => return None,
            };
            return Some(Self::new(host, port));
        }
        if input.contains('[') || input.contains(']') {
            return None;
        }
        // A bare colon-separated pair; more than one colon would be an
        // unbracketed IPv6 literal, which the grammar forbids.
        match input.matches(':').count() {
            0 => Some(Self::new(input, None)),
            1 => {
                let (host, port) = input.split_once(':')?;
                if host.is_empty() {
                    return None;
                }
                Some(Self::new(host, Some(port.parse().ok()?)))
            }
            _ => None,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

/// URI scheme; only sip and sips get structured treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Sip,
    Sips,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
        }
    }

    /// Default port for the scheme (5060 for sip, 5061 for sips).
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Sip => 5060,
            Scheme::Sips => 5061,
        }
    }
}

/// Structured sip/sips URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub scheme: Scheme,
    pub user: Option<SmolStr>,
    pub host_port: HostPort,
    pub params: Params,
    /// Raw `?header=value&...` tail, kept verbatim.
    pub headers: Option<SmolStr>,
}

impl SipUri {
    pub fn new(scheme: Scheme, host_port: HostPort) -> Self {
        Self {
            scheme,
            user: None,
            host_port,
            params: Params::new(),
            headers: None,
        }
    }

    /// Parses `sip:` / `sips:` URIs; returns None for anything else.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (scheme, rest) = if let Some(rest) = strip_scheme(input, "sips:") {
            (Scheme::Sips, rest)
        } else if let Some(rest) = strip_scheme(input, "sip:") {
            (Scheme::Sip, rest)
        } else {
            return None;
        };

        let (rest, headers) = match rest.split_once('?') {
            Some((head, tail)) => (head, Some(SmolStr::new(tail))),
            None => (rest, None),
        };

        let (addr, params_part) = match rest.split_once(';') {
            Some((head, tail)) => (head, Some(tail)),
            None => (rest, None),
        };

        let (user, host_part) = match addr.rsplit_once('@') {
            Some((user, host)) if !user.is_empty() => (Some(SmolStr::new(user)), host),
            Some(_) => return None,
            None => (None, addr),
        };

        let host_port = HostPort::parse(host_part)?;

        let mut params = Params::new();
        if let Some(raw) = params_part {
            for piece in raw.split(';') {
                if piece.is_empty() {
                    continue;
                }
                match piece.split_once('=') {
                    Some((name, value)) => {
                        params.push(SmolStr::new(name), Some(SmolStr::new(value)))
                    }
                    None => params.push(SmolStr::new(piece), None),
                }
            }
        }

        Some(Self {
            scheme,
            user,
            host_port,
            params,
            headers,
        })
    }

    pub fn is_sips(&self) -> bool {
        self.scheme == Scheme::Sips
    }

    pub fn host(&self) -> &str {
        &self.host_port.host
    }

    pub fn port(&self) -> Option<u16> {
        self.host_port.port
    }

    /// The explicit port, or the scheme default.
    pub fn port_or_default(&self) -> u16 {
        self.host_port.port.unwrap_or(self.scheme.default_port())
    }

    /// Value of the `transport` uri-parameter, if present.
    pub fn transport_param(&self) -> Option<&SmolStr> {
        self.params.value_of("transport")
    }

    /// True when the URI carries the loose-routing parameter in either its
    /// flag (`;lr`) or valued (`;lr=`) spelling.
    pub fn is_loose_router(&self) -> bool {
        self.params.contains("lr")
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme.as_str())?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}{}", self.host_port, self.params)?;
        if let Some(headers) = &self.headers {
            write!(f, "?{}", headers)?;
        }
        Ok(())
    }
}

fn strip_scheme<'a>(input: &'a str, scheme: &str) -> Option<&'a str> {
    if input.len() >= scheme.len() && input[..scheme.len()].eq_ignore_ascii_case(scheme) {
        Some(&input[scheme.len()..])
    } else {
        None
    }
}

/// Any URI a header can carry: structured sip/sips, or an opaque absolute
/// URI for other schemes (http, mailto, tel, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uri {
    Sip(SipUri),
    Absolute(SmolStr),
}

impl Uri {
    /// Parses a URI, structuring sip/sips and keeping other schemes opaque.
    ///
    /// An input without a `scheme:` prefix is rejected.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Some(uri) = SipUri::parse(input) {
            return Some(Uri::Sip(uri));
        }
        let colon = input.find(':')?;
        if colon == 0 || !input[..colon].chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
            return None;
        }
        Some(Uri::Absolute(SmolStr::new(input)))
    }

    pub fn as_sip(&self) -> Option<&SipUri> {
        match self {
            Uri::Sip(uri) => Some(uri),
            Uri::Absolute(_) => None,
        }
    }

    pub fn is_sip(&self) -> bool {
        matches!(self, Uri::Sip(_))
    }
}

impl From<SipUri> for Uri {
    fn from(uri: SipUri) -> Self {
        Uri::Sip(uri)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uri::Sip(uri) => uri.fmt(f),
            Uri::Absolute(raw) => f.write_str(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_sip_uri() {
        let uri = SipUri::parse("sip:alice@example.com:5070;transport=tcp;lr?subject=hi").unwrap();
        assert_eq!(uri.scheme, Scheme::Sip);
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host(), "example.com");
        assert_eq!(uri.port(), Some(5070));
        assert_eq!(uri.transport_param().map(|v| v.as_str()), Some("tcp"));
        assert!(uri.is_loose_router());
        assert_eq!(uri.headers.as_deref(), Some("subject=hi"));
    }

    #[test]
    fn display_round_trips() {
        for raw in [
            "sip:example.com",
            "sip:bob@host",
            "sips:bob@host:5061",
            "sip:proxy1;lr",
            "sip:[2001:db8::1]:5060;transport=udp",
        ] {
            let uri = SipUri::parse(raw).unwrap();
            assert_eq!(uri.to_string(), raw);
            assert_eq!(SipUri::parse(&uri.to_string()).unwrap(), uri);
        }
    }

    #[test]
    fn default_ports_follow_scheme() {
        assert_eq!(SipUri::parse("sip:a.com").unwrap().port_or_default(), 5060);
        assert_eq!(SipUri::parse("sips:a.com").unwrap().port_or_default(), 5061);
        assert_eq!(
            SipUri::parse("sip:a.com:7000").unwrap().port_or_default(),
            7000
        );
    }

    #[test]
    fn lr_flag_and_valued_both_detected() {
        assert!(SipUri::parse("sip:p;lr").unwrap().is_loose_router());
        assert!(SipUri::parse("sip:p;lr=").unwrap().is_loose_router());
        assert!(!SipUri::parse("sip:p").unwrap().is_loose_router());
    }

    #[test]
    fn non_sip_schemes_stay_opaque() {
        let uri = Uri::parse("http://example.com/info").unwrap();
        assert!(matches!(uri, Uri::Absolute(_)));
        assert_eq!(uri.to_string(), "http://example.com/info");
        assert!(Uri::parse("not a uri").is_none());
    }

    #[test]
    fn host_port_rejects_bare_ipv6() {
        assert!(HostPort::parse("2001:db8::1").is_none());
        let hp = HostPort::parse("[2001:db8::1]:5060").unwrap();
        assert_eq!(hp.host.as_str(), "[2001:db8::1]");
        assert_eq!(hp.port, Some(5060));
    }

    #[test]
    fn scheme_prefix_is_case_insensitive() {
        assert!(SipUri::parse("SIP:host").is_some());
        assert!(SipUri::parse("SIPS:host").unwrap().is_sips());
    }
}
