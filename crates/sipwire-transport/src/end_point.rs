// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;
use std::hash::{Hash, Hasher};

use smol_str::SmolStr;

/// Wire protocols a channel can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
    Tls,
    Sctp,
    Ws,
    Wss,
}

impl Protocol {
    /// Uppercase token as written in Via headers.
    pub fn via_token(&self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
            Protocol::Tls => "TLS",
            Protocol::Sctp => "SCTP",
            Protocol::Ws => "WS",
            Protocol::Wss => "WSS",
        }
    }

    /// Parses a transport token from a Via header or a `transport=`
    /// uri-parameter, case-insensitively.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "udp" => Some(Protocol::Udp),
            "tcp" => Some(Protocol::Tcp),
            "tls" => Some(Protocol::Tls),
            "sctp" => Some(Protocol::Sctp),
            "ws" => Some(Protocol::Ws),
            "wss" => Some(Protocol::Wss),
            _ => None,
        }
    }

    /// Default port when neither the URI nor the Via carries one.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Tls | Protocol::Wss => 5061,
            _ => 5060,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Protocol::Tls | Protocol::Wss)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.via_token())
    }
}

/// One remote destination: host, port, and wire protocol.
///
/// Host comparison is case-insensitive, so endpoints are usable as map
/// keys regardless of how the hostname was spelled.
#[derive(Debug, Clone, Eq)]
pub struct EndPoint {
    pub host: SmolStr,
    pub port: u16,
    pub protocol: Protocol,
}

impl EndPoint {
    pub fn new(host: impl Into<SmolStr>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
        }
    }
}

impl PartialEq for EndPoint {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port
            && self.protocol == other.protocol
            && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl Hash for EndPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.host.as_bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        self.port.hash(state);
        self.protocol.hash(state);
    }
}

impl fmt::Display for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn host_comparison_ignores_case() {
        let a = EndPoint::new("Example.COM", 5060, Protocol::Udp);
        let b = EndPoint::new("example.com", 5060, Protocol::Udp);
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert!(map.contains_key(&b));
    }

    #[test]
    fn protocol_distinguishes_endpoints() {
        let udp = EndPoint::new("example.com", 5060, Protocol::Udp);
        let tcp = EndPoint::new("example.com", 5060, Protocol::Tcp);
        assert_ne!(udp, tcp);
    }

    #[test]
    fn default_ports() {
        assert_eq!(Protocol::Udp.default_port(), 5060);
        assert_eq!(Protocol::Tls.default_port(), 5061);
        assert_eq!(Protocol::Wss.default_port(), 5061);
    }

    #[test]
    fn parses_via_tokens() {
        assert_eq!(Protocol::parse("udp"), Some(Protocol::Udp));
        assert_eq!(Protocol::parse("TLS"), Some(Protocol::Tls));
        assert_eq!(Protocol::parse("bogus"), None);
    }

    #[test]
    fn display_format() {
        let ep = EndPoint::new("1.0.0.1", 6001, Protocol::Udp);
        assert_eq!(ep.to_string(), "1.0.0.1:6001/UDP");
    }
}
