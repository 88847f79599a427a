// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Via header values (RFC 3261 §20.42).

use std::fmt;

use smol_str::SmolStr;

use crate::params::Params;
use crate::uri::HostPort;

/// The RFC 3261 magic cookie marking a conforming branch parameter.
pub const MAGIC_COOKIE: &str = "z9hG4bK";

/// One Via entry: `SIP/2.0/<transport> <sent-by>[;params]`.
///
/// The transport token is kept verbatim (`UDP`, `TCP`, ...); mapping to a
/// concrete protocol happens at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub transport: SmolStr,
    pub sent_by: HostPort,
    pub params: Params,
}

impl Via {
    pub fn new(transport: impl Into<SmolStr>, sent_by: HostPort) -> Self {
        Self {
            transport: transport.into(),
            sent_by,
            params: Params::new(),
        }
    }

    pub fn branch(&self) -> Option<&SmolStr> {
        self.params.value_of("branch")
    }

    pub fn set_branch(&mut self, branch: impl Into<SmolStr>) {
        self.params.set("branch", Some(branch.into()));
    }

    /// True when the branch carries the RFC 3261 magic cookie.
    pub fn has_magic_cookie(&self) -> bool {
        self.branch()
            .map(|b| b.starts_with(MAGIC_COOKIE))
            .unwrap_or(false)
    }

    pub fn received(&self) -> Option<&SmolStr> {
        self.params.value_of("received")
    }

    pub fn set_received(&mut self, addr: impl Into<SmolStr>) {
        self.params.set("received", Some(addr.into()));
    }

    /// The `rport` parameter: absent, a bare flag awaiting the observed
    /// port, or filled in by the receiver.
    pub fn rport(&self) -> Option<Option<u16>> {
        match self.params.get("rport")? {
            Some(value) => Some(value.parse().ok()),
            None => Some(None),
        }
    }

    /// Requests symmetric response routing (`;rport` with no value).
    pub fn set_rport_flag(&mut self) {
        self.params.set_flag("rport");
    }

    pub fn set_rport(&mut self, port: u16) {
        self.params
            .set("rport", Some(SmolStr::new(port.to_string())));
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}{}", self.transport, self.sent_by, self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Via {
        Via::new("UDP", HostPort::new("host.example.com", Some(5060)))
    }

    #[test]
    fn display_format() {
        let mut via = sample();
        via.set_rport_flag();
        via.set_branch("z9hG4bK776asdhds");
        assert_eq!(
            via.to_string(),
            "SIP/2.0/UDP host.example.com:5060;rport;branch=z9hG4bK776asdhds"
        );
    }

    #[test]
    fn magic_cookie_detection() {
        let mut via = sample();
        assert!(!via.has_magic_cookie());
        via.set_branch("z9hG4bKabc");
        assert!(via.has_magic_cookie());
        via.set_branch("old2543branch");
        assert!(!via.has_magic_cookie());
    }

    #[test]
    fn rport_states() {
        let mut via = sample();
        assert_eq!(via.rport(), None);
        via.set_rport_flag();
        assert_eq!(via.rport(), Some(None));
        via.set_rport(5002);
        assert_eq!(via.rport(), Some(Some(5002)));
    }

    #[test]
    fn received_overrides_nothing_by_default() {
        let mut via = sample();
        assert!(via.received().is_none());
        via.set_received("189.187.200.23");
        assert_eq!(via.received().map(|r| r.as_str()), Some("189.187.200.23"));
    }
}
