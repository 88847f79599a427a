// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use smol_str::SmolStr;

use crate::params::Params;
use crate::syntax::{is_token, Quoted};
use crate::uri::Uri;

/// A name-addr or addr-spec value with trailing header parameters, the
/// shape shared by From, To, Contact, Route, Record-Route, and Reply-To.
///
/// The display name is stored decoded; serialization re-quotes it whenever
/// it is not a plain run of tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub display_name: Option<SmolStr>,
    pub uri: Uri,
    pub params: Params,
}

impl Address {
    pub fn new(uri: impl Into<Uri>) -> Self {
        Self {
            display_name: None,
            uri: uri.into(),
            params: Params::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<SmolStr>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Value of the `tag` parameter, present on From/To inside dialogs.
    pub fn tag(&self) -> Option<&SmolStr> {
        self.params.value_of("tag")
    }

    pub fn set_tag(&mut self, tag: impl Into<SmolStr>) {
        self.params.set("tag", Some(tag.into()));
    }

    pub fn sip_uri(&self) -> Option<&crate::uri::SipUri> {
        self.uri.as_sip()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => {
                let plain = !name.is_empty()
                    && name
                        .split(' ')
                        .all(|word| !word.is_empty() && is_token(word));
                if plain {
                    write!(f, "{} ", name)?;
                } else {
                    write!(f, "{} ", Quoted(name))?;
                }
                write!(f, "<{}>{}", self.uri, self.params)
            }
            // Angle brackets keep uri-parameters attached to the URI
            // distinct from header parameters; emit them whenever either
            // side has parameters.
            None => {
                let needs_brackets = !self.params.is_empty()
                    || matches!(&self.uri, Uri::Sip(uri) if !uri.params.is_empty());
                if needs_brackets {
                    write!(f, "<{}>{}", self.uri, self.params)
                } else {
                    write!(f, "{}", self.uri)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::SipUri;

    fn addr(uri: &str) -> Address {
        Address::new(Uri::parse(uri).unwrap())
    }

    #[test]
    fn plain_display_name_is_unquoted() {
        let a = addr("sip:alice@example.com").with_display_name("Alice");
        assert_eq!(a.to_string(), "Alice <sip:alice@example.com>");
    }

    #[test]
    fn display_name_with_comma_is_quoted() {
        let a = addr("sip:j@a.com").with_display_name("Smith, John");
        assert_eq!(a.to_string(), "\"Smith, John\" <sip:j@a.com>");
    }

    #[test]
    fn tag_round_trip() {
        let mut a = addr("sip:alice@example.com");
        a.set_tag("1928301774");
        assert_eq!(a.tag().map(|t| t.as_str()), Some("1928301774"));
        assert_eq!(a.to_string(), "<sip:alice@example.com>;tag=1928301774");
    }

    #[test]
    fn bare_addr_spec_without_params_skips_brackets() {
        let a = addr("sip:bob@host");
        assert_eq!(a.to_string(), "sip:bob@host");
    }

    #[test]
    fn uri_params_force_brackets() {
        let uri = SipUri::parse("sip:proxy1;lr").unwrap();
        let a = Address::new(uri);
        assert_eq!(a.to_string(), "<sip:proxy1;lr>");
    }
}
