// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Authentication header values.
//!
//! Challenge handling itself is a collaborator concern; the core only
//! carries the scheme and its parameter list faithfully between the wire
//! and the application.

use std::fmt;

use smol_str::SmolStr;

use crate::syntax::MaybeQuoted;

/// Comma-separated `name=value` list used by the authentication headers.
///
/// Values are stored decoded; serialization quotes anything that is not a
/// token, which matches how Digest parameters round-trip in practice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthParams(Vec<(SmolStr, SmolStr)>);

impl AuthParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&SmolStr> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn set(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            entry.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SmolStr, &SmolStr)> {
        self.0.iter().map(|(n, v)| (n, v))
    }
}

impl fmt::Display for AuthParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, MaybeQuoted(value))?;
        }
        Ok(())
    }
}

/// Scheme plus parameters, the shape of Authorization, Proxy-Authorization,
/// WWW-Authenticate, and Proxy-Authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    pub scheme: SmolStr,
    pub params: AuthParams,
}

impl Auth {
    pub fn new(scheme: impl Into<SmolStr>) -> Self {
        Self {
            scheme: scheme.into(),
            params: AuthParams::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&SmolStr> {
        self.params.get(name)
    }
}

impl fmt::Display for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            f.write_str(&self.scheme)
        } else {
            write!(f, "{} {}", self.scheme, self.params)
        }
    }
}
