// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ordered `;name=value` parameter lists shared by URIs, Via entries, and
//! name-addr headers.

use std::fmt;

use smol_str::SmolStr;

use crate::syntax::MaybeQuoted;

/// One parameter as parsed: a flag (`;lr`), an empty value (`;lr=`), or a
/// value (`;tag=abc`). The flag/empty distinction is preserved across a
/// parse/serialize round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: SmolStr,
    pub value: Option<SmolStr>,
}

/// Insertion-ordered parameter collection with case-insensitive names.
///
/// Values are stored decoded; quoted-string escaping is re-applied on
/// serialize only when a value is not a plain token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }

    /// Returns the parameter value: `None` if absent, `Some(None)` for a
    /// bare flag, `Some(Some(v))` for a valued parameter.
    pub fn get(&self, name: &str) -> Option<Option<&SmolStr>> {
        self.0
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_ref())
    }

    /// Returns the value of a valued parameter, treating flags as absent.
    pub fn value_of(&self, name: &str) -> Option<&SmolStr> {
        self.get(name).flatten()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces an existing parameter of the same name or appends.
    pub fn set(&mut self, name: impl Into<SmolStr>, value: Option<SmolStr>) {
        let name = name.into();
        if let Some(existing) = self
            .0
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&name))
        {
            existing.value = value;
        } else {
            self.0.push(Param { name, value });
        }
    }

    /// Appends a flag parameter (`;name`).
    pub fn set_flag(&mut self, name: impl Into<SmolStr>) {
        self.set(name, None);
    }

    pub fn remove(&mut self, name: &str) -> Option<Param> {
        let idx = self
            .0
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(idx))
    }

    /// Appends without replacing; used by the parser so duplicate names
    /// survive verbatim.
    pub fn push(&mut self, name: impl Into<SmolStr>, value: Option<SmolStr>) {
        self.0.push(Param {
            name: name.into(),
            value,
        });
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.0 {
            match &p.value {
                None => write!(f, ";{}", p.name)?,
                Some(v) if v.is_empty() => write!(f, ";{}=", p.name)?,
                Some(v) => write!(f, ";{}={}", p.name, MaybeQuoted(v))?,
            }
        }
        Ok(())
    }
}

impl FromIterator<(SmolStr, Option<SmolStr>)> for Params {
    fn from_iter<T: IntoIterator<Item = (SmolStr, Option<SmolStr>)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| Param { name, value })
                .collect(),
        )
    }
}
