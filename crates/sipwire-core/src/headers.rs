// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use smol_str::SmolStr;

use crate::header::{CSeq, Contact, Header};
use crate::name_addr::Address;
use crate::via::Via;

/// Insertion-ordered header list.
///
/// The single-instance headers (Call-ID, CSeq, From, To, Max-Forwards,
/// Content-Length) are read through accessors that return the first
/// occurrence; the parser never produces duplicates for them, and
/// duplicates introduced by hand lose to the topmost entry, which is how
/// the wire is read anyway.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(headers: Vec<Header>) -> Self {
        Self(headers)
    }

    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    /// Inserts at the top of the list; used for Via stamping, where order
    /// is the routing path.
    pub fn push_front(&mut self, header: Header) {
        self.0.insert(0, header);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Header> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Removes every header with the given wire name (case-insensitive).
    pub fn remove_named(&mut self, name: &str) {
        self.0.retain(|h| !h.name().eq_ignore_ascii_case(name));
    }

    pub fn call_id(&self) -> Option<&SmolStr> {
        self.0.iter().find_map(|h| match h {
            Header::CallId(value) => Some(value),
            _ => None,
        })
    }

    pub fn cseq(&self) -> Option<&CSeq> {
        self.0.iter().find_map(|h| match h {
            Header::CSeq(value) => Some(value),
            _ => None,
        })
    }

    pub fn from(&self) -> Option<&Address> {
        self.0.iter().find_map(|h| match h {
            Header::From(value) => Some(value),
            _ => None,
        })
    }

    pub fn to(&self) -> Option<&Address> {
        self.0.iter().find_map(|h| match h {
            Header::To(value) => Some(value),
            _ => None,
        })
    }

    pub fn to_mut(&mut self) -> Option<&mut Address> {
        self.0.iter_mut().find_map(|h| match h {
            Header::To(value) => Some(value),
            _ => None,
        })
    }

    pub fn max_forwards(&self) -> Option<u32> {
        self.0.iter().find_map(|h| match h {
            Header::MaxForwards(value) => Some(*value),
            _ => None,
        })
    }

    pub fn content_length(&self) -> Option<u32> {
        self.0.iter().find_map(|h| match h {
            Header::ContentLength(value) => Some(*value),
            _ => None,
        })
    }

    pub fn expires(&self) -> Option<u32> {
        self.0.iter().find_map(|h| match h {
            Header::Expires(value) => Some(*value),
            _ => None,
        })
    }

    /// All Via entries in wire order, flattened across header lines.
    pub fn vias(&self) -> impl Iterator<Item = &Via> {
        self.0.iter().flat_map(|h| match h {
            Header::Via(list) => list.as_slice(),
            _ => &[],
        })
    }

    /// The topmost Via entry, the one stamped by the last hop.
    pub fn top_via(&self) -> Option<&Via> {
        self.vias().next()
    }

    pub fn top_via_mut(&mut self) -> Option<&mut Via> {
        self.0.iter_mut().find_map(|h| match h {
            Header::Via(list) => list.first_mut(),
            _ => None,
        })
    }

    /// Prepends a Via entry on its own header line.
    pub fn push_via_front(&mut self, via: Via) {
        self.push_front(Header::Via(vec![via]));
    }

    /// Removes and returns the topmost Via entry, dropping its header line
    /// when it empties.
    pub fn pop_via_front(&mut self) -> Option<Via> {
        let idx = self
            .0
            .iter()
            .position(|h| matches!(h, Header::Via(list) if !list.is_empty()))?;
        let via = match &mut self.0[idx] {
            Header::Via(list) => list.remove(0),
            _ => unreachable!(),
        };
        if matches!(&self.0[idx], Header::Via(list) if list.is_empty()) {
            self.0.remove(idx);
        }
        Some(via)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Address> {
        self.0.iter().flat_map(|h| match h {
            Header::Route(list) => list.as_slice(),
            _ => &[],
        })
    }

    pub fn record_routes(&self) -> impl Iterator<Item = &Address> {
        self.0.iter().flat_map(|h| match h {
            Header::RecordRoute(list) => list.as_slice(),
            _ => &[],
        })
    }

    /// Contact addresses in order; the REGISTER wildcard contributes none.
    pub fn contacts(&self) -> impl Iterator<Item = &Address> {
        self.0.iter().flat_map(|h| match h {
            Header::Contact(contact) => contact.addresses(),
            _ => &[],
        })
    }

    /// True when any Contact header is the wildcard `*`.
    pub fn has_wildcard_contact(&self) -> bool {
        self.0
            .iter()
            .any(|h| matches!(h, Header::Contact(Contact::Wildcard)))
    }

    /// First Generic header value with the given name.
    pub fn generic(&self, name: &str) -> Option<&SmolStr> {
        self.0.iter().find_map(|h| match h {
            Header::Generic { name: n, value } if n.eq_ignore_ascii_case(name) => Some(value),
            _ => None,
        })
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<T: IntoIterator<Item = Header>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::{HostPort, SipUri, Uri};

    fn via(host: &str, branch: &str) -> Via {
        let mut via = Via::new("UDP", HostPort::new(host, Some(5060)));
        via.set_branch(branch);
        via
    }

    #[test]
    fn vias_flatten_across_lines_topmost_first() {
        let mut headers = Headers::new();
        headers.push(Header::Via(vec![
            via("a.example.com", "z9hG4bKa"),
            via("b.example.com", "z9hG4bKb"),
        ]));
        headers.push(Header::Via(vec![via("c.example.com", "z9hG4bKc")]));

        let hosts: Vec<&str> = headers.vias().map(|v| v.sent_by.host.as_str()).collect();
        assert_eq!(hosts, vec!["a.example.com", "b.example.com", "c.example.com"]);
        assert_eq!(
            headers.top_via().unwrap().branch().map(|b| b.as_str()),
            Some("z9hG4bKa")
        );
    }

    #[test]
    fn push_via_front_becomes_topmost() {
        let mut headers = Headers::new();
        headers.push(Header::Via(vec![via("old.example.com", "z9hG4bKold")]));
        headers.push_via_front(via("new.example.com", "z9hG4bKnew"));

        assert_eq!(headers.top_via().unwrap().sent_by.host.as_str(), "new.example.com");
    }

    #[test]
    fn pop_via_front_shrinks_then_removes_line() {
        let mut headers = Headers::new();
        headers.push(Header::Via(vec![
            via("a.example.com", "z9hG4bKa"),
            via("b.example.com", "z9hG4bKb"),
        ]));

        assert_eq!(headers.pop_via_front().unwrap().sent_by.host.as_str(), "a.example.com");
        assert_eq!(headers.pop_via_front().unwrap().sent_by.host.as_str(), "b.example.com");
        assert!(headers.pop_via_front().is_none());
        assert!(headers.is_empty());
    }

    #[test]
    fn single_instance_accessors_return_first() {
        let mut headers = Headers::new();
        headers.push(Header::CallId(SmolStr::new("abc@host")));
        headers.push(Header::MaxForwards(70));
        assert_eq!(headers.call_id().map(|c| c.as_str()), Some("abc@host"));
        assert_eq!(headers.max_forwards(), Some(70));
        assert!(headers.cseq().is_none());
    }

    #[test]
    fn contacts_skip_wildcard() {
        let mut headers = Headers::new();
        headers.push(Header::Contact(Contact::Wildcard));
        headers.push(Header::Contact(Contact::Addresses(vec![Address::new(
            Uri::Sip(SipUri::parse("sip:alice@pc33.example.com").unwrap()),
        )])));

        assert!(headers.has_wildcard_contact());
        assert_eq!(headers.contacts().count(), 1);
    }
}
