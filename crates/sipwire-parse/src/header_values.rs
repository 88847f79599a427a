// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-header value grammars.
//!
//! Every parser here implements one shape from the header table in
//! `lib.rs`: it takes the raw value text of a header line and produces the
//! typed value, or `None` when the value does not satisfy its grammar. The
//! caller decides whether `None` drops the header (lenient) or fails the
//! message (strict).

use smol_str::SmolStr;

use sipwire_core::syntax::{is_token, unquote};
use sipwire_core::{
    Address, Auth, AuthParams, CSeq, Contact, MediaType, Method, MimeVersion, Params, RetryAfter,
    Timestamp, TokenParams, Uri, UriEntry, Warning,
};
use sipwire_core::uri::HostPort;
use sipwire_core::via::Via;

use crate::tokenizer::{split_element_params, split_name_value, split_outside, split_values};

/// Builds a `Params` list from `;`-separated pieces, unquoting values.
fn parse_params(pieces: &[&str]) -> Params {
    let mut params = Params::new();
    for piece in pieces {
        let (name, value) = split_name_value(piece);
        if name.is_empty() {
            continue;
        }
        params.push(
            SmolStr::new(name),
            value.map(|v| SmolStr::new(unquote(v))),
        );
    }
    params
}

/// One RFC 2616 token, as used by Priority.
pub fn parse_single_token(value: &str) -> Option<SmolStr> {
    let token = value.trim();
    if is_token(token) {
        Some(SmolStr::new(token))
    } else {
        None
    }
}

/// A Call-ID `word["@"word]`. The word grammar is wider than token (it
/// allows `@` between the halves), so a plain token check would reject
/// every real-world Call-ID.
pub fn parse_call_id(value: &str) -> Option<SmolStr> {
    let word = value.trim();
    if word.is_empty() || word.chars().any(|c| c.is_whitespace() || c.is_ascii_control()) {
        return None;
    }
    Some(SmolStr::new(word))
}

/// Comma list of tokens, order preserved (Allow, Require, Supported, ...).
pub fn parse_token_list(value: &str) -> Option<Vec<SmolStr>> {
    let mut tokens = Vec::new();
    for piece in split_values(value) {
        if !is_token(piece) {
            return None;
        }
        tokens.push(SmolStr::new(piece));
    }
    Some(tokens)
}

/// `token *(";" param)` (Content-Disposition).
pub fn parse_token_params(value: &str) -> Option<TokenParams> {
    let (head, params) = split_element_params(value);
    let token = head.trim();
    if !is_token(token) {
        return None;
    }
    Some(TokenParams {
        token: SmolStr::new(token),
        params: parse_params(&params),
    })
}

/// Comma list of `token *(";" param)` (Accept-Encoding, Accept-Language).
pub fn parse_token_params_list(value: &str) -> Option<Vec<TokenParams>> {
    split_values(value)
        .into_iter()
        .map(parse_token_params)
        .collect()
}

/// `type "/" subtype *(";" param)` (Content-Type).
pub fn parse_media_type(value: &str) -> Option<MediaType> {
    let (head, params) = split_element_params(value);
    let (media_type, subtype) = head.split_once('/')?;
    let media_type = media_type.trim();
    let subtype = subtype.trim();
    if !is_token(media_type) || !is_token(subtype) {
        return None;
    }
    let mut parsed = MediaType::new(media_type, subtype);
    parsed.params = parse_params(&params);
    Some(parsed)
}

/// Comma list of media ranges (Accept). `*/*` parses as the literal pair.
pub fn parse_media_type_list(value: &str) -> Option<Vec<MediaType>> {
    split_values(value)
        .into_iter()
        .map(parse_media_type)
        .collect()
}

/// Decimal unsigned integer (Content-Length, Expires, Max-Forwards, ...).
pub fn parse_integer(value: &str) -> Option<u32> {
    let digits = value.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// `CSeq: 1*DIGIT LWS Method`.
pub fn parse_cseq(value: &str) -> Option<CSeq> {
    let mut parts = value.split_whitespace();
    let sequence = parse_integer(parts.next()?)?;
    let method_token = parts.next()?;
    if parts.next().is_some() || !is_token(method_token) {
        return None;
    }
    Some(CSeq::new(sequence, Method::from_token(method_token)))
}

/// RFC 1123 date: `wkday "," SP date1 SP time SP "GMT"`. The text is kept
/// verbatim; this only vets the shape.
pub fn parse_date(value: &str) -> Option<SmolStr> {
    let text = value.trim();
    let (wkday, rest) = text.split_once(',')?;
    const WKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    if !WKDAYS.contains(&wkday) {
        return None;
    }
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // day month year HH:MM:SS GMT
    if fields.len() != 5 || fields[4] != "GMT" {
        return None;
    }
    if !fields[0].bytes().all(|b| b.is_ascii_digit())
        || !fields[2].bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let time_ok = fields[3].split(':').count() == 3
        && fields[3]
            .split(':')
            .all(|part| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit()));
    if !time_ok {
        return None;
    }
    Some(SmolStr::new(text))
}

/// `Timestamp: float [LWS float]`; the delay is optional and a malformed
/// delay is ignored, matching the lenient reading of RFC 3261 §20.38.
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let mut parts = value.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    let delay = parts.next().and_then(|d| d.parse().ok());
    Some(Timestamp { value, delay })
}

/// `Mime-Version: 1*DIGIT "." 1*DIGIT`.
pub fn parse_mime_version(value: &str) -> Option<MimeVersion> {
    let (major, minor) = value.trim().split_once('.')?;
    Some(MimeVersion {
        major: parse_integer(major)?,
        minor: parse_integer(minor)?,
    })
}

/// `Retry-After: delta-seconds [comment] *(";" param)`; the parenthesised
/// comment is discarded.
pub fn parse_retry_after(value: &str) -> Option<RetryAfter> {
    let (head, params) = split_element_params(value);
    let head = head.trim();
    let delta_text = match head.find('(') {
        Some(idx) => head[..idx].trim(),
        None => head,
    };
    Some(RetryAfter {
        delta_seconds: parse_integer(delta_text)?,
        params: parse_params(&params),
    })
}

/// Comma list of `<URI> *(";" param)` (Alert-Info, Call-Info, Error-Info).
pub fn parse_uri_entry_list(value: &str) -> Option<Vec<UriEntry>> {
    let mut entries = Vec::new();
    for piece in split_values(value) {
        let (head, params) = split_element_params(piece);
        let head = head.trim();
        let inner = head.strip_prefix('<')?.strip_suffix('>')?;
        let uri = Uri::parse(inner)?;
        let mut entry = UriEntry::new(uri);
        entry.params = parse_params(&params);
        entries.push(entry);
    }
    Some(entries)
}

/// Contact-like element: `[display-name] LAQUOT addr-spec RAQUOT *(";"p)`
/// or a bare addr-spec running to the first `;`.
///
/// The display name is either a quoted-string or a run of LWS-separated
/// tokens; the presence of `<` anywhere outside quotes selects name-addr
/// form.
pub fn parse_address(piece: &str) -> Option<Address> {
    let piece = piece.trim();
    if piece.is_empty() {
        return None;
    }

    if let Some(angle_start) = find_outside_quotes(piece, '<') {
        let angle_rest = &piece[angle_start + 1..];
        let angle_end = angle_rest.find('>')?;
        let uri = Uri::parse(&angle_rest[..angle_end])?;

        let display_raw = piece[..angle_start].trim();
        let display_name = if display_raw.is_empty() {
            None
        } else if display_raw.starts_with('"') {
            if !display_raw.ends_with('"') || display_raw.len() < 2 {
                return None;
            }
            Some(SmolStr::new(unquote(display_raw)))
        } else {
            if !display_raw
                .split_whitespace()
                .all(is_token)
            {
                return None;
            }
            Some(SmolStr::new(display_raw))
        };

        let tail = &angle_rest[angle_end + 1..];
        let params = parse_params(&split_outside(tail, ';'));
        Some(Address {
            display_name,
            uri,
            params,
        })
    } else {
        // addr-spec form: the URI runs to the first ';'; everything after
        // is header parameters.
        let (head, params) = split_element_params(piece);
        let uri = Uri::parse(head.trim())?;
        Some(Address {
            display_name: None,
            uri,
            params: parse_params(&params),
        })
    }
}

/// Comma list of contact-like elements (Contact entries, Route,
/// Record-Route, Reply-To).
pub fn parse_address_list(value: &str) -> Option<Vec<Address>> {
    let pieces = split_values(value);
    if pieces.is_empty() {
        return None;
    }
    pieces.into_iter().map(parse_address).collect()
}

/// A single contact-like value (From, To).
pub fn parse_single_address(value: &str) -> Option<Address> {
    parse_address(value)
}

/// `Contact: *` or a contact list.
pub fn parse_contact(value: &str) -> Option<Contact> {
    if value.trim() == "*" {
        return Some(Contact::Wildcard);
    }
    Some(Contact::Addresses(parse_address_list(value)?))
}

/// `scheme LWS #(name=value)` (Authorization and friends).
pub fn parse_auth(value: &str) -> Option<Auth> {
    let value = value.trim();
    let scheme_end = value.find(char::is_whitespace).unwrap_or(value.len());
    let scheme = &value[..scheme_end];
    if !is_token(scheme) {
        return None;
    }
    let mut auth = Auth::new(scheme);
    auth.params = parse_auth_params(&value[scheme_end..])?;
    Some(auth)
}

/// Bare comma-separated `name=value` list (Authentication-Info).
pub fn parse_auth_params(value: &str) -> Option<AuthParams> {
    let mut params = AuthParams::new();
    for piece in split_values(value) {
        let (name, value) = split_name_value(piece);
        let value = value?;
        if !is_token(name) {
            return None;
        }
        params.set(SmolStr::new(name), SmolStr::new(unquote(value)));
    }
    Some(params)
}

/// Comma list of Via entries:
/// `"SIP" "/" version "/" transport LWS sent-by *(";" param)`.
pub fn parse_via_list(value: &str) -> Option<Vec<Via>> {
    let mut vias = Vec::new();
    for piece in split_values(value) {
        let (head, params) = split_element_params(piece);
        let mut words = head.split_whitespace();
        let protocol = words.next()?;
        let sent_by = words.next()?;
        if words.next().is_some() {
            return None;
        }

        let mut components = protocol.split('/');
        let name = components.next()?;
        let version = components.next()?;
        let transport = components.next()?;
        if components.next().is_some() || !name.eq_ignore_ascii_case("SIP") {
            return None;
        }
        // Any x.y version is tolerated here; the message-level clamp has
        // already pinned the protocol to 2.0.
        let mut version_parts = version.split('.');
        let major = version_parts.next()?;
        let minor = version_parts.next()?;
        if version_parts.next().is_some()
            || !major.bytes().all(|b| b.is_ascii_digit())
            || !minor.bytes().all(|b| b.is_ascii_digit())
            || major.is_empty()
            || minor.is_empty()
        {
            return None;
        }
        if !is_token(transport) {
            return None;
        }

        let mut via = Via::new(transport, HostPort::parse(sent_by)?);
        via.params = parse_params(&params);
        vias.push(via);
    }
    if vias.is_empty() {
        return None;
    }
    Some(vias)
}

/// Comma list of `3DIGIT LWS warn-agent LWS quoted-text` (Warning).
pub fn parse_warning_list(value: &str) -> Option<Vec<Warning>> {
    let mut warnings = Vec::new();
    for piece in split_values(value) {
        let piece = piece.trim();
        let (code_text, rest) = piece.split_once(char::is_whitespace)?;
        let code: u16 = code_text.parse().ok()?;
        if !(100..=999).contains(&code) {
            return None;
        }
        let rest = rest.trim_start();
        let (agent_text, text_part) = rest.split_once(char::is_whitespace)?;
        let agent = HostPort::parse(agent_text)?;
        let text_part = text_part.trim();
        if !text_part.starts_with('"') || !text_part.ends_with('"') || text_part.len() < 2 {
            return None;
        }
        warnings.push(Warning {
            code,
            agent,
            text: SmolStr::new(unquote(text_part)),
        });
    }
    if warnings.is_empty() {
        return None;
    }
    Some(warnings)
}

/// Free text trimmed of LWS (Organization, Server, Subject, User-Agent).
pub fn parse_trimmed_text(value: &str) -> SmolStr {
    SmolStr::new(value.trim())
}

fn find_outside_quotes(input: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, c) in input.char_indices() {
        if in_quotes {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            }
            continue;
        }
        if c == '"' {
            in_quotes = true;
        } else if c == needle {
            return Some(idx);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_with_quoted_comma_display_name() {
        let contacts =
            parse_contact("\"Smith, John\" <sip:j@a.com>, <sip:k@b.com>").expect("contact");
        let addrs = match contacts {
            Contact::Addresses(list) => list,
            Contact::Wildcard => panic!("unexpected wildcard"),
        };
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].display_name.as_deref(), Some("Smith, John"));
        assert_eq!(addrs[0].uri.to_string(), "sip:j@a.com");
        assert!(addrs[1].display_name.is_none());
        assert_eq!(addrs[1].uri.to_string(), "sip:k@b.com");
    }

    #[test]
    fn contact_star_is_wildcard() {
        assert!(matches!(parse_contact(" * "), Some(Contact::Wildcard)));
    }

    #[test]
    fn token_run_display_name() {
        let addr = parse_address("Alice Liddell <sip:alice@example.com>;q=0.7").unwrap();
        assert_eq!(addr.display_name.as_deref(), Some("Alice Liddell"));
        assert_eq!(addr.params.value_of("q").map(|v| v.as_str()), Some("0.7"));
    }

    #[test]
    fn addr_spec_form_stops_at_semicolon() {
        let addr = parse_address("sip:bob@host;tag=xyz").unwrap();
        assert_eq!(addr.uri.to_string(), "sip:bob@host");
        assert_eq!(addr.tag().map(|t| t.as_str()), Some("xyz"));
    }

    #[test]
    fn name_addr_keeps_uri_params_inside_brackets() {
        let addr = parse_address("<sip:proxy1;lr>;foo=bar").unwrap();
        let uri = addr.sip_uri().unwrap();
        assert!(uri.is_loose_router());
        assert!(addr.params.contains("foo"));
        assert!(!addr.params.contains("lr"));
    }

    #[test]
    fn via_entry_round_trip() {
        let vias =
            parse_via_list("SIP/2.0/UDP 192.168.0.1:7001;received=189.187.200.23;rport=5002")
                .unwrap();
        assert_eq!(vias.len(), 1);
        let via = &vias[0];
        assert_eq!(via.transport.as_str(), "UDP");
        assert_eq!(via.sent_by.host.as_str(), "192.168.0.1");
        assert_eq!(via.sent_by.port, Some(7001));
        assert_eq!(via.received().map(|r| r.as_str()), Some("189.187.200.23"));
        assert_eq!(via.rport(), Some(Some(5002)));
    }

    #[test]
    fn via_list_splits_on_commas() {
        let vias = parse_via_list(
            "SIP/2.0/UDP first.example.com;branch=z9hG4bK1, SIP/2.0/TCP second.example.com:5060;branch=z9hG4bK2",
        )
        .unwrap();
        assert_eq!(vias.len(), 2);
        assert_eq!(vias[0].sent_by.host.as_str(), "first.example.com");
        assert_eq!(vias[1].transport.as_str(), "TCP");
    }

    #[test]
    fn via_rejects_garbage() {
        assert!(parse_via_list("UDP host").is_none());
        assert!(parse_via_list("SIP/2.0/UDP").is_none());
        assert!(parse_via_list("HTTP/1.1/TCP host").is_none());
    }

    #[test]
    fn cseq_requires_method() {
        let cseq = parse_cseq("314159 INVITE").unwrap();
        assert_eq!(cseq.sequence, 314159);
        assert_eq!(cseq.method, Method::Invite);
        assert!(parse_cseq("314159").is_none());
        assert!(parse_cseq("abc INVITE").is_none());
    }

    #[test]
    fn integer_rejects_non_digits() {
        assert_eq!(parse_integer(" 70 "), Some(70));
        assert!(parse_integer("-1").is_none());
        assert!(parse_integer("12abc").is_none());
        assert!(parse_integer("").is_none());
    }

    #[test]
    fn auth_unescapes_quoted_values() {
        let auth = parse_auth(r#"Digest realm="a\"b, c", nonce="n""#).unwrap();
        assert_eq!(auth.scheme.as_str(), "Digest");
        assert_eq!(auth.param("realm").map(|v| v.as_str()), Some("a\"b, c"));
        assert_eq!(auth.param("nonce").map(|v| v.as_str()), Some("n"));
    }

    #[test]
    fn warning_text_unquoted() {
        let warnings = parse_warning_list("307 isi.edu \"Session parameter 'foo' not understood\"")
            .unwrap();
        assert_eq!(warnings[0].code, 307);
        assert_eq!(warnings[0].agent.host.as_str(), "isi.edu");
        assert_eq!(
            warnings[0].text.as_str(),
            "Session parameter 'foo' not understood"
        );
    }

    #[test]
    fn retry_after_ignores_comment() {
        let value = parse_retry_after("120 (I'm in a meeting);duration=60").unwrap();
        assert_eq!(value.delta_seconds, 120);
        assert_eq!(
            value.params.value_of("duration").map(|v| v.as_str()),
            Some("60")
        );
    }

    #[test]
    fn timestamp_delay_is_optional() {
        let ts = parse_timestamp("54.2").unwrap();
        assert_eq!(ts.value, 54.2);
        assert!(ts.delay.is_none());
        let ts = parse_timestamp("54.2 1.5").unwrap();
        assert_eq!(ts.delay, Some(1.5));
    }

    #[test]
    fn date_shape_validation() {
        assert!(parse_date("Fri, 21 Feb 2025 10:00:00 GMT").is_some());
        assert!(parse_date("21 Feb 2025 10:00:00 GMT").is_none());
        assert!(parse_date("Fri, 21 Feb 2025 10:00 GMT").is_none());
    }

    #[test]
    fn mime_version_parses_major_minor() {
        let v = parse_mime_version("1.0").unwrap();
        assert_eq!((v.major, v.minor), (1, 0));
        assert!(parse_mime_version("1").is_none());
    }

    #[test]
    fn accept_wildcard_is_literal() {
        let ranges = parse_media_type_list("*/*, application/sdp;level=1").unwrap();
        assert!(ranges[0].is_wildcard());
        assert_eq!(ranges[1].subtype.as_str(), "sdp");
    }

    #[test]
    fn call_id_allows_at_sign() {
        assert_eq!(
            parse_call_id("a84b4c76e66710@pc33.example.com").map(|c| c.to_string()),
            Some("a84b4c76e66710@pc33.example.com".to_owned())
        );
        assert!(parse_call_id("two words").is_none());
    }

    #[test]
    fn uri_entries_require_angle_brackets() {
        let entries = parse_uri_entry_list("<http://www.example.com/sounds/moo.wav>").unwrap();
        assert_eq!(entries.len(), 1);
        assert!(parse_uri_entry_list("http://bare.example.com").is_none());
    }
}
