// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Splitting helpers for header values.
//!
//! Comma and semicolon lists in SIP header values must not be split inside
//! quoted strings (`"..."` with `\` escapes) or angle-addrs (`<...>`); both
//! splitters here share one scanner that tracks those regions.

/// Splits `input` at top-level occurrences of `sep`, honouring quoted
/// strings and angle brackets. Empty elements are skipped, matching how
/// the grammar treats stray separators.
pub fn split_outside(input: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_angle = false;
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
        match c {
            '"' => in_quotes = true,
            '<' => in_angle = true,
            '>' => in_angle = false,
            c if c == sep && !in_angle => {
                let piece = input[start..idx].trim();
                if !piece.is_empty() {
                    pieces.push(piece);
                }
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    let tail = input[start..].trim();
    if !tail.is_empty() {
        pieces.push(tail);
    }
    pieces
}

/// Comma-separated element list (Via, Contact, Route, token lists, ...).
pub fn split_values(input: &str) -> Vec<&str> {
    split_outside(input, ',')
}

/// Splits one element into its leading part and parameter list.
pub fn split_element_params(input: &str) -> (&str, Vec<&str>) {
    let mut parts = split_outside(input, ';');
    if parts.is_empty() {
        return ("", parts);
    }
    let head = parts.remove(0);
    (head, parts)
}

/// One `name[=value]` pair split at the first top-level `=`.
///
/// The value keeps its quotes; callers unquote where their grammar allows
/// quoted strings. A missing `=` yields `None`, a trailing `=` yields
/// `Some("")` — the two are distinct on the wire and stay distinct here.
pub fn split_name_value(piece: &str) -> (&str, Option<&str>) {
    match piece.split_once('=') {
        Some((name, value)) => (name.trim(), Some(value.trim())),
        None => (piece.trim(), None),
    }
}
