//! Compact JSON encoding of the directory listing that feeds a directory digest.
//!
//! Recorded directory digests were computed over compact, key-sorted JSON
//! with every non-ASCII character escaped as `\uXXXX`. `serde_json` emits
//! UTF-8, so the encoder is written out by hand.

use std::collections::BTreeMap;
use std::fmt::Write;

/// Encodes `{relpath: md5}` pairs as a compact JSON object in key order.
#[must_use]
pub fn encode_listing(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(entries.len() * 48 + 2);
    out.push('{');
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_string(&mut out, key);
        out.push(':');
        push_string(&mut out, value);
    }
    out.push('}');
    out
}

fn push_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    // Writing to a String cannot fail.
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}
