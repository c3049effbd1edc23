// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fast-path answering of server keepalive pings.
//!
//! Pongs must go out even when the event consumer is backed up, so
//! incoming `<iq type='get'>` pings are recognized with a length-bounded
//! string scan straight off the receive buffer, before tree building. No
//! regular expressions run on untrusted input here; anything the scanner
//! is not sure about falls through to the normal parse path.

/// Candidates larger than this are left to the normal path (never
/// dropped). Pings are small; large stanzas are not pings.
const MAX_SCAN_LEN: usize = 4096;

/// Attribute values longer than this disqualify the candidate.
const MAX_ATTR_LEN: usize = 512;

/// A server ping picked off the receive buffer. Attribute values are
/// stored entity-decoded, so [`PingRequest::reply`] escapes them exactly
/// once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingRequest {
    /// The IQ id, echoed in the result.
    pub id: String,
    /// Sender, used as the result's `to`.
    pub from: Option<String>,
}

impl PingRequest {
    /// The result stanza, serialized.
    pub fn reply(&self) -> String {
        let mut out = String::from("<iq type='result' id='");
        escape_into(&self.id, &mut out);
        out.push('\'');
        if let Some(from) = &self.from {
            out.push_str(" to='");
            escape_into(from, &mut out);
            out.push('\'');
        }
        out.push_str("/>");
        out
    }
}

/// Scan the head of the receive buffer for one complete server ping.
///
/// Returns the request and the number of bytes to consume, or `None` when
/// the buffer does not start with a whole, unambiguous ping.
pub fn scan_ping(buf: &[u8]) -> Option<(PingRequest, usize)> {
    let start = buf.iter().position(|b| !b.is_ascii_whitespace())?;
    let rest = &buf[start..];
    if !rest.starts_with(b"<iq") {
        return None;
    }
    match rest.get(3) {
        Some(b) if b.is_ascii_whitespace() || *b == b'>' => {}
        _ => return None,
    }
    let window = &rest[..rest.len().min(MAX_SCAN_LEN)];
    let end = find(window, b"</iq>")? + b"</iq>".len();
    let candidate = core::str::from_utf8(&window[..end]).ok()?;
    if !candidate.contains("urn:xmpp:ping") || !candidate.contains("<ping") {
        return None;
    }

    let open_end = candidate.find('>')?;
    let open = &candidate[1..open_end];
    if open.ends_with('/') || open.contains('<') {
        return None;
    }

    let mut id = None;
    let mut from = None;
    let mut kind = None;
    let mut attrs = &open[2..]; // past "iq"
    loop {
        attrs = attrs.trim_start();
        if attrs.is_empty() {
            break;
        }
        let eq = attrs.find('=')?;
        let key = attrs[..eq].trim_end();
        let after = &attrs[eq + 1..];
        let quote = after.chars().next()?;
        if quote != '\'' && quote != '"' {
            return None;
        }
        let close = after[1..].find(quote)?;
        let raw = &after[1..1 + close];
        if raw.len() > MAX_ATTR_LEN || raw.contains('<') || raw.contains('>') {
            return None;
        }
        let value = unescape_value(raw)?;
        match key {
            "id" => id = Some(value),
            "from" => from = Some(value),
            "type" => kind = Some(value),
            _ => {}
        }
        attrs = &after[1 + close + 1..];
    }

    if kind.as_deref() != Some("get") {
        return None;
    }
    let id = id?;
    Some((PingRequest { id, from }, start + end))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Decode the predefined entities and character references in an
/// attribute value. Anything else makes the candidate ambiguous and is
/// left to the normal parse path.
fn unescape_value(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let reference = &rest[pos + 1..];
        let end = reference.find(';')?;
        match &reference[..end] {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "apos" => out.push('\''),
            "quot" => out.push('"'),
            name => {
                let code = name.strip_prefix('#')?;
                let value = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                    None => code.parse::<u32>().ok()?,
                };
                out.push(char::from_u32(value)?);
            }
        }
        rest = &reference[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn escape_into(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: &[u8] =
        b"<iq from='example.org' to='alice@example.org/XMPBee' id='p42' type='get'>\
          <ping xmlns='urn:xmpp:ping'/></iq>";

    #[test]
    fn recognizes_a_server_ping() {
        let (request, consumed) = scan_ping(PING).unwrap();
        assert_eq!(consumed, PING.len());
        assert_eq!(request.id, "p42");
        assert_eq!(request.from.as_deref(), Some("example.org"));
        assert_eq!(
            request.reply(),
            "<iq type='result' id='p42' to='example.org'/>"
        );
    }

    #[test]
    fn leading_whitespace_is_consumed() {
        let mut buf = b"\n  ".to_vec();
        buf.extend_from_slice(PING);
        let (_, consumed) = scan_ping(&buf).unwrap();
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn incomplete_ping_falls_through() {
        assert!(scan_ping(&PING[..40]).is_none());
    }

    #[test]
    fn non_ping_iq_falls_through() {
        let buf = b"<iq id='x' type='get'><query xmlns='jabber:iq:version'/></iq>";
        assert!(scan_ping(buf).is_none());
    }

    #[test]
    fn result_pings_fall_through() {
        let buf = b"<iq id='x' type='result'><ping xmlns='urn:xmpp:ping'/></iq>";
        assert!(scan_ping(buf).is_none());
    }

    #[test]
    fn missing_id_falls_through() {
        let buf = b"<iq from='example.org' type='get'><ping xmlns='urn:xmpp:ping'/></iq>";
        assert!(scan_ping(buf).is_none());
    }

    #[test]
    fn oversized_candidates_fall_through() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"<iq id='p' type='get'><ping xmlns='urn:xmpp:ping'/>");
        buf.extend_from_slice(&vec![b' '; MAX_SCAN_LEN]);
        buf.extend_from_slice(b"</iq>");
        assert!(scan_ping(&buf).is_none());
    }

    #[test]
    fn oversized_attribute_values_fall_through() {
        let big = "x".repeat(MAX_ATTR_LEN + 1);
        let buf = format!(
            "<iq id='{}' from='example.org' type='get'><ping xmlns='urn:xmpp:ping'/></iq>",
            big
        );
        assert!(scan_ping(buf.as_bytes()).is_none());
    }

    #[test]
    fn entity_references_round_trip_through_the_reply() {
        let buf = b"<iq id='a&amp;b' from='ex.org' type='get'><ping xmlns='urn:xmpp:ping'/></iq>";
        let (request, _) = scan_ping(buf).unwrap();
        // The captured value is the decoded one; the reply escapes it
        // exactly once, so the id on the wire matches the ping's.
        assert_eq!(request.id, "a&b");
        assert_eq!(
            request.reply(),
            "<iq type='result' id='a&amp;b' to='ex.org'/>"
        );
    }

    #[test]
    fn literal_apostrophes_in_double_quoted_values_are_escaped_once() {
        let buf = br#"<iq id="p7" from="muc.example.org/O'Brien" type="get"><ping xmlns="urn:xmpp:ping"/></iq>"#;
        let (request, _) = scan_ping(buf).unwrap();
        assert_eq!(request.from.as_deref(), Some("muc.example.org/O'Brien"));
        assert_eq!(
            request.reply(),
            "<iq type='result' id='p7' to='muc.example.org/O&apos;Brien'/>"
        );
    }

    #[test]
    fn escaped_apostrophes_decode_before_the_reply() {
        let buf = b"<iq id='p8' from='muc.example.org/O&apos;Brien' type='get'>\
                    <ping xmlns='urn:xmpp:ping'/></iq>";
        let (request, _) = scan_ping(buf).unwrap();
        assert_eq!(request.from.as_deref(), Some("muc.example.org/O'Brien"));
        assert_eq!(
            request.reply(),
            "<iq type='result' id='p8' to='muc.example.org/O&apos;Brien'/>"
        );
    }

    #[test]
    fn character_references_decode() {
        let buf = b"<iq id='a&#38;b&#x21;' type='get'><ping xmlns='urn:xmpp:ping'/></iq>";
        let (request, _) = scan_ping(buf).unwrap();
        assert_eq!(request.id, "a&b!");
    }

    #[test]
    fn unknown_entities_fall_through() {
        let buf = b"<iq id='a&bogus;b' type='get'><ping xmlns='urn:xmpp:ping'/></iq>";
        assert!(scan_ping(buf).is_none());
    }

    #[test]
    fn double_quoted_attributes_work() {
        let buf = br#"<iq id="p1" from="example.org" type="get"><ping xmlns="urn:xmpp:ping"/></iq>"#;
        let (request, _) = scan_ping(buf).unwrap();
        assert_eq!(request.id, "p1");
    }
}
