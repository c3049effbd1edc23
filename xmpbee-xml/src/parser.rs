// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Incremental push parser for one XMPP stream document.
//!
//! The stream document stays open for the whole session: depth 0 is
//! pre-document, depth 1 is the `<stream:stream>` root, depth 2 holds the
//! stanzas. [`StreamParser::feed`] consumes raw bytes and emits
//! [`StreamEvent`]s as stanzas complete.
//!
//! A parse error after the root has opened does not kill the stream: the
//! parser discards the fragment in flight, re-establishes the document root
//! in place (without re-emitting [`StreamEvent::StreamOpened`]) and carries
//! on with the bytes that follow. After three consecutive recoveries with no
//! successful stanza in between it gives up and emits
//! [`StreamEvent::StreamClosed`]; any successful stanza resets the debt.
//! Errors before the root ever opened are fatal.

use std::collections::HashMap;

use quick_xml::errors::SyntaxError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::stanza::Stanza;

/// Consecutive in-place recoveries tolerated before the parser gives up.
const MAX_CONSECUTIVE_RECOVERIES: u32 = 3;

/// An event produced while consuming the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The `<stream:stream>` root opened. Emitted once per active stream.
    StreamOpened {
        /// Attributes of the root element.
        attrs: HashMap<String, String>,
    },
    /// A complete `<stream:features>` element.
    Features(Stanza),
    /// Any other complete depth-2 element.
    Stanza(Stanza),
    /// The root closed, or recovery was exhausted.
    StreamClosed,
}

enum Step {
    Event(StreamEvent),
    Consumed,
    NeedMore,
}

/// Push parser over the bytes of one XMPP stream.
pub struct StreamParser {
    buf: Vec<u8>,
    pos: usize,
    stream_open: bool,
    closed: bool,
    recoveries: u32,
    generation: u64,
    exhausted: bool,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    /// A parser in the pre-document state.
    pub fn new() -> StreamParser {
        StreamParser {
            buf: Vec::new(),
            pos: 0,
            stream_open: false,
            closed: false,
            recoveries: 0,
            generation: 0,
            exhausted: false,
        }
    }

    /// Discard all state and await a fresh stream header. Used when the
    /// stream restarts over the same connection (STARTTLS, post-SASL).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.stream_open = false;
        self.closed = false;
        self.recoveries = 0;
        self.generation += 1;
        self.exhausted = false;
    }

    /// Parser generation, bumped on every recovery and reset. Close
    /// notifications stamped with an older generation must be ignored.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Outstanding recovery debt. Reset to zero whenever a stanza is
    /// successfully emitted.
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    /// Whether the parser closed the stream because recovery was exhausted
    /// rather than because the peer sent the stream footer.
    pub fn gave_up(&self) -> bool {
        self.exhausted
    }

    /// Whether all fed bytes have been consumed and no stanza is in flight.
    pub fn at_stanza_boundary(&self) -> bool {
        self.stream_open && !self.closed && self.pos == self.buf.len()
    }

    /// Consume bytes, returning the events they completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while !self.closed {
            match self.step()? {
                Step::Event(event) => {
                    if let StreamEvent::StreamClosed = event {
                        self.closed = true;
                        self.stream_open = false;
                    }
                    events.push(event);
                }
                Step::Consumed => {}
                Step::NeedMore => break,
            }
        }
        self.compact();
        Ok(events)
    }

    fn step(&mut self) -> Result<Step> {
        self.skip_insignificant();
        let rest = &self.buf[self.pos..];
        if rest.is_empty() {
            return Ok(Step::NeedMore);
        }

        // XML declarations may legally reappear mid-stream (servers send a
        // fresh one after STARTTLS); strip them wherever they occur.
        if rest.starts_with(b"<?") {
            return match find(rest, b"?>") {
                Some(end) => {
                    self.pos += end + 2;
                    Ok(Step::Consumed)
                }
                None => Ok(Step::NeedMore),
            };
        }

        if rest.starts_with(b"</") {
            let end = match rest.iter().position(|&b| b == b'>') {
                Some(end) => end,
                None => return Ok(Step::NeedMore),
            };
            let name = trim_ascii(&rest[2..end]);
            if is_stream_name(name) {
                self.pos += end + 1;
                return Ok(Step::Event(StreamEvent::StreamClosed));
            }
            if !self.stream_open {
                return Err(Error::FatalParse("end tag before stream open".to_owned()));
            }
            // A stray end tag at stanza level.
            self.pos += end + 1;
            return self.recover();
        }

        if !rest.starts_with(b"<") {
            // skip_insignificant consumed character data on an open stream,
            // so this is garbage ahead of the stream header.
            return Err(Error::FatalParse(
                "character data before stream open".to_owned(),
            ));
        }

        if !self.stream_open {
            return self.open_stream();
        }
        self.scan_stanza()
    }

    /// Skip whitespace, and on an open stream any character data between
    /// stanzas (servers use bare whitespace as keepalive).
    fn skip_insignificant(&mut self) {
        while self.pos < self.buf.len() && self.buf[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.stream_open {
            while self.pos < self.buf.len() && self.buf[self.pos] != b'<' {
                self.pos += 1;
            }
        }
    }

    fn open_stream(&mut self) -> Result<Step> {
        let rest = &self.buf[self.pos..];
        let mut reader = new_reader(rest);
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if !is_stream_name(e.name().as_ref()) {
                    return Err(Error::FatalParse(format!(
                        "expected stream header, got <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                let mut attrs = HashMap::new();
                for attr in e.attributes() {
                    let attr =
                        attr.map_err(|e| Error::FatalParse(format!("stream header: {}", e)))?;
                    let key = core::str::from_utf8(attr.key.as_ref())?.to_owned();
                    let value = attr
                        .unescape_value()
                        .map_err(|e| Error::FatalParse(format!("stream header: {}", e)))?
                        .into_owned();
                    attrs.insert(key, value);
                }
                self.pos += reader.buffer_position() as usize;
                self.stream_open = true;
                Ok(Step::Event(StreamEvent::StreamOpened { attrs }))
            }
            Ok(Event::Eof) => Ok(Step::NeedMore),
            Ok(event) => Err(Error::FatalParse(format!(
                "unexpected content before stream open: {:?}",
                event
            ))),
            Err(quick_xml::Error::Syntax(SyntaxError::UnclosedTag)) => Ok(Step::NeedMore),
            Err(e) => Err(Error::FatalParse(e.to_string())),
        }
    }

    /// Try to delimit and build one stanza starting at the current
    /// position. Nothing is consumed until a whole stanza (or a malformed
    /// fragment) has been identified.
    fn scan_stanza(&mut self) -> Result<Step> {
        let rest = &self.buf[self.pos..];
        let mut reader = new_reader(rest);
        let mut depth = 0u32;
        let mut tok_end = 0usize;
        loop {
            let tok_start = tok_end;
            let event = reader.read_event();
            tok_end = reader.buffer_position() as usize;
            match event {
                Ok(Event::Start(ref e)) => {
                    if !tag_well_formed(e) {
                        return self.recover_at(tok_start);
                    }
                    depth += 1;
                }
                Ok(Event::Empty(ref e)) => {
                    if !tag_well_formed(e) {
                        return self.recover_at(tok_start);
                    }
                    if depth == 0 {
                        return self.finish_stanza(tok_end);
                    }
                }
                Ok(Event::End(ref e)) => {
                    // The stream footer while a stanza is in flight tears
                    // down whatever was assembled so far.
                    if is_stream_name(e.name().as_ref()) || depth == 0 {
                        return self.recover_at(tok_start);
                    }
                    depth -= 1;
                    if depth == 0 {
                        return self.finish_stanza(tok_end);
                    }
                }
                Ok(Event::Text(_)) | Ok(Event::CData(_)) => {}
                Ok(Event::Decl(_))
                | Ok(Event::PI(_))
                | Ok(Event::Comment(_))
                | Ok(Event::DocType(_)) => {}
                Ok(Event::Eof) => return Ok(Step::NeedMore),
                Err(quick_xml::Error::Syntax(SyntaxError::UnclosedTag))
                | Err(quick_xml::Error::Syntax(SyntaxError::UnclosedComment))
                | Err(quick_xml::Error::Syntax(SyntaxError::UnclosedCData))
                | Err(quick_xml::Error::Syntax(SyntaxError::UnclosedPIOrXmlDecl))
                | Err(quick_xml::Error::Syntax(SyntaxError::UnclosedDoctype)) => {
                    return Ok(Step::NeedMore)
                }
                Err(_) => return self.recover_at(tok_start),
            }
        }
    }

    fn finish_stanza(&mut self, len: usize) -> Result<Step> {
        match build_element(&self.buf[self.pos..self.pos + len]) {
            Ok(stanza) => {
                self.pos += len;
                self.recoveries = 0;
                let event = if stanza.name() == "stream:features" {
                    StreamEvent::Features(stanza)
                } else {
                    StreamEvent::Stanza(stanza)
                };
                Ok(Step::Event(event))
            }
            Err(_) => {
                // Delimited but unbuildable (bad entity, bad UTF-8).
                self.pos += len;
                self.recover()
            }
        }
    }

    /// Resynchronize past a malformed token: everything up to the next `<`
    /// after the token's start is discarded.
    fn recover_at(&mut self, tok_start: usize) -> Result<Step> {
        let rest = &self.buf[self.pos..];
        let resync = match rest[tok_start + 1..].iter().position(|&b| b == b'<') {
            Some(i) => tok_start + 1 + i,
            None => rest.len(),
        };
        self.pos += resync;
        self.recover()
    }

    fn recover(&mut self) -> Result<Step> {
        self.generation += 1;
        if self.recoveries >= MAX_CONSECUTIVE_RECOVERIES {
            self.exhausted = true;
            return Ok(Step::Event(StreamEvent::StreamClosed));
        }
        self.recoveries += 1;
        // The document root is re-established in place; StreamOpened is not
        // re-emitted.
        Ok(Step::Consumed)
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

fn new_reader(input: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;
    reader
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn is_stream_name(name: &[u8]) -> bool {
    name.ends_with(b":stream")
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

/// Whether the bytes form a plausible XML name. The tokenizer itself is
/// lenient, so this is what turns fragments like `<mes<presence/>` into
/// recoverable parse errors.
fn valid_name(name: &[u8]) -> bool {
    let first = match name.first() {
        Some(&first) => first,
        None => return false,
    };
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return false;
    }
    name.iter().all(|&b| {
        b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':') || b >= 0x80
    })
}

fn tag_well_formed(e: &BytesStart) -> bool {
    if !valid_name(e.name().as_ref()) {
        return false;
    }
    for attr in e.attributes() {
        match attr {
            Ok(attr) => {
                if attr.unescape_value().is_err() {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }
    true
}

/// Build a [`Stanza`] tree out of one complete element.
///
/// External entities and DTDs are never resolved; only the predefined
/// entities and character references are expanded.
pub(crate) fn build_element(input: &[u8]) -> Result<Stanza> {
    let mut reader = new_reader(input);
    let mut stack: Vec<Stanza> = Vec::new();
    let mut root: Option<Stanza> = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if root.is_some() {
                    return Err(Error::NotOneElement);
                }
                stack.push(element_from_tag(&e)?);
            }
            Event::Empty(e) => {
                if root.is_some() {
                    return Err(Error::NotOneElement);
                }
                let element = element_from_tag(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.append_child(element),
                    None => root = Some(element),
                }
            }
            Event::End(_) => match stack.pop() {
                Some(element) => match stack.last_mut() {
                    Some(parent) => parent.append_child(element),
                    None => root = Some(element),
                },
                None => return Err(Error::NotOneElement),
            },
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let text = t.unescape()?;
                    top.append_text(&text);
                } else if !t.as_ref().iter().all(u8::is_ascii_whitespace) {
                    return Err(Error::NotOneElement);
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    let raw = t.into_inner();
                    top.append_text(core::str::from_utf8(&raw)?);
                }
            }
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }
    if !stack.is_empty() {
        return Err(Error::EndOfDocument);
    }
    root.ok_or(Error::NotOneElement)
}

fn element_from_tag(e: &BytesStart) -> Result<Stanza> {
    let name = core::str::from_utf8(e.name().as_ref())?.to_owned();
    if !valid_name(name.as_bytes()) {
        return Err(Error::InvalidElementName(name));
    }
    let mut attrs = std::collections::BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| Error::XmlError(e.into()))?;
        let key = core::str::from_utf8(attr.key.as_ref())?.to_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.insert(key, value);
    }
    Ok(Stanza::new(name, attrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "<?xml version='1.0'?><stream:stream from='example.org' id='s1' \
                          xmlns='jabber:client' \
                          xmlns:stream='http://etherx.jabber.org/streams' version='1.0'>";

    fn feed_all(parser: &mut StreamParser, input: &str) -> Vec<StreamEvent> {
        parser.feed(input.as_bytes()).expect("parse failed")
    }

    fn open_parser() -> StreamParser {
        let mut parser = StreamParser::new();
        let events = feed_all(&mut parser, HEADER);
        assert!(matches!(events[..], [StreamEvent::StreamOpened { .. }]));
        parser
    }

    #[test]
    fn header_and_stanza_and_footer() {
        let mut parser = StreamParser::new();
        let events = feed_all(
            &mut parser,
            &format!("{}<presence from='a@b/n'/></stream:stream>", HEADER),
        );
        assert_eq!(events.len(), 3);
        match &events[0] {
            StreamEvent::StreamOpened { attrs } => {
                assert_eq!(attrs.get("from").map(String::as_str), Some("example.org"));
                assert_eq!(attrs.get("id").map(String::as_str), Some("s1"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match &events[1] {
            StreamEvent::Stanza(stanza) => {
                assert_eq!(stanza.name(), "presence");
                assert_eq!(stanza.attr("from"), Some("a@b/n"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(events[2], StreamEvent::StreamClosed);
    }

    #[test]
    fn features_are_classified() {
        let mut parser = open_parser();
        let events = feed_all(
            &mut parser,
            "<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/></stream:features>",
        );
        match &events[..] {
            [StreamEvent::Features(features)] => {
                assert!(features.has_child("starttls", "urn:ietf:params:xml:ns:xmpp-tls"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn byte_at_a_time_is_monotonic() {
        let input = format!(
            "{}<message from='room@muc/bob' type='groupchat'><body>hi &amp; bye</body>\
             </message><presence/></stream:stream>",
            HEADER
        );
        let mut whole = StreamParser::new();
        let expected = feed_all(&mut whole, &input);

        let mut split = StreamParser::new();
        let mut collected = Vec::new();
        for byte in input.as_bytes() {
            collected.extend(split.feed(core::slice::from_ref(byte)).unwrap());
            // Every prefix yields a prefix of the full event sequence.
            assert_eq!(collected[..], expected[..collected.len()]);
        }
        assert_eq!(collected, expected);
    }

    #[test]
    fn mid_stream_xml_declaration_is_stripped() {
        let mut parser = open_parser();
        let events = feed_all(&mut parser, "<?xml version='1.0'?><presence/>");
        assert!(matches!(events[..], [StreamEvent::Stanza(_)]));
    }

    #[test]
    fn whitespace_keepalive_is_ignored() {
        let mut parser = open_parser();
        assert!(feed_all(&mut parser, "\n \t ").is_empty());
        let events = feed_all(&mut parser, " <presence/>\n");
        assert!(matches!(events[..], [StreamEvent::Stanza(_)]));
    }

    #[test]
    fn malformed_fragment_recovers_in_place() {
        let mut parser = open_parser();
        let events = feed_all(
            &mut parser,
            "<message><body>hi</body></message><mes<presence/>",
        );
        assert_eq!(events.len(), 2);
        match (&events[0], &events[1]) {
            (StreamEvent::Stanza(message), StreamEvent::Stanza(presence)) => {
                assert_eq!(message.name(), "message");
                assert_eq!(presence.name(), "presence");
            }
            other => panic!("unexpected events: {:?}", other),
        }
        // The successful presence wiped the recovery debt.
        assert_eq!(parser.recoveries(), 0);
        assert!(!parser.gave_up());
    }

    #[test]
    fn premature_stream_footer_inside_stanza_recovers() {
        let mut parser = open_parser();
        let events = feed_all(&mut parser, "<message><body></stream:stream><presence/>");
        assert!(matches!(events[..], [StreamEvent::Stanza(_)]));
        assert_eq!(parser.recoveries(), 0);
    }

    #[test]
    fn stream_footer_at_stanza_boundary_closes() {
        let mut parser = open_parser();
        let events = feed_all(&mut parser, "</stream:stream>");
        assert_eq!(events, vec![StreamEvent::StreamClosed]);
        assert!(!parser.gave_up());
    }

    #[test]
    fn recovery_is_rate_limited() {
        let mut parser = open_parser();
        let generation = parser.generation();
        for i in 0..3 {
            assert!(feed_all(&mut parser, "<b@d/>").is_empty());
            assert_eq!(parser.recoveries(), i + 1);
        }
        // Recoveries bump the generation so stale close notifications can
        // be told apart.
        assert_eq!(parser.generation(), generation + 3);
        let events = feed_all(&mut parser, "<b@d/>");
        assert_eq!(events, vec![StreamEvent::StreamClosed]);
        assert!(parser.gave_up());
    }

    #[test]
    fn successful_stanza_resets_recovery_debt() {
        let mut parser = open_parser();
        for _ in 0..3 {
            assert!(feed_all(&mut parser, "<b@d/>").is_empty());
        }
        assert_eq!(parser.recoveries(), 3);
        let events = feed_all(&mut parser, "<presence/>");
        assert!(matches!(events[..], [StreamEvent::Stanza(_)]));
        assert_eq!(parser.recoveries(), 0);
        // With the debt gone, more errors are tolerated again.
        assert!(feed_all(&mut parser, "<b@d/>").is_empty());
        assert!(!parser.gave_up());
    }

    #[test]
    fn garbage_before_stream_open_is_fatal() {
        let mut parser = StreamParser::new();
        assert!(parser.feed(b"hello there").is_err());

        let mut parser = StreamParser::new();
        assert!(parser.feed(b"<presence/>").is_err());
    }

    #[test]
    fn reset_awaits_a_fresh_header() {
        let mut parser = open_parser();
        parser.reset();
        let events = feed_all(&mut parser, HEADER);
        assert!(matches!(events[..], [StreamEvent::StreamOpened { .. }]));
        let events = feed_all(&mut parser, "<presence/>");
        assert!(matches!(events[..], [StreamEvent::Stanza(_)]));
    }

    #[test]
    fn split_stanza_across_feeds() {
        let mut parser = open_parser();
        assert!(feed_all(&mut parser, "<message from='a@b'><bo").is_empty());
        assert!(!parser.at_stanza_boundary());
        let events = feed_all(&mut parser, "dy>hello</body></message>");
        match &events[..] {
            [StreamEvent::Stanza(message)] => {
                assert_eq!(message.get_child("body").unwrap().text(), "hello");
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert!(parser.at_stanza_boundary());
    }

    #[test]
    fn nested_children_preserve_order_and_text() {
        let mut parser = open_parser();
        let events = feed_all(
            &mut parser,
            "<iq id='1' type='result'><query xmlns='http://jabber.org/protocol/disco#items'>\
             <item jid='general@muc.example.org' name='General'/>\
             <item jid='random@muc.example.org'/></query></iq>",
        );
        match &events[..] {
            [StreamEvent::Stanza(iq)] => {
                let query = iq.get_child("query").unwrap();
                let items: Vec<_> = query.children().collect();
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].attr("name"), Some("General"));
                assert_eq!(items[1].attr("jid"), Some("random@muc.example.org"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn unknown_entity_is_a_recoverable_error() {
        let mut parser = open_parser();
        let events = feed_all(&mut parser, "<message><body>&bogus;</body></message>");
        assert!(events.is_empty());
        assert_eq!(parser.recoveries(), 1);
        let events = feed_all(&mut parser, "<presence/>");
        assert!(matches!(events[..], [StreamEvent::Stanza(_)]));
    }
}
