// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frame encoding/decoding for the XMPP stream.

use std::collections::{HashMap, VecDeque};

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use xmpbee_xml::{Stanza, StreamEvent, StreamParser};

use crate::error::{Error, ProtocolError};
use crate::fast_path::{self, PingRequest};

/// A segment of an XMPP stream.
#[derive(Debug)]
pub enum Packet {
    /// (rx) The server's stream header, with its attributes.
    StreamStart(HashMap<String, String>),
    /// (rx) A complete `<stream:features>` element.
    Features(Stanza),
    /// (rx/tx) A stanza.
    Stanza(Stanza),
    /// (rx) A server ping recognized on the fast path, to be answered
    /// without involving the event consumer.
    PingRequest(PingRequest),
    /// (rx/tx) The stream footer.
    StreamEnd,
    /// (tx) Our stream header towards the given domain.
    Header {
        /// Value of the `to` attribute.
        to: String,
    },
    /// (tx) A pre-serialized fragment.
    Raw(String),
}

/// Stateful codec turning bytes into [`Packet`]s and back.
pub struct XmlCodec {
    parser: StreamParser,
    pending: VecDeque<Packet>,
}

impl Default for XmlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlCodec {
    /// A codec awaiting a stream header.
    pub fn new() -> XmlCodec {
        XmlCodec {
            parser: StreamParser::new(),
            pending: VecDeque::new(),
        }
    }

    /// Drop parser state and await a fresh stream header (STARTTLS and
    /// post-SASL stream restarts).
    pub fn reset_stream(&mut self) {
        self.parser.reset();
        self.pending.clear();
    }
}

impl Decoder for XmlCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, Error> {
        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Ok(Some(packet));
            }
            if src.is_empty() {
                return Ok(None);
            }
            // Server pings are answered from the reader; recognize them
            // before tree building so pongs go out even when the consumer
            // is backed up.
            if self.parser.at_stanza_boundary() {
                if let Some((request, consumed)) = fast_path::scan_ping(&src[..]) {
                    src.advance(consumed);
                    return Ok(Some(Packet::PingRequest(request)));
                }
            }
            let bytes = src.split_to(src.len());
            let events = self
                .parser
                .feed(&bytes)
                .map_err(|e| Error::Protocol(ProtocolError::from(e)))?;
            for event in events {
                let packet = match event {
                    StreamEvent::StreamOpened { attrs } => Packet::StreamStart(attrs),
                    StreamEvent::Features(stanza) => Packet::Features(stanza),
                    StreamEvent::Stanza(stanza) => Packet::Stanza(stanza),
                    StreamEvent::StreamClosed => {
                        if self.parser.gave_up() {
                            return Err(Error::Protocol(ProtocolError::Stream(
                                "too many malformed fragments".to_owned(),
                            )));
                        }
                        Packet::StreamEnd
                    }
                };
                self.pending.push_back(packet);
            }
        }
    }
}

impl Encoder<Packet> for XmlCodec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Error> {
        match item {
            Packet::Header { to } => {
                let mut escaped = String::new();
                escape_attr(&to, &mut escaped);
                dst.extend_from_slice(
                    format!(
                        "<?xml version='1.0'?><stream:stream to='{}' xmlns='jabber:client' \
                         xmlns:stream='http://etherx.jabber.org/streams' version='1.0'>",
                        escaped
                    )
                    .as_bytes(),
                );
            }
            Packet::Stanza(stanza) => {
                let mut out = String::new();
                stanza.write_to(&mut out);
                dst.extend_from_slice(out.as_bytes());
            }
            Packet::Raw(fragment) => dst.extend_from_slice(fragment.as_bytes()),
            Packet::StreamEnd => dst.extend_from_slice(b"</stream:stream>"),
            Packet::StreamStart(_) | Packet::Features(_) | Packet::PingRequest(_) => {
                return Err(Error::InvalidState)
            }
        }
        Ok(())
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut XmlCodec, bytes: &[u8]) -> Vec<Packet> {
        let mut src = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Some(packet) = codec.decode(&mut src).expect("decode failed") {
            out.push(packet);
        }
        out
    }

    const HEADER: &[u8] = b"<?xml version='1.0'?><stream:stream from='example.org' id='s' \
        xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0'>";

    #[test]
    fn decodes_header_features_and_stanzas() {
        let mut codec = XmlCodec::new();
        let mut input = HEADER.to_vec();
        input.extend_from_slice(b"<stream:features/><message from='a@b'><body>x</body></message>");
        let packets = decode_all(&mut codec, &input);
        assert!(matches!(packets[0], Packet::StreamStart(_)));
        assert!(matches!(packets[1], Packet::Features(_)));
        match &packets[2] {
            Packet::Stanza(stanza) => assert_eq!(stanza.name(), "message"),
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn server_ping_takes_the_fast_path() {
        let mut codec = XmlCodec::new();
        decode_all(&mut codec, HEADER);
        let packets = decode_all(
            &mut codec,
            b"<iq from='example.org' id='p1' type='get'><ping xmlns='urn:xmpp:ping'/></iq>",
        );
        match &packets[..] {
            [Packet::PingRequest(request)] => assert_eq!(request.id, "p1"),
            other => panic!("unexpected packets: {:?}", other),
        }
    }

    #[test]
    fn split_ping_falls_back_to_the_parser() {
        let mut codec = XmlCodec::new();
        decode_all(&mut codec, HEADER);
        let whole = b"<iq from='example.org' id='p1' type='get'><ping xmlns='urn:xmpp:ping'/></iq>";
        let packets = decode_all(&mut codec, &whole[..30]);
        assert!(packets.is_empty());
        let packets = decode_all(&mut codec, &whole[30..]);
        match &packets[..] {
            [Packet::Stanza(stanza)] => {
                assert_eq!(stanza.name(), "iq");
                assert!(stanza.has_child("ping", "urn:xmpp:ping"));
            }
            other => panic!("unexpected packets: {:?}", other),
        }
    }

    #[test]
    fn exhausted_recovery_is_a_stream_error() {
        let mut codec = XmlCodec::new();
        decode_all(&mut codec, HEADER);
        let mut src = BytesMut::from(&b"<b@d/><b@d/><b@d/><b@d/>"[..]);
        let err = loop {
            match codec.decode(&mut src) {
                Ok(Some(_)) => {}
                Ok(None) => panic!("expected a stream error"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, Error::Protocol(ProtocolError::Stream(_))));
    }

    #[test]
    fn encodes_header_and_stanza() {
        let mut codec = XmlCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(
                Packet::Header {
                    to: "example.org".to_owned(),
                },
                &mut dst,
            )
            .unwrap();
        let header = String::from_utf8(dst.to_vec()).unwrap();
        assert!(header.starts_with("<?xml version='1.0'?><stream:stream to='example.org'"));
        assert!(header.ends_with("version='1.0'>"));

        let mut dst = BytesMut::new();
        codec
            .encode(
                Packet::Stanza(Stanza::builder("presence").build()),
                &mut dst,
            )
            .unwrap();
        assert_eq!(&dst[..], b"<presence/>");
    }
}
