// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Protocol tests against a scripted server over an in-memory stream.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use super::*;
use crate::error::{AuthError, ProtocolError};
use crate::event::{ClientEvent, MessageType};

const SERVER_HEADER: &str = "<?xml version='1.0'?><stream:stream from='example.org' id='s1' \
     xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0'>";

const FEATURES_SCRAM: &str = "<stream:features>\
     <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
     <mechanism>SCRAM-SHA-1</mechanism><mechanism>PLAIN</mechanism></mechanisms>\
     </stream:features>";

const FEATURES_PLAIN_ONLY: &str = "<stream:features>\
     <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
     <mechanism>PLAIN</mechanism></mechanisms></stream:features>";

const FEATURES_BIND: &str = "<stream:features>\
     <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
     <session xmlns='urn:ietf:params:xml:ns:xmpp-session'/></stream:features>";

struct ScriptedServer {
    stream: DuplexStream,
    seen: String,
}

impl ScriptedServer {
    fn new(stream: DuplexStream) -> ScriptedServer {
        ScriptedServer {
            stream,
            seen: String::new(),
        }
    }

    /// Read until everything received so far contains `needle`; returns
    /// and clears the accumulated input.
    async fn read_until(&mut self, needle: &str) -> String {
        let mut buf = [0u8; 4096];
        while !self.seen.contains(needle) {
            let n = self.stream.read(&mut buf).await.expect("server read");
            assert!(n > 0, "client closed while waiting for {:?}", needle);
            self.seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        core::mem::take(&mut self.seen)
    }

    async fn send(&mut self, data: &str) {
        self.stream
            .write_all(data.as_bytes())
            .await
            .expect("server write");
    }

    /// Everything the client ever sends until it closes the stream.
    async fn drain(mut self) -> String {
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => self.seen.push_str(&String::from_utf8_lossy(&buf[..n])),
            }
        }
        self.seen
    }
}

fn config(security: SecurityMode) -> Config {
    Config {
        jid: "alice@example.org".parse().unwrap(),
        host: "example.org".to_owned(),
        port: 5222,
        resource: "XMPBee".to_owned(),
        security,
    }
}

fn start_client(
    security: SecurityMode,
) -> (ScriptedServer, Client, mpsc::Receiver<ClientEvent>) {
    let (client_io, server_io) = tokio::io::duplex(65536);
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let client = Client::connect_over(
        Box::new(client_io),
        config(security),
        "hunter2".to_owned(),
        tx,
    );
    (ScriptedServer::new(server_io), client, rx)
}

/// Extract the base64 payload of the first `<auth>`/`<response>` element.
fn sasl_payload(xml: &str, element: &str) -> String {
    let open = format!("<{}", element);
    let close = format!("</{}>", element);
    let start = xml.find(&open).expect("sasl element");
    let payload_start = xml[start..].find('>').expect("element open") + start + 1;
    let payload_end = xml.find(&close).expect("element close");
    xml[payload_start..payload_end].to_owned()
}

async fn scram_login(server: &mut ScriptedServer) {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    let header = server.read_until(">").await;
    assert!(header.contains("to='example.org'"));
    assert!(header.contains("xmlns:stream='http://etherx.jabber.org/streams'"));
    server.send(SERVER_HEADER).await;
    server.send(FEATURES_SCRAM).await;

    let auth = server.read_until("</auth>").await;
    assert!(auth.contains("mechanism='SCRAM-SHA-1'"));
    let client_first =
        String::from_utf8(BASE64.decode(sasl_payload(&auth, "auth")).unwrap()).unwrap();
    assert!(client_first.starts_with("n,,n=alice,r="));
    let client_nonce = client_first.rsplit("r=").next().unwrap().to_owned();

    // Challenge extending the client nonce. The client is told to skip
    // verification by concluding with an empty success payload.
    let challenge = format!("r={}serverext,s=QSXCR+Q6sek8bf92,i=4096", client_nonce);
    server
        .send(&format!(
            "<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>{}</challenge>",
            BASE64.encode(challenge.as_bytes())
        ))
        .await;

    let response = server.read_until("</response>").await;
    let client_final =
        String::from_utf8(BASE64.decode(sasl_payload(&response, "response")).unwrap()).unwrap();
    assert!(client_final.starts_with(&format!("c=biws,r={}serverext,p=", client_nonce)));
    server
        .send("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
        .await;

    // Stream restart, then bind and session.
    let header = server.read_until(">").await;
    assert!(header.contains("<stream:stream"));
    server.send(SERVER_HEADER).await;
    server.send(FEATURES_BIND).await;

    let bind = server.read_until("</iq>").await;
    assert!(bind.contains("id='bind_1'"));
    assert!(bind.contains("<resource>XMPBee</resource>"));
    server
        .send(
            "<iq type='result' id='bind_1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
             <jid>alice@example.org/XMPBee</jid></bind></iq>",
        )
        .await;

    let session = server.read_until("</iq>").await;
    assert!(session.contains("id='session_1'"));
    server.send("<iq type='result' id='session_1'/>").await;

    let presence = server.read_until("<presence/>").await;
    assert!(presence.contains("<presence/>"));
}

#[tokio::test]
async fn scram_login_to_ready() {
    let (mut server, client, mut events) = start_client(SecurityMode::OpportunisticTls);

    let server_task = tokio::spawn(async move {
        scram_login(&mut server).await;

        // Room join.
        let join = server.read_until("</presence>").await;
        assert!(join.contains("to='general@muc.example.org/alice'"));
        assert!(join.contains("maxstanzas='50'"));

        // Live traffic.
        server
            .send(
                "<message from='general@muc.example.org/bob' type='groupchat'>\
                 <body>hi alice</body></message>",
            )
            .await;

        // A server ping must be answered without consumer involvement.
        server
            .send(
                "<iq from='example.org' id='sp1' type='get'>\
                 <ping xmlns='urn:xmpp:ping'/></iq>",
            )
            .await;
        let pong = server.read_until("id='sp1'").await;
        assert!(pong.contains("type='result'"));
        assert!(pong.contains("to='example.org'"));

        let rest = server.drain().await;
        format!("{}{}", pong, rest)
    });

    assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));
    match events.recv().await {
        Some(ClientEvent::Authenticated { bound_jid }) => {
            assert_eq!(bound_jid.to_string(), "alice@example.org/XMPBee");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    client
        .join_room("general@muc.example.org", "alice", DEFAULT_JOIN_HISTORY)
        .await
        .unwrap();

    match events.recv().await {
        Some(ClientEvent::Message(message)) => {
            assert_eq!(message.from, "general@muc.example.org/bob");
            assert_eq!(message.kind, MessageType::Groupchat);
            assert_eq!(message.body, "hi alice");
            assert!(!message.delayed);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    client.disconnect().await.unwrap();
    match events.recv().await {
        Some(ClientEvent::Disconnected(None)) => {}
        other => panic!("unexpected event: {:?}", other),
    }

    let leftovers = server_task.await.unwrap();
    assert!(leftovers.contains("</stream:stream>"));
}

#[tokio::test]
async fn require_tls_refuses_plaintext_servers() {
    let (mut server, _client, mut events) = start_client(SecurityMode::RequireTls);

    let server_task = tokio::spawn(async move {
        server.read_until(">").await;
        server.send(SERVER_HEADER).await;
        // No <starttls/> on offer.
        server.send(FEATURES_SCRAM).await;
        server.drain().await
    });

    assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));
    match events.recv().await {
        Some(ClientEvent::Disconnected(Some(Error::Protocol(ProtocolError::TlsRequired)))) => {}
        other => panic!("unexpected event: {:?}", other),
    }

    let sent = server_task.await.unwrap();
    assert!(!sent.contains("<auth"));
}

#[tokio::test]
async fn plain_is_never_sent_without_tls() {
    let (mut server, _client, mut events) = start_client(SecurityMode::OpportunisticTls);

    let server_task = tokio::spawn(async move {
        server.read_until(">").await;
        server.send(SERVER_HEADER).await;
        server.send(FEATURES_PLAIN_ONLY).await;
        server.drain().await
    });

    assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));
    match events.recv().await {
        Some(ClientEvent::Disconnected(Some(Error::Auth(AuthError::RequiresTls)))) => {}
        other => panic!("unexpected event: {:?}", other),
    }

    // The password never went near the wire.
    let sent = server_task.await.unwrap();
    assert!(!sent.contains("<auth"));
}

#[tokio::test]
async fn sasl_failure_is_permanent() {
    let (mut server, _client, mut events) = start_client(SecurityMode::OpportunisticTls);

    tokio::spawn(async move {
        server.read_until(">").await;
        server.send(SERVER_HEADER).await;
        server.send(FEATURES_SCRAM).await;
        server.read_until("</auth>").await;
        server
            .send(
                "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                 <not-authorized/></failure>",
            )
            .await;
        server.drain().await;
    });

    assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));
    match events.recv().await {
        Some(ClientEvent::Disconnected(Some(error))) => {
            assert!(error.is_permanent());
            match error {
                Error::Auth(AuthError::Fail(condition)) => {
                    assert_eq!(condition, "not-authorized")
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn unanswered_keepalive_times_out() {
    let (mut server, _client, mut events) = start_client(SecurityMode::OpportunisticTls);

    tokio::spawn(async move {
        scram_login(&mut server).await;
        // Swallow the keepalive ping and go silent.
        let ping = server.read_until("urn:xmpp:ping").await;
        assert!(ping.contains("type='get'"));
        core::future::pending::<()>().await;
    });

    assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));
    assert!(matches!(
        events.recv().await,
        Some(ClientEvent::Authenticated { .. })
    ));
    match events.recv().await {
        Some(ClientEvent::Disconnected(Some(Error::PingTimeout))) => {}
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn disco_items_round_trip() {
    let (mut server, client, mut events) = start_client(SecurityMode::OpportunisticTls);

    tokio::spawn(async move {
        scram_login(&mut server).await;
        let query = server.read_until("</iq>").await;
        assert!(query.contains("to='muc.example.org'"));
        assert!(query.contains("http://jabber.org/protocol/disco#items"));
        let id_start = query.find("id='").expect("iq id") + 4;
        let id_end = query[id_start..].find('\'').expect("iq id end") + id_start;
        let id = &query[id_start..id_end];
        server
            .send(&format!(
                "<iq type='result' id='{}' from='muc.example.org'>\
                 <query xmlns='http://jabber.org/protocol/disco#items'>\
                 <item jid='general@muc.example.org' name='General'/>\
                 <item jid='random@muc.example.org'/></query></iq>",
                id
            ))
            .await;
        server.drain().await;
    });

    assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));
    assert!(matches!(
        events.recv().await,
        Some(ClientEvent::Authenticated { .. })
    ));

    client.browse_rooms("muc.example.org").await.unwrap();
    match events.recv().await {
        Some(ClientEvent::RoomList { service, items }) => {
            assert_eq!(service, "muc.example.org");
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].jid, "general@muc.example.org");
            assert_eq!(items[0].name.as_deref(), Some("General"));
            assert_eq!(items[1].name, None);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}
