// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The connection driver task.
//!
//! One driver per live connection: it owns the socket, walks the stream
//! through negotiation, then services the wire, the command channel and
//! the keepalive clock from a single select loop. Parsed traffic leaves
//! through a bounded event channel towards the single-threaded consumer.

use core::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Sleep};
use tokio_util::codec::Framed;

use xmpbee_sasl::client::mechanisms::{Plain, Scram};
use xmpbee_sasl::{Credentials, Mechanism};
use xmpbee_xml::Stanza;

use crate::client::{negotiate, receive, stanzas, Command, Config, SecurityMode};
use crate::codec::{Packet, XmlCodec};
use crate::error::{AuthError, Error, ProtocolError};
use crate::event::{ClientEvent, RoomInfo};
use crate::iq::PendingIqs;
use crate::ns;
use crate::transport::{self, Connection, IDLE_CHECK_INTERVAL, IDLE_TIMEOUT};

/// XEP-0199 application ping cadence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// How long a keepalive ping may go unanswered.
const PING_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) async fn run(
    config: Config,
    password: String,
    events: mpsc::Sender<ClientEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    stream: Option<Connection>,
) {
    let outcome = drive(config, password, &events, cmd_rx, stream).await;
    let _ = events.send(ClientEvent::Disconnected(outcome.err())).await;
}

async fn drive(
    config: Config,
    password: String,
    events: &mpsc::Sender<ClientEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    stream: Option<Connection>,
) -> Result<(), Error> {
    let domain = config.jid.domain().to_owned();

    let stream = match stream {
        Some(stream) => stream,
        None => {
            let tcp = transport::connect(&config.host, config.port).await?;
            match config.security {
                SecurityMode::DirectTls => {
                    Box::new(transport::upgrade_tls(&config.host, tcp).await?) as Connection
                }
                _ => Box::new(tcp) as Connection,
            }
        }
    };
    let mut tls_active = matches!(config.security, SecurityMode::DirectTls);

    let framed = Framed::new(stream, XmlCodec::new());
    let mut stream = negotiate::stream_start(framed, &domain).await?;
    if events.send(ClientEvent::Connected).await.is_err() {
        return Err(Error::Disconnected);
    }

    if !tls_active {
        if stream.has_starttls() {
            let socket = negotiate::starttls(stream, &config.host).await?;
            tls_active = true;
            stream = negotiate::stream_start(Framed::new(socket, XmlCodec::new()), &domain).await?;
        } else if matches!(config.security, SecurityMode::RequireTls) {
            return Err(ProtocolError::TlsRequired.into());
        }
    }

    let offered = stream.sasl_mechanisms();
    let creds = Credentials::new(config.jid.node(), password);
    let mut mechanism: Box<dyn Mechanism + Send> =
        if offered.iter().any(|m| m == "SCRAM-SHA-1") {
            Box::new(Scram::new(creds))
        } else if offered.iter().any(|m| m == "PLAIN") {
            if !tls_active {
                // Never put a cleartext password on an unencrypted stream.
                return Err(AuthError::RequiresTls.into());
            }
            Box::new(Plain::new(creds))
        } else {
            return Err(AuthError::NoMechanism(offered).into());
        };

    let socket = negotiate::authenticate(stream, mechanism.as_mut()).await?;
    drop(mechanism);

    let mut stream = negotiate::stream_start(Framed::new(socket, XmlCodec::new()), &domain).await?;
    let bound_jid = negotiate::bind_session(&mut stream, &config.jid, &config.resource).await?;
    debug!("session ready as {}", bound_jid);

    let mut framed = stream.framed;
    framed
        .send(Packet::Stanza(stanzas::initial_presence()))
        .await?;
    if events
        .send(ClientEvent::Authenticated { bound_jid })
        .await
        .is_err()
    {
        return Err(Error::Disconnected);
    }

    connected_loop(framed, events, cmd_rx).await
}

async fn connected_loop(
    mut framed: Framed<Connection, XmlCodec>,
    events: &mpsc::Sender<ClientEvent>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<(), Error> {
    let mut pending = PendingIqs::new();
    let mut iq_counter: u64 = 0;
    let mut last_activity = Instant::now();
    let mut keepalive = time::interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
    let mut idle_check =
        time::interval_at(Instant::now() + IDLE_CHECK_INTERVAL, IDLE_CHECK_INTERVAL);
    // Outstanding keepalive: (iq id, timeout).
    let mut awaiting_pong: Option<(String, Pin<Box<Sleep>>)> = None;

    loop {
        tokio::select! {
            packet = framed.next() => {
                last_activity = Instant::now();
                match packet {
                    None => return Err(Error::Disconnected),
                    Some(Err(e)) => return Err(e),
                    Some(Ok(Packet::PingRequest(request))) => {
                        framed.send(Packet::Raw(request.reply())).await?;
                    }
                    Some(Ok(Packet::Stanza(stanza))) => {
                        handle_stanza(
                            stanza,
                            &mut framed,
                            events,
                            &mut pending,
                            &mut awaiting_pong,
                        )
                        .await?;
                    }
                    Some(Ok(Packet::StreamEnd)) => return Err(Error::Disconnected),
                    Some(Ok(Packet::Features(_))) => {}
                    Some(Ok(Packet::StreamStart(_))) => {
                        return Err(ProtocolError::InvalidStreamStart.into())
                    }
                    Some(Ok(_)) => {}
                }
            }
            _ = keepalive.tick() => {
                pending.sweep();
                if awaiting_pong.is_none() {
                    iq_counter += 1;
                    let id = format!("iq_{}", iq_counter);
                    framed.send(Packet::Stanza(stanzas::keepalive_ping(&id))).await?;
                    last_activity = Instant::now();
                    awaiting_pong = Some((id, Box::pin(time::sleep(PING_TIMEOUT))));
                }
            }
            _ = idle_check.tick() => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    return Err(Error::IdleTimeout);
                }
            }
            _ = pong_deadline(&mut awaiting_pong) => {
                return Err(Error::PingTimeout);
            }
            command = cmd_rx.recv() => {
                match command {
                    None | Some(Command::Disconnect) => {
                        // Cooperative shutdown; in-flight IQ callbacks die
                        // with the pending table.
                        let _ = framed.send(Packet::StreamEnd).await;
                        let _ = framed.close().await;
                        return Ok(());
                    }
                    Some(command) => {
                        handle_command(command, &mut framed, &mut pending, &mut iq_counter).await?;
                        last_activity = Instant::now();
                    }
                }
            }
        }
    }
}

/// Resolves when the outstanding keepalive times out; pends forever when
/// no ping is in flight.
async fn pong_deadline(slot: &mut Option<(String, Pin<Box<Sleep>>)>) {
    match slot {
        Some((_, sleep)) => sleep.as_mut().await,
        None => core::future::pending::<()>().await,
    }
}

async fn handle_stanza(
    stanza: Stanza,
    framed: &mut Framed<Connection, XmlCodec>,
    events: &mpsc::Sender<ClientEvent>,
    pending: &mut PendingIqs,
    awaiting_pong: &mut Option<(String, Pin<Box<Sleep>>)>,
) -> Result<(), Error> {
    match stanza.local_name() {
        "iq" => {
            let id = stanza.attr("id");
            match stanza.attr("type") {
                Some("result") | Some("error") => {
                    if let Some((expected, _)) = awaiting_pong.as_ref() {
                        if id == Some(expected.as_str()) {
                            *awaiting_pong = None;
                            return Ok(());
                        }
                    }
                    if let Some(id) = id {
                        match pending.dispatch(id, &stanza) {
                            Some(Some(event)) => forward(events, event).await?,
                            Some(None) => {}
                            None => debug!("unsolicited iq response, id={}", id),
                        }
                    }
                }
                Some("get") => {
                    // Pings that did not take the fast path.
                    if stanza.has_child("ping", ns::PING) {
                        if let Some(id) = id {
                            framed
                                .send(Packet::Stanza(stanzas::pong(id, stanza.attr("from"))))
                                .await?;
                        }
                    }
                }
                _ => {}
            }
        }
        "message" => {
            for event in receive::message_events(&stanza) {
                forward(events, event).await?;
            }
        }
        "presence" => {
            if let Some(event) = receive::presence_event(&stanza) {
                forward(events, event).await?;
            }
        }
        "error" if stanza.name() == "stream:error" => {
            let condition = stanza
                .children()
                .next()
                .map(|child| child.local_name().to_owned())
                .unwrap_or_else(|| "undefined-condition".to_owned());
            return Err(ProtocolError::Stream(condition).into());
        }
        other => warn!("ignoring unexpected stanza <{}>", other),
    }
    Ok(())
}

async fn handle_command(
    command: Command,
    framed: &mut Framed<Connection, XmlCodec>,
    pending: &mut PendingIqs,
    iq_counter: &mut u64,
) -> Result<(), Error> {
    match command {
        Command::Groupchat { to, body } => {
            framed
                .send(Packet::Stanza(stanzas::groupchat_message(&to, &body)))
                .await?;
        }
        Command::Chat { to, body } => {
            framed
                .send(Packet::Stanza(stanzas::chat_message(&to, &body)))
                .await?;
        }
        Command::Join {
            room,
            nick,
            history,
        } => {
            framed
                .send(Packet::Stanza(stanzas::join_presence(&room, &nick, history)))
                .await?;
        }
        Command::Leave { room, nick } => {
            framed
                .send(Packet::Stanza(stanzas::leave_presence(&room, &nick)))
                .await?;
        }
        Command::DiscoItems { service } => {
            *iq_counter += 1;
            let id = format!("iq_{}", iq_counter);
            let target = service.clone();
            pending.register(
                id.clone(),
                Box::new(move |response| Some(parse_disco_items(target, response))),
            );
            framed
                .send(Packet::Stanza(stanzas::disco_items(&id, &service)))
                .await?;
        }
        Command::Disconnect => unreachable!("handled by the caller"),
    }
    Ok(())
}

fn parse_disco_items(service: String, response: &Stanza) -> ClientEvent {
    let mut items = Vec::new();
    if response.attr("type") == Some("result") {
        if let Some(query) = response.get_child("query") {
            for item in query.children().filter(|child| child.local_name() == "item") {
                if let Some(jid) = item.attr("jid") {
                    items.push(RoomInfo {
                        jid: jid.to_owned(),
                        name: item.attr("name").map(str::to_owned),
                    });
                }
            }
        }
    }
    ClientEvent::RoomList { service, items }
}

async fn forward(events: &mpsc::Sender<ClientEvent>, event: ClientEvent) -> Result<(), Error> {
    events.send(event).await.map_err(|_| Error::Disconnected)
}
