// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The client handle and its connection configuration.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::event::ClientEvent;
use crate::jid::Jid;
use crate::transport::Connection;

mod driver;
mod negotiate;
mod receive;
mod stanzas;
#[cfg(test)]
mod tests;

/// How much encryption the account insists on.
///
/// There is no plaintext-on-purpose mode; the weakest available policy
/// still upgrades whenever the server offers STARTTLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityMode {
    /// Refuse to continue when the server lacks STARTTLS.
    RequireTls,
    /// Upgrade when offered; continue unencrypted otherwise. Cleartext
    /// SASL PLAIN is still never sent.
    OpportunisticTls,
    /// TLS from the first byte (5223-style endpoints).
    DirectTls,
}

impl Default for SecurityMode {
    fn default() -> Self {
        SecurityMode::RequireTls
    }
}

/// Connection parameters for one account.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bare JID of the account.
    pub jid: Jid,
    /// Host to connect to; also the TLS verification name.
    pub host: String,
    /// Port to connect to.
    pub port: u16,
    /// Resource to bind.
    pub resource: String,
    /// Encryption policy.
    pub security: SecurityMode,
}

/// Default stanza count requested from the room history on join.
pub const DEFAULT_JOIN_HISTORY: u32 = 50;

/// Queue depth of the event channel towards the consumer.
pub const EVENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug)]
pub(crate) enum Command {
    Groupchat { to: String, body: String },
    Chat { to: String, body: String },
    Join { room: String, nick: String, history: u32 },
    Leave { room: String, nick: String },
    DiscoItems { service: String },
    Disconnect,
}

/// Handle to a live connection.
///
/// Dropping the handle disconnects: the driver task shuts the stream down
/// when the command channel closes.
pub struct Client {
    cmd_tx: mpsc::Sender<Command>,
}

impl Client {
    /// Open a connection and drive it in the background. Events arrive on
    /// `events` in wire order; the last one is always
    /// [`ClientEvent::Disconnected`].
    pub fn connect(config: Config, password: String, events: mpsc::Sender<ClientEvent>) -> Client {
        Client::spawn(config, password, events, None)
    }

    /// Like [`Client::connect`], but over an already-established
    /// transport. TCP connect and direct TLS are skipped; STARTTLS still
    /// honors the configured [`SecurityMode`]. Used for tunnels and tests.
    pub fn connect_over(
        stream: Connection,
        config: Config,
        password: String,
        events: mpsc::Sender<ClientEvent>,
    ) -> Client {
        Client::spawn(config, password, events, Some(stream))
    }

    fn spawn(
        config: Config,
        password: String,
        events: mpsc::Sender<ClientEvent>,
        stream: Option<Connection>,
    ) -> Client {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        tokio::spawn(driver::run(config, password, events, cmd_rx, stream));
        Client { cmd_tx }
    }

    /// Send a message to a room.
    pub async fn send_groupchat(&self, room: &str, body: &str) -> Result<(), Error> {
        self.command(Command::Groupchat {
            to: room.to_owned(),
            body: body.to_owned(),
        })
        .await
    }

    /// Send a direct message.
    pub async fn send_chat(&self, to: &str, body: &str) -> Result<(), Error> {
        self.command(Command::Chat {
            to: to.to_owned(),
            body: body.to_owned(),
        })
        .await
    }

    /// Join a room as `nick`, requesting `history` stanzas of backlog.
    pub async fn join_room(&self, room: &str, nick: &str, history: u32) -> Result<(), Error> {
        self.command(Command::Join {
            room: room.to_owned(),
            nick: nick.to_owned(),
            history,
        })
        .await
    }

    /// Leave a room.
    pub async fn leave_room(&self, room: &str, nick: &str) -> Result<(), Error> {
        self.command(Command::Leave {
            room: room.to_owned(),
            nick: nick.to_owned(),
        })
        .await
    }

    /// List the rooms a conference service hosts. The answer arrives as
    /// [`ClientEvent::RoomList`].
    pub async fn browse_rooms(&self, service: &str) -> Result<(), Error> {
        self.command(Command::DiscoItems {
            service: service.to_owned(),
        })
        .await
    }

    /// Close the stream and end the driver. In-flight IQ callbacks are
    /// dropped, never fired late.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.command(Command::Disconnect).await
    }

    async fn command(&self, command: Command) -> Result<(), Error> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| Error::NotConnected)
    }
}
