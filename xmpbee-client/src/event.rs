// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! High-level events surfaced by the protocol client.

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::jid::Jid;

/// Incoming client events, in stanza order (fast-path pongs excepted,
/// which are semantically independent).
#[derive(Debug)]
pub enum ClientEvent {
    /// TCP is up and the stream is open, pre-authentication.
    Connected,
    /// The session is bound and ready.
    Authenticated {
        /// The JID the server bound this session to.
        bound_jid: Jid,
    },
    /// A chat or groupchat message with a body.
    Message(MessageEvent),
    /// A room subject change.
    Subject(SubjectEvent),
    /// A presence update.
    Presence(PresenceEvent),
    /// Response to a service-discovery items query.
    RoomList {
        /// The queried service.
        service: String,
        /// Discovered items.
        items: Vec<RoomInfo>,
    },
    /// The connection ended. `None` when locally requested, otherwise the
    /// terminal error.
    Disconnected(Option<Error>),
}

/// Message classification from the `type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A MUC room message.
    Groupchat,
    /// A one-to-one message.
    Chat,
    /// Untyped message, treated like chat.
    Normal,
}

impl MessageType {
    pub(crate) fn from_attr(value: Option<&str>) -> MessageType {
        match value {
            Some("groupchat") => MessageType::Groupchat,
            Some("chat") => MessageType::Chat,
            _ => MessageType::Normal,
        }
    }
}

/// A message carrying a body.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Sender, as the full JID from the wire.
    pub from: String,
    /// Message classification.
    pub kind: MessageType,
    /// Body text.
    pub body: String,
    /// Claimed send time from a `<delay/>` payload.
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether the server marked this as replayed history.
    pub delayed: bool,
}

/// A room subject change.
#[derive(Debug, Clone)]
pub struct SubjectEvent {
    /// Bare JID of the room.
    pub room: String,
    /// Nick that set the subject, when the room tells us.
    pub nick: Option<String>,
    /// The subject text.
    pub subject: String,
}

/// MUC affiliation, ordered by display priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Affiliation {
    Owner,
    Admin,
    Member,
    None,
    Outcast,
}

impl Affiliation {
    pub(crate) fn from_attr(value: Option<&str>) -> Affiliation {
        match value {
            Some("owner") => Affiliation::Owner,
            Some("admin") => Affiliation::Admin,
            Some("member") => Affiliation::Member,
            Some("outcast") => Affiliation::Outcast,
            _ => Affiliation::None,
        }
    }
}

/// MUC role, ordered by display priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Moderator,
    Participant,
    Visitor,
    None,
}

impl Role {
    pub(crate) fn from_attr(value: Option<&str>) -> Role {
        match value {
            Some("moderator") => Role::Moderator,
            Some("participant") => Role::Participant,
            Some("visitor") => Role::Visitor,
            _ => Role::None,
        }
    }
}

/// A presence update, with the MUC user payload decoded when present.
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    /// Sender, as the full JID from the wire.
    pub from: String,
    /// Bare room JID, when the presence came from a MUC occupant.
    pub room: Option<String>,
    /// Occupant nick (the resource of `from`), when in a room.
    pub nick: Option<String>,
    /// `false` for `type='unavailable'`.
    pub available: bool,
    /// MUC affiliation from the `<item/>` payload.
    pub affiliation: Affiliation,
    /// MUC role from the `<item/>` payload.
    pub role: Role,
    /// Whether a MUC status code 110 marked this as our own presence.
    pub self_presence: bool,
    /// Free-text status.
    pub status: Option<String>,
}

/// One row of a disco#items result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// The item JID.
    pub jid: String,
    /// Human-readable name, when the service provides one.
    pub name: Option<String>,
}
