// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! In-memory state of a conversation: a MUC room or a direct-message
//! exchange.

use chrono::{DateTime, Utc};

use xmpbee_client::{Affiliation, Role};

/// History replay counts as a duplicate when sender and body match an
/// existing message within this window.
const DEDUP_WINDOW_MS: i64 = 2_000;

/// What a rendered line is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// An ordinary message.
    Chat,
    /// A `/me` action.
    Action,
    /// Somebody entered the room.
    Join,
    /// Somebody left the room.
    Part,
    /// Somebody dropped off entirely.
    Quit,
    /// The subject changed.
    Topic,
    /// A line from the client itself.
    System,
}

/// One rendered line. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Who said or did it; empty for system lines.
    pub sender: String,
    /// The text; for part/quit lines this is the optional reason.
    pub body: String,
    /// Line classification.
    pub kind: ChatKind,
}

impl ChatMessage {
    /// A message happening now.
    pub fn new<S: Into<String>, B: Into<String>>(kind: ChatKind, sender: S, body: B) -> ChatMessage {
        ChatMessage::at(Utc::now(), kind, sender, body)
    }

    /// A message with an explicit timestamp (history replay, log reload).
    pub fn at<S: Into<String>, B: Into<String>>(
        timestamp: DateTime<Utc>,
        kind: ChatKind,
        sender: S,
        body: B,
    ) -> ChatMessage {
        ChatMessage {
            timestamp,
            sender: sender.into(),
            body: body.into(),
            kind,
        }
    }
}

/// A user present in a room. Identity key is the nick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    pub nick: String,
    pub affiliation: Affiliation,
    pub role: Role,
}

impl Occupant {
    fn sort_key(&self) -> (Affiliation, Role, String) {
        (self.affiliation, self.role, self.nick.to_lowercase())
    }
}

/// Outcome of applying a presence to a room.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    /// Accumulated silently during the initial presence flood.
    Buffered,
    /// The flood completed; here is the full sorted occupant list.
    Snapshot(Vec<Occupant>),
    /// A new occupant arrived after the flood.
    Joined(Occupant),
    /// An occupant's affiliation or role changed in place.
    Updated,
    /// The named occupant left.
    Left(String),
    /// Our own presence went away; occupant state was cleared.
    SelfLeft,
    /// Nothing relevant changed.
    None,
}

/// A MUC conversation or a 1:1 exchange. Survives reconnects; identified
/// by its JID.
#[derive(Debug)]
pub struct Room {
    /// Bare room JID, or the partner's bare JID for DMs.
    pub jid: String,
    /// Display name (the JID's localpart).
    pub name: String,
    /// Current subject.
    pub topic: Option<String>,
    /// Transcript, in dispatch order.
    pub messages: Vec<ChatMessage>,
    /// Unread counter, maintained by the shell.
    pub unread: u32,
    /// Our own nickname in this room.
    pub nickname: String,
    /// Whether this is a direct-message exchange.
    pub is_dm: bool,
    /// Whether the initial presence flood has completed.
    pub initial_presence_complete: bool,
    /// Whether the current topic has been shown once already.
    pub has_displayed_topic: bool,
    occupants: Vec<Occupant>,
    pending_occupants: Vec<Occupant>,
}

fn localpart(jid: &str) -> &str {
    match jid.split_once('@') {
        Some((local, _)) => local,
        None => jid,
    }
}

impl Room {
    /// A MUC room awaiting its initial presence flood.
    pub fn new_muc(jid: &str, nickname: &str) -> Room {
        Room {
            jid: jid.to_owned(),
            name: localpart(jid).to_owned(),
            topic: None,
            messages: Vec::new(),
            unread: 0,
            nickname: nickname.to_owned(),
            is_dm: false,
            initial_presence_complete: false,
            has_displayed_topic: false,
            occupants: Vec::new(),
            pending_occupants: Vec::new(),
        }
    }

    /// A direct-message exchange with `partner` (bare JID). DMs have no
    /// presence flood.
    pub fn new_dm(partner: &str, nickname: &str) -> Room {
        Room {
            jid: partner.to_owned(),
            name: localpart(partner).to_owned(),
            topic: None,
            messages: Vec::new(),
            unread: 0,
            nickname: nickname.to_owned(),
            is_dm: true,
            initial_presence_complete: true,
            has_displayed_topic: false,
            occupants: Vec::new(),
            pending_occupants: Vec::new(),
        }
    }

    /// The name under which this conversation is logged on disk.
    pub fn log_name(&self) -> String {
        if self.is_dm {
            format!("DM-{}", self.name)
        } else {
            self.name.clone()
        }
    }

    /// The sorted occupant list. Empty until the initial flood completes.
    pub fn occupants(&self) -> &[Occupant] {
        &self.occupants
    }

    /// Prepare for re-joining after a reconnect: presence state resets,
    /// messages are kept.
    pub fn reset_for_rejoin(&mut self) {
        self.initial_presence_complete = false;
        self.occupants.clear();
        self.pending_occupants.clear();
    }

    /// Append a line to the transcript.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Put restored history in front of the live transcript.
    pub fn prepend_history(&mut self, mut history: Vec<ChatMessage>) {
        history.append(&mut self.messages);
        self.messages = history;
    }

    /// Whether a replayed message duplicates one already on screen:
    /// same sender and body, timestamps within two seconds.
    pub fn is_duplicate(&self, message: &ChatMessage) -> bool {
        self.messages.iter().any(|existing| {
            existing.sender == message.sender
                && existing.body == message.body
                && (existing.timestamp - message.timestamp)
                    .num_milliseconds()
                    .abs()
                    < DEDUP_WINDOW_MS
        })
    }

    /// Apply an available presence.
    pub fn apply_available(&mut self, occupant: Occupant, self_presence: bool) -> PresenceChange {
        if !self.initial_presence_complete {
            upsert(&mut self.pending_occupants, occupant);
            if self_presence {
                self.occupants = core::mem::take(&mut self.pending_occupants);
                self.occupants.sort_by_key(Occupant::sort_key);
                self.initial_presence_complete = true;
                return PresenceChange::Snapshot(self.occupants.clone());
            }
            return PresenceChange::Buffered;
        }

        match self
            .occupants
            .iter()
            .position(|existing| existing.nick == occupant.nick)
        {
            Some(index) => {
                if self.occupants[index] == occupant {
                    PresenceChange::None
                } else {
                    self.occupants.remove(index);
                    self.insert_sorted(occupant);
                    PresenceChange::Updated
                }
            }
            None => {
                self.insert_sorted(occupant.clone());
                PresenceChange::Joined(occupant)
            }
        }
    }

    /// Apply an unavailable presence.
    pub fn apply_unavailable(&mut self, nick: &str, self_presence: bool) -> PresenceChange {
        if self_presence {
            self.occupants.clear();
            self.pending_occupants.clear();
            self.initial_presence_complete = false;
            return PresenceChange::SelfLeft;
        }
        if !self.initial_presence_complete {
            self.pending_occupants
                .retain(|occupant| occupant.nick != nick);
            return PresenceChange::Buffered;
        }
        match self
            .occupants
            .iter()
            .position(|occupant| occupant.nick == nick)
        {
            Some(index) => {
                self.occupants.remove(index);
                PresenceChange::Left(nick.to_owned())
            }
            None => PresenceChange::None,
        }
    }

    fn insert_sorted(&mut self, occupant: Occupant) {
        let key = occupant.sort_key();
        let index = self
            .occupants
            .partition_point(|existing| existing.sort_key() < key);
        self.occupants.insert(index, occupant);
    }
}

fn upsert(list: &mut Vec<Occupant>, occupant: Occupant) {
    match list
        .iter()
        .position(|existing| existing.nick == occupant.nick)
    {
        Some(index) => list[index] = occupant,
        None => list.push(occupant),
    }
}
