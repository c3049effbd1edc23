// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Events the supervisor surfaces to the graphical shell.

use xmpbee_client::{Error, RoomInfo};

use crate::room::{ChatMessage, Occupant};

/// A change to a room's occupant list, already batched and sorted.
#[derive(Debug, Clone)]
pub enum OccupantDelta {
    /// The full sorted occupant list, emitted when the initial presence
    /// flood completes (and when the list must be re-read wholesale).
    Snapshot(Vec<Occupant>),
    /// One occupant joined after the initial flood; insertion position is
    /// its sorted position.
    Joined(Occupant),
    /// The named occupant left.
    Left(String),
}

/// Events towards the UI collaborator, delivered on one thread in
/// dispatch order.
#[derive(Debug)]
pub enum UiEvent {
    /// TCP is up and the stream is open, pre-authentication.
    Connected {
        account: String,
    },
    /// The session is ready.
    Authenticated {
        account: String,
        bound_jid: String,
    },
    /// The connection ended; `reason` carries the fatal cause, if any.
    Disconnected {
        account: String,
        reason: Option<String>,
    },
    /// A rendered line was appended to a room, post-deduplication.
    /// `notify` is false for our own messages and system lines.
    Message {
        account: String,
        room: String,
        message: ChatMessage,
        delayed: bool,
        notify: bool,
    },
    /// An occupant change, post flood batching.
    Presence {
        account: String,
        room: String,
        delta: OccupantDelta,
    },
    /// A room subject change, once per change.
    RoomSubject {
        account: String,
        room: String,
        subject: String,
    },
    /// Response to a room-list browse.
    RoomList {
        account: String,
        service: String,
        items: Vec<RoomInfo>,
    },
    /// Restored messages for a freshly opened conversation, to be
    /// prepended to its transcript.
    HistoryLoaded {
        account: String,
        room: String,
        messages: Vec<ChatMessage>,
    },
    /// A permanent failure requiring user action.
    Error {
        account: String,
        error: Error,
    },
}
