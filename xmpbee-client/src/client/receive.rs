// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Translation of incoming stanzas into [`ClientEvent`]s.

use xmpbee_xml::Stanza;

use crate::delay::parse_stamp;
use crate::event::{
    Affiliation, ClientEvent, MessageEvent, MessageType, PresenceEvent, Role, SubjectEvent,
};
use crate::ns;

/// Split a full JID into its bare part and resource.
fn split_full(jid: &str) -> (&str, Option<&str>) {
    match jid.split_once('/') {
        Some((bare, resource)) => (bare, Some(resource)),
        None => (jid, None),
    }
}

/// Events carried by a `<message>` stanza. A subject and a body can in
/// principle ride the same stanza; each yields its own event.
pub(crate) fn message_events(stanza: &Stanza) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    let from = match stanza.attr("from") {
        Some(from) => from,
        None => return events,
    };

    if let Some(subject) = stanza.get_child("subject") {
        let (room, nick) = split_full(from);
        events.push(ClientEvent::Subject(SubjectEvent {
            room: room.to_owned(),
            nick: nick.map(str::to_owned),
            subject: subject.text(),
        }));
    }

    if let Some(body) = stanza.get_child("body") {
        let body = body.text();
        if !body.is_empty() {
            let delay = stanza
                .children()
                .find(|child| child.is("delay", ns::DELAY));
            let timestamp = delay
                .and_then(|delay| delay.attr("stamp"))
                .and_then(parse_stamp);
            events.push(ClientEvent::Message(MessageEvent {
                from: from.to_owned(),
                kind: MessageType::from_attr(stanza.attr("type")),
                body,
                timestamp,
                delayed: delay.is_some(),
            }));
        }
    }

    events
}

/// The event carried by a `<presence>` stanza, if any.
pub(crate) fn presence_event(stanza: &Stanza) -> Option<ClientEvent> {
    let from = stanza.attr("from")?;
    let available = match stanza.attr("type") {
        None | Some("") => true,
        Some("unavailable") => false,
        // Subscription machinery is not ours.
        Some(_) => return None,
    };
    let status = stanza
        .get_child("status")
        .map(|status| status.text())
        .filter(|text| !text.is_empty());

    let muc_user = stanza
        .children()
        .find(|child| child.is("x", ns::MUC_USER));
    let (room, nick) = match muc_user {
        Some(_) => {
            let (room, nick) = split_full(from);
            (Some(room.to_owned()), nick.map(str::to_owned))
        }
        None => (None, None),
    };
    let item = muc_user.and_then(|x| x.get_child("item"));
    let self_presence = muc_user
        .map(|x| {
            x.children()
                .filter(|child| child.local_name() == "status")
                .any(|status| status.attr("code") == Some("110"))
        })
        .unwrap_or(false);

    Some(ClientEvent::Presence(PresenceEvent {
        from: from.to_owned(),
        room,
        nick,
        available,
        affiliation: Affiliation::from_attr(item.and_then(|item| item.attr("affiliation"))),
        role: Role::from_attr(item.and_then(|item| item.attr("role"))),
        self_presence,
        status,
    }))
}
