// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Builders for the stanzas the client originates.

use rand::{thread_rng, Rng};

use xmpbee_xml::Stanza;

use crate::ns;

fn make_id() -> String {
    let id: u64 = thread_rng().gen();
    format!("{}", id)
}

/// The bare presence sent right after session establishment.
pub(crate) fn initial_presence() -> Stanza {
    Stanza::builder("presence").build()
}

pub(crate) fn groupchat_message(to: &str, body: &str) -> Stanza {
    message(to, "groupchat", body)
}

pub(crate) fn chat_message(to: &str, body: &str) -> Stanza {
    message(to, "chat", body)
}

fn message(to: &str, kind: &str, body: &str) -> Stanza {
    Stanza::builder("message")
        .attr("to", to)
        .attr("type", kind)
        .attr("id", make_id())
        .append(Stanza::builder("body").text(body).build())
        .build()
}

/// Presence towards `room@service/nick` requesting at most `history`
/// stanzas of room backlog.
pub(crate) fn join_presence(room: &str, nick: &str, history: u32) -> Stanza {
    Stanza::builder("presence")
        .attr("to", format!("{}/{}", room, nick))
        .append(
            Stanza::builder("x")
                .attr("xmlns", ns::MUC)
                .append(
                    Stanza::builder("history")
                        .attr("maxstanzas", history.to_string())
                        .build(),
                )
                .build(),
        )
        .build()
}

pub(crate) fn leave_presence(room: &str, nick: &str) -> Stanza {
    Stanza::builder("presence")
        .attr("to", format!("{}/{}", room, nick))
        .attr("type", "unavailable")
        .build()
}

pub(crate) fn disco_items(id: &str, service: &str) -> Stanza {
    Stanza::builder("iq")
        .attr("type", "get")
        .attr("id", id)
        .attr("to", service)
        .append(
            Stanza::builder("query")
                .attr("xmlns", ns::DISCO_ITEMS)
                .build(),
        )
        .build()
}

pub(crate) fn keepalive_ping(id: &str) -> Stanza {
    Stanza::builder("iq")
        .attr("type", "get")
        .attr("id", id)
        .append(Stanza::builder("ping").attr("xmlns", ns::PING).build())
        .build()
}

/// Result for an incoming ping that took the ordinary parse path.
pub(crate) fn pong(id: &str, to: Option<&str>) -> Stanza {
    let mut builder = Stanza::builder("iq").attr("type", "result").attr("id", id);
    if let Some(to) = to {
        builder = builder.attr("to", to);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_presence_carries_history_limit() {
        let presence = join_presence("general@muc.example.org", "alice", 50);
        assert_eq!(presence.attr("to"), Some("general@muc.example.org/alice"));
        let x = presence.get_child("x").unwrap();
        assert_eq!(x.xmlns(), Some(ns::MUC));
        assert_eq!(
            x.get_child("history").unwrap().attr("maxstanzas"),
            Some("50")
        );
    }

    #[test]
    fn leave_presence_is_unavailable() {
        let presence = leave_presence("general@muc.example.org", "alice");
        assert_eq!(presence.attr("type"), Some("unavailable"));
        assert_eq!(presence.attr("to"), Some("general@muc.example.org/alice"));
    }

    #[test]
    fn messages_get_an_id() {
        let message = groupchat_message("general@muc.example.org", "hi");
        assert!(message.attr("id").is_some());
        assert_eq!(message.get_child("body").unwrap().text(), "hi");
    }
}
