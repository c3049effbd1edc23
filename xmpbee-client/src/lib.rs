// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XMPP protocol client for the XMPBee core.
//!
//! This crate owns the connection: the TCP/TLS transport, the stream codec,
//! and the state machine that takes a fresh socket through STARTTLS, SASL,
//! resource binding and session establishment, then keeps it alive with
//! XEP-0199 pings. A [`Client`] handle accepts send operations; everything
//! the server says comes back as [`ClientEvent`]s on a bounded channel.

#![deny(bare_trait_objects)]

pub mod client;
mod codec;
mod delay;
pub mod error;
mod fast_path;
mod event;
mod iq;
pub mod jid;
pub mod ns;
pub mod transport;

pub use client::{Client, Config, SecurityMode, DEFAULT_JOIN_HISTORY, EVENT_QUEUE_DEPTH};
pub use codec::{Packet, XmlCodec};
pub use error::{AuthError, Error, ProtocolError};
pub use fast_path::PingRequest;
pub use event::{
    Affiliation, ClientEvent, MessageEvent, MessageType, PresenceEvent, Role, RoomInfo,
    SubjectEvent,
};
pub use jid::Jid;

pub use xmpbee_xml::{Stanza, StreamParser};
