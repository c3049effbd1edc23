// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stanza tree and incremental stream parser for XMPP.
//!
//! An XMPP session is one long-lived `<stream:stream>` document. This crate
//! provides [`Stanza`], a generic element tree for the document's children,
//! and [`StreamParser`], a push parser that consumes the raw byte stream and
//! emits whole stanzas as they complete, surviving malformed fragments
//! mid-stream without giving up the underlying connection.

#![deny(bare_trait_objects)]

pub mod error;
mod parser;
mod stanza;

pub use error::Error;
pub use parser::{StreamEvent, StreamParser};
pub use stanza::{Node, Stanza, StanzaBuilder};
