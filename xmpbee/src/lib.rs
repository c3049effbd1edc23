// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Session supervision for the XMPBee chat client.
//!
//! The [`Supervisor`] owns accounts, their connections and their rooms. It
//! is the single-threaded consumer of everything the protocol clients
//! emit: it batches MUC presence floods, deduplicates replayed history,
//! reconnects with backoff, writes chat logs, and persists credentials and
//! settings. The graphical shell talks to it through a
//! [`SupervisorHandle`] and listens on a [`UiEvent`] channel.

#![deny(bare_trait_objects)]

#[macro_use]
extern crate log;

pub mod account;
pub mod event;
pub mod logstore;
pub mod room;
pub mod store;
pub mod supervisor;

pub use account::Account;
pub use event::{OccupantDelta, UiEvent};
pub use logstore::LogStore;
pub use room::{ChatKind, ChatMessage, Occupant, Room};
pub use store::{KeyringStore, KvStore, MemoryStore, SecretStore, Settings};
pub use supervisor::{Supervisor, SupervisorHandle};

pub use xmpbee_client as client;
