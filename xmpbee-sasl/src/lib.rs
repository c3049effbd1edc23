// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SASL client-side authentication for the XMPBee XMPP core.
//!
//! Provides the mechanisms the protocol client negotiates: SCRAM-SHA-1
//! (RFC 5802, no channel binding) and PLAIN. Key material is zeroized as
//! soon as a mechanism concludes, successfully or not.

#![deny(bare_trait_objects)]

pub mod client;
mod common;

pub use client::{Mechanism, MechanismError};
pub use common::Credentials;
