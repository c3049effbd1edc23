// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Client-side SASL mechanism trait and errors.

use core::fmt;
use std::error::Error as StdError;

pub mod mechanisms;

/// Errors a mechanism can produce during the exchange.
#[derive(Debug, PartialEq)]
pub enum MechanismError {
    /// A step was invoked out of order.
    InvalidState,
    /// The server's challenge or success payload was not valid base64.
    Base64(base64::DecodeError),
    /// The server's data violated the mechanism's grammar or its nonce
    /// rules.
    InvalidServerResponse(String),
    /// The server signature did not verify against the salted password.
    ServerSignatureMismatch,
    /// The mechanism does not expect a challenge.
    UnexpectedChallenge,
}

impl fmt::Display for MechanismError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MechanismError::InvalidState => write!(fmt, "mechanism step invoked out of order"),
            MechanismError::Base64(e) => write!(fmt, "base64 error: {}", e),
            MechanismError::InvalidServerResponse(s) => {
                write!(fmt, "invalid server response: {}", s)
            }
            MechanismError::ServerSignatureMismatch => {
                write!(fmt, "server signature did not verify")
            }
            MechanismError::UnexpectedChallenge => {
                write!(fmt, "mechanism does not expect a challenge")
            }
        }
    }
}

impl StdError for MechanismError {}

impl From<base64::DecodeError> for MechanismError {
    fn from(e: base64::DecodeError) -> MechanismError {
        MechanismError::Base64(e)
    }
}

/// A SASL client mechanism.
///
/// The protocol client drives this through the XMPP `<auth>`, `<challenge>`,
/// `<response>` and `<success>` elements; payloads here are the raw bytes
/// before base64 framing.
pub trait Mechanism {
    /// The IANA mechanism name (e.g. `SCRAM-SHA-1`).
    fn name(&self) -> &str;

    /// The initial-response payload for `<auth>`.
    fn initial(&mut self) -> Vec<u8>;

    /// Respond to a `<challenge>` payload.
    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError>;

    /// Conclude on `<success>`. `data` is the decoded additional-data
    /// payload, empty when the server sent none. Implementations wipe all
    /// key material before returning, on success and on failure alike.
    fn success(&mut self, data: &[u8]) -> Result<(), MechanismError>;
}
