// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The PLAIN mechanism (RFC 4616).
//!
//! PLAIN ships the password verbatim; the protocol client only ever
//! selects it on a TLS-protected stream.

use zeroize::Zeroize;

use crate::client::{Mechanism, MechanismError};
use crate::common::Credentials;

/// The PLAIN mechanism.
pub struct Plain {
    creds: Credentials,
}

impl Plain {
    /// A mechanism for the given credentials.
    pub fn new(creds: Credentials) -> Plain {
        Plain { creds }
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn initial(&mut self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.creds.username.len() + self.creds.password.len() + 2);
        payload.push(0);
        payload.extend_from_slice(self.creds.username.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&self.creds.password);
        payload
    }

    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Err(MechanismError::UnexpectedChallenge)
    }

    fn success(&mut self, _data: &[u8]) -> Result<(), MechanismError> {
        self.creds.password.zeroize();
        Ok(())
    }
}
