// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SCRAM-SHA-1 (RFC 5802), without channel binding.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::{thread_rng, RngCore};
use sha1::{Digest, Sha1};
use zeroize::{Zeroize, Zeroizing};

use crate::client::{Mechanism, MechanismError};
use crate::common::Credentials;

type HmacSha1 = Hmac<Sha1>;

/// GS2 header for "no channel binding".
const GS2_HEADER: &str = "n,,";
/// The same header as it appears base64ed in the final message.
const CHANNEL_BINDING: &str = "c=biws";
const NONCE_LEN: usize = 24;

enum State {
    Fresh,
    ClientFirstSent {
        client_first_bare: Zeroizing<String>,
    },
    FinalSent {
        server_signature: Zeroizing<Vec<u8>>,
    },
    Concluded,
}

/// The SCRAM-SHA-1 mechanism.
pub struct Scram {
    username: String,
    password: Zeroizing<Vec<u8>>,
    client_nonce: String,
    state: State,
}

impl Scram {
    /// A mechanism for the given credentials, with a fresh random nonce.
    pub fn new(creds: Credentials) -> Scram {
        let mut raw = [0u8; NONCE_LEN];
        thread_rng().fill_bytes(&mut raw);
        Scram::with_nonce(creds, BASE64.encode(raw))
    }

    fn with_nonce(creds: Credentials, client_nonce: String) -> Scram {
        Scram {
            username: creds.username,
            password: creds.password,
            client_nonce,
            state: State::Fresh,
        }
    }

    /// Wipe everything secret or session-bound.
    fn scrub(&mut self) {
        self.password.zeroize();
        self.client_nonce.zeroize();
        self.state = State::Concluded;
    }
}

impl Mechanism for Scram {
    fn name(&self) -> &str {
        "SCRAM-SHA-1"
    }

    fn initial(&mut self) -> Vec<u8> {
        let client_first_bare = Zeroizing::new(format!(
            "n={},r={}",
            escape_username(&self.username),
            self.client_nonce
        ));
        let payload = format!("{}{}", GS2_HEADER, client_first_bare.as_str());
        self.state = State::ClientFirstSent { client_first_bare };
        payload.into_bytes()
    }

    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        let client_first_bare = match &self.state {
            State::ClientFirstSent { client_first_bare } => client_first_bare,
            _ => return Err(MechanismError::InvalidState),
        };
        let challenge = core::str::from_utf8(challenge).map_err(|_| {
            MechanismError::InvalidServerResponse("challenge is not UTF-8".to_owned())
        })?;

        let mut server_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for field in challenge.split(',') {
            match field.split_once('=') {
                Some(("r", v)) => server_nonce = Some(v.to_owned()),
                Some(("s", v)) => salt = Some(BASE64.decode(v)?),
                Some(("i", v)) => {
                    iterations = Some(v.parse::<u32>().map_err(|_| {
                        MechanismError::InvalidServerResponse(format!(
                            "bad iteration count: {}",
                            v
                        ))
                    })?)
                }
                _ => {}
            }
        }
        let server_nonce = server_nonce.ok_or_else(|| {
            MechanismError::InvalidServerResponse("challenge without nonce".to_owned())
        })?;
        let salt = salt.ok_or_else(|| {
            MechanismError::InvalidServerResponse("challenge without salt".to_owned())
        })?;
        let iterations = iterations.ok_or_else(|| {
            MechanismError::InvalidServerResponse("challenge without iteration count".to_owned())
        })?;
        // The server nonce must extend the one we sent.
        if !server_nonce.starts_with(&self.client_nonce) || server_nonce == self.client_nonce {
            return Err(MechanismError::InvalidServerResponse(
                "server nonce does not extend client nonce".to_owned(),
            ));
        }

        let mut salted_password = Zeroizing::new([0u8; 20]);
        pbkdf2::pbkdf2_hmac::<Sha1>(&self.password, &salt, iterations, &mut *salted_password);

        let client_key = Zeroizing::new(hmac_sha1(&*salted_password, b"Client Key"));
        let stored_key = Sha1::digest(&*client_key);

        let client_final_without_proof = format!("{},r={}", CHANNEL_BINDING, server_nonce);
        let auth_message = Zeroizing::new(format!(
            "{},{},{}",
            client_first_bare.as_str(),
            challenge,
            client_final_without_proof
        ));

        let client_signature = hmac_sha1(&stored_key, auth_message.as_bytes());
        let mut proof = [0u8; 20];
        for (out, (key, sig)) in proof
            .iter_mut()
            .zip(client_key.iter().zip(client_signature.iter()))
        {
            *out = key ^ sig;
        }

        let server_key = Zeroizing::new(hmac_sha1(&*salted_password, b"Server Key"));
        let server_signature =
            Zeroizing::new(hmac_sha1(&*server_key, auth_message.as_bytes()).to_vec());
        self.state = State::FinalSent { server_signature };

        Ok(format!("{},p={}", client_final_without_proof, BASE64.encode(proof)).into_bytes())
    }

    fn success(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        let result = match core::mem::replace(&mut self.state, State::Concluded) {
            State::FinalSent { server_signature } => {
                if data.is_empty() {
                    // An empty additional-data payload carries nothing to
                    // verify.
                    Ok(())
                } else {
                    verify_server_final(data, &server_signature)
                }
            }
            _ => Err(MechanismError::InvalidState),
        };
        self.scrub();
        result
    }
}

fn verify_server_final(
    data: &[u8],
    server_signature: &[u8],
) -> Result<(), MechanismError> {
    let data = core::str::from_utf8(data).map_err(|_| {
        MechanismError::InvalidServerResponse("server-final is not UTF-8".to_owned())
    })?;
    for field in data.split(',') {
        if let Some(("v", v)) = field.split_once('=') {
            let received = BASE64.decode(v)?;
            if received == server_signature {
                return Ok(());
            }
            return Err(MechanismError::ServerSignatureMismatch);
        }
    }
    Err(MechanismError::InvalidServerResponse(
        "server-final without verifier".to_owned(),
    ))
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; 20] {
    let mut mac =
        <HmacSha1 as Mac>::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `,` and `=` cannot appear verbatim in a SCRAM username.
fn escape_username(username: &str) -> String {
    let mut out = String::with_capacity(username.len());
    for c in username.chars() {
        match c {
            '=' => out.push_str("=3D"),
            ',' => out.push_str("=2C"),
            c => out.push(c),
        }
    }
    out
}
