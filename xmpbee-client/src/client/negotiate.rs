// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream establishment: header exchange, STARTTLS, SASL, bind, session.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, StreamExt};
use log::debug;
use tokio_util::codec::Framed;

use xmpbee_sasl::{Mechanism, MechanismError};
use xmpbee_xml::Stanza;

use crate::codec::{Packet, XmlCodec};
use crate::error::{AuthError, Error, ProtocolError};
use crate::jid::Jid;
use crate::ns;
use crate::transport::{self, Connection};

const BIND_REQ_ID: &str = "bind_1";
const SESSION_REQ_ID: &str = "session_1";

/// A stream whose header and features have been exchanged.
pub(crate) struct Negotiated {
    pub(crate) framed: Framed<Connection, XmlCodec>,
    pub(crate) features: Stanza,
}

impl Negotiated {
    pub(crate) fn has_starttls(&self) -> bool {
        self.features.has_child("starttls", ns::TLS)
    }

    pub(crate) fn sasl_mechanisms(&self) -> Vec<String> {
        match self
            .features
            .children()
            .find(|child| child.is("mechanisms", ns::SASL))
        {
            Some(mechanisms) => mechanisms
                .children()
                .filter(|child| child.local_name() == "mechanism")
                .map(|child| child.text())
                .collect(),
            None => Vec::new(),
        }
    }

    fn has_bind(&self) -> bool {
        self.features.has_child("bind", ns::BIND)
    }
}

/// Send our stream header and read the peer's header and features.
pub(crate) async fn stream_start(
    mut framed: Framed<Connection, XmlCodec>,
    domain: &str,
) -> Result<Negotiated, Error> {
    framed.codec_mut().reset_stream();
    framed
        .send(Packet::Header {
            to: domain.to_owned(),
        })
        .await?;

    loop {
        match framed.next().await {
            Some(Ok(Packet::StreamStart(attrs))) => {
                debug!(
                    "stream open, id={}",
                    attrs.get("id").map(String::as_str).unwrap_or("<none>")
                );
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => return Err(Error::Disconnected),
        }
    }
    loop {
        match framed.next().await {
            Some(Ok(Packet::Features(features))) => {
                return Ok(Negotiated { framed, features });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => return Err(Error::Disconnected),
        }
    }
}

/// Ask for TLS, wait for `<proceed/>` and wrap the socket. Returns the
/// encrypted transport, over which the stream is started afresh.
pub(crate) async fn starttls(mut stream: Negotiated, host: &str) -> Result<Connection, Error> {
    stream
        .framed
        .send(Packet::Stanza(
            Stanza::builder("starttls").attr("xmlns", ns::TLS).build(),
        ))
        .await?;

    loop {
        match stream.framed.next().await {
            Some(Ok(Packet::Stanza(stanza))) if stanza.local_name() == "proceed" => break,
            Some(Ok(Packet::Stanza(stanza))) if stanza.local_name() == "failure" => {
                return Err(Error::TlsHandshakeFailed(
                    "server refused STARTTLS".to_owned(),
                ));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => return Err(Error::Disconnected),
        }
    }

    let socket = stream.framed.into_inner();
    let tls = transport::upgrade_tls(host, socket).await?;
    Ok(Box::new(tls))
}

/// Run the selected SASL mechanism to completion. On success the raw
/// transport is handed back for the mandatory stream restart.
pub(crate) async fn authenticate(
    mut stream: Negotiated,
    mechanism: &mut (dyn Mechanism + Send),
) -> Result<Connection, Error> {
    let auth = Stanza::builder("auth")
        .attr("xmlns", ns::SASL)
        .attr("mechanism", mechanism.name())
        .text(BASE64.encode(mechanism.initial()))
        .build();
    stream.framed.send(Packet::Stanza(auth)).await?;

    loop {
        match stream.framed.next().await {
            Some(Ok(Packet::Stanza(stanza))) => match stanza.local_name() {
                "challenge" => {
                    let data = decode_sasl_payload(&stanza)?;
                    let response = mechanism.response(&data).map_err(AuthError::from)?;
                    stream
                        .framed
                        .send(Packet::Stanza(
                            Stanza::builder("response")
                                .attr("xmlns", ns::SASL)
                                .text(BASE64.encode(response))
                                .build(),
                        ))
                        .await?;
                }
                "success" => {
                    let data = decode_sasl_payload(&stanza)?;
                    mechanism.success(&data).map_err(AuthError::from)?;
                    return Ok(stream.framed.into_inner());
                }
                "failure" => {
                    let condition = stanza
                        .children()
                        .next()
                        .map(|child| child.local_name().to_owned())
                        .unwrap_or_else(|| "failure".to_owned());
                    return Err(AuthError::Fail(condition).into());
                }
                _ => {}
            },
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => return Err(Error::Disconnected),
        }
    }
}

/// Bind the resource and establish the session; returns the bound JID.
pub(crate) async fn bind_session(
    stream: &mut Negotiated,
    jid: &Jid,
    resource: &str,
) -> Result<Jid, Error> {
    if !stream.has_bind() {
        // Nothing to bind against; the server will address us as-is.
        return jid.with_resource(resource).map_err(Error::from);
    }

    let bind = Stanza::builder("iq")
        .attr("type", "set")
        .attr("id", BIND_REQ_ID)
        .append(
            Stanza::builder("bind")
                .attr("xmlns", ns::BIND)
                .append(Stanza::builder("resource").text(resource).build())
                .build(),
        )
        .build();
    stream.framed.send(Packet::Stanza(bind)).await?;

    let bound = loop {
        match stream.framed.next().await {
            Some(Ok(Packet::Stanza(stanza)))
                if stanza.local_name() == "iq" && stanza.attr("id") == Some(BIND_REQ_ID) =>
            {
                if stanza.attr("type") != Some("result") {
                    return Err(ProtocolError::InvalidBindResponse.into());
                }
                let text = stanza
                    .get_child("bind")
                    .and_then(|bind| bind.get_child("jid"))
                    .map(|jid| jid.text())
                    .ok_or(ProtocolError::InvalidBindResponse)?;
                break text
                    .trim()
                    .parse::<Jid>()
                    .map_err(|_| Error::from(ProtocolError::InvalidBindResponse))?;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => return Err(Error::Disconnected),
        }
    };

    let session = Stanza::builder("iq")
        .attr("type", "set")
        .attr("id", SESSION_REQ_ID)
        .append(Stanza::builder("session").attr("xmlns", ns::SESSION).build())
        .build();
    stream.framed.send(Packet::Stanza(session)).await?;

    loop {
        match stream.framed.next().await {
            Some(Ok(Packet::Stanza(stanza)))
                if stanza.local_name() == "iq" && stanza.attr("id") == Some(SESSION_REQ_ID) =>
            {
                if stanza.attr("type") != Some("result") {
                    return Err(ProtocolError::SessionFailed.into());
                }
                return Ok(bound);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => return Err(Error::Disconnected),
        }
    }
}

/// SASL payloads are base64 text; RFC 6120 writes an empty payload as `=`.
fn decode_sasl_payload(stanza: &Stanza) -> Result<Vec<u8>, Error> {
    let text = stanza.text();
    let text = text.trim();
    if text.is_empty() || text == "=" {
        return Ok(Vec::new());
    }
    BASE64
        .decode(text)
        .map_err(|e| AuthError::Sasl(MechanismError::Base64(e)).into())
}
