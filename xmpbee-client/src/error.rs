// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::fmt;
use std::error::Error as StdError;
use std::io::Error as IoError;

use xmpbee_sasl::MechanismError;

use crate::jid::JidError;

/// Top-level error type.
#[derive(Debug)]
pub enum Error {
    /// I/O error.
    Io(IoError),
    /// Error validating a Jabber-Id.
    Jid(JidError),
    /// Protocol-level error.
    Protocol(ProtocolError),
    /// Authentication error.
    Auth(AuthError),
    /// TCP or TLS setup failed.
    ConnectionFailed(String),
    /// The TLS handshake failed.
    TlsHandshakeFailed(String),
    /// Connection closed.
    Disconnected,
    /// Operation on a connection that is not established.
    NotConnected,
    /// Nothing moved on the transport for too long.
    IdleTimeout,
    /// The peer did not answer a keepalive ping in time.
    PingTimeout,
    /// Should never happen.
    InvalidState,
}

impl Error {
    /// Whether this failure requires user action. Permanent errors are
    /// surfaced instead of feeding the automatic reconnect schedule.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Jid(_) | Error::Auth(_) | Error::Protocol(ProtocolError::TlsRequired)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(fmt, "IO error: {}", e),
            Error::Jid(e) => write!(fmt, "JID error: {}", e),
            Error::Protocol(e) => write!(fmt, "protocol error: {}", e),
            Error::Auth(e) => write!(fmt, "authentication error: {}", e),
            Error::ConnectionFailed(detail) => write!(fmt, "connection failed: {}", detail),
            Error::TlsHandshakeFailed(detail) => write!(fmt, "TLS handshake failed: {}", detail),
            Error::Disconnected => write!(fmt, "disconnected"),
            Error::NotConnected => write!(fmt, "not connected"),
            Error::IdleTimeout => write!(fmt, "connection idle for too long"),
            Error::PingTimeout => write!(fmt, "no answer to keepalive ping"),
            Error::InvalidState => write!(fmt, "invalid state"),
        }
    }
}

impl StdError for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<JidError> for Error {
    fn from(e: JidError) -> Self {
        Error::Jid(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

/// XMPP protocol-level error.
#[derive(Debug)]
pub enum ProtocolError {
    /// The server offers no STARTTLS although the account requires TLS.
    TlsRequired,
    /// Unrecoverable parse error before the stream ever opened.
    FatalParse(xmpbee_xml::Error),
    /// The stream broke beyond in-place recovery, or the peer sent a
    /// `<stream:error>`.
    Stream(String),
    /// Invalid response to resource binding.
    InvalidBindResponse,
    /// Session establishment was refused.
    SessionFailed,
    /// Unexpected `<stream:stream>` restart.
    InvalidStreamStart,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::TlsRequired => write!(fmt, "server does not offer STARTTLS"),
            ProtocolError::FatalParse(e) => write!(fmt, "stream parse error: {}", e),
            ProtocolError::Stream(detail) => write!(fmt, "stream error: {}", detail),
            ProtocolError::InvalidBindResponse => {
                write!(fmt, "invalid response to resource binding")
            }
            ProtocolError::SessionFailed => write!(fmt, "session establishment refused"),
            ProtocolError::InvalidStreamStart => write!(fmt, "unexpected <stream:stream>"),
        }
    }
}

impl StdError for ProtocolError {}

impl From<xmpbee_xml::Error> for ProtocolError {
    fn from(e: xmpbee_xml::Error) -> Self {
        ProtocolError::FatalParse(e)
    }
}

/// Authentication error.
#[derive(Debug)]
pub enum AuthError {
    /// Only PLAIN is on offer and the stream is not TLS-protected; the
    /// password is never sent in the clear.
    RequiresTls,
    /// No supported SASL mechanism among those offered.
    NoMechanism(Vec<String>),
    /// Local SASL mechanism error (includes SCRAM verification failures).
    Sasl(MechanismError),
    /// Failure reported by the server.
    Fail(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::RequiresTls => {
                write!(fmt, "authentication requires an encrypted stream")
            }
            AuthError::NoMechanism(offered) => write!(
                fmt,
                "no supported SASL mechanism, server offered: {}",
                offered.join(", ")
            ),
            AuthError::Sasl(e) => write!(fmt, "SASL error: {}", e),
            AuthError::Fail(condition) => write!(fmt, "failure from the server: {}", condition),
        }
    }
}

impl StdError for AuthError {}

impl From<MechanismError> for AuthError {
    fn from(e: MechanismError) -> Self {
        AuthError::Sasl(e)
    }
}
