// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! TCP and TLS plumbing underneath the protocol client.
//!
//! Accounts carry an explicit host and port, so connecting is a plain
//! resolve-and-dial; TLS is either wrapped around the socket immediately
//! (direct TLS) or negotiated in place after the server's `<proceed/>`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::Error;

/// Byte streams the client can run over.
pub trait AsyncReadAndWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadAndWrite for T {}

/// An established transport, plaintext or TLS.
pub type Connection = Box<dyn AsyncReadAndWrite>;

/// TCP connect timeout. The OS default can run into minutes on some
/// platforms for unreachable hosts, which leaves the user with no feedback.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// How often the idle watchdog looks at the activity clock.
pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// A connection with no traffic in either direction for this long is
/// considered dead. The application-level ping usually trips first; this
/// is the transport backstop.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Open a TCP connection to `host:port`.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream, Error> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::ConnectionFailed(format!("{}:{} timed out", host, port)))?
        .map_err(|e| Error::ConnectionFailed(format!("{}:{}: {}", host, port, e)))?;
    Ok(stream)
}

/// Wrap an established stream in TLS, verifying the certificate against
/// `host` (which is also the SNI name).
pub async fn upgrade_tls<S: AsyncReadAndWrite>(
    host: &str,
    stream: S,
) -> Result<TlsStream<S>, Error> {
    let connector = tls_connector()?;
    let server_name = ServerName::try_from(host.to_owned())
        .map_err(|e| Error::TlsHandshakeFailed(format!("invalid server name {}: {}", host, e)))?;
    connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::TlsHandshakeFailed(format!("{}: {}", host, e)))
}

/// A TLS connector trusting the system's native root certificates.
fn tls_connector() -> Result<TlsConnector, Error> {
    let mut root_store = RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    for cert in native_certs.certs {
        root_store
            .add(cert)
            .map_err(|e| Error::TlsHandshakeFailed(format!("bad root certificate: {}", e)))?;
    }
    if root_store.is_empty() {
        return Err(Error::TlsHandshakeFailed(
            "no usable system root certificates".to_owned(),
        ));
    }
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}
