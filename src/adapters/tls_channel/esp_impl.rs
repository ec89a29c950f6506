//! ESP-IDF platform helpers for `TlsChannel`.
//!
//! Compiled only for `target_os = "espidf"`.  Wraps `esp-tls`, which owns
//! the lwIP socket and the mbedTLS session, and verifies the server against
//! the installed CA chain with the given common name.

use std::net::SocketAddr;

use log::{info, warn};

use esp_idf_svc::sys::EspError;
use esp_idf_svc::tls::{Config, EspTls, InternalSocket, X509};

use crate::error::Status;

/// Live TLS session.  Dropping it sends close-notify and frees the socket.
pub(super) struct EspTlsSession {
    tls: EspTls<InternalSocket>,
}

fn esp_status(e: EspError) -> Status {
    Status(e.code())
}

/// TCP connect plus handshake against `peer`, verifying `server_name`.
///
/// `ca` must be the PEM chain followed by a single NUL byte.
pub(super) fn esp_connect(
    peer: SocketAddr,
    server_name: &str,
    ca: &[u8],
    timeout_ms: u32,
) -> Result<EspTlsSession, Status> {
    let mut tls = EspTls::new().map_err(esp_status)?;
    let host = peer.ip().to_string();
    let cfg = Config {
        ca_cert: Some(X509::pem_until_nul(ca)),
        common_name: Some(server_name),
        timeout_ms,
        ..Config::new()
    };
    match tls.connect(&host, peer.port(), &cfg) {
        Ok(()) => {
            info!("TLS(espidf): handshake complete with {} ({})", server_name, peer);
            Ok(EspTlsSession { tls })
        }
        Err(e) => {
            warn!("TLS(espidf): handshake with {} failed ({})", peer, e);
            Err(esp_status(e))
        }
    }
}

pub(super) fn esp_write(session: &mut EspTlsSession, data: &[u8]) -> Result<usize, Status> {
    session.tls.write(data).map_err(esp_status)
}

pub(super) fn esp_read(session: &mut EspTlsSession, buf: &mut [u8]) -> Result<usize, Status> {
    match session.tls.read(buf) {
        Ok(0) => Err(Status::NO_CONNECTION),
        Ok(n) => Ok(n),
        Err(e) => Err(esp_status(e)),
    }
}
