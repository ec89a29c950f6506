//! TLS client channel adapter.
//!
//! Implements [`SecureChannelPort`]: a single outbound TLS socket that
//! verifies the server against an installed root CA chain.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp-tls` (lwIP + mbedTLS) with the CA
//!   chain and server-name verification.
//! - **all other targets**: simulation using `std::net::TcpStream` in
//!   plaintext (no TLS) for host-side testing.  The CA chain is still
//!   required and validated so the ordering rules hold on both paths.
//!
//! ## Connection model
//!
//! 1. `set_root_ca_certificate()` validates and stores the PEM chain.
//! 2. `open()` allocates the socket once the link has an address.
//! 3. `connect()` performs TCP connect plus handshake.  A failed connect
//!    leaves the socket open so the caller may retry.
//! 4. `close()` tears the session down and returns to `Closed`.

use std::net::SocketAddr;
#[cfg(not(target_os = "espidf"))]
use std::io::{Read, Write};

use log::{info, warn};

use crate::app::model::LinkInfo;
use crate::app::ports::SecureChannelPort;
use crate::credentials::CaChain;
use crate::error::Status;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

/// Handshake and read timeout.
pub const DEFAULT_TIMEOUT_MS: u32 = 10_000;

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

/// TLS channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No socket allocated.
    Closed,
    /// Socket allocated on the link, not yet connected.
    Open,
    /// Handshake complete; application data may flow.
    Connected,
    /// The session broke mid-stream.
    Error,
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF platform helpers (esp-tls)
// ───────────────────────────────────────────────────────────────
#[cfg(target_os = "espidf")]
mod esp_impl;

// ───────────────────────────────────────────────────────────────
// TlsChannel
// ───────────────────────────────────────────────────────────────

pub struct TlsChannel {
    state: ChannelState,
    ca: Option<CaChain>,
    peer: Option<SocketAddr>,
    timeout_ms: u32,

    // ── ESP-IDF fields ──────────────────────────────────────────
    #[cfg(target_os = "espidf")]
    session: Option<esp_impl::EspTlsSession>,

    // ── Simulation fields ───────────────────────────────────────
    #[cfg(not(target_os = "espidf"))]
    stream: Option<std::net::TcpStream>,
}

impl TlsChannel {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT_MS)
    }

    pub fn with_timeout(timeout_ms: u32) -> Self {
        Self {
            state: ChannelState::Closed,
            ca: None,
            peer: None,
            timeout_ms,
            #[cfg(target_os = "espidf")]
            session: None,
            #[cfg(not(target_os = "espidf"))]
            stream: None,
        }
    }

    // ── Public API ────────────────────────────────────────────

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn ca_chain(&self) -> Option<&CaChain> {
        self.ca.as_ref()
    }

    // ── Platform helpers: connect ─────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self, peer: SocketAddr, server_name: &str, ca: &CaChain) -> Result<(), Status> {
        let session = esp_impl::esp_connect(peer, server_name, ca.as_nul_terminated(), self.timeout_ms)?;
        self.session = Some(session);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self, peer: SocketAddr, server_name: &str, _ca: &CaChain) -> Result<(), Status> {
        let timeout = std::time::Duration::from_millis(u64::from(self.timeout_ms));
        let stream = std::net::TcpStream::connect_timeout(&peer, timeout).map_err(|e| {
            warn!("TLS(sim): connect to {} ({}) failed: {}", server_name, peer, e);
            io_status(&e)
        })?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| io_status(&e))?;
        info!("TLS(sim): connected to {} ({}) in plaintext", server_name, peer);
        self.stream = Some(stream);
        Ok(())
    }

    // ── Platform helpers: close ───────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_close(&mut self) {
        if self.session.take().is_some() {
            info!("TLS(espidf): session closed");
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            info!("TLS(sim): session closed");
        }
    }

    // ── Platform helpers: read ────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_read(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        let session = self.session.as_mut().ok_or(Status::NO_CONNECTION)?;
        esp_impl::esp_read(session, buf)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_read(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        let stream = self.stream.as_mut().ok_or(Status::NO_CONNECTION)?;
        match stream.read(buf) {
            Ok(0) => {
                info!("TLS(sim): peer closed (EOF)");
                Err(Status::NO_CONNECTION)
            }
            Ok(n) => Ok(n),
            Err(e) => Err(io_status(&e)),
        }
    }

    // ── Platform helpers: write ───────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_write(&mut self, data: &[u8]) -> Result<usize, Status> {
        let session = self.session.as_mut().ok_or(Status::NO_CONNECTION)?;
        esp_impl::esp_write(session, data)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_write(&mut self, data: &[u8]) -> Result<usize, Status> {
        let stream = self.stream.as_mut().ok_or(Status::NO_CONNECTION)?;
        let n = stream.write(data).map_err(|e| io_status(&e))?;
        stream.flush().map_err(|e| io_status(&e))?;
        Ok(n)
    }

    /// Drop the session after an I/O error and remember it.
    fn broken(&mut self, status: Status) -> Status {
        warn!("TLS: session broken ({})", status);
        self.platform_close();
        self.state = ChannelState::Error;
        status
    }
}

impl Default for TlsChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
fn io_status(e: &std::io::Error) -> Status {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::WouldBlock => Status::WOULD_BLOCK,
        ErrorKind::TimedOut => Status::CONNECTION_TIMEOUT,
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => Status::NO_CONNECTION,
        ErrorKind::AddrNotAvailable => Status::NO_ADDRESS,
        _ => Status::DEVICE_ERROR,
    }
}

// ───────────────────────────────────────────────────────────────
// SecureChannelPort implementation
// ───────────────────────────────────────────────────────────────

impl SecureChannelPort for TlsChannel {
    fn set_root_ca_certificate(&mut self, pem: &[u8]) -> Result<(), Status> {
        if self.state == ChannelState::Connected {
            return Err(Status::IS_CONNECTED);
        }
        let chain = CaChain::from_pem(pem).map_err(|e| {
            warn!("TLS: rejecting CA chain ({})", e);
            Status::PARAMETER
        })?;
        info!("TLS: trusting {} CA certificate(s)", chain.certificate_count());
        self.ca = Some(chain);
        Ok(())
    }

    fn open(&mut self, link: &LinkInfo) -> Result<(), Status> {
        match self.state {
            ChannelState::Connected => return Err(Status::IS_CONNECTED),
            ChannelState::Open => return Ok(()),
            ChannelState::Closed | ChannelState::Error => {}
        }
        if link.ip.is_none() {
            return Err(Status::NO_ADDRESS);
        }
        self.state = ChannelState::Open;
        Ok(())
    }

    fn connect(&mut self, peer: SocketAddr, server_name: &str) -> Result<(), Status> {
        match self.state {
            ChannelState::Open => {}
            ChannelState::Connected => return Err(Status::IS_CONNECTED),
            ChannelState::Closed | ChannelState::Error => return Err(Status::NO_SOCKET),
        }
        let Some(ca) = self.ca.take() else {
            warn!("TLS: connect refused, no CA chain installed");
            return Err(Status::PARAMETER);
        };
        let outcome = self.platform_connect(peer, server_name, &ca);
        self.ca = Some(ca);
        outcome?;

        self.peer = Some(peer);
        self.state = ChannelState::Connected;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, Status> {
        if self.state != ChannelState::Connected {
            return Err(Status::NO_CONNECTION);
        }
        self.platform_write(data).map_err(|s| self.broken(s))
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        if self.state != ChannelState::Connected {
            return Err(Status::NO_CONNECTION);
        }
        match self.platform_read(buf) {
            Ok(n) => Ok(n),
            // A quiet peer is not a broken session.
            Err(s) if s == Status::WOULD_BLOCK || s == Status::CONNECTION_TIMEOUT => Err(s),
            Err(s) => Err(self.broken(s)),
        }
    }

    fn close(&mut self) -> Result<(), Status> {
        if self.state == ChannelState::Closed {
            return Err(Status::NO_SOCKET);
        }
        self.platform_close();
        self.state = ChannelState::Closed;
        self.peer = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }
}

// ───────────────────────────────────────────────────────────────
// Tests (host / simulation path only)
// ───────────────────────────────────────────────────────────────
