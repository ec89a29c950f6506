//! Port traits: the hexagonal boundary between the bootstrap logic and the
//! network stack.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Sequencer (domain)
//! ```
//!
//! The link driver, TLS socket and message client are external
//! collaborators.  The [`Sequencer`](super::service::Sequencer) consumes them
//! through these traits via generics, so the sequencing logic never touches
//! a driver directly and can be exercised entirely with mocks.
//!
//! ## Status codes
//!
//! Every fallible collaborator call returns the collaborator's own status
//! code as a [`Status`].  The sequencer wraps it in the matching
//! [`BootstrapError`](crate::error::BootstrapError) kind; ports never
//! interpret each other's codes.

use core::time::Duration;
use std::net::{IpAddr, SocketAddr};

use super::model::{AccessPointRecord, LinkInfo, MacAddress, Message, MessageHandler, QoS, SecurityMode};
use crate::config::{BootstrapConfig, SessionParams};
use crate::error::Status;

// ───────────────────────────────────────────────────────────────
// Network link provider (WiFi station)
// ───────────────────────────────────────────────────────────────

/// Association, addressing and scan queries for the WiFi interface.
pub trait LinkPort {
    /// Scan for access points.
    ///
    /// With an empty `records` slice only the number of visible APs is
    /// returned.  Otherwise up to `records.len()` entries are written in
    /// driver order and the number written is returned.
    fn scan(&mut self, records: &mut [AccessPointRecord]) -> Result<usize, Status>;

    /// Associate and bring up the IP interface.
    fn connect(&mut self, ssid: &str, passphrase: &str, security: SecurityMode) -> Result<(), Status>;

    fn disconnect(&mut self) -> Result<(), Status>;

    fn mac_address(&self) -> MacAddress;

    fn ip_address(&self) -> Option<IpAddr>;

    fn netmask(&self) -> Option<IpAddr>;

    fn gateway(&self) -> Option<IpAddr>;

    /// Signal strength of the associated AP in dBm.
    fn rssi(&self) -> Option<i8>;

    /// Resolve a hostname through the link's DNS configuration.
    fn resolve(&mut self, host: &str) -> Result<IpAddr, Status>;
}

// ───────────────────────────────────────────────────────────────
// Secure channel (TLS socket)
// ───────────────────────────────────────────────────────────────

/// A client-side TLS socket.
///
/// A root CA chain must be installed before [`connect`](Self::connect);
/// implementations reject a connect without one.
pub trait SecureChannelPort {
    /// Install the trusted CA chain (concatenated PEM).
    fn set_root_ca_certificate(&mut self, pem: &[u8]) -> Result<(), Status>;

    /// Allocate the socket on the associated link.
    fn open(&mut self, link: &LinkInfo) -> Result<(), Status>;

    /// TCP connect plus TLS handshake.  `server_name` is used for SNI and
    /// certificate hostname verification.
    fn connect(&mut self, peer: SocketAddr, server_name: &str) -> Result<(), Status>;

    fn send(&mut self, data: &[u8]) -> Result<usize, Status>;

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Status>;

    fn close(&mut self) -> Result<(), Status>;

    fn is_connected(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Message exchange client (MQTT)
// ───────────────────────────────────────────────────────────────

/// Publish/subscribe client bound to a connected secure channel.
///
/// Inbound messages are delivered only from inside
/// [`yield_for`](Self::yield_for), on the caller's thread.
pub trait MessageClientPort {
    /// Broker session handshake.
    fn connect(&mut self, session: &SessionParams) -> Result<(), Status>;

    /// Register `handler` for `filter`.  Re-subscribing an existing filter
    /// replaces its handler.
    fn subscribe(&mut self, filter: &str, qos: QoS, handler: MessageHandler) -> Result<(), Status>;

    /// Blocks until the transport has accepted the write.
    fn publish(&mut self, message: &Message<'_>) -> Result<(), Status>;

    /// Service keep-alive and inbound traffic for at most `budget`.
    fn yield_for(&mut self, budget: Duration) -> Result<(), Status>;

    /// Graceful session teardown.
    fn disconnect(&mut self) -> Result<(), Status>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The sequencer emits structured
/// [`BootstrapEvent`](super::events::BootstrapEvent)s through this port.
/// Adapters decide where they go (serial log, test recorder, etc.).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::BootstrapEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the bootstrap configuration.
///
/// Implementations MUST validate before persisting.  Invalid values are
/// rejected with [`ConfigError::ValidationFailed`], never clamped.
pub trait ConfigPort {
    /// Returns [`BootstrapConfig::default()`] if nothing is stored.
    fn load(&self) -> Result<BootstrapConfig, ConfigError>;

    fn save(&self, config: &BootstrapConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations and config validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}
