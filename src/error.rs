//! Error taxonomy for the connectivity bootstrap.
//!
//! Every externally-caused failure carries the raw status code reported by
//! the collaborator that produced it (link driver, TLS socket, message
//! client).  Variants are `Copy` so they can be stored in the state machine
//! as the `Failed` reason and re-emitted through the event sink without
//! allocation.

use core::fmt;

use crate::fsm::StateId;

// ---------------------------------------------------------------------------
// Raw status code
// ---------------------------------------------------------------------------

/// Status code returned by a link, channel or client operation.
///
/// Zero means success in the collaborators' native APIs, so a `Status`
/// wrapped in an `Err` is always non-zero.  The associated constants mirror
/// the network socket codes used by the simulation adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const WOULD_BLOCK: Self = Self(-3001);
    pub const PARAMETER: Self = Self(-3003);
    pub const NO_CONNECTION: Self = Self(-3004);
    pub const NO_SOCKET: Self = Self(-3005);
    pub const NO_ADDRESS: Self = Self(-3006);
    pub const NO_MEMORY: Self = Self(-3007);
    pub const NO_SSID: Self = Self(-3008);
    pub const DNS_FAILURE: Self = Self(-3009);
    pub const DEVICE_ERROR: Self = Self(-3012);
    pub const AUTH_FAILURE: Self = Self(-3013);
    pub const IS_CONNECTED: Self = Self(-3015);
    pub const CONNECTION_TIMEOUT: Self = Self(-3017);

    pub fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Bootstrap error
// ---------------------------------------------------------------------------

/// Every failure the bootstrap sequencer can surface.
///
/// Only [`BootstrapError::PublishFailure`] is non-fatal; every other kind
/// moves the sequencer to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapError {
    /// Association with the access point failed.
    LinkFailure(Status),
    /// The endpoint hostname could not be resolved.
    ResolutionFailure(Status),
    /// The CA chain was rejected by the secure channel.
    CertificateFailure(Status),
    /// The secure channel socket could not be opened on the link.
    ChannelOpenFailure(Status),
    /// The TLS connect failed on both the first attempt and the retry.
    ChannelConnectFailure(Status),
    /// The broker refused or dropped the session handshake.
    BrokerConnectFailure(Status),
    /// The broker rejected the subscription.
    SubscribeFailure(Status),
    /// A single publish failed.  The steady-state loop keeps running.
    PublishFailure(Status),
    /// Servicing the client during a yield reported a dead session.
    ConnectionLost(Status),
    /// Raw send or receive on the secure channel failed.
    ChannelIoFailure {
        operation: &'static str,
        status: Status,
    },
    /// Configuration or credentials rejected at startup.
    Config(&'static str),
    /// A step was invoked before its predecessor completed.
    OutOfSequence { expected: StateId, actual: StateId },
}

impl BootstrapError {
    /// Name of the collaborator operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::LinkFailure(_) => "link.connect",
            Self::ResolutionFailure(_) => "link.resolve",
            Self::CertificateFailure(_) => "channel.set_root_ca_certificate",
            Self::ChannelOpenFailure(_) => "channel.open",
            Self::ChannelConnectFailure(_) => "channel.connect",
            Self::BrokerConnectFailure(_) => "client.connect",
            Self::SubscribeFailure(_) => "client.subscribe",
            Self::PublishFailure(_) => "client.publish",
            Self::ConnectionLost(_) => "client.yield",
            Self::ChannelIoFailure { operation, .. } => operation,
            Self::Config(_) => "config.validate",
            Self::OutOfSequence { .. } => "sequencer",
        }
    }

    /// The collaborator's status code, if the failure came from one.
    pub fn status(&self) -> Option<Status> {
        match *self {
            Self::LinkFailure(s)
            | Self::ResolutionFailure(s)
            | Self::CertificateFailure(s)
            | Self::ChannelOpenFailure(s)
            | Self::ChannelConnectFailure(s)
            | Self::BrokerConnectFailure(s)
            | Self::SubscribeFailure(s)
            | Self::PublishFailure(s)
            | Self::ConnectionLost(s)
            | Self::ChannelIoFailure { status: s, .. } => Some(s),
            Self::Config(_) | Self::OutOfSequence { .. } => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PublishFailure(_))
    }
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::OutOfSequence { expected, actual } => {
                write!(f, "out of sequence: expected {expected:?}, in {actual:?}")
            }
            other => match other.status() {
                Some(status) => write!(f, "{} failed: {}", other.operation(), status),
                None => write!(f, "{} failed", other.operation()),
            },
        }
    }
}

impl std::error::Error for BootstrapError {}

impl From<crate::app::ports::ConfigError> for BootstrapError {
    fn from(e: crate::app::ports::ConfigError) -> Self {
        match e {
            crate::app::ports::ConfigError::ValidationFailed(msg) => Self::Config(msg),
            _ => Self::Config("config unavailable"),
        }
    }
}

/// Convenience alias used throughout the sequencer.
pub type Result<T> = core::result::Result<T, BootstrapError>;
