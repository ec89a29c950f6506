//! Outbound bootstrap events.
//!
//! The [`Sequencer`](super::service::Sequencer) and
//! [`Session`](super::service::Session) emit these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, record in tests, and so on.

use std::net::SocketAddr;

use super::model::{AccessPointRecord, LinkInfo};
use crate::error::{BootstrapError, Status};
use crate::fsm::StateId;

/// Structured events emitted by the bootstrap core.
#[derive(Debug, Clone)]
pub enum BootstrapEvent {
    /// A scan finished.  `visible` is what the driver first reported,
    /// `reported` is how many records were actually received.
    ScanCompleted { visible: usize, reported: usize },

    /// One scanned access point, in driver order.
    AccessPoint(AccessPointRecord),

    /// The scan call itself failed (non-fatal).
    ScanFailed(Status),

    /// Association finished; addressing details follow.
    LinkUp(LinkInfo),

    /// The CA chain was accepted by the secure channel.
    CertificateInstalled { certificates: usize, bytes: usize },

    /// The first channel connect failed and is being retried.
    ChannelRetry(Status),

    /// The secure channel completed its handshake.
    ChannelEstablished(SocketAddr),

    /// A request/response exchange completed on the raw channel.
    ProbeExchanged { sent: usize, received: usize },

    /// The broker session is up.
    BrokerConnected,

    /// A subscription was registered.
    Subscribed,

    /// The state machine moved between states.
    StateChanged { from: StateId, to: StateId },

    /// One steady-state message was accepted by the client.
    Published { sequence: u32 },

    /// One steady-state publish failed; the loop continues.
    PublishFailed { sequence: u32, status: Status },

    /// A fatal failure; the sequencer is now in `Failed`.
    Failed(BootstrapError),
}
