//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured bootstrap events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).

use log::{error, info, warn};

use crate::app::events::BootstrapEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`BootstrapEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink {
    emitted: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &BootstrapEvent) {
        self.emitted = self.emitted.wrapping_add(1);
        match event {
            BootstrapEvent::ScanCompleted { visible, reported } => {
                info!("SCAN  | {} visible, {} listed", visible, reported);
            }
            BootstrapEvent::AccessPoint(ap) => {
                info!("SCAN  | {}", ap);
            }
            BootstrapEvent::ScanFailed(status) => {
                warn!("SCAN  | failed ({})", status);
            }
            BootstrapEvent::LinkUp(link) => {
                info!("LINK  | {}", link);
            }
            BootstrapEvent::CertificateInstalled {
                certificates,
                bytes,
            } => {
                info!("TLS   | CA installed, {} cert(s), {}B", certificates, bytes);
            }
            BootstrapEvent::ChannelRetry(status) => {
                warn!("TLS   | connect failed ({}), retrying", status);
            }
            BootstrapEvent::ChannelEstablished(peer) => {
                info!("TLS   | established with {}", peer);
            }
            BootstrapEvent::ProbeExchanged { sent, received } => {
                info!("TLS   | HTTPS check sent={}B received={}B", sent, received);
            }
            BootstrapEvent::BrokerConnected => {
                info!("MQTT  | broker session up");
            }
            BootstrapEvent::Subscribed => {
                info!("MQTT  | subscribed");
            }
            BootstrapEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            BootstrapEvent::Published { sequence } => {
                info!("PUB   | #{} ok", sequence);
            }
            BootstrapEvent::PublishFailed { sequence, status } => {
                warn!("PUB   | #{} failed ({})", sequence, status);
            }
            BootstrapEvent::Failed(err) => {
                error!("FAIL  | {}", err);
            }
        }
    }
}
