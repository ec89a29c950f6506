//! MQTT client adapter.
//!
//! Implements [`MessageClientPort`] on top of a connected
//! [`SecureChannelPort`].  Inbound messages are queued by the transport and
//! only handed to subscription handlers from inside `yield_for`, on the
//! caller's thread.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::mqtt::client::EspMqttClient`.
//!   esp-mqtt owns its own TLS session to the broker (same endpoint, same
//!   CA chain); the pre-flight channel handed over at bind time is closed
//!   once the broker session is up.  esp-mqtt's auto-reconnect is turned
//!   off: a lost session is final and is reported from `yield_for`.
//! - **all other targets**: a loopback broker.  Publishes to topics that
//!   match a local subscription are echoed back on the next yield, which
//!   is what a real broker does for a client subscribed to its own topic.

use core::time::Duration;
use std::collections::VecDeque;

use log::{debug, info};
#[cfg(target_os = "espidf")]
use log::warn;

use crate::app::model::{Message, MessageHandler, QoS};
use crate::app::ports::{MessageClientPort, SecureChannelPort};
use crate::app::subscriptions::{Registration, SubscriptionError, SubscriptionTable};
use crate::app::topics;
use crate::config::SessionParams;
use crate::device_id::ClientIdString;
use crate::error::Status;

#[cfg(target_os = "espidf")]
use std::sync::mpsc;

#[cfg(target_os = "espidf")]
use esp_idf_svc::mqtt::client::{
    EspMqttClient, EventPayload, MqttClientConfiguration, MqttProtocolVersion, QoS as EspQoS,
};
#[cfg(target_os = "espidf")]
use esp_idf_svc::tls::X509;

#[cfg(target_os = "espidf")]
use crate::config::{Endpoint, ProtocolVersion};
#[cfg(target_os = "espidf")]
use crate::credentials::CaChain;

/// How long `connect` waits for CONNACK on the device.
#[cfg(target_os = "espidf")]
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ───────────────────────────────────────────────────────────────
// Session state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

/// An inbound message copied out of the transport's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Inbound {
    topic: String,
    payload: Vec<u8>,
    qos: QoS,
    retained: bool,
    duplicate: bool,
}

/// Transport events forwarded from the esp-mqtt task.
#[cfg(target_os = "espidf")]
enum TransportEvent {
    Connected,
    Disconnected,
    Message(Inbound),
}

// ───────────────────────────────────────────────────────────────
// MqttAdapter
// ───────────────────────────────────────────────────────────────

pub struct MqttAdapter<C: SecureChannelPort> {
    channel: C,
    state: SessionState,
    subscriptions: SubscriptionTable,
    client_id: ClientIdString,
    inbox: VecDeque<Inbound>,
    published: u32,
    delivered: u32,

    // ── ESP-IDF fields ──────────────────────────────────────────
    #[cfg(target_os = "espidf")]
    endpoint: Endpoint,
    #[cfg(target_os = "espidf")]
    ca: &'static CaChain,
    #[cfg(target_os = "espidf")]
    client: Option<EspMqttClient<'static>>,
    #[cfg(target_os = "espidf")]
    events: Option<mpsc::Receiver<TransportEvent>>,
}

impl<C: SecureChannelPort> MqttAdapter<C> {
    // ── Constructors (platform-specific) ──────────────────────

    /// Bind to `channel`.  esp-mqtt keeps a pointer to the CA buffer for
    /// reconnects, hence the `'static` chain.
    #[cfg(target_os = "espidf")]
    pub fn new(channel: C, endpoint: Endpoint, ca: &'static CaChain) -> Self {
        Self {
            channel,
            state: SessionState::Disconnected,
            subscriptions: SubscriptionTable::new(),
            client_id: ClientIdString::new(),
            inbox: VecDeque::new(),
            published: 0,
            delivered: 0,
            endpoint,
            ca,
            client: None,
            events: None,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            state: SessionState::Disconnected,
            subscriptions: SubscriptionTable::new(),
            client_id: ClientIdString::new(),
            inbox: VecDeque::new(),
            published: 0,
            delivered: 0,
        }
    }

    // ── Public API ────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Messages accepted by the transport.
    pub fn published(&self) -> u32 {
        self.published
    }

    /// Handler invocations made from `yield_for`.
    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    /// Queue a message as if the broker had sent it.
    #[cfg(not(target_os = "espidf"))]
    pub fn inject(&mut self, topic: &str, payload: &[u8]) {
        self.inbox.push_back(Inbound {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: QoS::AtMostOnce,
            retained: false,
            duplicate: false,
        });
    }

    fn dispatch_inbox(&mut self) {
        while let Some(msg) = self.inbox.pop_front() {
            let message = Message {
                topic: &msg.topic,
                payload: &msg.payload,
                qos: msg.qos,
                retained: msg.retained,
                duplicate: msg.duplicate,
            };
            let n = self.subscriptions.dispatch(&message);
            debug!("MQTT: '{}' ({} bytes) -> {} handler(s)", msg.topic, msg.payload.len(), n);
            self.delivered = self
                .delivered
                .saturating_add(u32::try_from(n).unwrap_or(u32::MAX));
        }
    }

    // ── Platform helpers: connect ─────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self, session: &SessionParams) -> Result<(), Status> {
        let url = format!("mqtts://{}:{}", self.endpoint.host, self.endpoint.port);
        let conf = MqttClientConfiguration {
            client_id: Some(&session.client_id),
            protocol_version: Some(match session.protocol_version {
                ProtocolVersion::V3_1 => MqttProtocolVersion::V3_1,
                ProtocolVersion::V3_1_1 => MqttProtocolVersion::V3_1_1,
            }),
            keep_alive_interval: Some(Duration::from_secs(u64::from(session.keep_alive_secs))),
            disable_clean_session: !session.clean_session,
            disable_auto_reconnect: true,
            server_certificate: Some(X509::pem_until_nul(self.ca.as_nul_terminated())),
            ..Default::default()
        };

        let (tx, rx) = mpsc::channel();
        let client = EspMqttClient::new_cb(&url, &conf, move |event| {
            let forwarded = match event.payload() {
                EventPayload::Connected(_) => Some(TransportEvent::Connected),
                EventPayload::Disconnected => Some(TransportEvent::Disconnected),
                EventPayload::Received {
                    topic: Some(topic),
                    data,
                    ..
                } => Some(TransportEvent::Message(Inbound {
                    topic: topic.to_string(),
                    payload: data.to_vec(),
                    qos: QoS::AtMostOnce,
                    retained: false,
                    duplicate: false,
                })),
                EventPayload::Error(e) => {
                    warn!("MQTT(espidf): transport error {:?}", e);
                    None
                }
                _ => None,
            };
            if let Some(ev) = forwarded {
                let _ = tx.send(ev);
            }
        })
        .map_err(|e| Status(e.code()))?;

        let deadline = std::time::Instant::now() + CONNECT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(TransportEvent::Connected) => break,
                Ok(TransportEvent::Disconnected) => return Err(Status::NO_CONNECTION),
                Ok(TransportEvent::Message(m)) => self.inbox.push_back(m),
                Err(_) => return Err(Status::CONNECTION_TIMEOUT),
            }
        }

        self.client = Some(client);
        self.events = Some(rx);
        if let Err(status) = self.channel.close() {
            debug!("MQTT(espidf): pre-flight channel close: {}", status);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self, session: &SessionParams) -> Result<(), Status> {
        if !self.channel.is_connected() {
            return Err(Status::NO_CONNECTION);
        }
        info!(
            "MQTT(sim): CONNACK for '{}' (level {})",
            session.client_id,
            session.protocol_version.level()
        );
        Ok(())
    }

    // ── Platform helpers: subscribe ───────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), Status> {
        let client = self.client.as_mut().ok_or(Status::NO_CONNECTION)?;
        client
            .subscribe(filter, esp_qos(qos))
            .map(|_| ())
            .map_err(|e| Status(e.code()))
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_subscribe(&mut self, _filter: &str, _qos: QoS) -> Result<(), Status> {
        Ok(())
    }

    // ── Platform helpers: publish ─────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_publish(&mut self, message: &Message<'_>) -> Result<(), Status> {
        let client = self.client.as_mut().ok_or(Status::NO_CONNECTION)?;
        client
            .publish(message.topic, esp_qos(message.qos), message.retained, message.payload)
            .map(|_| ())
            .map_err(|e| Status(e.code()))
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_publish(&mut self, message: &Message<'_>) -> Result<(), Status> {
        if !self.channel.is_connected() {
            return Err(Status::NO_CONNECTION);
        }
        if self.subscriptions.is_interested(message.topic) {
            self.inbox.push_back(Inbound {
                topic: message.topic.to_string(),
                payload: message.payload.to_vec(),
                qos: message.qos,
                retained: message.retained,
                duplicate: false,
            });
        }
        Ok(())
    }

    // ── Platform helpers: yield ───────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_pump(&mut self, budget: Duration) -> Result<(), Status> {
        let rx = self.events.take().ok_or(Status::NO_CONNECTION)?;
        let deadline = std::time::Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(TransportEvent::Message(m)) => self.inbox.push_back(m),
                Ok(TransportEvent::Connected) => {}
                Ok(TransportEvent::Disconnected) => {
                    warn!("MQTT(espidf): broker session lost");
                    return Err(Status::NO_CONNECTION);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(Status::NO_CONNECTION),
            }
            // Deliver as messages arrive so handlers see them promptly.
            self.dispatch_inbox();
        }
        // The receiver is only put back while the session is alive.
        self.events = Some(rx);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_pump(&mut self, _budget: Duration) -> Result<(), Status> {
        if self.channel.is_connected() {
            Ok(())
        } else {
            Err(Status::NO_CONNECTION)
        }
    }

    // ── Platform helpers: disconnect ──────────────────────────

    /// Tear the transport down.  Also used after a lost session so nothing
    /// underneath can bring it back without a fresh `connect`.
    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) {
        // Dropping the client stops the esp-mqtt task.
        self.client.take();
        self.events.take();
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self) {
        if let Err(status) = self.channel.close() {
            debug!("MQTT(sim): channel close: {}", status);
        }
    }
}

#[cfg(target_os = "espidf")]
fn esp_qos(qos: QoS) -> EspQoS {
    match qos {
        QoS::AtMostOnce => EspQoS::AtMostOnce,
        QoS::AtLeastOnce => EspQoS::AtLeastOnce,
        QoS::ExactlyOnce => EspQoS::ExactlyOnce,
    }
}

// ───────────────────────────────────────────────────────────────
// MessageClientPort implementation
// ───────────────────────────────────────────────────────────────

impl<C: SecureChannelPort> MessageClientPort for MqttAdapter<C> {
    fn connect(&mut self, session: &SessionParams) -> Result<(), Status> {
        if self.state == SessionState::Connected {
            return Err(Status::IS_CONNECTED);
        }
        if session.client_id.is_empty() {
            return Err(Status::PARAMETER);
        }
        self.platform_connect(session)?;
        self.client_id.clone_from(&session.client_id);
        self.state = SessionState::Connected;
        info!("MQTT: session open as '{}'", self.client_id);
        Ok(())
    }

    fn subscribe(&mut self, filter: &str, qos: QoS, handler: MessageHandler) -> Result<(), Status> {
        if self.state != SessionState::Connected {
            return Err(Status::NO_CONNECTION);
        }
        topics::validate_filter(filter).map_err(|_| Status::PARAMETER)?;
        self.platform_subscribe(filter, qos)?;
        match self.subscriptions.insert(filter, qos, handler) {
            Ok(Registration::Added) => Ok(()),
            Ok(Registration::Replaced) => {
                info!("MQTT: handler for '{}' replaced", filter);
                Ok(())
            }
            Err(SubscriptionError::TableFull) => Err(Status::NO_MEMORY),
            Err(SubscriptionError::InvalidFilter(_)) => Err(Status::PARAMETER),
        }
    }

    fn publish(&mut self, message: &Message<'_>) -> Result<(), Status> {
        if self.state != SessionState::Connected {
            return Err(Status::NO_CONNECTION);
        }
        topics::validate_topic_name(message.topic).map_err(|_| Status::PARAMETER)?;
        self.platform_publish(message)?;
        self.published = self.published.wrapping_add(1);
        debug!("MQTT: published {} bytes to '{}'", message.payload.len(), message.topic);
        Ok(())
    }

    fn yield_for(&mut self, budget: Duration) -> Result<(), Status> {
        if self.state != SessionState::Connected {
            return Err(Status::NO_CONNECTION);
        }
        // Anything queued before the pump (loopback echoes, messages that
        // raced CONNACK) goes out first.
        self.dispatch_inbox();
        if let Err(status) = self.platform_pump(budget) {
            self.platform_disconnect();
            self.state = SessionState::Disconnected;
            self.inbox.clear();
            return Err(status);
        }
        self.dispatch_inbox();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), Status> {
        if self.state != SessionState::Connected {
            return Err(Status::NO_CONNECTION);
        }
        self.platform_disconnect();
        self.state = SessionState::Disconnected;
        self.inbox.clear();
        info!("MQTT: session closed");
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Tests (host / loopback path only)
// ───────────────────────────────────────────────────────────────
