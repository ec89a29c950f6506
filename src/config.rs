//! Bootstrap configuration parameters
//!
//! Every literal the sequencer needs (endpoints, topics, intervals, policy
//! flags) lives here.  Values come from defaults, a provisioning JSON
//! document, or the persisted NVS blob, and are validated once at startup.

use serde::{Deserialize, Serialize};

use crate::app::model::QoS;
use crate::app::ports::ConfigError;
use crate::app::topics;

/// Default cap on scan records processed per discovery.
pub const DEFAULT_SCAN_CAP: u8 = 15;

/// Default steady-state publish/yield interval.
pub const DEFAULT_PUBLISH_INTERVAL_MS: u32 = 2000;

pub const MAX_HOST_LEN: usize = 64;
pub const MAX_TOPIC_LEN: usize = 64;
pub const MAX_CLIENT_ID_LEN: usize = 23;
pub const MAX_PAYLOAD_LEN: usize = 128;

/// Server or broker address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: heapless::String<MAX_HOST_LEN>,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Result<Self, ConfigError> {
        let mut h = heapless::String::new();
        h.push_str(host)
            .map_err(|()| ConfigError::ValidationFailed("endpoint host longer than 64 bytes"))?;
        Ok(Self { host: h, port })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::ValidationFailed("endpoint host must not be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationFailed("endpoint port must be non-zero"));
        }
        Ok(())
    }
}

/// MQTT protocol level sent in CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// MQTT 3.1 (protocol level 3).
    V3_1,
    /// MQTT 3.1.1 (protocol level 4).
    #[default]
    V3_1_1,
}

impl ProtocolVersion {
    pub fn level(self) -> u8 {
        match self {
            Self::V3_1 => 3,
            Self::V3_1_1 => 4,
        }
    }
}

/// Broker session parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Empty means "derive from the station MAC".
    pub client_id: heapless::String<MAX_CLIENT_ID_LEN>,
    pub protocol_version: ProtocolVersion,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub filter: heapless::String<MAX_TOPIC_LEN>,
    pub qos: QoS,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    pub topic: heapless::String<MAX_TOPIC_LEN>,
    pub qos: QoS,
    pub retained: bool,
    /// Body text; the cycle sequence number is appended on each publish.
    pub payload: heapless::String<MAX_PAYLOAD_LEN>,
}

/// Core bootstrap configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    // --- Discovery ---
    /// Run an AP scan before associating
    pub scan_enabled: bool,
    /// Maximum scan records requested from the driver
    pub scan_cap: u8,
    /// Treat an empty scan as a link failure
    pub fail_on_empty_scan: bool,

    // --- Secure channel ---
    /// MQTT broker; the secure channel handed to the client connects here
    pub broker: Endpoint,
    /// HTTPS server for the optional request/response check, reached on a
    /// channel of its own.  `None` skips the check.
    pub https_check: Option<Endpoint>,
    /// Retry a failed channel connect exactly once
    pub retry_channel_connect: bool,

    // --- Message exchange ---
    pub session: SessionParams,
    pub subscription: SubscriptionConfig,
    pub publish: PublishConfig,
    /// Steady-state cycle interval (milliseconds)
    pub publish_interval_ms: u32,
}

fn hstr<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    // Defaults below are all shorter than their capacities.
    let _ = out.push_str(s);
    out
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            // Discovery
            scan_enabled: true,
            scan_cap: DEFAULT_SCAN_CAP,
            fail_on_empty_scan: false,

            // Secure channel
            broker: Endpoint {
                host: hstr("test.mosquitto.org"),
                port: 8883,
            },
            https_check: Some(Endpoint {
                host: hstr("os.mbed.com"),
                port: 443,
            }),
            retry_channel_connect: true,

            // Message exchange
            session: SessionParams {
                client_id: heapless::String::new(),
                protocol_version: ProtocolVersion::V3_1_1,
                keep_alive_secs: 60,
                clean_session: true,
            },
            subscription: SubscriptionConfig {
                filter: hstr("iot/test"),
                qos: QoS::AtMostOnce,
            },
            publish: PublishConfig {
                topic: hstr("iot/test"),
                qos: QoS::AtMostOnce,
                retained: false,
                payload: hstr("hello from securelink"),
            },
            publish_interval_ms: DEFAULT_PUBLISH_INTERVAL_MS, // 0.5 Hz
        }
    }
}

impl BootstrapConfig {
    /// Parse a provisioning document.  The result is validated.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=64).contains(&self.scan_cap) {
            return Err(ConfigError::ValidationFailed("scan_cap must be 1–64"));
        }
        self.broker.validate()?;
        if let Some(check) = &self.https_check {
            check.validate()?;
        }
        if self.session.keep_alive_secs == 0 {
            return Err(ConfigError::ValidationFailed("keep_alive_secs must be non-zero"));
        }
        if !self.session.client_id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
            return Err(ConfigError::ValidationFailed(
                "client_id must be ASCII alphanumeric, '-' or '_'",
            ));
        }
        topics::validate_filter(&self.subscription.filter)
            .map_err(|_| ConfigError::ValidationFailed("subscription filter is not a valid topic filter"))?;
        topics::validate_topic_name(&self.publish.topic)
            .map_err(|_| ConfigError::ValidationFailed("publish topic is not a valid topic name"))?;
        if !(100..=600_000).contains(&self.publish_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "publish_interval_ms must be 100–600000",
            ));
        }
        Ok(())
    }
}
