//! Domain value types shared by the ports, the sequencer and the adapters.

use core::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Six-byte hardware address (station MAC or AP BSSID).
pub type MacAddress = [u8; 6];

/// Maximum SSID length defined by 802.11.
pub const MAX_SSID_LEN: usize = 32;

// ───────────────────────────────────────────────────────────────
// Security mode
// ───────────────────────────────────────────────────────────────

/// WiFi security mode advertised by an AP or requested on association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SecurityMode {
    None,
    Wep,
    Wpa,
    Wpa2,
    #[default]
    WpaWpa2,
    Unknown,
}

impl SecurityMode {
    /// Whether association requires a passphrase.
    pub fn is_open(self) -> bool {
        self == Self::None
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Wep => "WEP",
            Self::Wpa => "WPA",
            Self::Wpa2 => "WPA2",
            Self::WpaWpa2 => "WPA/WPA2",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

// ───────────────────────────────────────────────────────────────
// Access point record
// ───────────────────────────────────────────────────────────────

/// One entry of a scan result, in the order the driver reported it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessPointRecord {
    pub ssid: heapless::String<MAX_SSID_LEN>,
    pub bssid: MacAddress,
    pub security: SecurityMode,
    pub rssi: i8,
    pub channel: u8,
}

impl fmt::Display for AccessPointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Network: {} secured: {} BSSID: {} RSSI: {} Ch: {}",
            self.ssid,
            self.security,
            HexMac(&self.bssid),
            self.rssi,
            self.channel
        )
    }
}

/// Colon-separated upper-case hex rendering of a MAC/BSSID.
pub struct HexMac<'a>(pub &'a MacAddress);

impl fmt::Display for HexMac<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

// ───────────────────────────────────────────────────────────────
// Link report
// ───────────────────────────────────────────────────────────────

/// Addressing and signal details of an associated link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkInfo {
    pub mac: MacAddress,
    pub ip: Option<IpAddr>,
    pub netmask: Option<IpAddr>,
    pub gateway: Option<IpAddr>,
    pub rssi: Option<i8>,
}

impl fmt::Display for LinkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: Option<T>) -> String {
            v.map_or_else(|| "none".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "MAC: {} IP: {} Netmask: {} Gateway: {} RSSI: {}",
            HexMac(&self.mac),
            opt(self.ip),
            opt(self.netmask),
            opt(self.gateway),
            opt(self.rssi)
        )
    }
}

// ───────────────────────────────────────────────────────────────
// Messages
// ───────────────────────────────────────────────────────────────

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// A message on its way to or from the broker.
///
/// Inbound messages are lent to handlers for one callback invocation only;
/// the topic and payload borrow from the client's receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'m> {
    pub topic: &'m str,
    pub payload: &'m [u8],
    pub qos: QoS,
    pub retained: bool,
    pub duplicate: bool,
}

impl<'m> Message<'m> {
    pub fn new(topic: &'m str, payload: &'m [u8], qos: QoS) -> Self {
        Self {
            topic,
            payload,
            qos,
            retained: false,
            duplicate: false,
        }
    }
}

/// Callback invoked for inbound messages matching a subscription.
///
/// Runs synchronously inside the client's `yield_for` and must not block.
pub type MessageHandler = Box<dyn FnMut(&Message<'_>)>;
