//! Device identity derived from the ESP32 factory MAC address.
//!
//! Produces a stable MQTT client identifier in the form `SL-XXYYZZ`
//! (last 3 bytes of the 6-byte MAC in uppercase hex).  It is used whenever
//! the configured session leaves `client_id` empty, and it always fits the
//! 23-byte limit that MQTT 3.1 brokers enforce.

use crate::app::model::MacAddress;
use crate::config::MAX_CLIENT_ID_LEN;

/// Client identifier string: "SL-XXYYZZ".
pub type ClientIdString = heapless::String<MAX_CLIENT_ID_LEN>;

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: the eFuse read writes exactly six bytes into `mac`.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Derive the client identifier from the last 3 MAC bytes.
/// Format: `SL-XXYYZZ` (e.g., `SL-EFCAFE`).
pub fn client_id(mac: &MacAddress) -> ClientIdString {
    let mut id = ClientIdString::new();
    use core::fmt::Write;
    let _ = write!(id, "SL-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}
