//! WiFi station-mode adapter.
//!
//! Implements [`LinkPort`], the hexagonal boundary for the network link:
//! scan, associate, address queries, RSSI and DNS resolution.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-IDF WiFi driver calls via
//!   `esp_idf_svc::wifi::BlockingWifi`.
//! - **all other targets**: a simulated radio with a configurable table of
//!   access points and fixed DHCP addressing, for host-side tests.

use std::net::IpAddr;
#[cfg(not(target_os = "espidf"))]
use std::net::{Ipv4Addr, ToSocketAddrs};

use log::{info, warn};

use crate::app::model::{AccessPointRecord, MacAddress, SecurityMode};
use crate::app::ports::LinkPort;
use crate::credentials::{validate_passphrase, validate_ssid};
use crate::error::Status;

#[cfg(target_os = "espidf")]
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::modem::Modem,
    nvs::EspDefaultNvsPartition,
    sys::EspError,
    wifi::{AccessPointInfo, AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

// ───────────────────────────────────────────────────────────────
// Simulated access points
// ───────────────────────────────────────────────────────────────

/// An access point visible to the simulated radio.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone)]
pub struct SimNetwork {
    pub record: AccessPointRecord,
    pub passphrase: heapless::String<64>,
}

#[cfg(not(target_os = "espidf"))]
impl SimNetwork {
    pub fn new(ssid: &str, passphrase: &str, security: SecurityMode, rssi: i8, channel: u8) -> Self {
        let mut record = AccessPointRecord {
            security,
            rssi,
            channel,
            ..AccessPointRecord::default()
        };
        let _ = record.ssid.push_str(ssid);
        // Locally administered BSSID derived from the SSID bytes.
        let seed = ssid.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        record.bssid = [0x02, 0x00, (seed >> 24) as u8, (seed >> 16) as u8, (seed >> 8) as u8, seed as u8];
        let mut pass = heapless::String::new();
        let _ = pass.push_str(passphrase);
        Self {
            record,
            passphrase: pass,
        }
    }
}

#[cfg(not(target_os = "espidf"))]
fn default_sim_networks() -> Vec<SimNetwork> {
    vec![
        SimNetwork::new("IoT_Test", "MQTT_TLS_TEST_2022", SecurityMode::WpaWpa2, -52, 6),
        SimNetwork::new("Guest", "", SecurityMode::None, -71, 11),
        SimNetwork::new("Workshop", "solder-fumes-42", SecurityMode::Wpa2, -80, 1),
    ]
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    state: WifiState,
    ssid: heapless::String<32>,

    // ── ESP-IDF fields ──────────────────────────────────────────
    #[cfg(target_os = "espidf")]
    wifi: BlockingWifi<EspWifi<'static>>,
    #[cfg(target_os = "espidf")]
    last_scan: Vec<AccessPointInfo>,

    // ── Simulation fields ───────────────────────────────────────
    #[cfg(not(target_os = "espidf"))]
    networks: Vec<SimNetwork>,
    #[cfg(not(target_os = "espidf"))]
    hosts: Vec<(String, IpAddr)>,
    /// Simulation: counts connect attempts for log correlation.
    #[cfg(not(target_os = "espidf"))]
    sim_connect_counter: u32,
}

impl WifiAdapter {
    // ── Constructors (platform-specific) ──────────────────────

    /// Take the modem and start the driver in station mode so scans work
    /// before any credentials are applied.
    #[cfg(target_os = "espidf")]
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self, EspError> {
        let mut wifi = BlockingWifi::wrap(EspWifi::new(modem, sysloop.clone(), Some(nvs))?, sysloop)?;
        wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
        wifi.start()?;
        info!("WiFi(espidf): driver started in STA mode");
        Ok(Self {
            state: WifiState::Disconnected,
            ssid: heapless::String::new(),
            wifi,
            last_scan: Vec::new(),
        })
    }

    /// Simulated radio with a small default set of access points.
    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self::with_networks(default_sim_networks())
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn with_networks(networks: Vec<SimNetwork>) -> Self {
        info!("WiFi(sim): radio with {} access point(s)", networks.len());
        Self {
            state: WifiState::Disconnected,
            ssid: heapless::String::new(),
            networks,
            hosts: Vec::new(),
            sim_connect_counter: 0,
        }
    }

    /// Pin `host` to `ip` instead of using the system resolver.
    #[cfg(not(target_os = "espidf"))]
    pub fn add_host(&mut self, host: &str, ip: IpAddr) {
        self.hosts.push((host.to_string(), ip));
    }

    // ── Public API ────────────────────────────────────────────

    pub fn state(&self) -> WifiState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == WifiState::Connected
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    // ── Platform helpers: scan ────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_scan(&mut self, records: &mut [AccessPointRecord]) -> Result<usize, Status> {
        if records.is_empty() || self.last_scan.is_empty() {
            self.last_scan = self.wifi.scan().map_err(esp_status)?;
        }
        if records.is_empty() {
            return Ok(self.last_scan.len());
        }
        let n = records.len().min(self.last_scan.len());
        for (dst, ap) in records.iter_mut().zip(self.last_scan.drain(..n)) {
            *dst = AccessPointRecord {
                ssid: ap.ssid,
                bssid: ap.bssid,
                security: security_from_auth(ap.auth_method),
                rssi: ap.signal_strength,
                channel: ap.channel,
            };
        }
        self.last_scan.clear();
        Ok(n)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_scan(&mut self, records: &mut [AccessPointRecord]) -> Result<usize, Status> {
        if records.is_empty() {
            return Ok(self.networks.len());
        }
        let n = records.len().min(self.networks.len());
        for (dst, net) in records.iter_mut().zip(&self.networks) {
            dst.clone_from(&net.record);
        }
        Ok(n)
    }

    // ── Platform helpers: connect ─────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self, ssid: &str, passphrase: &str, security: SecurityMode) -> Result<(), Status> {
        let conf = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| Status::PARAMETER)?,
            password: passphrase.try_into().map_err(|_| Status::PARAMETER)?,
            auth_method: auth_from_security(security),
            ..Default::default()
        });
        self.wifi.set_configuration(&conf).map_err(esp_status)?;
        if !self.wifi.is_started().map_err(esp_status)? {
            self.wifi.start().map_err(esp_status)?;
        }
        self.wifi.connect().map_err(esp_status)?;
        self.wifi.wait_netif_up().map_err(esp_status)?;
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self, ssid: &str, passphrase: &str, security: SecurityMode) -> Result<(), Status> {
        self.sim_connect_counter = self.sim_connect_counter.wrapping_add(1);
        let Some(net) = self.networks.iter().find(|n| n.record.ssid == ssid) else {
            warn!("WiFi(sim): no AP named '{}' (attempt {})", ssid, self.sim_connect_counter);
            return Err(Status::NO_SSID);
        };
        if net.record.security.is_open() != security.is_open() || net.passphrase != passphrase {
            warn!("WiFi(sim): authentication rejected by '{}'", ssid);
            return Err(Status::AUTH_FAILURE);
        }
        info!("WiFi(sim): associated with '{}' (attempt {})", ssid, self.sim_connect_counter);
        Ok(())
    }

    // ── Platform helpers: disconnect ──────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) -> Result<(), Status> {
        self.wifi.disconnect().map_err(esp_status)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self) -> Result<(), Status> {
        info!("WiFi(sim): disconnected");
        Ok(())
    }

    // ── Platform helpers: addressing ──────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_mac(&self) -> MacAddress {
        self.wifi
            .wifi()
            .sta_netif()
            .get_mac()
            .unwrap_or_else(|_| crate::device_id::read_mac())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_mac(&self) -> MacAddress {
        crate::device_id::read_mac()
    }

    /// (ip, netmask, gateway) of the station interface.
    #[cfg(target_os = "espidf")]
    fn platform_ip_info(&self) -> Option<(IpAddr, IpAddr, IpAddr)> {
        let info = self.wifi.wifi().sta_netif().get_ip_info().ok()?;
        let prefix = u32::from(info.subnet.mask.0);
        let mask_bits = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
        Some((
            IpAddr::V4(info.ip),
            IpAddr::V4(std::net::Ipv4Addr::from(mask_bits)),
            IpAddr::V4(info.subnet.gateway),
        ))
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_ip_info(&self) -> Option<(IpAddr, IpAddr, IpAddr)> {
        Some((
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42)),
            IpAddr::V4(Ipv4Addr::new(255, 255, 255, 0)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
        ))
    }

    #[cfg(target_os = "espidf")]
    fn platform_rssi(&self) -> Option<i8> {
        // SAFETY: zeroed is a valid bit pattern for this plain C struct, and
        // the driver only writes into it.
        let mut ap: esp_idf_svc::sys::wifi_ap_record_t = unsafe { core::mem::zeroed() };
        esp_idf_svc::sys::esp!(unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap) })
            .ok()
            .map(|()| ap.rssi)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_rssi(&self) -> Option<i8> {
        self.networks
            .iter()
            .find(|n| n.record.ssid == self.ssid)
            .map(|n| n.record.rssi)
    }

    // ── Platform helpers: resolve ─────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_resolve(&mut self, host: &str) -> Result<IpAddr, Status> {
        // lwIP getaddrinfo sits behind std's resolver on ESP-IDF.
        use std::net::ToSocketAddrs;
        (host, 0)
            .to_socket_addrs()
            .map_err(|_| Status::DNS_FAILURE)?
            .next()
            .map(|sa| sa.ip())
            .ok_or(Status::DNS_FAILURE)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_resolve(&mut self, host: &str) -> Result<IpAddr, Status> {
        if let Some((_, ip)) = self.hosts.iter().find(|(h, _)| h == host) {
            return Ok(*ip);
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        (host, 0)
            .to_socket_addrs()
            .map_err(|_| Status::DNS_FAILURE)?
            .next()
            .map(|sa| sa.ip())
            .ok_or(Status::DNS_FAILURE)
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF conversions
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
fn esp_status(e: EspError) -> Status {
    Status(e.code())
}

#[cfg(target_os = "espidf")]
fn security_from_auth(auth: Option<AuthMethod>) -> SecurityMode {
    match auth {
        Some(AuthMethod::None) => SecurityMode::None,
        Some(AuthMethod::WEP) => SecurityMode::Wep,
        Some(AuthMethod::WPA) => SecurityMode::Wpa,
        Some(AuthMethod::WPA2Personal) => SecurityMode::Wpa2,
        Some(AuthMethod::WPAWPA2Personal) => SecurityMode::WpaWpa2,
        _ => SecurityMode::Unknown,
    }
}

#[cfg(target_os = "espidf")]
fn auth_from_security(security: SecurityMode) -> AuthMethod {
    match security {
        SecurityMode::None => AuthMethod::None,
        SecurityMode::Wep => AuthMethod::WEP,
        SecurityMode::Wpa => AuthMethod::WPA,
        SecurityMode::Wpa2 => AuthMethod::WPA2Personal,
        SecurityMode::WpaWpa2 | SecurityMode::Unknown => AuthMethod::WPAWPA2Personal,
    }
}

// ───────────────────────────────────────────────────────────────
// LinkPort
// ───────────────────────────────────────────────────────────────

impl LinkPort for WifiAdapter {
    fn scan(&mut self, records: &mut [AccessPointRecord]) -> Result<usize, Status> {
        self.platform_scan(records)
    }

    fn connect(&mut self, ssid: &str, passphrase: &str, security: SecurityMode) -> Result<(), Status> {
        validate_ssid(ssid).map_err(|_| Status::PARAMETER)?;
        validate_passphrase(passphrase, security).map_err(|_| Status::PARAMETER)?;
        if self.state == WifiState::Connected {
            return Err(Status::IS_CONNECTED);
        }

        info!("WiFi: connecting to '{}'", ssid);
        self.state = WifiState::Connecting;

        match self.platform_connect(ssid, passphrase, security) {
            Ok(()) => {
                self.state = WifiState::Connected;
                self.ssid.clear();
                let _ = self.ssid.push_str(ssid);
                info!("WiFi: connected (RSSI={:?})", self.platform_rssi());
                Ok(())
            }
            Err(status) => {
                warn!("WiFi: connection failed ({})", status);
                self.state = WifiState::Failed;
                Err(status)
            }
        }
    }

    fn disconnect(&mut self) -> Result<(), Status> {
        if self.state != WifiState::Connected {
            return Err(Status::NO_CONNECTION);
        }
        self.platform_disconnect()?;
        self.state = WifiState::Disconnected;
        self.ssid.clear();
        info!("WiFi: disconnected");
        Ok(())
    }

    fn mac_address(&self) -> MacAddress {
        self.platform_mac()
    }

    fn ip_address(&self) -> Option<IpAddr> {
        self.is_connected()
            .then(|| self.platform_ip_info())
            .flatten()
            .map(|(ip, _, _)| ip)
    }

    fn netmask(&self) -> Option<IpAddr> {
        self.is_connected()
            .then(|| self.platform_ip_info())
            .flatten()
            .map(|(_, mask, _)| mask)
    }

    fn gateway(&self) -> Option<IpAddr> {
        self.is_connected()
            .then(|| self.platform_ip_info())
            .flatten()
            .map(|(_, _, gw)| gw)
    }

    fn rssi(&self) -> Option<i8> {
        if !self.is_connected() {
            return None;
        }
        self.platform_rssi()
    }

    fn resolve(&mut self, host: &str) -> Result<IpAddr, Status> {
        if !self.is_connected() {
            return Err(Status::NO_CONNECTION);
        }
        self.platform_resolve(host)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests (host / simulation path only)
// ───────────────────────────────────────────────────────────────
