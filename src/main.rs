//! SecureLink firmware entry point
//!
//! Brings the device from power-on to a steady MQTT publish loop over a
//! CA-verified TLS channel.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  WifiAdapter    TlsChannel          MqttAdapter   LogEventSink │
//! │  (LinkPort)     (SecureChannelPort) (MessageClientPort)        │
//! │  NvsAdapter     CertStore                                      │
//! │  (ConfigPort)   (CA chain)                                     │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │        Sequencer ──bind_client──▶ Session              │    │
//! │  │        FSM · subscription table · topic rules          │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use securelink::adapters::cert_store::CertStore;
use securelink::adapters::log_sink::LogEventSink;
use securelink::adapters::mqtt::MqttAdapter;
use securelink::adapters::nvs::NvsAdapter;
use securelink::adapters::tls_channel::TlsChannel;
use securelink::adapters::wifi::WifiAdapter;
use securelink::app::model::{Message, SecurityMode};
use securelink::app::ports::ConfigPort;
use securelink::app::service::{Sequencer, first_line, http_probe_request};
use securelink::config::BootstrapConfig;
use securelink::credentials::CredentialBundle;

/// Fallback credentials for bench units that were never provisioned.
const DEFAULT_SSID: &str = match option_env!("SECURELINK_WIFI_SSID") {
    Some(s) => s,
    None => "IoT_Test",
};
const DEFAULT_PASSPHRASE: &str = match option_env!("SECURELINK_WIFI_PASS") {
    Some(s) => s,
    None => "MQTT_TLS_TEST_2022",
};

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  SecureLink v{}                   ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {}", e))?;
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            BootstrapConfig::default()
        }
    };

    // ── 3. Credentials + CA chain ─────────────────────────────
    let (ca_chain, source) = CertStore::new(&nvs)
        .load_ca_chain()
        .map_err(|e| anyhow!("no usable CA chain: {}", e))?;
    info!("CA chain source: {:?}", source);

    let bundle = match nvs.load_credentials() {
        Ok(Some(stored)) => {
            CredentialBundle::new(&stored.ssid, &stored.passphrase, stored.security, ca_chain)
        }
        Ok(None) => {
            info!("No provisioned credentials, using build defaults");
            CredentialBundle::new(DEFAULT_SSID, DEFAULT_PASSPHRASE, SecurityMode::WpaWpa2, ca_chain)
        }
        Err(e) => {
            warn!("Stored credentials unreadable ({}), using build defaults", e);
            CredentialBundle::new(DEFAULT_SSID, DEFAULT_PASSPHRASE, SecurityMode::WpaWpa2, ca_chain)
        }
    }
    .map_err(|e| anyhow!("invalid credentials: {}", e))?;
    // esp-mqtt keeps pointers into the CA buffer for the life of the client.
    let credentials: &'static CredentialBundle = Box::leak(Box::new(bundle));

    // ── 4. Peripherals ────────────────────────────────────────
    let peripherals = Peripherals::take().context("peripherals already taken")?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let wifi = WifiAdapter::new(peripherals.modem, sysloop, nvs_partition)?;

    let mut sink = LogEventSink::new();

    // ── 5. Link + secure channel ──────────────────────────────
    let mut sequencer = Sequencer::new(&config, credentials, wifi, TlsChannel::new())?;
    if let Err(e) = sequencer.bring_up(&mut sink) {
        error!("Bring-up failed in {:?}: {}", sequencer.state(), e);
        return Err(e.into());
    }

    // ── 6. HTTPS check on its own channel ─────────────────────
    if let Some(check) = &config.https_check {
        let request = http_probe_request(&check.host);
        let mut response = vec![0u8; 512];
        match sequencer.probe(TlsChannel::new(), request.as_bytes(), &mut response, &mut sink) {
            Ok(n) => info!("HTTPS check response: {}", first_line(&response[..n])),
            Err(e) => {
                error!("HTTPS check failed: {}", e);
                return Err(e.into());
            }
        }
    }

    // ── 7. Broker session over the channel ────────────────────
    let broker = config.broker.clone();
    let mut session = sequencer.bind_client(
        |channel| MqttAdapter::new(channel, broker, credentials.ca_chain()),
        &mut sink,
    )?;
    info!("Client id: {}", session.client_id());

    session.subscribe_configured(
        Box::new(|msg: &Message<'_>| {
            info!(
                "RX    | '{}' qos={:?} retained={} dup={} | {}",
                msg.topic,
                msg.qos,
                msg.retained,
                msg.duplicate,
                String::from_utf8_lossy(msg.payload)
            );
        }),
        &mut sink,
    )?;

    // ── 8. Steady state: publish + yield forever ──────────────
    let result = session.run(None, &mut sink);
    let ctx = session.context();
    error!(
        "Steady state ended after {} cycle(s) ({} published, {} failed)",
        ctx.cycles, ctx.published, ctx.publish_failures
    );
    result?;
    Ok(())
}
