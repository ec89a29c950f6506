//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements         | Connects to                  |
//! |---------------|--------------------|------------------------------|
//! | `wifi`        | LinkPort           | ESP-IDF WiFi STA             |
//! | `tls_channel` | SecureChannelPort  | esp-tls (lwIP + mbedTLS)     |
//! | `mqtt`        | MessageClientPort  | esp-mqtt over TLS            |
//! | `nvs`         | ConfigPort         | NVS / in-memory store        |
//! | `cert_store`  | CertStore          | CA chain in NVS or firmware  |
//! | `log_sink`    | EventSink          | Serial log output            |
//!
//! Every adapter has a host simulation selected by
//! `cfg(not(target_os = "espidf"))` so the whole stack runs under
//! `cargo test`.

pub mod cert_store;
pub mod log_sink;
pub mod mqtt;
pub mod nvs;
pub mod tls_channel;
pub mod wifi;
