//! Certificate store for the trusted CA chain for the secure channel.
//!
//! A chain provisioned into the `certs` NVS namespace takes precedence.
//! Otherwise the chain compiled into the firmware from
//! `certs/ca_chain.pem` is used.  A stored chain that fails PEM validation
//! is ignored with a warning rather than trusted.
//!
//! ## Flash layout
//!
//! | Namespace | Key       | Content                              |
//! |-----------|-----------|--------------------------------------|
//! | `certs`   | `ca_cert` | PEM-encoded CA certificate chain     |

use log::{info, warn};

use super::nvs::NvsAdapter;
use crate::credentials::{CaChain, PemError};

const CERT_NAMESPACE: &str = "certs";
const CA_KEY: &str = "ca_cert";

/// Root chain built into the image.
pub const EMBEDDED_CA_CHAIN: &[u8] = include_bytes!("../../certs/ca_chain.pem");

/// Where the active chain came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaSource {
    Provisioned,
    Embedded,
}

/// Certificate store adapter.
pub struct CertStore<'n> {
    nvs: &'n NvsAdapter,
}

impl<'n> CertStore<'n> {
    pub fn new(nvs: &'n NvsAdapter) -> Self {
        Self { nvs }
    }

    /// The built-in chain.
    pub fn embedded() -> Result<CaChain, PemError> {
        CaChain::from_pem(EMBEDDED_CA_CHAIN)
    }

    /// Load the active CA chain: provisioned if present and valid,
    /// otherwise the built-in one.
    pub fn load_ca_chain(&self) -> Result<(CaChain, CaSource), CertStoreError> {
        match self.nvs.read_blob(CERT_NAMESPACE, CA_KEY) {
            Ok(Some(bytes)) => match CaChain::from_pem(&bytes) {
                Ok(chain) => {
                    info!(
                        "CertStore: provisioned CA chain ({} cert(s), {}B)",
                        chain.certificate_count(),
                        chain.len()
                    );
                    return Ok((chain, CaSource::Provisioned));
                }
                Err(e) => warn!("CertStore: ignoring stored CA chain ({})", e),
            },
            Ok(None) => {}
            Err(e) => warn!("CertStore: cannot read stored CA chain ({})", e),
        }

        let chain = Self::embedded().map_err(CertStoreError::InvalidPem)?;
        info!(
            "CertStore: built-in CA chain ({} cert(s), {}B)",
            chain.certificate_count(),
            chain.len()
        );
        Ok((chain, CaSource::Embedded))
    }

    /// Validate and persist a provisioned chain.
    pub fn store_ca_chain(&self, pem: &[u8]) -> Result<(), CertStoreError> {
        let chain = CaChain::from_pem(pem).map_err(CertStoreError::InvalidPem)?;
        self.nvs
            .write_blob(CERT_NAMESPACE, CA_KEY, chain.as_pem())
            .map_err(|_| CertStoreError::WriteFailed)?;
        info!("CertStore: stored CA chain ({}B)", chain.len());
        Ok(())
    }

    /// Drop the provisioned chain and fall back to the built-in one.
    pub fn clear_ca_chain(&self) -> Result<(), CertStoreError> {
        self.nvs
            .erase_blob(CERT_NAMESPACE, CA_KEY)
            .map_err(|_| CertStoreError::WriteFailed)
    }
}

/// Errors from the certificate store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStoreError {
    InvalidPem(PemError),
    WriteFailed,
}

impl core::fmt::Display for CertStoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidPem(e) => write!(f, "invalid CA chain: {}", e),
            Self::WriteFailed => write!(f, "cert write failed"),
        }
    }
}

impl std::error::Error for CertStoreError {}

// ── Tests ────────────────────────────────────────────────────
