//! Network credentials and the trusted CA chain.
//!
//! Both are established once at startup, validated here, and then shared
//! read-only with the sequencer for the life of the process.

use core::fmt;

use log::info;

use crate::app::model::{MAX_SSID_LEN, SecurityMode};
use crate::error::BootstrapError;

/// Upper bound on the concatenated PEM chain, excluding the NUL terminator.
pub const MAX_CA_CHAIN_LEN: usize = 8191;

/// WPA passphrase limits (8–63 ASCII or a 64-digit hex PSK).
const MIN_PASSPHRASE_LEN: usize = 8;
pub const MAX_PASSPHRASE_LEN: usize = 64;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    InvalidSsid,
    InvalidPassphrase,
    PassphraseOnOpenNetwork,
    Pem(PemError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemError {
    Empty,
    TooLarge,
    /// Interior NUL would truncate the chain when handed to mbedTLS.
    EmbeddedNul,
    NotText,
    /// BEGIN/END markers are unbalanced or nested.
    Malformed,
    NoCertificate,
}

impl fmt::Display for PemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "CA chain is empty"),
            Self::TooLarge => write!(f, "CA chain exceeds {MAX_CA_CHAIN_LEN} bytes"),
            Self::EmbeddedNul => write!(f, "CA chain contains a NUL byte"),
            Self::NotText => write!(f, "CA chain is not ASCII text"),
            Self::Malformed => write!(f, "CA chain has unbalanced PEM markers"),
            Self::NoCertificate => write!(f, "CA chain holds no certificate"),
        }
    }
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassphrase => {
                write!(f, "passphrase invalid (must be 8-64 bytes, or empty for open)")
            }
            Self::PassphraseOnOpenNetwork => write!(f, "open network must not carry a passphrase"),
            Self::Pem(e) => write!(f, "{e}"),
        }
    }
}

impl From<PemError> for CredentialError {
    fn from(e: PemError) -> Self {
        Self::Pem(e)
    }
}

impl From<CredentialError> for BootstrapError {
    fn from(e: CredentialError) -> Self {
        let msg = match e {
            CredentialError::InvalidSsid => "ssid must be 1-32 printable ASCII bytes",
            CredentialError::InvalidPassphrase => "passphrase must be empty or 8-64 bytes",
            CredentialError::PassphraseOnOpenNetwork => "open network must not carry a passphrase",
            CredentialError::Pem(_) => "CA chain is not a valid PEM certificate chain",
        };
        Self::Config(msg)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

pub fn validate_ssid(ssid: &str) -> Result<(), CredentialError> {
    if ssid.is_empty() || ssid.len() > MAX_SSID_LEN || !is_printable_ascii(ssid) {
        return Err(CredentialError::InvalidSsid);
    }
    Ok(())
}

pub fn validate_passphrase(passphrase: &str, security: SecurityMode) -> Result<(), CredentialError> {
    if passphrase.is_empty() {
        return Ok(());
    }
    if security.is_open() {
        return Err(CredentialError::PassphraseOnOpenNetwork);
    }
    if !(MIN_PASSPHRASE_LEN..=MAX_PASSPHRASE_LEN).contains(&passphrase.len()) {
        return Err(CredentialError::InvalidPassphrase);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CA chain
// ---------------------------------------------------------------------------

/// Concatenated PEM trust chain, kept byte-for-byte in its original order.
///
/// A NUL terminator is stored after the PEM text so the chain can be
/// handed to mbedTLS without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct CaChain {
    bytes: heapless::Vec<u8, { MAX_CA_CHAIN_LEN + 1 }>,
    certificates: usize,
}

impl CaChain {
    /// Validate PEM framing and copy the chain.
    pub fn from_pem(pem: &[u8]) -> Result<Self, PemError> {
        let certificates = count_certificates(pem)?;
        let mut bytes = heapless::Vec::new();
        bytes.extend_from_slice(pem).map_err(|()| PemError::TooLarge)?;
        bytes.push(0).map_err(|_| PemError::TooLarge)?;
        Ok(Self {
            bytes,
            certificates,
        })
    }

    /// The chain exactly as supplied.
    pub fn as_pem(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 1]
    }

    /// The chain followed by a single NUL byte.
    pub fn as_nul_terminated(&self) -> &[u8] {
        &self.bytes
    }

    pub fn certificate_count(&self) -> usize {
        self.certificates
    }

    pub fn len(&self) -> usize {
        self.bytes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// SHA-256 over the PEM text, for identifying the installed bundle in logs.
    pub fn fingerprint(&self) -> [u8; 32] {
        hmac_sha256::Hash::hash(self.as_pem())
    }

    /// First four fingerprint bytes as lower-case hex.
    pub fn short_fingerprint(&self) -> heapless::String<8> {
        use core::fmt::Write;
        let fp = self.fingerprint();
        let mut out = heapless::String::new();
        for b in &fp[..4] {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

impl fmt::Debug for CaChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaChain")
            .field("len", &self.len())
            .field("certificates", &self.certificates)
            .finish()
    }
}

/// Count complete certificates, rejecting anything that is not cleanly
/// framed PEM.
fn count_certificates(pem: &[u8]) -> Result<usize, PemError> {
    if pem.is_empty() {
        return Err(PemError::Empty);
    }
    if pem.len() > MAX_CA_CHAIN_LEN {
        return Err(PemError::TooLarge);
    }
    if pem.contains(&0) {
        return Err(PemError::EmbeddedNul);
    }
    let text = core::str::from_utf8(pem).map_err(|_| PemError::NotText)?;
    if !text.is_ascii() {
        return Err(PemError::NotText);
    }

    let mut open = false;
    let mut count = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line == PEM_BEGIN {
            if open {
                return Err(PemError::Malformed);
            }
            open = true;
        } else if line == PEM_END {
            if !open {
                return Err(PemError::Malformed);
            }
            open = false;
            count += 1;
        }
    }
    if open {
        return Err(PemError::Malformed);
    }
    if count == 0 {
        return Err(PemError::NoCertificate);
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Credential bundle
// ---------------------------------------------------------------------------

/// Everything needed to join the network and authenticate the server.
#[derive(Clone)]
pub struct CredentialBundle {
    ssid: heapless::String<MAX_SSID_LEN>,
    passphrase: heapless::String<MAX_PASSPHRASE_LEN>,
    security: SecurityMode,
    ca_chain: CaChain,
}

impl CredentialBundle {
    pub fn new(
        ssid: &str,
        passphrase: &str,
        security: SecurityMode,
        ca_chain: CaChain,
    ) -> Result<Self, CredentialError> {
        validate_ssid(ssid)?;
        validate_passphrase(passphrase, security)?;

        let mut ssid_buf = heapless::String::new();
        ssid_buf
            .push_str(ssid)
            .map_err(|()| CredentialError::InvalidSsid)?;
        let mut pass_buf = heapless::String::new();
        pass_buf
            .push_str(passphrase)
            .map_err(|()| CredentialError::InvalidPassphrase)?;

        info!(
            "Credentials: SSID='{}' security={} CA={} cert(s) sha256:{}",
            ssid,
            security,
            ca_chain.certificate_count(),
            ca_chain.short_fingerprint()
        );

        Ok(Self {
            ssid: ssid_buf,
            passphrase: pass_buf,
            security,
            ca_chain,
        })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn security(&self) -> SecurityMode {
        self.security
    }

    pub fn ca_chain(&self) -> &CaChain {
        &self.ca_chain
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .field("security", &self.security)
            .field("ca_chain", &self.ca_chain)
            .finish()
    }
}
