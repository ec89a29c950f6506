//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`ConfigPort`] for the bootstrap configuration and keeps the
//! provisioned network credentials and CA chain.
//!
//! # Layout
//!
//! | Namespace    | Key       | Content                                   |
//! |--------------|-----------|-------------------------------------------|
//! | `securelink` | `bootcfg` | postcard-encoded [`BootstrapConfig`]      |
//! | `auth`       | `wifi`    | postcard-encoded [`StoredCredentials`]    |
//! | `certs`      | `ca_cert` | PEM CA chain (see `cert_store`)           |
//!
//! - Config validation: every field is range-checked before persistence
//!   and again after loading.
//! - Encrypted NVS: on ESP32 the `auth` namespace lives on the encrypted
//!   NVS partition.  The simulation backend is plaintext (dev/test only).
//! - Atomic writes: ESP-IDF NVS commits are atomic per nvs_commit().

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;
use serde::{Deserialize, Serialize};

use crate::app::model::{MAX_SSID_LEN, SecurityMode};
use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::BootstrapConfig;
use crate::credentials::{self, MAX_PASSPHRASE_LEN};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "securelink";
const CONFIG_KEY: &str = "bootcfg";
const CRED_NAMESPACE: &str = "auth";
const CRED_KEY: &str = "wifi";

/// Largest blob read back from flash (the CA chain plus slack).
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
const MAX_BLOB_SIZE: usize = 8192;

/// Network credentials as persisted by provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub ssid: heapless::String<MAX_SSID_LEN>,
    pub passphrase: heapless::String<MAX_PASSPHRASE_LEN>,
    pub security: SecurityMode,
}

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// Returns `Err(ConfigError::IoError)` if flash initialisation fails
    /// unrecoverably.  On first boot or after a version mismatch the NVS
    /// partition is erased and re-initialised automatically.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// NUL-terminated copy of an NVS name (namespaces and keys are at most
    /// 15 characters).
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let bytes = name.as_bytes();
        let len = bytes.len().min(15);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns_buf = Self::c_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns_buf.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    // ── Raw blobs ─────────────────────────────────────────────

    /// `Ok(None)` when the key has never been written.
    #[cfg(not(target_os = "espidf"))]
    pub fn read_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        Ok(self
            .store
            .borrow()
            .get(&Self::composite_key(namespace, key))
            .cloned())
    }

    #[cfg(target_os = "espidf")]
    pub fn read_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        let key_buf = Self::c_name(key);
        let result = Self::with_nvs_handle(namespace, false, |handle| {
            let mut size: usize = 0;
            // First call: get size
            let ret = unsafe {
                nvs_get_blob(handle, key_buf.as_ptr() as *const _, core::ptr::null_mut(), &mut size)
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            if size == 0 || size > MAX_BLOB_SIZE {
                return Err(ESP_ERR_NVS_INVALID_LENGTH);
            }

            let mut buf = vec![0u8; size];
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    key_buf.as_ptr() as *const _,
                    buf.as_mut_ptr() as *mut _,
                    &mut size,
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            buf.truncate(size);
            Ok(buf)
        });

        match result {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(None),
            Err(e) if e == ESP_ERR_NVS_INVALID_LENGTH => Err(ConfigError::Corrupted),
            Err(e) => {
                warn!("NvsAdapter: read {}::{} failed ({})", namespace, key, e);
                Err(ConfigError::IoError)
            }
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn write_blob(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        self.store
            .borrow_mut()
            .insert(Self::composite_key(namespace, key), data.to_vec());
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    pub fn write_blob(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let key_buf = Self::c_name(key);
        let result = Self::with_nvs_handle(namespace, true, |handle| {
            let ret = unsafe {
                nvs_set_blob(
                    handle,
                    key_buf.as_ptr() as *const _,
                    data.as_ptr() as *const _,
                    data.len(),
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        });
        result.map_err(|e| {
            warn!("NvsAdapter: write {}::{} failed ({})", namespace, key, e);
            ConfigError::IoError
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn erase_blob(&self, namespace: &str, key: &str) -> Result<(), ConfigError> {
        self.store
            .borrow_mut()
            .remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    pub fn erase_blob(&self, namespace: &str, key: &str) -> Result<(), ConfigError> {
        let key_buf = Self::c_name(key);
        let result = Self::with_nvs_handle(namespace, true, |handle| {
            let ret = unsafe { nvs_erase_key(handle, key_buf.as_ptr() as *const _) };
            if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        });
        match result {
            Ok(()) => Ok(()),
            // Namespace never created: nothing to erase.
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(()),
            Err(_) => Err(ConfigError::IoError),
        }
    }

    // ── Credentials ───────────────────────────────────────────

    /// Persist network credentials to the `auth` namespace.
    pub fn store_credentials(
        &self,
        ssid: &str,
        passphrase: &str,
        security: SecurityMode,
    ) -> Result<(), ConfigError> {
        credentials::validate_ssid(ssid)
            .map_err(|_| ConfigError::ValidationFailed("ssid must be 1-32 printable ASCII bytes"))?;
        credentials::validate_passphrase(passphrase, security).map_err(|_| {
            ConfigError::ValidationFailed("passphrase does not fit the security mode")
        })?;

        let mut stored = StoredCredentials {
            ssid: heapless::String::new(),
            passphrase: heapless::String::new(),
            security,
        };
        stored
            .ssid
            .push_str(ssid)
            .map_err(|()| ConfigError::ValidationFailed("ssid too long"))?;
        stored
            .passphrase
            .push_str(passphrase)
            .map_err(|()| ConfigError::ValidationFailed("passphrase too long"))?;

        let bytes = postcard::to_allocvec(&stored).map_err(|_| ConfigError::IoError)?;
        self.write_blob(CRED_NAMESPACE, CRED_KEY, &bytes)?;
        info!("NvsAdapter: credentials for '{}' stored", ssid);
        Ok(())
    }

    /// `Ok(None)` until provisioning has stored credentials.
    pub fn load_credentials(&self) -> Result<Option<StoredCredentials>, ConfigError> {
        let Some(bytes) = self.read_blob(CRED_NAMESPACE, CRED_KEY)? else {
            return Ok(None);
        };
        let stored: StoredCredentials =
            postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
        Ok(Some(stored))
    }

    /// Forget the stored credentials (factory reset).
    pub fn erase_credentials(&self) -> Result<(), ConfigError> {
        self.erase_blob(CRED_NAMESPACE, CRED_KEY)
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<BootstrapConfig, ConfigError> {
        match self.read_blob(CONFIG_NAMESPACE, CONFIG_KEY)? {
            Some(bytes) => {
                let cfg: BootstrapConfig =
                    postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                cfg.validate()?;
                info!("NvsAdapter: loaded config ({} bytes)", bytes.len());
                Ok(cfg)
            }
            None => {
                info!("NvsAdapter: no stored config, using defaults");
                Ok(BootstrapConfig::default())
            }
        }
    }

    fn save(&self, config: &BootstrapConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.write_blob(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)?;
        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}
