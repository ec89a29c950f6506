//! SecureLink connectivity bootstrap library.
//!
//! Exposes the sequencing core, its port traits and the platform adapters
//! for integration testing.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod credentials;
pub mod device_id;
pub mod error;
pub mod fsm;

pub mod adapters;
