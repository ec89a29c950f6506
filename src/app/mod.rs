//! Application core. Bootstrap sequencing logic, zero direct I/O.
//!
//! Everything here talks to the network stack through the **port traits**
//! in [`ports`], so the whole workflow is testable with mock adapters on
//! the host.

pub mod events;
pub mod model;
pub mod ports;
pub mod service;
pub mod subscriptions;
pub mod topics;
