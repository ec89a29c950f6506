//! Shared mutable context threaded through every FSM handler.
//!
//! `FsmContext` is the blackboard that state actions read from and write
//! to: the failure reason, transition bookkeeping and the steady-state
//! cycle counters.  The sequencer updates the counters; `on_enter` actions
//! reset them at the right moments.

use crate::error::{BootstrapError, Status};

use super::StateId;

#[derive(Debug, Clone, Default)]
pub struct FsmContext {
    /// Reason recorded when the machine entered `Failed`.
    pub failure: Option<BootstrapError>,
    /// State left by the most recent transition.
    pub previous: Option<StateId>,
    /// Number of transitions taken since start.
    pub transitions: u32,

    // --- Steady state ---
    /// Completed publish/yield cycles.
    pub cycles: u32,
    /// Publishes accepted by the client.
    pub published: u32,
    /// Publishes rejected by the client (all time, within steady state).
    pub publish_failures: u32,
    /// Run of back-to-back publish failures; reset on the next success.
    pub consecutive_publish_failures: u32,
    /// Status of the most recent publish failure.
    pub last_publish_status: Option<Status>,
}

impl FsmContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one steady-state publish.
    pub fn record_publish(&mut self, outcome: Result<(), Status>) {
        match outcome {
            Ok(()) => {
                self.published += 1;
                self.consecutive_publish_failures = 0;
            }
            Err(status) => {
                self.publish_failures += 1;
                self.consecutive_publish_failures += 1;
                self.last_publish_status = Some(status);
            }
        }
    }
}
