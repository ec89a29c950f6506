//! Concrete state actions and table builder.
//!
//! ```text
//!  INIT ──[associated]──▶ LINK_UP ──[channel up]──▶ SECURE_UP
//!                                                      │
//!                                             [broker session]
//!                                                      ▼
//!               STEADY_STATE ◀──[subscribed]──── BROKER_UP
//!
//!  Any non-terminal state ──[step failure]──▶ FAILED
//! ```

use super::context::FsmContext;
use super::{StateDescriptor, StateId};
use log::{error, info};

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once per sequencer.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0: Init
        StateDescriptor {
            id: StateId::Init,
            name: "Init",
            next: Some(StateId::LinkUp),
            on_enter: Some(init_enter),
            on_exit: None,
        },
        // Index 1: LinkUp
        StateDescriptor {
            id: StateId::LinkUp,
            name: "LinkUp",
            next: Some(StateId::SecureUp),
            on_enter: Some(link_up_enter),
            on_exit: None,
        },
        // Index 2: SecureUp
        StateDescriptor {
            id: StateId::SecureUp,
            name: "SecureUp",
            next: Some(StateId::BrokerUp),
            on_enter: Some(secure_up_enter),
            on_exit: None,
        },
        // Index 3: BrokerUp
        StateDescriptor {
            id: StateId::BrokerUp,
            name: "BrokerUp",
            next: Some(StateId::SteadyState),
            on_enter: Some(broker_up_enter),
            on_exit: None,
        },
        // Index 4: SteadyState
        StateDescriptor {
            id: StateId::SteadyState,
            name: "SteadyState",
            next: None,
            on_enter: Some(steady_state_enter),
            on_exit: Some(steady_state_exit),
        },
        // Index 5: Failed (terminal)
        StateDescriptor {
            id: StateId::Failed,
            name: "Failed",
            next: None,
            on_enter: Some(failed_enter),
            on_exit: None,
        },
    ]
}

fn init_enter(_ctx: &mut FsmContext) {
    info!("INIT: waiting for association");
}

fn link_up_enter(_ctx: &mut FsmContext) {
    info!("LINK_UP: station associated");
}

fn secure_up_enter(_ctx: &mut FsmContext) {
    info!("SECURE_UP: TLS channel established");
}

fn broker_up_enter(_ctx: &mut FsmContext) {
    info!("BROKER_UP: message session open");
}

fn steady_state_enter(ctx: &mut FsmContext) {
    ctx.cycles = 0;
    ctx.published = 0;
    ctx.publish_failures = 0;
    ctx.consecutive_publish_failures = 0;
    ctx.last_publish_status = None;
    info!("STEADY_STATE: publish loop armed");
}

fn steady_state_exit(ctx: &mut FsmContext) {
    info!(
        "STEADY_STATE: leaving after {} cycle(s), {} published, {} failed",
        ctx.cycles, ctx.published, ctx.publish_failures
    );
}

fn failed_enter(ctx: &mut FsmContext) {
    match ctx.failure {
        Some(reason) => error!("FAILED: {} (restart required)", reason),
        None => error!("FAILED: no reason recorded (restart required)"),
    }
}
