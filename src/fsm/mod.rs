//! Function-pointer finite state machine for the bootstrap sequence.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  StateTable                                           │
//! │  ┌─────────────┬─────────────┬──────────┬──────────┐  │
//! │  │ StateId     │ next        │ on_enter │ on_exit  │  │
//! │  ├─────────────┼─────────────┼──────────┼──────────┤  │
//! │  │ Init        │ LinkUp      │ fn(ctx)  │ -        │  │
//! │  │ LinkUp      │ SecureUp    │ fn(ctx)  │ -        │  │
//! │  │ SecureUp    │ BrokerUp    │ fn(ctx)  │ -        │  │
//! │  │ BrokerUp    │ SteadyState │ fn(ctx)  │ -        │  │
//! │  │ SteadyState │ -           │ fn(ctx)  │ fn(ctx)  │  │
//! │  │ Failed      │ -           │ fn(ctx)  │ -        │  │
//! │  └─────────────┴─────────────┴──────────┴──────────┘  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Unlike a tick-driven machine, transitions here are requested by the
//! sequencer when a workflow step completes.  The engine only allows the
//! single forward edge listed in `next`, or the jump to `Failed` from any
//! non-terminal state.  `Failed` is terminal: the process must restart.

pub mod context;
pub mod states;

use context::FsmContext;
use log::{error, info};

use crate::error::BootstrapError;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Enumeration of all bootstrap states.
/// Must stay in sync with the state table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    Init = 0,
    LinkUp = 1,
    SecureUp = 2,
    BrokerUp = 3,
    SteadyState = 4,
    Failed = 5,
}

impl StateId {
    /// Total number of states, used to size the table array.
    pub const COUNT: usize = 6;

    /// Convert an index back to `StateId`.  Out-of-range maps to `Failed`.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Init,
            1 => Self::LinkUp,
            2 => Self::SecureUp,
            3 => Self::BrokerUp,
            4 => Self::SteadyState,
            5 => Self::Failed,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Failed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut FsmContext);

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// Static descriptor for a single bootstrap state.
pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    /// The only forward edge out of this state.
    pub next: Option<StateId>,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

pub struct Fsm {
    table: [StateDescriptor; StateId::COUNT],
    current: usize,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        Self {
            table,
            current: initial as usize,
        }
    }

    /// Run the initial `on_enter` for the starting state.
    pub fn start(&mut self, ctx: &mut FsmContext) {
        info!("FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    /// Fail unless the machine is currently in `expected`.
    pub fn require(&self, expected: StateId) -> Result<(), BootstrapError> {
        let actual = self.current_state();
        if actual == expected {
            Ok(())
        } else {
            Err(BootstrapError::OutOfSequence { expected, actual })
        }
    }

    /// Take the forward edge to `next`.
    pub fn advance(&mut self, next: StateId, ctx: &mut FsmContext) -> Result<(), BootstrapError> {
        if self.table[self.current].next != Some(next) {
            let expected = self
                .table
                .iter()
                .find(|d| d.next == Some(next))
                .map_or(StateId::Init, |d| d.id);
            return Err(BootstrapError::OutOfSequence {
                expected,
                actual: self.current_state(),
            });
        }
        self.transition(next, ctx);
        Ok(())
    }

    /// Record `reason` and jump to `Failed`.  The first failure is kept;
    /// later calls on an already-failed machine are ignored.
    pub fn fail(&mut self, reason: BootstrapError, ctx: &mut FsmContext) {
        if self.current_state() == StateId::Failed {
            return;
        }
        error!(
            "FSM failure in {}: {}",
            self.table[self.current].name, reason
        );
        ctx.failure = Some(reason);
        self.transition(StateId::Failed, ctx);
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(&mut self, next_id: StateId, ctx: &mut FsmContext) {
        let next_idx = next_id as usize;

        info!(
            "FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        ctx.previous = Some(self.current_state());
        ctx.transitions += 1;
        self.current = next_idx;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
