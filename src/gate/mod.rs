//! # Operation Gate
//!
//! Table-driven admission control for resource commands. Two tables with
//! deliberately different defaults:
//!
//! - the **admission table** maps states to the command kinds they allow;
//!   anything not listed is rejected,
//! - the **transition table** answers whether a lifecycle event requires a
//!   state transition; a transition is required by default and only the
//!   explicitly suppressed (event, state) pairs are ignored.
//!
//! Both tables are built once during process setup and immutable after.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{OrchestrationError, Result};
use crate::resource::{CommandKind, ResourceState, StateEvent};

/// State-gated admission table: `(state, command kind) -> allowed`
#[derive(Debug, Clone)]
pub struct OperationGate {
    allowed: HashMap<ResourceState, HashSet<CommandKind>>,
}

impl OperationGate {
    pub fn builder() -> GateBuilder {
        GateBuilder::default()
    }

    /// Whether `command` may proceed while the resource is in `state`.
    /// Unlisted pairs are disallowed.
    pub fn is_allowed(&self, command: CommandKind, state: ResourceState) -> bool {
        self.allowed
            .get(&state)
            .is_some_and(|kinds| kinds.contains(&command))
    }

    /// The set of states in which `command` is legal, for diagnostics
    pub fn allowed_states_for(&self, command: CommandKind) -> BTreeSet<ResourceState> {
        self.allowed
            .iter()
            .filter(|(_, kinds)| kinds.contains(&command))
            .map(|(state, _)| *state)
            .collect()
    }

    /// Admission check producing the descriptive error the caller receives
    /// when the command is rejected
    pub fn check(&self, command: CommandKind, state: ResourceState) -> Result<()> {
        if self.is_allowed(command, state) {
            Ok(())
        } else {
            Err(OrchestrationError::OperationNotAllowed {
                command,
                current: state,
                allowed: self.allowed_states_for(command),
            })
        }
    }
}

/// Builder for [`OperationGate`]; used by per-resource-type setup functions
#[derive(Debug, Default)]
pub struct GateBuilder {
    allowed: HashMap<ResourceState, HashSet<CommandKind>>,
}

impl GateBuilder {
    /// Declare the command kinds admitted while in `state`
    pub fn allow(
        mut self,
        state: ResourceState,
        commands: impl IntoIterator<Item = CommandKind>,
    ) -> Self {
        self.allowed.entry(state).or_default().extend(commands);
        self
    }

    pub fn build(self) -> OperationGate {
        OperationGate {
            allowed: self.allowed,
        }
    }
}

/// Event-to-state suppression table.
///
/// Listing an (event, state) pair means "no transition needed"; absence
/// means the event must be acted on. The inversion lives here, behind a
/// predicate named for what it answers, so callers never see a double
/// negative.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    suppressed: HashMap<StateEvent, HashSet<ResourceState>>,
}

impl TransitionTable {
    pub fn builder() -> TransitionTableBuilder {
        TransitionTableBuilder::default()
    }

    /// Whether `event` arriving while the resource is in `state` requires a
    /// state transition. True unless the pair is explicitly suppressed.
    pub fn needs_transition(&self, event: StateEvent, state: ResourceState) -> bool {
        !self
            .suppressed
            .get(&event)
            .is_some_and(|states| states.contains(&state))
    }
}

/// Builder for [`TransitionTable`]
#[derive(Debug, Default)]
pub struct TransitionTableBuilder {
    suppressed: HashMap<StateEvent, HashSet<ResourceState>>,
}

impl TransitionTableBuilder {
    /// Declare the states in which `event` should be ignored
    pub fn suppress(
        mut self,
        event: StateEvent,
        states: impl IntoIterator<Item = ResourceState>,
    ) -> Self {
        self.suppressed.entry(event).or_default().extend(states);
        self
    }

    pub fn build(self) -> TransitionTable {
        TransitionTable {
            suppressed: self.suppressed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_gate() -> OperationGate {
        OperationGate::builder()
            .allow(ResourceState::Stopped, [CommandKind::Start])
            .allow(
                ResourceState::Running,
                [CommandKind::Stop, CommandKind::Destroy],
            )
            .build()
    }

    #[test]
    fn test_listed_pairs_are_allowed() {
        let gate = small_gate();
        assert!(gate.is_allowed(CommandKind::Start, ResourceState::Stopped));
        assert!(gate.is_allowed(CommandKind::Destroy, ResourceState::Running));
    }

    #[test]
    fn test_unlisted_pairs_are_rejected() {
        let gate = small_gate();
        assert!(!gate.is_allowed(CommandKind::Start, ResourceState::Running));
        assert!(!gate.is_allowed(CommandKind::Migrate, ResourceState::Running));
        assert!(!gate.is_allowed(CommandKind::Stop, ResourceState::Migrating));
    }

    #[test]
    fn test_check_error_names_current_and_allowed_states() {
        let gate = small_gate();
        let err = gate
            .check(CommandKind::Start, ResourceState::Running)
            .unwrap_err();
        match err {
            OrchestrationError::OperationNotAllowed {
                command,
                current,
                allowed,
            } => {
                assert_eq!(command, CommandKind::Start);
                assert_eq!(current, ResourceState::Running);
                assert_eq!(allowed, [ResourceState::Stopped].into_iter().collect());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_transition_required_by_default() {
        let table = TransitionTable::builder()
            .suppress(
                StateEvent::ConnectivityUnknown,
                [ResourceState::Created, ResourceState::Stopped],
            )
            .build();

        assert!(!table.needs_transition(StateEvent::ConnectivityUnknown, ResourceState::Created));
        assert!(!table.needs_transition(StateEvent::ConnectivityUnknown, ResourceState::Stopped));
        // unlisted pairs act on the event
        assert!(table.needs_transition(StateEvent::ConnectivityUnknown, ResourceState::Running));
        assert!(table.needs_transition(StateEvent::Recovered, ResourceState::Unknown));
    }
}
