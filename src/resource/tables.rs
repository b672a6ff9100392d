//! Default admission and transition tables for the built-in resource model.
//!
//! Build functions called once during process setup; the returned tables are
//! immutable.

use crate::gate::{OperationGate, TransitionTable};

use super::commands::CommandKind;
use super::events::StateEvent;
use super::states::ResourceState;

/// Admission table for the standard resource lifecycle
pub fn default_operation_gate() -> OperationGate {
    OperationGate::builder()
        .allow(ResourceState::Created, [CommandKind::StartNewInstance, CommandKind::Connect])
        .allow(
            ResourceState::Running,
            [
                CommandKind::Stop,
                CommandKind::Reboot,
                CommandKind::Destroy,
                CommandKind::Migrate,
                CommandKind::Attach,
                CommandKind::Detach,
                CommandKind::ChangeState,
                CommandKind::GetMigrationTarget,
            ],
        )
        .allow(
            ResourceState::Stopped,
            [
                CommandKind::Start,
                CommandKind::Stop,
                CommandKind::Destroy,
                CommandKind::Connect,
                CommandKind::Attach,
                CommandKind::Detach,
                CommandKind::ChangeState,
            ],
        )
        .allow(
            ResourceState::Unknown,
            [
                CommandKind::Stop,
                CommandKind::Destroy,
                CommandKind::Connect,
            ],
        )
        .allow(ResourceState::Starting, [CommandKind::Destroy])
        .allow(ResourceState::Stopping, [CommandKind::Destroy])
        .allow(ResourceState::Rebooting, [CommandKind::Destroy])
        .allow(ResourceState::Migrating, [CommandKind::Destroy])
        .build()
}

/// Transition-suppression table for lifecycle events.
///
/// Connectivity loss is low-signal: a resource that was never running, is
/// already down, or is already gone stays where it is.
pub fn default_transition_table() -> TransitionTable {
    TransitionTable::builder()
        .suppress(
            StateEvent::ConnectivityUnknown,
            [
                ResourceState::Created,
                ResourceState::Stopped,
                ResourceState::Destroyed,
                ResourceState::Expunging,
            ],
        )
        .suppress(
            StateEvent::Recovered,
            [
                ResourceState::Created,
                ResourceState::Stopped,
                ResourceState::Destroyed,
                ResourceState::Expunging,
                ResourceState::Running,
            ],
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_resource_can_start() {
        let gate = default_operation_gate();
        assert!(gate.is_allowed(CommandKind::Start, ResourceState::Stopped));
        assert!(!gate.is_allowed(CommandKind::Start, ResourceState::Running));
    }

    #[test]
    fn test_destroy_is_allowed_in_transient_states() {
        let gate = default_operation_gate();
        for state in [
            ResourceState::Starting,
            ResourceState::Stopping,
            ResourceState::Rebooting,
            ResourceState::Migrating,
        ] {
            assert!(gate.is_allowed(CommandKind::Destroy, state), "{state}");
            // destroy is the only thing allowed mid-transition
            assert!(!gate.is_allowed(CommandKind::Attach, state), "{state}");
        }
    }

    #[test]
    fn test_connectivity_loss_ignored_before_first_start() {
        let table = default_transition_table();
        assert!(!table.needs_transition(StateEvent::ConnectivityUnknown, ResourceState::Created));
        assert!(table.needs_transition(StateEvent::ConnectivityUnknown, ResourceState::Running));
    }

    #[test]
    fn test_recovery_only_matters_when_connectivity_was_lost() {
        let table = default_transition_table();
        assert!(table.needs_transition(StateEvent::Recovered, ResourceState::Unknown));
        assert!(!table.needs_transition(StateEvent::Recovered, ResourceState::Running));
    }
}
