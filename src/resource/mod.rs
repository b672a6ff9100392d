// Resource model for the orchestration kernel.
//
// Lifecycle states, command kinds, state events, and the record/reference
// types shared by the gate, scheduler, cascade, and service layers.

pub mod commands;
pub mod events;
pub mod records;
pub mod states;
pub mod tables;

pub use commands::{Command, CommandKind, DeletionMode};
pub use events::StateEvent;
pub use records::{ResourceRecord, ResourceRef};
pub use states::{ConnectionStatus, ResourceState};
pub use tables::{default_operation_gate, default_transition_table};
