//! # Stratus Core
//!
//! Orchestration kernel for long-lived infrastructure resources. Each
//! resource is fronted by a [`service::ResourceService`] that admits
//! commands through a state-keyed [`gate::OperationGate`], serializes their
//! execution on a per-resource queue in the [`scheduler::SerialExecutor`],
//! and runs multi-step work as rollback-capable [`flow::FlowChain`]s.
//! Destructive operations cascade across dependent resources through the
//! [`cascade::CascadeEngine`], and cross-cutting logic plugs in via the
//! [`hooks::HookPipeline`].
//!
//! ## Architecture
//!
//! - **Gate**: per-state allowed-command tables plus a transition table for
//!   externally reported state events
//! - **Scheduler**: FIFO queues keyed by sync signature, with a bounded
//!   concurrency level per signature
//! - **Flow**: ordered steps with explicit completion triggers and reverse
//!   rollback on failure
//! - **Cascade**: check, delete, force-delete and cleanup phases walked
//!   depth-first over a dependency graph
//! - **Hooks**: pre (vetoing) and before/after/on-failure (fire-and-forget)
//!   extension points around guarded transitions
//! - **Service**: the message-handling boundary tying the above together,
//!   reachable in-process or over the [`bus::MessageBus`]

pub mod bus;
pub mod cascade;
pub mod completion;
pub mod config;
pub mod error;
pub mod flow;
pub mod gate;
pub mod hooks;
pub mod logging;
pub mod resource;
pub mod scheduler;
pub mod service;
pub mod store;

pub use bus::{BusEvent, InMemoryBus, MessageBus};
pub use cascade::{CascadeEngine, CascadeParticipant, DependencyGraph};
pub use completion::{Completion, CompletionFuture};
pub use config::OrchestratorConfig;
pub use error::{OrchestrationError, Result};
pub use flow::{
    Flow, FlowChain, FlowChainBuilder, FlowChainState, FlowContext, FlowError, FlowTrigger,
    NoRollbackFlow, RollbackFlow,
};
pub use gate::{GateBuilder, OperationGate, TransitionTable, TransitionTableBuilder};
pub use hooks::{HookDecision, HookPipeline, LifecycleExtension};
pub use logging::init_structured_logging;
pub use resource::{
    Command, CommandKind, ConnectionStatus, DeletionMode, ResourceRecord, ResourceRef,
    ResourceState, StateEvent,
};
pub use scheduler::{ChainTask, SerialExecutor};
pub use service::{
    CommandReceipt, CommandReply, NullBackend, ResourceBackend, ResourceService,
    ResourceServiceBuilder,
};
pub use store::{InMemoryStore, ResourceStore};
