//! # Resource Service
//!
//! The per-resource message-handling boundary: inbound commands pass the
//! operation gate, acquire a serialization slot keyed by resource id, run
//! the type-specific handler wrapped in the extension hook pipeline, and
//! reply to the caller. Destructive commands go through the cascade
//! deletion engine. Any unexpected fault is converted into an error reply
//! so the caller never hangs.

mod backend;

pub use backend::{NullBackend, ResourceBackend};

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{BusEvent, MessageBus};
use crate::cascade::CascadeEngine;
use crate::completion::Completion;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, Result};
use crate::gate::{OperationGate, TransitionTable};
use crate::hooks::HookPipeline;
use crate::resource::{
    default_operation_gate, default_transition_table, Command, CommandKind, ConnectionStatus,
    ResourceRecord, ResourceState, StateEvent,
};
use crate::scheduler::SerialExecutor;
use crate::store::ResourceStore;

/// Reply to a single command; the at-most-one response of the transport
/// contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    pub request_id: Uuid,
    pub resource_id: Uuid,
    pub command: CommandKind,
    pub success: bool,
    pub error: Option<String>,
    pub state: ResourceState,
    pub payload: Value,
}

/// Pending reply handle returned by [`ResourceService::submit`]
pub struct CommandReceipt {
    request_id: Uuid,
    resource_id: Uuid,
    command: CommandKind,
    rx: oneshot::Receiver<CommandReply>,
}

impl CommandReceipt {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Wait for the reply. If the handler was lost to an unexpected fault,
    /// the caller still gets a generic internal-error reply rather than a
    /// hang.
    pub async fn wait(self) -> CommandReply {
        match self.rx.await {
            Ok(reply) => reply,
            Err(_) => CommandReply {
                request_id: self.request_id,
                resource_id: self.resource_id,
                command: self.command,
                success: false,
                error: Some(
                    OrchestrationError::Internal("command handler dropped its reply".into())
                        .to_string(),
                ),
                state: ResourceState::Unknown,
                payload: Value::Null,
            },
        }
    }
}

/// Builder wiring the service's collaborators explicitly
pub struct ResourceServiceBuilder {
    record: ResourceRecord,
    gate: OperationGate,
    transitions: TransitionTable,
    executor: SerialExecutor,
    hooks: HookPipeline,
    cascade: CascadeEngine,
    backend: Option<Arc<dyn ResourceBackend>>,
    store: Option<Arc<dyn ResourceStore>>,
    bus: Option<Arc<dyn MessageBus>>,
    config: OrchestratorConfig,
}

impl ResourceServiceBuilder {
    pub fn new(record: ResourceRecord) -> Self {
        Self {
            record,
            gate: default_operation_gate(),
            transitions: default_transition_table(),
            executor: SerialExecutor::new(),
            hooks: HookPipeline::new(),
            cascade: CascadeEngine::default(),
            backend: None,
            store: None,
            bus: None,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn gate(mut self, gate: OperationGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn transitions(mut self, transitions: TransitionTable) -> Self {
        self.transitions = transitions;
        self
    }

    pub fn executor(mut self, executor: SerialExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn hooks(mut self, hooks: HookPipeline) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn cascade(mut self, cascade: CascadeEngine) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ResourceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn build(self) -> Result<ResourceService> {
        let backend = self
            .backend
            .ok_or_else(|| OrchestrationError::Configuration("backend is required".into()))?;
        let store = self
            .store
            .ok_or_else(|| OrchestrationError::Configuration("store is required".into()))?;
        let bus = self
            .bus
            .ok_or_else(|| OrchestrationError::Configuration("bus is required".into()))?;

        store.persist(self.record.clone()).await?;

        Ok(ResourceService {
            record: Arc::new(Mutex::new(self.record)),
            gate: Arc::new(self.gate),
            transitions: Arc::new(self.transitions),
            executor: self.executor,
            hooks: self.hooks,
            cascade: self.cascade,
            backend,
            store,
            bus,
            config: self.config,
        })
    }
}

/// Orchestrates one resource's lifecycle. Cheap to clone; clones share the
/// record and collaborators.
#[derive(Clone)]
pub struct ResourceService {
    record: Arc<Mutex<ResourceRecord>>,
    gate: Arc<OperationGate>,
    transitions: Arc<TransitionTable>,
    executor: SerialExecutor,
    hooks: HookPipeline,
    cascade: CascadeEngine,
    backend: Arc<dyn ResourceBackend>,
    store: Arc<dyn ResourceStore>,
    bus: Arc<dyn MessageBus>,
    config: OrchestratorConfig,
}

impl ResourceService {
    pub fn builder(record: ResourceRecord) -> ResourceServiceBuilder {
        ResourceServiceBuilder::new(record)
    }

    pub fn resource_id(&self) -> Uuid {
        self.record.lock().id
    }

    pub fn current_state(&self) -> ResourceState {
        self.record.lock().state
    }

    pub fn current_status(&self) -> ConnectionStatus {
        self.record.lock().status
    }

    fn sync_signature(&self) -> String {
        format!("resource-{}", self.resource_id())
    }

    /// Submit a command. Admission and validation errors are rejected here,
    /// before any scheduler task starts; everything else is answered
    /// asynchronously through the receipt.
    pub fn submit(&self, command: Command) -> CommandReceipt {
        let request_id = Uuid::new_v4();
        let resource_id = self.resource_id();
        let kind = command.kind();
        let (tx, rx) = oneshot::channel();
        let receipt = CommandReceipt {
            request_id,
            resource_id,
            command: kind,
            rx,
        };

        if let Err(e) = self.admit(&command) {
            debug!(resource_id = %resource_id, command = %kind, error = %e, "command rejected");
            let _ = tx.send(self.error_reply(request_id, kind, &e));
            return receipt;
        }

        let service = self.clone();
        self.executor.submit_fn(
            format!("dispatch-{kind}-{resource_id}"),
            self.config.api_worker_signature.clone(),
            self.config.api_worker_count,
            move || {
                Box::pin(async move {
                    service.dispatch(request_id, command, tx).await;
                })
            },
        );
        receipt
    }

    /// Gate check plus input validation, synchronous and side-effect-free
    fn admit(&self, command: &Command) -> Result<()> {
        match command {
            Command::Attach { peer } | Command::Detach { peer } if peer.is_empty() => {
                return Err(OrchestrationError::Validation("peer must not be empty".into()));
            }
            Command::Migrate { target_host } if target_host.is_empty() => {
                return Err(OrchestrationError::Validation(
                    "target host must not be empty".into(),
                ));
            }
            _ => {}
        }
        self.gate.check(command.kind(), self.current_state())
    }

    /// Route an admitted command: mutating commands take the resource's
    /// serialization slot, read-only commands run on the api worker
    async fn dispatch(&self, request_id: Uuid, command: Command, tx: oneshot::Sender<CommandReply>) {
        let kind = command.kind();
        if kind.is_mutating() {
            let service = self.clone();
            self.executor.submit_fn(
                format!("{kind}-{}", self.resource_id()),
                self.sync_signature(),
                1,
                move || {
                    Box::pin(async move {
                        let reply = service.execute(request_id, command).await;
                        let _ = tx.send(reply);
                    })
                },
            );
        } else {
            let reply = self.execute(request_id, command).await;
            let _ = tx.send(reply);
        }
    }

    async fn execute(&self, request_id: Uuid, command: Command) -> CommandReply {
        let kind = command.kind();
        match self.execute_inner(&command).await {
            Ok(payload) => {
                info!(
                    resource_id = %self.resource_id(),
                    command = %kind,
                    state = %self.current_state(),
                    "command completed"
                );
                CommandReply {
                    request_id,
                    resource_id: self.resource_id(),
                    command: kind,
                    success: true,
                    error: None,
                    state: self.current_state(),
                    payload,
                }
            }
            Err(e) => {
                warn!(
                    resource_id = %self.resource_id(),
                    command = %kind,
                    error = %e,
                    "command failed"
                );
                self.error_reply(request_id, kind, &e)
            }
        }
    }

    async fn execute_inner(&self, command: &Command) -> Result<Value> {
        match command {
            Command::StartNewInstance | Command::Start => self.handle_start().await,
            Command::Stop => self.handle_stop().await,
            Command::Reboot => self.handle_reboot().await,
            Command::Connect => self.handle_connect().await,
            Command::Attach { peer } => self.handle_attach(peer).await,
            Command::Detach { peer } => self.handle_detach(peer).await,
            Command::ChangeState { event } => self.handle_change_state(*event).await,
            Command::Destroy { mode } => self.handle_destroy(*mode).await,
            Command::Migrate { target_host } => self.handle_migrate(target_host).await,
            Command::GetMigrationTarget => self.handle_migration_target(),
        }
    }

    fn error_reply(
        &self,
        request_id: Uuid,
        command: CommandKind,
        error: &OrchestrationError,
    ) -> CommandReply {
        CommandReply {
            request_id,
            resource_id: self.resource_id(),
            command,
            success: false,
            error: Some(error.to_string()),
            state: self.current_state(),
            payload: Value::Null,
        }
    }

    /// Apply a mutation to the record, persist it, and keep the refreshed
    /// copy. Callers hold the resource's serialization slot.
    async fn mutate_record(
        &self,
        mutate: impl FnOnce(&mut ResourceRecord),
    ) -> Result<ResourceRecord> {
        let mut copy = self.record.lock().clone();
        mutate(&mut copy);
        let refreshed = self.store.update_and_refresh(copy).await?;
        *self.record.lock() = refreshed.clone();
        Ok(refreshed)
    }

    async fn reload_record(&self) -> Result<ResourceRecord> {
        let refreshed = self.store.reload(self.resource_id()).await?;
        *self.record.lock() = refreshed.clone();
        Ok(refreshed)
    }

    /// Run a backend operation and wait for its completion, wrapping its
    /// failure with the aborted operation's name
    async fn backend_call(
        &self,
        operation: &str,
        call: impl FnOnce(&dyn ResourceBackend, &ResourceRecord, Completion),
    ) -> Result<()> {
        let (completion, future) = Completion::channel();
        let record = self.record.lock().clone();
        call(self.backend.as_ref(), &record, completion);
        future.wait().await.map_err(|e| match e {
            OrchestrationError::Backend { .. } => e,
            other => OrchestrationError::backend(operation, other),
        })
    }

    async fn publish(&self, event: BusEvent) {
        if let Err(e) = self.bus.publish(event).await {
            warn!(resource_id = %self.resource_id(), error = %e, "failed to publish event");
        }
    }

    async fn handle_start(&self) -> Result<Value> {
        let prior = self.current_state();
        self.mutate_record(|r| r.state = ResourceState::Starting)
            .await?;

        match self.backend_call("start", |b, r, c| b.start(r, c)).await {
            Ok(()) => {
                self.mutate_record(|r| r.state = ResourceState::Running)
                    .await?;
                self.publish(BusEvent::success(
                    "resource.started",
                    self.resource_id(),
                    Value::Null,
                ))
                .await;
                Ok(Value::Null)
            }
            Err(e) => {
                self.mutate_record(|r| r.state = prior).await?;
                self.publish(BusEvent::failure("resource.started", self.resource_id(), &e))
                    .await;
                Err(e)
            }
        }
    }

    async fn handle_stop(&self) -> Result<Value> {
        let prior = self.current_state();
        self.mutate_record(|r| r.state = ResourceState::Stopping)
            .await?;

        match self.backend_call("stop", |b, r, c| b.stop(r, c)).await {
            Ok(()) => {
                self.mutate_record(|r| r.state = ResourceState::Stopped)
                    .await?;
                self.publish(BusEvent::success(
                    "resource.stopped",
                    self.resource_id(),
                    Value::Null,
                ))
                .await;
                Ok(Value::Null)
            }
            Err(e) => {
                self.mutate_record(|r| r.state = prior).await?;
                self.publish(BusEvent::failure("resource.stopped", self.resource_id(), &e))
                    .await;
                Err(e)
            }
        }
    }

    async fn handle_reboot(&self) -> Result<Value> {
        let prior = self.current_state();
        self.mutate_record(|r| r.state = ResourceState::Rebooting)
            .await?;

        match self.backend_call("reboot", |b, r, c| b.reboot(r, c)).await {
            Ok(()) => {
                self.mutate_record(|r| r.state = ResourceState::Running)
                    .await?;
                self.publish(BusEvent::success(
                    "resource.rebooted",
                    self.resource_id(),
                    Value::Null,
                ))
                .await;
                Ok(Value::Null)
            }
            Err(e) => {
                self.mutate_record(|r| r.state = prior).await?;
                self.publish(BusEvent::failure("resource.rebooted", self.resource_id(), &e))
                    .await;
                Err(e)
            }
        }
    }

    async fn handle_connect(&self) -> Result<Value> {
        self.mutate_record(|r| r.status = ConnectionStatus::Connecting)
            .await?;

        match self.backend_call("connect", |b, r, c| b.connect(r, c)).await {
            Ok(()) => {
                self.mutate_record(|r| r.status = ConnectionStatus::Connected)
                    .await?;
                debug!(resource_id = %self.resource_id(), "successfully connected resource");
                Ok(json!({ "connected": true }))
            }
            Err(e) => {
                self.mutate_record(|r| r.status = ConnectionStatus::Disconnected)
                    .await?;
                debug!(resource_id = %self.resource_id(), error = %e, "failed to connect resource");
                Err(e)
            }
        }
    }

    async fn handle_attach(&self, peer: &str) -> Result<Value> {
        let record = self.record.lock().clone();
        if record.is_attached_to(peer) {
            return Err(OrchestrationError::Validation(format!(
                "resource is already attached to [{peer}]"
            )));
        }

        // veto window: no side effects have happened yet
        self.hooks.pre_attach(&record, peer).await?;
        self.hooks.before_attach(&record, peer).await;

        match self
            .backend_call("attach", |b, r, c| b.attach(r, peer, c))
            .await
        {
            Ok(()) => {
                let peer_owned = peer.to_string();
                self.mutate_record(|r| r.attachments.push(peer_owned))
                    .await?;
                let refreshed = self.reload_record().await?;
                self.hooks.after_attach(&refreshed, peer).await;
                self.publish(BusEvent::success(
                    "resource.attached",
                    self.resource_id(),
                    json!({ "peer": peer }),
                ))
                .await;
                Ok(json!({ "peer": peer }))
            }
            Err(e) => {
                let record = self.record.lock().clone();
                self.hooks.on_attach_failure(&record, peer).await;
                self.publish(BusEvent::failure("resource.attached", self.resource_id(), &e))
                    .await;
                Err(e)
            }
        }
    }

    async fn handle_detach(&self, peer: &str) -> Result<Value> {
        let record = self.record.lock().clone();
        if !record.is_attached_to(peer) {
            return Err(OrchestrationError::Validation(format!(
                "resource is not attached to [{peer}]"
            )));
        }

        self.hooks.pre_detach(&record, peer).await?;
        self.hooks.before_detach(&record, peer).await;

        match self
            .backend_call("detach", |b, r, c| b.detach(r, peer, c))
            .await
        {
            Ok(()) => {
                let peer_owned = peer.to_string();
                self.mutate_record(|r| r.attachments.retain(|p| *p != peer_owned))
                    .await?;
                let refreshed = self.reload_record().await?;
                self.hooks.after_detach(&refreshed, peer).await;
                self.publish(BusEvent::success(
                    "resource.detached",
                    self.resource_id(),
                    json!({ "peer": peer }),
                ))
                .await;
                Ok(json!({ "peer": peer }))
            }
            Err(e) => {
                let record = self.record.lock().clone();
                self.hooks.on_detach_failure(&record, peer).await;
                self.publish(BusEvent::failure("resource.detached", self.resource_id(), &e))
                    .await;
                Err(e)
            }
        }
    }

    async fn handle_change_state(&self, event: StateEvent) -> Result<Value> {
        let record = self.record.lock().clone();
        let previous = record.state;
        let next = event.target_state();

        self.hooks.pre_change_state(&record, event, next).await?;
        self.hooks.before_change_state(&record, event).await;

        match self.mutate_record(|r| r.state = next).await {
            Ok(refreshed) => {
                self.hooks
                    .after_change_state(&refreshed, event, previous)
                    .await;
                self.publish(BusEvent::success(
                    "resource.state_changed",
                    self.resource_id(),
                    json!({ "from": previous, "to": next, "event": event }),
                ))
                .await;
                Ok(json!({ "from": previous, "to": next }))
            }
            Err(e) => {
                let record = self.record.lock().clone();
                self.hooks.on_change_state_failure(&record, event).await;
                self.publish(BusEvent::failure(
                    "resource.state_changed",
                    self.resource_id(),
                    &e,
                ))
                .await;
                Err(e)
            }
        }
    }

    async fn handle_destroy(&self, mode: crate::resource::DeletionMode) -> Result<Value> {
        let record = self.record.lock().clone();

        self.hooks.pre_delete(&record).await?;
        self.hooks.before_delete(&record).await;

        let result: Result<()> = async {
            self.cascade.delete(&record.as_ref(), mode).await?;
            self.backend_call("delete_bits", |b, r, c| b.delete_bits(r, c))
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                let refreshed = self
                    .mutate_record(|r| r.state = ResourceState::Destroyed)
                    .await?;
                self.hooks.after_delete(&refreshed).await;
                self.publish(BusEvent::success(
                    "resource.deleted",
                    self.resource_id(),
                    json!({ "mode": mode }),
                ))
                .await;
                Ok(Value::Null)
            }
            Err(e) => {
                let record = self.record.lock().clone();
                self.hooks.on_delete_failure(&record).await;
                self.publish(BusEvent::failure("resource.deleted", self.resource_id(), &e))
                    .await;
                Err(e)
            }
        }
    }

    async fn handle_migrate(&self, target_host: &str) -> Result<Value> {
        let prior = self.current_state();
        self.mutate_record(|r| r.state = ResourceState::Migrating)
            .await?;

        match self
            .backend_call("migrate", |b, r, c| b.migrate(r, target_host, c))
            .await
        {
            Ok(()) => {
                self.mutate_record(|r| r.state = ResourceState::Running)
                    .await?;
                self.publish(BusEvent::success(
                    "resource.migrated",
                    self.resource_id(),
                    json!({ "target_host": target_host }),
                ))
                .await;
                Ok(json!({ "target_host": target_host }))
            }
            Err(e) => {
                self.mutate_record(|r| r.state = prior).await?;
                self.publish(BusEvent::failure("resource.migrated", self.resource_id(), &e))
                    .await;
                Err(e)
            }
        }
    }

    fn handle_migration_target(&self) -> Result<Value> {
        let record = self.record.lock().clone();
        let candidates = self.backend.migration_candidates(&record);
        Ok(json!({ "candidates": candidates }))
    }

    /// Intake for lifecycle events reported from outside the command path.
    /// The transition table decides whether anything happens; when it does,
    /// the transition runs under the resource's serialization slot through
    /// the same hook-guarded path as an administrative state change, so
    /// extensions observe monitoring-driven transitions too.
    pub fn on_state_event(&self, event: StateEvent) -> oneshot::Receiver<Result<ResourceState>> {
        let (tx, rx) = oneshot::channel();
        let service = self.clone();
        self.executor.submit_fn(
            format!("state-event-{event}-{}", self.resource_id()),
            self.sync_signature(),
            1,
            move || {
                Box::pin(async move {
                    let current = service.current_state();
                    if !service.transitions.needs_transition(event, current) {
                        debug!(
                            resource_id = %service.resource_id(),
                            event = %event,
                            state = %current,
                            "event requires no transition"
                        );
                        let _ = tx.send(Ok(current));
                        return;
                    }

                    let result = service
                        .handle_change_state(event)
                        .await
                        .map(|_| event.target_state());
                    let _ = tx.send(result);
                })
            },
        );
        rx
    }

    /// Register this service on the bus so commands can be routed to it by
    /// resource id
    pub async fn register_on_bus(&self) -> Result<()> {
        let service = self.clone();
        let service_id = self.resource_id().to_string();
        self.bus
            .register_service(
                &service_id,
                Arc::new(move |request: Value| -> BoxFuture<'static, Result<Value>> {
                    let service = service.clone();
                    Box::pin(async move {
                        let command: Command = serde_json::from_value(request).map_err(|e| {
                            OrchestrationError::Validation(format!("malformed command: {e}"))
                        })?;
                        let reply = service.submit(command).wait().await;
                        serde_json::to_value(reply).map_err(|e| {
                            OrchestrationError::Internal(format!("unserializable reply: {e}"))
                        })
                    })
                }),
            )
            .await
    }
}
