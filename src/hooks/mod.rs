//! # Extension Hook Pipeline
//!
//! Ordered pre/before/after/on-failure callbacks around guarded lifecycle
//! transitions (attach, detach, change-state, delete). `pre_*` hooks run in
//! the veto window before any side effect: the first veto stops the
//! remaining `pre_*` calls and the operation itself. `before_*`, `after_*`
//! and `on_*_failure` hooks are fire-and-continue; a fault inside one is
//! logged and never overturns the primary outcome.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{OrchestrationError, Result};
use crate::resource::{ResourceRecord, ResourceState, StateEvent};

/// Outcome of a `pre_*` hook. Veto is an ordinary value, not an exception
/// path.
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    Allow,
    Veto(String),
}

impl HookDecision {
    pub fn veto(reason: impl Into<String>) -> Self {
        Self::Veto(reason.into())
    }
}

/// Cross-cutting logic hooked around lifecycle transitions. Every method
/// has a permissive default, so extensions implement only what they care
/// about.
#[async_trait]
#[allow(unused_variables)]
pub trait LifecycleExtension: Send + Sync {
    /// Extension name, used in veto errors and fault logs
    fn name(&self) -> &str;

    async fn pre_attach(&self, resource: &ResourceRecord, peer: &str) -> HookDecision {
        HookDecision::Allow
    }
    async fn before_attach(&self, resource: &ResourceRecord, peer: &str) -> Result<()> {
        Ok(())
    }
    async fn after_attach(&self, resource: &ResourceRecord, peer: &str) -> Result<()> {
        Ok(())
    }
    async fn on_attach_failure(&self, resource: &ResourceRecord, peer: &str) -> Result<()> {
        Ok(())
    }

    async fn pre_detach(&self, resource: &ResourceRecord, peer: &str) -> HookDecision {
        HookDecision::Allow
    }
    async fn before_detach(&self, resource: &ResourceRecord, peer: &str) -> Result<()> {
        Ok(())
    }
    async fn after_detach(&self, resource: &ResourceRecord, peer: &str) -> Result<()> {
        Ok(())
    }
    async fn on_detach_failure(&self, resource: &ResourceRecord, peer: &str) -> Result<()> {
        Ok(())
    }

    async fn pre_change_state(
        &self,
        resource: &ResourceRecord,
        event: StateEvent,
        next: ResourceState,
    ) -> HookDecision {
        HookDecision::Allow
    }
    async fn before_change_state(
        &self,
        resource: &ResourceRecord,
        event: StateEvent,
    ) -> Result<()> {
        Ok(())
    }
    async fn after_change_state(
        &self,
        resource: &ResourceRecord,
        event: StateEvent,
        previous: ResourceState,
    ) -> Result<()> {
        Ok(())
    }
    async fn on_change_state_failure(
        &self,
        resource: &ResourceRecord,
        event: StateEvent,
    ) -> Result<()> {
        Ok(())
    }

    async fn pre_delete(&self, resource: &ResourceRecord) -> HookDecision {
        HookDecision::Allow
    }
    async fn before_delete(&self, resource: &ResourceRecord) -> Result<()> {
        Ok(())
    }
    async fn after_delete(&self, resource: &ResourceRecord) -> Result<()> {
        Ok(())
    }
    async fn on_delete_failure(&self, resource: &ResourceRecord) -> Result<()> {
        Ok(())
    }
}

/// Registration-ordered pipeline of extensions
#[derive(Clone, Default)]
pub struct HookPipeline {
    extensions: Vec<Arc<dyn LifecycleExtension>>,
}

macro_rules! emit_pre {
    ($fn_name:ident, $pipeline:expr, $($arg:expr),*) => {{
        for ext in &$pipeline.extensions {
            if let HookDecision::Veto(reason) = ext.$fn_name($($arg),*).await {
                return Err(OrchestrationError::Vetoed {
                    extension: ext.name().to_string(),
                    reason,
                });
            }
        }
        Ok(())
    }};
}

macro_rules! emit_notify {
    ($fn_name:ident, $pipeline:expr, $($arg:expr),*) => {{
        for ext in &$pipeline.extensions {
            if let Err(e) = ext.$fn_name($($arg),*).await {
                warn!(
                    extension = %ext.name(),
                    hook = stringify!($fn_name),
                    error = %e,
                    "extension hook failed, continuing"
                );
            }
        }
    }};
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension; extensions run in registration order
    pub fn register(&mut self, extension: Arc<dyn LifecycleExtension>) {
        self.extensions.push(extension);
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub async fn pre_attach(&self, resource: &ResourceRecord, peer: &str) -> Result<()> {
        emit_pre!(pre_attach, self, resource, peer)
    }

    pub async fn before_attach(&self, resource: &ResourceRecord, peer: &str) {
        emit_notify!(before_attach, self, resource, peer)
    }

    pub async fn after_attach(&self, resource: &ResourceRecord, peer: &str) {
        emit_notify!(after_attach, self, resource, peer)
    }

    pub async fn on_attach_failure(&self, resource: &ResourceRecord, peer: &str) {
        emit_notify!(on_attach_failure, self, resource, peer)
    }

    pub async fn pre_detach(&self, resource: &ResourceRecord, peer: &str) -> Result<()> {
        emit_pre!(pre_detach, self, resource, peer)
    }

    pub async fn before_detach(&self, resource: &ResourceRecord, peer: &str) {
        emit_notify!(before_detach, self, resource, peer)
    }

    pub async fn after_detach(&self, resource: &ResourceRecord, peer: &str) {
        emit_notify!(after_detach, self, resource, peer)
    }

    pub async fn on_detach_failure(&self, resource: &ResourceRecord, peer: &str) {
        emit_notify!(on_detach_failure, self, resource, peer)
    }

    pub async fn pre_change_state(
        &self,
        resource: &ResourceRecord,
        event: StateEvent,
        next: ResourceState,
    ) -> Result<()> {
        emit_pre!(pre_change_state, self, resource, event, next)
    }

    pub async fn before_change_state(&self, resource: &ResourceRecord, event: StateEvent) {
        emit_notify!(before_change_state, self, resource, event)
    }

    pub async fn after_change_state(
        &self,
        resource: &ResourceRecord,
        event: StateEvent,
        previous: ResourceState,
    ) {
        emit_notify!(after_change_state, self, resource, event, previous)
    }

    pub async fn on_change_state_failure(&self, resource: &ResourceRecord, event: StateEvent) {
        emit_notify!(on_change_state_failure, self, resource, event)
    }

    pub async fn pre_delete(&self, resource: &ResourceRecord) -> Result<()> {
        emit_pre!(pre_delete, self, resource)
    }

    pub async fn before_delete(&self, resource: &ResourceRecord) {
        emit_notify!(before_delete, self, resource)
    }

    pub async fn after_delete(&self, resource: &ResourceRecord) {
        emit_notify!(after_delete, self, resource)
    }

    pub async fn on_delete_failure(&self, resource: &ResourceRecord) {
        emit_notify!(on_delete_failure, self, resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingExtension {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        veto_attach: bool,
        fail_after: bool,
    }

    #[async_trait]
    impl LifecycleExtension for RecordingExtension {
        fn name(&self) -> &str {
            &self.name
        }

        async fn pre_attach(&self, _resource: &ResourceRecord, _peer: &str) -> HookDecision {
            self.log.lock().push(format!("{}:pre_attach", self.name));
            if self.veto_attach {
                HookDecision::veto("attach not permitted")
            } else {
                HookDecision::Allow
            }
        }

        async fn after_attach(&self, _resource: &ResourceRecord, _peer: &str) -> Result<()> {
            self.log.lock().push(format!("{}:after_attach", self.name));
            if self.fail_after {
                Err(OrchestrationError::Internal("hook fault".into()))
            } else {
                Ok(())
            }
        }
    }

    fn extension(
        name: &str,
        log: Arc<Mutex<Vec<String>>>,
        veto_attach: bool,
        fail_after: bool,
    ) -> Arc<dyn LifecycleExtension> {
        Arc::new(RecordingExtension {
            name: name.into(),
            log,
            veto_attach,
            fail_after,
        })
    }

    #[tokio::test]
    async fn test_pre_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = HookPipeline::new();
        pipeline.register(extension("first", log.clone(), false, false));
        pipeline.register(extension("second", log.clone(), false, false));

        let record = ResourceRecord::new("ps-1", "primary_storage");
        pipeline.pre_attach(&record, "cluster-1").await.unwrap();
        assert_eq!(*log.lock(), vec!["first:pre_attach", "second:pre_attach"]);
    }

    #[tokio::test]
    async fn test_veto_short_circuits_remaining_pre_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = HookPipeline::new();
        pipeline.register(extension("vetoer", log.clone(), true, false));
        pipeline.register(extension("never", log.clone(), false, false));

        let record = ResourceRecord::new("ps-1", "primary_storage");
        let err = pipeline.pre_attach(&record, "cluster-1").await.unwrap_err();
        match err {
            OrchestrationError::Vetoed { extension, reason } => {
                assert_eq!(extension, "vetoer");
                assert_eq!(reason, "attach not permitted");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*log.lock(), vec!["vetoer:pre_attach"]);
    }

    #[tokio::test]
    async fn test_faulting_notification_hook_does_not_stop_pipeline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = HookPipeline::new();
        pipeline.register(extension("flaky", log.clone(), false, true));
        pipeline.register(extension("steady", log.clone(), false, false));

        let record = ResourceRecord::new("ps-1", "primary_storage");
        pipeline.after_attach(&record, "cluster-1").await;
        assert_eq!(*log.lock(), vec!["flaky:after_attach", "steady:after_attach"]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_allows_everything() {
        let pipeline = HookPipeline::new();
        let record = ResourceRecord::new("ps-1", "primary_storage");
        assert!(pipeline.pre_delete(&record).await.is_ok());
        assert!(pipeline
            .pre_change_state(&record, StateEvent::ConnectivityUnknown, ResourceState::Unknown)
            .await
            .is_ok());
    }
}
