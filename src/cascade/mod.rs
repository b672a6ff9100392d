//! # Cascade Deletion Engine
//!
//! Phased deletion of a resource together with everything that structurally
//! depends on it. Permissive mode runs a check phase (any dependent may
//! veto) and a delete phase (depth-first, all-or-nothing); force mode runs a
//! single best-effort force-delete phase. After the primary chain
//! terminates, a cleanup phase runs asynchronously and swallows its own
//! errors.
//!
//! Concurrent cascades over overlapping resources are not deduplicated
//! here; the serialized task scheduler wrapping the call owns that at the
//! resource-id granularity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{OrchestrationError, Result};
use crate::flow::{FlowChain, NoRollbackFlow};
use crate::resource::{DeletionMode, ResourceRef};

/// Errors local to cascade traversal
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// The dependency graph is deeper than the configured limit, which in
    /// practice means it has a cycle
    #[error("dependency graph deeper than {limit} levels while deleting [{target}]")]
    DepthExceeded { target: String, limit: usize },
}

impl From<CascadeError> for OrchestrationError {
    fn from(e: CascadeError) -> Self {
        OrchestrationError::Internal(e.to_string())
    }
}

/// External lookup of structural dependents, keyed by the queried resource
/// and the issuer tag identifying the cascade caller
#[async_trait]
pub trait DependencyGraph: Send + Sync {
    async fn dependents_of(&self, resource: &ResourceRef, issuer: &str) -> Result<Vec<ResourceRef>>;
}

/// Per-resource-kind deletion behavior, registered with the engine by the
/// component owning that kind
#[async_trait]
pub trait CascadeParticipant: Send + Sync {
    /// The resource kind (issuer tag) this participant handles
    fn kind(&self) -> &str;

    /// Check phase: return an error to veto deletion of `resource`
    async fn deletion_check(&self, resource: &ResourceRef) -> Result<()>;

    /// Delete phase: delete `resource`. In force mode errors are tolerated.
    async fn delete(&self, resource: &ResourceRef, force: bool) -> Result<()>;

    /// Cleanup phase: best-effort garbage collection of residue left by
    /// `resource`; errors are logged and swallowed by the engine
    async fn cleanup(&self, resource: &ResourceRef) -> Result<()>;
}

/// The engine. Cheap to clone; clones share the participant registry.
#[derive(Clone, Default)]
pub struct CascadeEngine {
    graph: Option<Arc<dyn DependencyGraph>>,
    participants: HashMap<String, Arc<dyn CascadeParticipant>>,
    max_depth: usize,
}

impl CascadeEngine {
    pub fn new(graph: Arc<dyn DependencyGraph>, max_depth: usize) -> Self {
        Self {
            graph: Some(graph),
            participants: HashMap::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Register the participant handling a resource kind. A kind without a
    /// participant has nothing to check, delete, or clean up.
    pub fn register(&mut self, participant: Arc<dyn CascadeParticipant>) {
        self.participants
            .insert(participant.kind().to_string(), participant);
    }

    /// Delete `target`'s dependents according to `mode`. The target's own
    /// record mutation (marking it destroyed) stays with the caller, under
    /// the caller's serialization slot.
    pub async fn delete(&self, target: &ResourceRef, mode: DeletionMode) -> Result<()> {
        let dependents = Arc::new(self.collect_dependents(target).await?);
        debug!(
            target = %target.name,
            mode = ?mode,
            dependents = dependents.len(),
            "starting cascade deletion"
        );

        let (outcome_tx, outcome_rx) = tokio::sync::oneshot::channel::<Result<()>>();
        let outcome_tx = Arc::new(Mutex::new(Some(outcome_tx)));

        // Set once the permissive check phase has passed: a veto before this
        // point means nothing was touched, so there is no residue to collect.
        let check_passed = Arc::new(std::sync::atomic::AtomicBool::new(
            mode == DeletionMode::Force,
        ));

        let chain = match mode {
            DeletionMode::Permissive => {
                self.permissive_chain(target, dependents.clone(), check_passed.clone())
            }
            DeletionMode::Force => self.force_chain(dependents.clone()),
        };

        let done_tx = outcome_tx.clone();
        let chain = chain
            .done(move |_ctx| {
                if let Some(tx) = done_tx.lock().take() {
                    let _ = tx.send(Ok(()));
                }
            })
            .error(move |err, _ctx| {
                if let Some(tx) = outcome_tx.lock().take() {
                    let _ = tx.send(Err(err));
                }
            })
            .build();

        chain.start().await;
        let outcome = outcome_rx.await.unwrap_or_else(|_| {
            Err(OrchestrationError::Internal(
                "cascade chain terminated without reporting".to_string(),
            ))
        });

        // Cleanup runs fire-and-forget after every termination except an
        // untouched permissive veto, force-mode failures included.
        if outcome.is_ok() || check_passed.load(std::sync::atomic::Ordering::SeqCst) {
            let engine = self.clone();
            let cleanup_refs = dependents.clone();
            let cleanup_target = target.clone();
            tokio::spawn(async move {
                engine.run_cleanup(&cleanup_target, &cleanup_refs).await;
            });
        }

        outcome
    }

    fn permissive_chain(
        &self,
        target: &ResourceRef,
        dependents: Arc<Vec<ResourceRef>>,
        check_passed: Arc<std::sync::atomic::AtomicBool>,
    ) -> crate::flow::FlowChainBuilder {
        let check_engine = self.clone();
        let check_refs = dependents.clone();
        let delete_engine = self.clone();
        let delete_refs = dependents;

        FlowChain::builder(format!("delete-{}-{}", target.kind, target.id))
            .then(NoRollbackFlow::new("deletion-check", move |trigger, _ctx| {
                let engine = check_engine.clone();
                let refs = check_refs.clone();
                let check_passed = check_passed.clone();
                Box::pin(async move {
                    let result = engine.check_phase(&refs).await;
                    if result.is_ok() {
                        check_passed.store(true, std::sync::atomic::Ordering::SeqCst);
                    }
                    let _ = trigger.complete_with(result);
                })
            }))
            .then(NoRollbackFlow::new("deletion-delete", move |trigger, _ctx| {
                let engine = delete_engine.clone();
                let refs = delete_refs.clone();
                Box::pin(async move {
                    let result = engine.delete_phase(&refs, false).await;
                    let _ = trigger.complete_with(result);
                })
            }))
    }

    fn force_chain(&self, dependents: Arc<Vec<ResourceRef>>) -> crate::flow::FlowChainBuilder {
        let engine = self.clone();
        FlowChain::builder("force-delete").then(NoRollbackFlow::new(
            "deletion-force-delete",
            move |trigger, _ctx| {
                let engine = engine.clone();
                let refs = dependents.clone();
                Box::pin(async move {
                    let result = engine.delete_phase(&refs, true).await;
                    let _ = trigger.complete_with(result);
                })
            },
        ))
    }

    /// Depth-first collection of everything depending on `target`, deepest
    /// dependents first, the target itself excluded. Duplicate refs (diamond
    /// dependencies) are visited once.
    async fn collect_dependents(&self, target: &ResourceRef) -> Result<Vec<ResourceRef>> {
        let graph = match &self.graph {
            Some(graph) => graph.clone(),
            None => return Ok(Vec::new()),
        };

        let mut ordered: Vec<ResourceRef> = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        seen.insert(target.id);

        // (ref, depth) work list; children are prepended to get post-order
        let mut stack: Vec<(ResourceRef, usize)> = vec![(target.clone(), 0)];
        while let Some((parent, depth)) = stack.pop() {
            if depth >= self.max_depth {
                return Err(CascadeError::DepthExceeded {
                    target: target.name.clone(),
                    limit: self.max_depth,
                }
                .into());
            }
            for child in graph.dependents_of(&parent, &parent.kind).await? {
                if seen.insert(child.id) {
                    ordered.push(child.clone());
                    stack.push((child, depth + 1));
                }
            }
        }

        // deepest last in discovery order; delete deepest first
        ordered.reverse();
        Ok(ordered)
    }

    async fn check_phase(&self, refs: &[ResourceRef]) -> Result<()> {
        for r in refs {
            let Some(participant) = self.participants.get(&r.kind) else {
                debug!(kind = %r.kind, "no cascade participant for kind, skipping check");
                continue;
            };
            match participant.deletion_check(r).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(resource = %r.name, "dependent already gone, check satisfied");
                }
                Err(e) => {
                    return Err(OrchestrationError::Dependency {
                        issuer: r.kind.clone(),
                        detail: format!("dependent [{}] vetoed deletion: {e}", r.name),
                    });
                }
            }
        }
        Ok(())
    }

    async fn delete_phase(&self, refs: &[ResourceRef], force: bool) -> Result<()> {
        for r in refs {
            let Some(participant) = self.participants.get(&r.kind) else {
                debug!(kind = %r.kind, "no cascade participant for kind, skipping delete");
                continue;
            };
            match participant.delete(r, force).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(resource = %r.name, "dependent already deleted, satisfied");
                }
                Err(e) if force => {
                    warn!(
                        resource = %r.name,
                        error = %e,
                        "dependent failed to force-delete, continuing"
                    );
                }
                Err(e) => {
                    return Err(OrchestrationError::Dependency {
                        issuer: r.kind.clone(),
                        detail: format!("dependent [{}] failed to delete: {e}", r.name),
                    });
                }
            }
        }
        Ok(())
    }

    /// Cleanup is best-effort garbage collection of state already logically
    /// gone; its errors are logged, never surfaced to the caller.
    async fn run_cleanup(&self, target: &ResourceRef, refs: &[ResourceRef]) {
        for r in refs.iter().chain(std::iter::once(target)) {
            let Some(participant) = self.participants.get(&r.kind) else {
                continue;
            };
            if let Err(e) = participant.cleanup(r).await {
                warn!(resource = %r.name, error = %e, "cleanup failed, ignoring");
            }
        }
        debug!(target = %target.name, "cascade cleanup finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Static parent -> children graph for tests
    struct StaticGraph {
        edges: HashMap<Uuid, Vec<ResourceRef>>,
    }

    #[async_trait]
    impl DependencyGraph for StaticGraph {
        async fn dependents_of(
            &self,
            resource: &ResourceRef,
            _issuer: &str,
        ) -> Result<Vec<ResourceRef>> {
            Ok(self.edges.get(&resource.id).cloned().unwrap_or_default())
        }
    }

    struct CountingParticipant {
        kind: String,
        veto: Option<String>,
        fail_delete: bool,
        deleted: Arc<Mutex<Vec<String>>>,
        cleanups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CascadeParticipant for CountingParticipant {
        fn kind(&self) -> &str {
            &self.kind
        }

        async fn deletion_check(&self, resource: &ResourceRef) -> Result<()> {
            match &self.veto {
                Some(reason) => Err(OrchestrationError::Vetoed {
                    extension: resource.name.clone(),
                    reason: reason.clone(),
                }),
                None => Ok(()),
            }
        }

        async fn delete(&self, resource: &ResourceRef, _force: bool) -> Result<()> {
            if self.fail_delete {
                return Err(OrchestrationError::backend("delete", "backend down"));
            }
            self.deleted.lock().push(resource.name.clone());
            Ok(())
        }

        async fn cleanup(&self, _resource: &ResourceRef) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn make_ref(kind: &str, name: &str) -> ResourceRef {
        ResourceRef {
            id: Uuid::new_v4(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    struct Fixture {
        engine: CascadeEngine,
        target: ResourceRef,
        deleted: Arc<Mutex<Vec<String>>>,
        cleanups: Arc<AtomicUsize>,
    }

    /// target <- volume-1 <- snapshot-1, target <- volume-2
    fn fixture(veto: Option<&str>, fail_delete: bool) -> Fixture {
        let target = make_ref("primary_storage", "ps-1");
        let vol1 = make_ref("volume", "volume-1");
        let vol2 = make_ref("volume", "volume-2");
        let snap = make_ref("snapshot", "snapshot-1");

        let mut edges = HashMap::new();
        edges.insert(target.id, vec![vol1.clone(), vol2.clone()]);
        edges.insert(vol1.id, vec![snap.clone()]);

        let deleted = Arc::new(Mutex::new(Vec::new()));
        let cleanups = Arc::new(AtomicUsize::new(0));

        let mut engine = CascadeEngine::new(Arc::new(StaticGraph { edges }), 16);
        engine.register(Arc::new(CountingParticipant {
            kind: "volume".into(),
            veto: veto.map(String::from),
            fail_delete,
            deleted: deleted.clone(),
            cleanups: cleanups.clone(),
        }));
        engine.register(Arc::new(CountingParticipant {
            kind: "snapshot".into(),
            veto: None,
            fail_delete: false,
            deleted: deleted.clone(),
            cleanups: cleanups.clone(),
        }));
        engine.register(Arc::new(CountingParticipant {
            kind: "primary_storage".into(),
            veto: None,
            fail_delete: false,
            deleted: deleted.clone(),
            cleanups: cleanups.clone(),
        }));

        Fixture {
            engine,
            target,
            deleted,
            cleanups,
        }
    }

    #[tokio::test]
    async fn test_permissive_deletes_dependents_depth_first() {
        let fx = fixture(None, false);
        fx.engine
            .delete(&fx.target, DeletionMode::Permissive)
            .await
            .unwrap();

        let deleted = fx.deleted.lock().clone();
        assert_eq!(deleted.len(), 3);
        // snapshot hangs off volume-1, so it must go first
        let snap_pos = deleted.iter().position(|n| n == "snapshot-1").unwrap();
        let vol1_pos = deleted.iter().position(|n| n == "volume-1").unwrap();
        assert!(snap_pos < vol1_pos);

        // cleanup runs async after the chain
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(fx.cleanups.load(Ordering::SeqCst), 4); // 3 dependents + target
    }

    #[tokio::test]
    async fn test_permissive_veto_blocks_delete_phase_and_cleanup() {
        let fx = fixture(Some("volume still in use"), false);
        let err = fx
            .engine
            .delete(&fx.target, DeletionMode::Permissive)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::Dependency { .. }));
        assert!(fx.deleted.lock().is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(fx.cleanups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_force_tolerates_dependent_failures_and_still_cleans_up() {
        let fx = fixture(None, true); // volume deletes fail
        fx.engine
            .delete(&fx.target, DeletionMode::Force)
            .await
            .unwrap();

        // snapshot still deleted even though volumes failed
        assert_eq!(fx.deleted.lock().clone(), vec!["snapshot-1".to_string()]);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(fx.cleanups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_empty_dependency_set_trivially_succeeds() {
        let target = make_ref("primary_storage", "lonely");
        let engine = CascadeEngine::new(
            Arc::new(StaticGraph {
                edges: HashMap::new(),
            }),
            16,
        );
        engine
            .delete(&target, DeletionMode::Permissive)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_deleted_dependent_is_satisfied() {
        struct GoneParticipant;

        #[async_trait]
        impl CascadeParticipant for GoneParticipant {
            fn kind(&self) -> &str {
                "volume"
            }
            async fn deletion_check(&self, resource: &ResourceRef) -> Result<()> {
                Err(OrchestrationError::ResourceNotFound { id: resource.id })
            }
            async fn delete(&self, resource: &ResourceRef, _force: bool) -> Result<()> {
                Err(OrchestrationError::ResourceNotFound { id: resource.id })
            }
            async fn cleanup(&self, _resource: &ResourceRef) -> Result<()> {
                Ok(())
            }
        }

        let target = make_ref("primary_storage", "ps-1");
        let vol = make_ref("volume", "ghost");
        let mut edges = HashMap::new();
        edges.insert(target.id, vec![vol]);

        let mut engine = CascadeEngine::new(Arc::new(StaticGraph { edges }), 16);
        engine.register(Arc::new(GoneParticipant));
        engine
            .delete(&target, DeletionMode::Permissive)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cyclic_graph_hits_depth_limit() {
        let a = make_ref("volume", "a");
        // every visit reports a fresh dependent, so only the depth limit
        // stops the traversal
        struct CycleGraph;

        #[async_trait]
        impl DependencyGraph for CycleGraph {
            async fn dependents_of(
                &self,
                resource: &ResourceRef,
                _issuer: &str,
            ) -> Result<Vec<ResourceRef>> {
                Ok(vec![ResourceRef {
                    id: Uuid::new_v4(),
                    kind: "volume".into(),
                    name: format!("{}-child", resource.name),
                }])
            }
        }

        let engine = CascadeEngine::new(Arc::new(CycleGraph), 4);
        let err = engine
            .delete(&a, DeletionMode::Permissive)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Internal(_)));
    }
}
