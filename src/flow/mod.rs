//! # Flow Chain Executor
//!
//! Ordered, rollback-aware sequencing for multi-step side-effecting
//! operations. A chain runs its steps strictly in declaration order; each
//! step signals exactly one of `next()` or `fail(..)` through its
//! [`FlowTrigger`]. On failure, already-completed rollback-capable steps are
//! rolled back in reverse order before the single error handler runs. A
//! chain terminates exactly once, through either its done handler or its
//! error handler, never both.

mod chain;
mod context;

pub use chain::{FlowChain, FlowChainBuilder, FlowChainState};
pub use context::FlowContext;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{OrchestrationError, Result};

/// Errors local to chain mechanics (distinct from the operation errors a
/// step fails with)
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The step's trigger was signaled a second time
    #[error("flow step [{step}] signaled its trigger more than once")]
    AlreadySignaled { step: String },
}

pub(crate) enum StepSignal {
    Next,
    Fail(OrchestrationError),
}

/// Handed to each step; the step must eventually call exactly one of
/// [`FlowTrigger::next`] or [`FlowTrigger::fail`]. The trigger may be moved
/// into spawned work or completions; the chain waits for the signal, not for
/// the step's `run` to return.
#[derive(Clone)]
pub struct FlowTrigger {
    step: String,
    slot: Arc<Mutex<Option<oneshot::Sender<StepSignal>>>>,
}

impl FlowTrigger {
    pub(crate) fn new(step: String) -> (Self, oneshot::Receiver<StepSignal>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                step,
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Advance the chain to the next step
    pub fn next(&self) -> std::result::Result<(), FlowError> {
        self.signal(StepSignal::Next)
    }

    /// Abort the chain with `error`, rolling back completed steps
    pub fn fail(&self, error: OrchestrationError) -> std::result::Result<(), FlowError> {
        self.signal(StepSignal::Fail(error))
    }

    /// Convenience for the common completion-bridging pattern
    pub fn complete_with(&self, result: Result<()>) -> std::result::Result<(), FlowError> {
        match result {
            Ok(()) => self.next(),
            Err(e) => self.fail(e),
        }
    }

    fn signal(&self, signal: StepSignal) -> std::result::Result<(), FlowError> {
        let sender = self.slot.lock().take();
        match sender {
            Some(tx) => {
                // Receiver gone means the chain already terminated elsewhere
                let _ = tx.send(signal);
                Ok(())
            }
            // A second signal is a step bug that must surface, not vanish
            None => Err(FlowError::AlreadySignaled {
                step: self.step.clone(),
            }),
        }
    }
}

/// A named unit within a flow chain
#[async_trait]
pub trait Flow: Send + Sync {
    fn name(&self) -> &str;

    /// Run the step. Signal the outcome through `trigger`; returning from
    /// this method does not advance the chain.
    async fn run(&self, trigger: FlowTrigger, ctx: FlowContext);

    /// Whether this step can compensate for itself once completed. Steps
    /// that answer false are skipped during rollback.
    fn can_rollback(&self) -> bool {
        false
    }

    /// Undo this step's committed effect. Only called when
    /// [`Flow::can_rollback`] is true and the step completed before a later
    /// step failed. A rollback error is logged and does not stop the
    /// remaining rollbacks.
    async fn rollback(&self, _ctx: FlowContext) -> Result<()> {
        Ok(())
    }
}

type FlowRunFn =
    dyn Fn(FlowTrigger, FlowContext) -> BoxFuture<'static, ()> + Send + Sync;
type FlowRollbackFn = dyn Fn(FlowContext) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Closure-backed step without rollback capability
pub struct NoRollbackFlow {
    name: String,
    run: Box<FlowRunFn>,
}

impl NoRollbackFlow {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(FlowTrigger, FlowContext) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }
}

#[async_trait]
impl Flow for NoRollbackFlow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, trigger: FlowTrigger, ctx: FlowContext) {
        (self.run)(trigger, ctx).await;
    }
}

/// Closure-backed step with a compensating rollback
pub struct RollbackFlow {
    name: String,
    run: Box<FlowRunFn>,
    rollback: Box<FlowRollbackFn>,
}

impl RollbackFlow {
    pub fn new<F, R>(name: impl Into<String>, run: F, rollback: R) -> Self
    where
        F: Fn(FlowTrigger, FlowContext) -> BoxFuture<'static, ()> + Send + Sync + 'static,
        R: Fn(FlowContext) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
            rollback: Box::new(rollback),
        }
    }
}

#[async_trait]
impl Flow for RollbackFlow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, trigger: FlowTrigger, ctx: FlowContext) {
        (self.run)(trigger, ctx).await;
    }

    fn can_rollback(&self) -> bool {
        true
    }

    async fn rollback(&self, ctx: FlowContext) -> Result<()> {
        (self.rollback)(ctx).await
    }
}
