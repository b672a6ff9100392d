use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::OrchestrationError;

use super::context::FlowContext;
use super::{Flow, FlowTrigger, StepSignal};

/// Chain lifecycle. Terminal exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowChainState {
    Idle,
    Running,
    Completed,
    Failed,
}

type DoneHandler = Box<dyn FnOnce(FlowContext) + Send + Sync>;
type ErrorHandler = Box<dyn FnOnce(OrchestrationError, FlowContext) + Send + Sync>;

/// Builder for [`FlowChain`]
pub struct FlowChainBuilder {
    name: String,
    flows: Vec<Arc<dyn Flow>>,
    done: Option<DoneHandler>,
    error: Option<ErrorHandler>,
    ctx: FlowContext,
}

impl FlowChainBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flows: Vec::new(),
            done: None,
            error: None,
            ctx: FlowContext::new(),
        }
    }

    /// Append a step; steps run in the order they are appended
    pub fn then(mut self, flow: impl Flow + 'static) -> Self {
        self.flows.push(Arc::new(flow));
        self
    }

    pub fn then_arc(mut self, flow: Arc<dyn Flow>) -> Self {
        self.flows.push(flow);
        self
    }

    /// The single handler invoked when the last step advances
    pub fn done<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(FlowContext) + Send + Sync + 'static,
    {
        self.done = Some(Box::new(handler));
        self
    }

    /// The single handler invoked when any step fails, after rollback
    pub fn error<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(OrchestrationError, FlowContext) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(handler));
        self
    }

    /// Seed the shared context before the chain starts
    pub fn with_context(self, key: impl Into<String>, value: impl serde::Serialize) -> Self {
        self.ctx.put(key, value);
        self
    }

    pub fn build(self) -> FlowChain {
        FlowChain {
            name: self.name,
            flows: self.flows,
            done: self.done,
            error: self.error,
            ctx: self.ctx,
            state: FlowChainState::Idle,
        }
    }
}

/// An ordered, rollback-aware sequence of steps implementing one multi-step
/// operation
pub struct FlowChain {
    name: String,
    flows: Vec<Arc<dyn Flow>>,
    done: Option<DoneHandler>,
    error: Option<ErrorHandler>,
    ctx: FlowContext,
    state: FlowChainState,
}

impl FlowChain {
    pub fn builder(name: impl Into<String>) -> FlowChainBuilder {
        FlowChainBuilder::new(name)
    }

    pub fn state(&self) -> FlowChainState {
        self.state
    }

    /// Run the chain to termination. Consumes the chain, so a terminated
    /// chain cannot be restarted; the final state is returned for callers
    /// that want it beyond their handlers.
    pub async fn start(mut self) -> FlowChainState {
        self.state = FlowChainState::Running;
        debug!(chain = %self.name, steps = self.flows.len(), "starting flow chain");

        let mut completed: Vec<Arc<dyn Flow>> = Vec::new();

        for flow in self.flows.iter().cloned() {
            let (trigger, receiver) = FlowTrigger::new(flow.name().to_string());
            flow.run(trigger, self.ctx.clone()).await;

            let signal = match receiver.await {
                Ok(signal) => signal,
                // Every trigger handle dropped without a signal; the step can
                // never advance the chain, so fail loudly instead of hanging.
                Err(_) => StepSignal::Fail(OrchestrationError::Internal(format!(
                    "flow step [{}] dropped its trigger without signaling",
                    flow.name()
                ))),
            };

            match signal {
                StepSignal::Next => {
                    debug!(chain = %self.name, step = %flow.name(), "step completed");
                    completed.push(flow);
                }
                StepSignal::Fail(err) => {
                    warn!(
                        chain = %self.name,
                        step = %flow.name(),
                        error = %err,
                        "step failed, rolling back"
                    );
                    self.rollback(&completed).await;
                    self.state = FlowChainState::Failed;
                    if let Some(handler) = self.error.take() {
                        handler(err, self.ctx.clone());
                    }
                    return self.state;
                }
            }
        }

        self.state = FlowChainState::Completed;
        debug!(chain = %self.name, "flow chain completed");
        if let Some(handler) = self.done.take() {
            handler(self.ctx.clone());
        }
        self.state
    }

    /// Roll back completed rollback-capable steps in reverse order
    async fn rollback(&self, completed: &[Arc<dyn Flow>]) {
        for flow in completed.iter().rev() {
            if !flow.can_rollback() {
                debug!(chain = %self.name, step = %flow.name(), "skipping non-rollback step");
                continue;
            }
            if let Err(e) = flow.rollback(self.ctx.clone()).await {
                error!(
                    chain = %self.name,
                    step = %flow.name(),
                    error = %e,
                    "rollback failed, continuing with remaining rollbacks"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{NoRollbackFlow, RollbackFlow};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_step(
        name: &str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    ) -> NoRollbackFlow {
        let step = name.to_string();
        NoRollbackFlow::new(name, move |trigger, _ctx| {
            let log = log.clone();
            let step = step.clone();
            let fail = fail;
            Box::pin(async move {
                log.lock().push(format!("run:{step}"));
                if fail {
                    let _ = trigger.fail(OrchestrationError::Internal(format!("{step} failed")));
                } else {
                    let _ = trigger.next();
                }
            })
        })
    }

    fn rollback_step(name: &str, log: Arc<Mutex<Vec<String>>>) -> RollbackFlow {
        let run_log = log.clone();
        let run_name = name.to_string();
        let rb_name = name.to_string();
        RollbackFlow::new(
            name,
            move |trigger, _ctx| {
                let log = run_log.clone();
                let step = run_name.clone();
                Box::pin(async move {
                    log.lock().push(format!("run:{step}"));
                    let _ = trigger.next();
                })
            },
            move |_ctx| {
                let log = log.clone();
                let step = rb_name.clone();
                Box::pin(async move {
                    log.lock().push(format!("rollback:{step}"));
                    Ok(())
                })
            },
        )
    }

    #[tokio::test]
    async fn test_all_next_invokes_done_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let done_count = Arc::new(AtomicUsize::new(0));
        let error_count = Arc::new(AtomicUsize::new(0));

        let dc = done_count.clone();
        let ec = error_count.clone();
        let state = FlowChain::builder("happy-path")
            .then(recording_step("a", log.clone(), false))
            .then(recording_step("b", log.clone(), false))
            .done(move |_| {
                dc.fetch_add(1, Ordering::SeqCst);
            })
            .error(move |_, _| {
                ec.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .start()
            .await;

        assert_eq!(state, FlowChainState::Completed);
        assert_eq!(done_count.load(Ordering::SeqCst), 1);
        assert_eq!(error_count.load(Ordering::SeqCst), 0);
        assert_eq!(*log.lock(), vec!["run:a", "run:b"]);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_capable_steps_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen_error = Arc::new(Mutex::new(None));

        let se = seen_error.clone();
        let state = FlowChain::builder("aborted")
            .then(rollback_step("alloc", log.clone()))
            .then(recording_step("readonly", log.clone(), false))
            .then(rollback_step("commit", log.clone()))
            .then(recording_step("boom", log.clone(), true))
            .done(|_| panic!("done handler must not run"))
            .error(move |err, _| {
                *se.lock() = Some(err);
            })
            .build()
            .start()
            .await;

        assert_eq!(state, FlowChainState::Failed);
        assert_eq!(
            *log.lock(),
            vec![
                "run:alloc",
                "run:readonly",
                "run:commit",
                "run:boom",
                "rollback:commit",
                "rollback:alloc",
            ]
        );
        assert!(seen_error.lock().is_some());
    }

    #[tokio::test]
    async fn test_failing_first_step_rolls_back_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let state = FlowChain::builder("immediate-failure")
            .then(recording_step("boom", log.clone(), true))
            .then(rollback_step("never", log.clone()))
            .error(|_, _| {})
            .build()
            .start()
            .await;

        assert_eq!(state, FlowChainState::Failed);
        assert_eq!(*log.lock(), vec!["run:boom"]);
    }

    #[tokio::test]
    async fn test_abandoned_trigger_fails_the_chain() {
        let abandoned = NoRollbackFlow::new("stuck", |trigger, _ctx| {
            Box::pin(async move {
                drop(trigger);
            })
        });

        let seen = Arc::new(Mutex::new(None));
        let sc = seen.clone();
        let state = FlowChain::builder("abandoned")
            .then(abandoned)
            .error(move |err, _| {
                *sc.lock() = Some(err);
            })
            .build()
            .start()
            .await;

        assert_eq!(state, FlowChainState::Failed);
        assert!(matches!(
            seen.lock().take(),
            Some(OrchestrationError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_context_flows_between_steps() {
        let write = NoRollbackFlow::new("write", |trigger, ctx| {
            Box::pin(async move {
                ctx.put("token", 42u64);
                let _ = trigger.next();
            })
        });
        let read = NoRollbackFlow::new("read", |trigger, ctx| {
            Box::pin(async move {
                match ctx.get::<u64>("token") {
                    Some(42) => {
                        let _ = trigger.next();
                    }
                    other => {
                        let _ = trigger.fail(OrchestrationError::Internal(format!(
                            "unexpected token: {other:?}"
                        )));
                    }
                }
            })
        });

        let state = FlowChain::builder("context")
            .then(write)
            .then(read)
            .build()
            .start()
            .await;
        assert_eq!(state, FlowChainState::Completed);
    }
}
