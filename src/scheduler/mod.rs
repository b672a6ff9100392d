//! # Serialized Task Scheduler
//!
//! Per-signature execution queues with bounded concurrency. Submitting with
//! a resource id at level 1 gives full per-resource mutual exclusion;
//! submitting with a shared pool signature at a level above 1 gives a
//! bounded worker pool. One primitive serves both.
//!
//! A task's completion is the resolution of the future returned by
//! [`ChainTask::run`]; only then is the next queued task for the same
//! signature admitted. Tasks with different signatures are independent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// A unit of work with a serialization key and concurrency level
pub trait ChainTask: Send + 'static {
    /// Human-readable task name for logging
    fn name(&self) -> String;

    /// Tasks sharing a signature are ordered FIFO and capped at
    /// [`ChainTask::sync_level`] concurrent executions
    fn sync_signature(&self) -> String;

    /// Maximum concurrency for this signature. The first task submitted for
    /// a signature fixes its level for the life of the queue.
    fn sync_level(&self) -> usize {
        1
    }

    /// Execute the task. The returned future resolving counts as the task's
    /// completion signal, whatever the task did internally.
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
}

struct FnChainTask<F> {
    name: String,
    signature: String,
    level: usize,
    body: F,
}

impl<F> ChainTask for FnChainTask<F>
where
    F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sync_signature(&self) -> String {
        self.signature.clone()
    }

    fn sync_level(&self) -> usize {
        self.level
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        (self.body)()
    }
}

struct SignatureQueue {
    level: usize,
    running: usize,
    pending: VecDeque<Box<dyn ChainTask>>,
}

/// The scheduler. Cheap to clone; all clones share the same queue table.
#[derive(Clone, Default)]
pub struct SerialExecutor {
    queues: Arc<Mutex<HashMap<String, SignatureQueue>>>,
}

impl SerialExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a task. Runs immediately if its signature has a free slot,
    /// otherwise queued FIFO behind earlier submissions.
    pub fn submit(&self, task: impl ChainTask) {
        self.submit_boxed(Box::new(task));
    }

    /// Convenience for closure-shaped tasks
    pub fn submit_fn<F>(
        &self,
        name: impl Into<String>,
        signature: impl Into<String>,
        level: usize,
        body: F,
    ) where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.submit_boxed(Box::new(FnChainTask {
            name: name.into(),
            signature: signature.into(),
            level: level.max(1),
            body,
        }));
    }

    fn submit_boxed(&self, task: Box<dyn ChainTask>) {
        let signature = task.sync_signature();
        let runnable = {
            let mut queues = self.queues.lock();
            let queue = queues
                .entry(signature.clone())
                .or_insert_with(|| SignatureQueue {
                    level: task.sync_level().max(1),
                    running: 0,
                    pending: VecDeque::new(),
                });
            queue.pending.push_back(task);
            Self::drain(queue)
        };
        self.spawn_all(signature, runnable);
    }

    /// Pop as many pending tasks as the level allows. Caller holds the lock.
    fn drain(queue: &mut SignatureQueue) -> Vec<Box<dyn ChainTask>> {
        let mut runnable = Vec::new();
        while queue.running < queue.level {
            match queue.pending.pop_front() {
                Some(task) => {
                    queue.running += 1;
                    runnable.push(task);
                }
                None => break,
            }
        }
        runnable
    }

    fn spawn_all(&self, signature: String, runnable: Vec<Box<dyn ChainTask>>) {
        for task in runnable {
            let name = task.name();
            debug!(signature = %signature, task = %name, "admitting task");
            let guard = SlotGuard {
                executor: self.clone(),
                signature: signature.clone(),
                task_name: name,
            };
            tokio::spawn(async move {
                // Moved into the future so the slot is released when the
                // task finishes, panics included.
                let _guard = guard;
                task.run().await;
            });
        }
    }

    /// Release a slot for `signature` and admit the next queued task(s)
    fn advance(&self, signature: &str) {
        let runnable = {
            let mut queues = self.queues.lock();
            let Some(queue) = queues.get_mut(signature) else {
                return;
            };
            queue.running = queue.running.saturating_sub(1);
            let runnable = Self::drain(queue);
            if queue.running == 0 && queue.pending.is_empty() {
                queues.remove(signature);
            }
            runnable
        };
        self.spawn_all(signature.to_string(), runnable);
    }

    /// Number of tasks queued (not yet running) for a signature
    pub fn pending(&self, signature: &str) -> usize {
        self.queues
            .lock()
            .get(signature)
            .map_or(0, |q| q.pending.len())
    }

    /// Number of tasks currently running for a signature
    pub fn running(&self, signature: &str) -> usize {
        self.queues.lock().get(signature).map_or(0, |q| q.running)
    }
}

/// Releases the signature slot on drop, so a panicking task never wedges
/// its queue.
struct SlotGuard {
    executor: SerialExecutor,
    signature: String,
    task_name: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(
                signature = %self.signature,
                task = %self.task_name,
                "task panicked, advancing its queue"
            );
        } else {
            debug!(signature = %self.signature, task = %self.task_name, "task completed");
        }
        self.executor.advance(&self.signature);
    }
}
