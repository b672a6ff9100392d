//! Single-invocation success/failure callback contract.
//!
//! Every asynchronous operation in the kernel reports its outcome through a
//! [`Completion`]. The completion is consumed by value on either path, so
//! "invoked exactly once" is enforced by the type system rather than by
//! runtime checks.

use tokio::sync::oneshot;

use crate::error::{OrchestrationError, Result};

/// The reporting half of an asynchronous operation's outcome
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<Result<()>>,
}

/// The observing half: awaited by whoever started the operation
#[derive(Debug)]
pub struct CompletionFuture {
    rx: oneshot::Receiver<Result<()>>,
}

impl Completion {
    /// Create a linked completion pair
    pub fn channel() -> (Completion, CompletionFuture) {
        let (tx, rx) = oneshot::channel();
        (Completion { tx }, CompletionFuture { rx })
    }

    /// Report success
    pub fn success(self) {
        // The observer may have given up waiting; nothing left to notify
        let _ = self.tx.send(Ok(()));
    }

    /// Report failure with the given error
    pub fn fail(self, error: OrchestrationError) {
        let _ = self.tx.send(Err(error));
    }

    /// Report `Ok(())` as success and `Err` as failure
    pub fn complete_with(self, result: Result<()>) {
        let _ = self.tx.send(result);
    }
}

impl CompletionFuture {
    /// Wait for the operation's outcome. A completion dropped without being
    /// invoked is a programming error in the collaborator and surfaces as an
    /// internal error rather than a hang.
    pub async fn wait(self) -> Result<()> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(OrchestrationError::Internal(
                "completion dropped without being invoked".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_is_observed() {
        let (completion, future) = Completion::channel();
        tokio::spawn(async move { completion.success() });
        assert!(future.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_carries_error() {
        let (completion, future) = Completion::channel();
        completion.fail(OrchestrationError::Validation("bad input".into()));
        let err = future.wait().await.unwrap_err();
        assert_eq!(err, OrchestrationError::Validation("bad input".into()));
    }

    #[tokio::test]
    async fn test_dropped_completion_is_an_internal_error() {
        let (completion, future) = Completion::channel();
        drop(completion);
        let err = future.wait().await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Internal(_)));
    }
}
