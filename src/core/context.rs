//! Step context - per-call data threaded into every step handler

use crate::core::pipeline::OperationKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Execution context for one step invocation
///
/// Carries the operation being driven, the target's name, free-form
/// variables, and a cancellation signal that long-running handlers should
/// poll. The engine never cancels a started step on its own.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Operation whose pipeline is being advanced
    pub operation: OperationKind,

    /// Name of the target being driven
    pub target_name: String,

    /// Step currently executing, set by the engine
    pub current_step: Option<String>,

    /// Variables made available to handlers
    pub variables: HashMap<String, String>,

    cancel: watch::Receiver<bool>,
}

/// Handle used to signal cancellation to every context cloned from its pair
///
/// Clones share one signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation is signalled
    pub async fn cancelled(&self) {
        let mut rx = self.subscribe();
        // The sender lives in self, so the channel cannot close while waiting
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StepContext {
    /// Create a context that can never be cancelled
    pub fn new(operation: OperationKind, target_name: impl Into<String>) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            operation,
            target_name: target_name.into(),
            current_step: None,
            variables: HashMap::new(),
            cancel: rx,
        }
    }

    /// Create a context observing `handle`
    pub fn with_cancel(operation: OperationKind, target_name: impl Into<String>, handle: &CancelHandle) -> Self {
        Self {
            cancel: handle.subscribe(),
            ..Self::new(operation, target_name)
        }
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn get_variable(&self, key: &str) -> Option<&String> {
        self.variables.get(key)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation is signalled; pends forever if the handle is gone
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_context_variables() {
        let mut ctx = StepContext::new(OperationKind::Create, "prod");
        ctx.set_variable("token", "abc.123");

        assert_eq!(ctx.get_variable("token"), Some(&"abc.123".to_string()));
        assert_eq!(ctx.get_variable("missing"), None);
        assert_eq!(ctx.target_name, "prod");
    }

    #[test]
    fn test_plain_context_is_never_cancelled() {
        let ctx = StepContext::new(OperationKind::Delete, "prod");
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_handle_reaches_contexts() {
        let handle = CancelHandle::new();
        let ctx = StepContext::with_cancel(OperationKind::Create, "prod", &handle);
        let clone = ctx.clone();

        assert!(!ctx.is_cancelled());
        handle.cancel();
        assert!(ctx.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), clone.cancelled())
            .await
            .expect("cancellation should be observed");
    }
}
