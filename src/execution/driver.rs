//! Driver loop - calls a provider until an operation converges or gives up

use crate::core::{CancelHandle, OperationKind, Phase, Target};
use crate::error::ProvisionError;
use crate::execution::retry::{FixedInterval, RetryPolicy};
use crate::execution::tracker::ConditionTracker;
use crate::persistence::TargetStore;
use crate::provider::ProviderFacade;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Reason recorded when the retry policy gives up
pub const REASON_RETRIES_EXHAUSTED: &str = "RetriesExhausted";
/// Reason recorded when an operation hits a configuration error
pub const REASON_CONFIG_ERROR: &str = "ConfigError";
/// Reason recorded when the operator interrupts a drive
pub const REASON_CANCELLED: &str = "Cancelled";

/// How a drive ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveResult {
    /// The last step succeeded
    Completed,
    /// The target is marked Failed and needs operator action
    Failed,
}

/// Summary of one drive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveReport {
    pub run_id: Uuid,
    pub target: String,
    pub operation: OperationKind,
    pub result: DriveResult,
    /// Provider calls made, failed ones included
    pub calls: u32,
    pub failures: u32,
    pub elapsed: Duration,
    /// Last error seen, if any
    pub last_error: Option<String>,
}

/// Repeatedly invokes a provider for one target, saving after every call
pub struct Driver<T: Target> {
    provider: Arc<dyn ProviderFacade<T>>,
    store: Arc<dyn TargetStore<T>>,
    retry: Box<dyn RetryPolicy>,
    interval: Duration,
    tracker: ConditionTracker,
    cancel: Option<CancelHandle>,
}

impl<T: Target> Driver<T> {
    pub fn new(provider: Arc<dyn ProviderFacade<T>>, store: Arc<dyn TargetStore<T>>) -> Self {
        Self {
            provider,
            store,
            retry: Box::new(FixedInterval::default()),
            interval: Duration::ZERO,
            tracker: ConditionTracker::new(),
            cancel: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Box::new(policy);
        self
    }

    /// Pause between successful calls
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stop between calls once `handle` is cancelled
    ///
    /// A step already running is left to finish or observe the signal itself.
    pub fn with_cancel(mut self, handle: CancelHandle) -> Self {
        self.cancel = Some(handle);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelHandle::is_cancelled)
    }

    /// Sleep for `delay`, waking early on cancellation
    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        match &self.cancel {
            Some(cancel) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }

    /// Start `operation` unless the stored target is already part way through it
    ///
    /// A target that failed part way through the same operation resumes at
    /// its failed step rather than starting over.
    fn begin_or_resume(&self, target: &mut T, operation: OperationKind) -> crate::error::Result<bool> {
        let status = target.status_mut();
        let in_progress = operation.in_progress_phase();
        let resuming = status.operation == Some(operation)
            && (status.phase == in_progress || status.phase == Phase::Failed)
            && !status.conditions.is_empty();
        if resuming {
            status.phase = in_progress;
            status.reason.clear();
            status.message.clear();
            return Ok(true);
        }
        self.tracker.begin_operation(target, operation)?;
        Ok(false)
    }

    /// Drive `operation` on the stored target named `name` to an end
    pub async fn drive(&self, name: &str, operation: OperationKind) -> Result<DriveReport> {
        let mut target = self
            .store
            .load(name)
            .await?
            .with_context(|| format!("{} '{}' not found", T::KIND, name))?;

        let mut report = DriveReport {
            run_id: Uuid::new_v4(),
            target: name.to_string(),
            operation,
            result: DriveResult::Failed,
            calls: 0,
            failures: 0,
            elapsed: Duration::ZERO,
            last_error: None,
        };
        let started = Instant::now();
        let run_id = report.run_id;

        match self.begin_or_resume(&mut target, operation) {
            Ok(true) => info!(%run_id, target_name = name, operation = %operation, "resuming operation"),
            Ok(false) => info!(%run_id, target_name = name, operation = %operation, "starting operation"),
            Err(err) => {
                // Nothing ran, so the stored target is left as it was
                return Err(err).context(format!("cannot drive {} '{}'", T::KIND, name));
            }
        }
        self.store.save(&target).await?;

        let mut consecutive_failures = 0u32;
        loop {
            if self.is_cancelled() {
                warn!(%run_id, target_name = name, operation = %operation, "interrupted");
                target.status_mut().fail(REASON_CANCELLED, "interrupted by operator");
                self.store.save(&target).await?;
                report.last_error = Some("interrupted by operator".to_string());
                break;
            }
            report.calls += 1;
            let result = self.provider.operate(operation, &mut target).await;

            match result {
                Ok(outcome) if outcome.is_completed() => {
                    if operation == OperationKind::Delete {
                        self.store.delete(name).await?;
                    } else {
                        self.store.save(&target).await?;
                    }
                    report.result = DriveResult::Completed;
                    info!(%run_id, target_name = name, operation = %operation, calls = report.calls, "operation completed");
                    break;
                }
                Ok(outcome) => {
                    consecutive_failures = 0;
                    self.store.save(&target).await?;
                    info!(%run_id, target_name = name, step = outcome.step(), "step done");
                    self.pause(self.interval).await;
                }
                Err(err) if err.is_config_error() => {
                    report.failures += 1;
                    error!(%run_id, target_name = name, error = %err, "configuration error, not retrying");
                    self.fail(&mut target, REASON_CONFIG_ERROR, &err).await?;
                    report.last_error = Some(err.to_string());
                    break;
                }
                Err(err) => {
                    report.failures += 1;
                    consecutive_failures += 1;
                    self.store.save(&target).await?;
                    report.last_error = Some(err.to_string());

                    match self.retry.next_delay(consecutive_failures) {
                        Some(delay) => {
                            warn!(%run_id, target_name = name, attempt = consecutive_failures, delay_ms = delay.as_millis() as u64, error = %err, "step failed, retrying");
                            self.pause(delay).await;
                        }
                        None => {
                            error!(%run_id, target_name = name, attempt = consecutive_failures, error = %err, "giving up");
                            self.fail(&mut target, REASON_RETRIES_EXHAUSTED, &err).await?;
                            break;
                        }
                    }
                }
            }
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    async fn fail(&self, target: &mut T, reason: &str, err: &ProvisionError) -> Result<()> {
        target.status_mut().fail(reason, err.to_string());
        self.store.save(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Cluster, PipelineDefinition, Step};
    use crate::persistence::InMemoryStore;
    use crate::provider::DelegateProvider;

    fn driver(definition: PipelineDefinition<Cluster>, store: Arc<InMemoryStore<Cluster>>) -> Driver<Cluster> {
        Driver::new(Arc::new(DelegateProvider::new("test", definition)), store)
            .with_retry_policy(FixedInterval::forever(Duration::ZERO).with_max_attempts(3))
    }

    #[tokio::test]
    async fn test_missing_target_is_an_error() {
        let definition = PipelineDefinition::builder().build().unwrap();
        let store: Arc<InMemoryStore<Cluster>> = Arc::new(InMemoryStore::new());
        let err = driver(definition, store).drive("ghost", OperationKind::Create).await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_empty_pipeline_marks_failed_without_retry() {
        let definition = PipelineDefinition::builder().build().unwrap();
        let store: Arc<InMemoryStore<Cluster>> = Arc::new(InMemoryStore::new());
        store.save(&Cluster::new("prod")).await.unwrap();

        let report = driver(definition, Arc::clone(&store))
            .drive("prod", OperationKind::Create)
            .await
            .unwrap();

        assert_eq!(report.result, DriveResult::Failed);
        assert_eq!(report.calls, 1);
        let stored = store.load("prod").await.unwrap().unwrap();
        assert_eq!(stored.status.phase, Phase::Failed);
        assert_eq!(stored.status.reason, REASON_CONFIG_ERROR);
    }

    #[tokio::test]
    async fn test_create_drives_to_running() {
        let noop = |name: &str| -> Step<Cluster> {
            Step::from_fn(name, |_ctx, _cluster| Box::pin(async { Ok(()) }))
        };
        let definition = PipelineDefinition::builder()
            .steps(OperationKind::Create, [noop("a"), noop("b")])
            .build()
            .unwrap();
        let store: Arc<InMemoryStore<Cluster>> = Arc::new(InMemoryStore::new());
        store.save(&Cluster::new("prod")).await.unwrap();

        let report = driver(definition, Arc::clone(&store))
            .drive("prod", OperationKind::Create)
            .await
            .unwrap();

        assert_eq!(report.result, DriveResult::Completed);
        assert_eq!(report.calls, 2);
        assert_eq!(store.load("prod").await.unwrap().unwrap().status.phase, Phase::Running);
    }

    #[tokio::test]
    async fn test_cancel_stops_retrying() {
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        let definition = PipelineDefinition::builder()
            .steps(
                OperationKind::Create,
                [Step::from_fn("flaky", move |_ctx, _cluster| {
                    let trigger = trigger.clone();
                    Box::pin(async move {
                        trigger.cancel();
                        Err(anyhow::anyhow!("host unreachable"))
                    })
                })],
            )
            .build()
            .unwrap();
        let store: Arc<InMemoryStore<Cluster>> = Arc::new(InMemoryStore::new());
        store.save(&Cluster::new("prod")).await.unwrap();

        let provider: Arc<dyn ProviderFacade<Cluster>> = Arc::new(DelegateProvider::new("test", definition));
        let report = Driver::new(provider, store.clone())
            .with_retry_policy(FixedInterval::forever(Duration::from_secs(3600)))
            .with_cancel(cancel)
            .drive("prod", OperationKind::Create)
            .await
            .unwrap();

        assert_eq!(report.result, DriveResult::Failed);
        assert_eq!(report.calls, 1);
        let stored = store.load("prod").await.unwrap().unwrap();
        assert_eq!(stored.status.phase, Phase::Failed);
        assert_eq!(stored.status.reason, REASON_CANCELLED);
    }
}
