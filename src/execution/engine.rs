//! Step engine - advances a target through its pipeline one step per call

use crate::{
    core::{
        failed_reason, Condition, ConditionStatus, NextStep, OperationKind, Phase, Pipeline,
        StepContext, Target, MESSAGE_SKIP, REASON_SKIP,
    },
    error::{ProvisionError, Result},
    execution::tracker::ConditionTracker,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reason recorded on a condition whose handler succeeded
pub const REASON_SUCCEEDED: &str = "Succeeded";

/// Events emitted while a pipeline is advanced
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StepStarted {
        target: String,
        step: String,
    },
    StepSucceeded {
        target: String,
        step: String,
        elapsed: Duration,
    },
    StepSkipped {
        target: String,
        step: String,
    },
    StepFailed {
        target: String,
        step: String,
        error: String,
    },
    PipelineCompleted {
        target: String,
        operation: OperationKind,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Result of one successful engine call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// `step` finished and `next` is now waiting
    Advanced { step: String, next: String },
    /// `step` was the last one; the operation is complete
    Completed { step: String },
}

impl StepOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed { .. })
    }

    pub fn step(&self) -> &str {
        match self {
            StepOutcome::Advanced { step, .. } | StepOutcome::Completed { step } => step,
        }
    }
}

/// Executes exactly one step per call and records the outcome
///
/// A failed step is not advanced: its condition is left False and the next
/// call re-runs the same handler.
#[derive(Default)]
pub struct Engine {
    tracker: ConditionTracker,
    event_handlers: Vec<EventHandler>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracker(tracker: ConditionTracker) -> Self {
        Self {
            tracker,
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
        self
    }

    pub fn tracker(&self) -> &ConditionTracker {
        &self.tracker
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: EngineEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Run the current step of `pipeline` against `target`
    pub async fn step<T: Target>(
        &self,
        ctx: &StepContext,
        target: &mut T,
        pipeline: &Pipeline<T>,
        terminal: Option<Phase>,
    ) -> Result<StepOutcome> {
        let cond = self.tracker.current_condition(target, pipeline, terminal)?;
        let step_name = cond.type_;
        let target_name = target.name().to_string();
        let skipping = target.skip_set().contains(&step_name);

        // Resolved before the target is touched so a bad step name changes nothing
        let next = if pipeline.step(&step_name).is_some() {
            self.tracker.next_step_name(pipeline, &step_name)?
        } else if skipping {
            self.tracker.next_unrecorded_step(target, pipeline)
        } else {
            return Err(ProvisionError::UnknownStep(step_name));
        };

        if skipping {
            info!(target_name = %target_name, step = %step_name, "skipping step");
            self.tracker.set_condition(
                target,
                Condition::new(&step_name, ConditionStatus::True, REASON_SKIP, MESSAGE_SKIP),
            );
            self.emit_event(EngineEvent::StepSkipped {
                target: target_name.clone(),
                step: step_name.clone(),
            });
        } else {
            let step = pipeline
                .step(&step_name)
                .ok_or_else(|| ProvisionError::UnknownStep(step_name.clone()))?;

            let mut step_ctx = ctx.clone();
            step_ctx.current_step = Some(step_name.clone());

            info!(target_name = %target_name, step = %step_name, operation = %pipeline.operation(), "executing step");
            self.emit_event(EngineEvent::StepStarted {
                target: target_name.clone(),
                step: step_name.clone(),
            });

            let started = Instant::now();
            let result = step.handler().execute(&step_ctx, target).await;
            let elapsed = started.elapsed();

            match result {
                Ok(()) => self.mark_step_success(target, &step_name, elapsed),
                Err(err) => {
                    self.mark_step_failed(target, &step_name, &err, elapsed);
                    return Err(ProvisionError::StepFailed {
                        step: step_name,
                        source: err,
                    });
                }
            }
        }

        match next {
            NextStep::Done => {
                if let Some(phase) = terminal {
                    target.status_mut().phase = phase;
                }
                info!(target_name = %target_name, operation = %pipeline.operation(), "pipeline completed");
                self.emit_event(EngineEvent::PipelineCompleted {
                    target: target_name,
                    operation: pipeline.operation(),
                });
                Ok(StepOutcome::Completed { step: step_name })
            }
            NextStep::Step(next) => {
                debug!(target_name = %target_name, step = %next, "next step waiting");
                self.tracker.set_condition(target, Condition::waiting(&next));
                Ok(StepOutcome::Advanced { step: step_name, next })
            }
        }
    }

    /// Mark a step as completed successfully
    fn mark_step_success<T: Target>(&self, target: &mut T, step: &str, elapsed: Duration) {
        self.tracker.set_condition(
            target,
            Condition::new(
                step,
                ConditionStatus::True,
                REASON_SUCCEEDED,
                format!("completed in {:.1?}", elapsed),
            ),
        );
        self.emit_event(EngineEvent::StepSucceeded {
            target: target.name().to_string(),
            step: step.to_string(),
            elapsed,
        });
    }

    /// Mark a step as failed; the condition stays current for the next call
    fn mark_step_failed<T: Target>(&self, target: &mut T, step: &str, err: &anyhow::Error, elapsed: Duration) {
        let message = format!("{:#}", err);
        warn!(target_name = target.name(), step, elapsed = ?elapsed, error = %message, "step failed");
        self.tracker.set_condition(
            target,
            Condition::new(step, ConditionStatus::False, failed_reason(step), &message),
        );
        self.emit_event(EngineEvent::StepFailed {
            target: target.name().to_string(),
            step: step.to_string(),
            error: message,
        });
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("event_handlers", &self.event_handlers.len())
            .finish()
    }
}
