//! Pipeline domain model

use crate::core::{
    state::Phase,
    step::{is_valid_step_name, Step},
};
use crate::error::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Lifecycle operation a pipeline implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Update,
    Upgrade,
    ScaleUp,
    ScaleDown,
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Upgrade,
        OperationKind::ScaleUp,
        OperationKind::ScaleDown,
        OperationKind::Delete,
    ];

    /// Phase the target reaches once the last step succeeds
    ///
    /// Delete has none: its end state is the target being removed, which the
    /// store observes, not the engine.
    pub fn terminal_phase(self) -> Option<Phase> {
        match self {
            OperationKind::Delete => None,
            _ => Some(Phase::Running),
        }
    }

    /// Phase recorded while the operation's pipeline is being driven
    pub fn in_progress_phase(self) -> Phase {
        match self {
            OperationKind::Create
            | OperationKind::Update
            | OperationKind::ScaleUp
            | OperationKind::ScaleDown => Phase::Processing,
            OperationKind::Upgrade => Phase::Upgrading,
            OperationKind::Delete => Phase::Terminating,
        }
    }

    /// Whether a new run of this operation may begin from `phase`
    pub fn can_start_from(self, phase: Phase) -> bool {
        match self {
            OperationKind::Create => matches!(phase, Phase::Pending | Phase::Failed),
            OperationKind::Update | OperationKind::ScaleUp | OperationKind::ScaleDown => {
                phase == Phase::Running
            }
            OperationKind::Upgrade => matches!(phase, Phase::Running | Phase::Upgrading),
            OperationKind::Delete => true,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Upgrade => "upgrade",
            OperationKind::ScaleUp => "scale-up",
            OperationKind::ScaleDown => "scale-down",
            OperationKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for OperationKind {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "upgrade" => Ok(OperationKind::Upgrade),
            "scale-up" | "scaleup" => Ok(OperationKind::ScaleUp),
            "scale-down" | "scaledown" => Ok(OperationKind::ScaleDown),
            "delete" => Ok(OperationKind::Delete),
            other => Err(ProvisionError::Config(format!("unknown operation '{}'", other))),
        }
    }
}

/// What follows a step in its pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    Step(String),
    Done,
}

/// Ordered list of steps for one operation; immutable once built
#[derive(Debug, Clone)]
pub struct Pipeline<T> {
    operation: OperationKind,
    steps: Vec<Step<T>>,
}

impl<T> Pipeline<T> {
    pub fn new(operation: OperationKind, steps: Vec<Step<T>>) -> Self {
        Self { operation, steps }
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn steps(&self) -> &[Step<T>] {
        &self.steps
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&Step<T>> {
        self.steps.iter().find(|s| s.name() == name)
    }

    pub fn first(&self) -> Option<&Step<T>> {
        self.steps.first()
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The step after `name`, `Done` if it is the last one
    pub fn next_after(&self, name: &str) -> Result<NextStep> {
        let pos = self
            .steps
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| ProvisionError::UnknownStep(name.to_string()))?;

        Ok(match self.steps.get(pos + 1) {
            Some(next) => NextStep::Step(next.name().to_string()),
            None => NextStep::Done,
        })
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !is_valid_step_name(step.name()) {
                return Err(ProvisionError::InvalidStepName(step.name().to_string()));
            }
            if !seen.insert(step.name()) {
                return Err(ProvisionError::DuplicateStep {
                    operation: self.operation,
                    step: step.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// The pipelines a provider runs, one per lifecycle operation
#[derive(Debug, Clone)]
pub struct PipelineDefinition<T> {
    pipelines: HashMap<OperationKind, Pipeline<T>>,
}

impl<T> PipelineDefinition<T> {
    pub fn builder() -> PipelineDefinitionBuilder<T> {
        PipelineDefinitionBuilder {
            steps: HashMap::new(),
        }
    }

    /// Steps for `operation`; operations never defined get an empty pipeline
    pub fn steps_for(&self, operation: OperationKind) -> &Pipeline<T> {
        &self.pipelines[&operation]
    }

    /// Skip-set entries naming no step in any pipeline
    pub fn unknown_skips<'a>(&self, skip_set: &'a BTreeSet<String>) -> Vec<&'a str> {
        skip_set
            .iter()
            .filter(|name| !self.pipelines.values().any(|p| p.step(name).is_some()))
            .map(String::as_str)
            .collect()
    }
}

pub struct PipelineDefinitionBuilder<T> {
    steps: HashMap<OperationKind, Vec<Step<T>>>,
}

impl<T> PipelineDefinitionBuilder<T> {
    /// Append a step to an operation's pipeline
    pub fn step(mut self, operation: OperationKind, step: Step<T>) -> Self {
        self.steps.entry(operation).or_default().push(step);
        self
    }

    /// Append several steps, in order
    pub fn steps(mut self, operation: OperationKind, steps: impl IntoIterator<Item = Step<T>>) -> Self {
        self.steps.entry(operation).or_default().extend(steps);
        self
    }

    /// Validate and freeze the definition
    pub fn build(mut self) -> Result<PipelineDefinition<T>> {
        let mut pipelines = HashMap::new();
        for operation in OperationKind::ALL {
            let steps = self.steps.remove(&operation).unwrap_or_default();
            let pipeline = Pipeline::new(operation, steps);
            pipeline.validate()?;
            pipelines.insert(operation, pipeline);
        }
        Ok(PipelineDefinition { pipelines })
    }
}
