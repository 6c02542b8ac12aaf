//! Error types for the provisioning engine

use crate::core::{OperationKind, Phase};
use thiserror::Error;

/// Errors surfaced by the engine, the providers and the plugin bridge
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The pipeline for an operation has no steps
    #[error("pipeline for {0} operation is empty")]
    EmptyPipeline(OperationKind),

    /// A condition references a step no handler is registered for
    #[error("no step named '{0}' is defined for this pipeline")]
    UnknownStep(String),

    /// Two steps in the same pipeline share a name
    #[error("duplicate step '{step}' in {operation} pipeline")]
    DuplicateStep { operation: OperationKind, step: String },

    #[error("invalid step name '{0}'")]
    InvalidStepName(String),

    #[error("provider '{0}' is already registered")]
    DuplicateProvider(String),

    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),

    /// An operation was requested from a phase it cannot start from
    #[error("cannot start {operation} while target is {phase}")]
    InvalidTransition { operation: OperationKind, phase: Phase },

    #[error("configuration error: {0}")]
    Config(String),

    /// The operation already reached its terminal phase
    #[error("{operation} already done: target is {phase}")]
    AlreadyDone { operation: OperationKind, phase: Phase },

    #[error("no condition needs processing")]
    NoConditionPending,

    /// A step handler returned an error; the condition was left False
    #[error("step {step} failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// A provider hook other than a step (pre-create, after-create, init)
    #[error("{hook} failed: {source:#}")]
    Hook {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// An error returned by a provider running in another process
    #[error("{message}")]
    Remote {
        message: String,
        stack: Option<String>,
    },

    #[error("plugin handshake failed: {0}")]
    Handshake(String),

    #[error("plugin transport error: {0}")]
    Transport(String),
}

impl ProvisionError {
    /// Configuration errors are fatal and must never be retried
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ProvisionError::EmptyPipeline(_)
                | ProvisionError::UnknownStep(_)
                | ProvisionError::DuplicateStep { .. }
                | ProvisionError::InvalidStepName(_)
                | ProvisionError::DuplicateProvider(_)
                | ProvisionError::UnknownProvider(_)
                | ProvisionError::InvalidTransition { .. }
                | ProvisionError::Config(_)
        )
    }
}

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
