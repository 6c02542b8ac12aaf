//! provisioner - resumable, condition-driven provisioning of baremetal Kubernetes clusters

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod persistence;
pub mod provider;
pub mod remote;
pub mod rpc;

// Re-export commonly used types
pub use crate::core::{Cluster, Condition, ConditionStatus, Machine, OperationKind, Phase, PipelineDefinition, Step, Target};
pub use error::{ProvisionError, Result};
pub use execution::{DriveReport, DriveResult, Driver, Engine, EngineEvent, StepOutcome};
pub use persistence::{InMemoryStore, TargetStore};
pub use provider::{DelegateProvider, ProviderFacade, ProviderRegistry};
pub use rpc::{serve_stdio, PluginServer, RemoteProvider};
