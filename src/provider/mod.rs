//! Provider facade - the lifecycle surface a controller drives
//!
//! A provider pairs a set of pipelines with hooks that run outside them
//! (validation, defaulting, objects created afterwards). [`DelegateProvider`]
//! is the in-process implementation; `rpc::RemoteProvider` reaches one that
//! lives in a plugin process.

pub mod command;
pub mod registry;

pub use command::{build_definition, ClusterHooks, CommandStep};
pub use registry::ProviderRegistry;

use crate::core::{
    CancelHandle, ErrorList, ManagedObject, OperationKind, PipelineDefinition, StepContext, Target,
};
use crate::error::{ProvisionError, Result};
use crate::execution::{Engine, StepOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle operations for targets of kind `T`
///
/// Every `on_*` call performs at most one step and persists its outcome on
/// the target, so callers invoke it repeatedly until it reports completion.
#[async_trait]
pub trait ProviderFacade<T: Target>: Send + Sync {
    fn name(&self) -> &str;

    async fn init(&self, config_file: &str) -> Result<()>;

    async fn validate(&self, target: &T) -> Result<ErrorList>;

    /// Default and complete a user-submitted target before it is stored
    async fn pre_create(&self, user: &str, target: T) -> Result<T>;

    /// Objects the caller should create once the target is running
    async fn after_create(&self, target: &T) -> Result<Vec<ManagedObject>>;

    async fn validate_update(&self, target: &T, old: &T) -> Result<ErrorList>;

    async fn on_create(&self, target: &mut T) -> Result<StepOutcome>;

    async fn on_update(&self, target: &mut T) -> Result<StepOutcome>;

    async fn on_upgrade(&self, target: &mut T) -> Result<StepOutcome>;

    async fn on_scale_up(&self, target: &mut T) -> Result<StepOutcome>;

    async fn on_scale_down(&self, target: &mut T) -> Result<StepOutcome>;

    async fn on_delete(&self, target: &mut T) -> Result<StepOutcome>;

    /// Dispatch to the `on_*` method for `operation`
    async fn operate(&self, operation: OperationKind, target: &mut T) -> Result<StepOutcome> {
        match operation {
            OperationKind::Create => self.on_create(target).await,
            OperationKind::Update => self.on_update(target).await,
            OperationKind::Upgrade => self.on_upgrade(target).await,
            OperationKind::ScaleUp => self.on_scale_up(target).await,
            OperationKind::ScaleDown => self.on_scale_down(target).await,
            OperationKind::Delete => self.on_delete(target).await,
        }
    }
}

/// Provider behaviour that is not a pipeline step
///
/// Every hook has a no-op default, so a provider only overrides what it
/// needs.
#[async_trait]
pub trait ProviderHooks<T: Target>: Send + Sync {
    async fn init(&self, _config_file: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn validate(&self, _target: &T) -> ErrorList {
        ErrorList::new()
    }

    async fn pre_create(&self, _user: &str, target: T) -> anyhow::Result<T> {
        Ok(target)
    }

    async fn after_create(&self, _target: &T) -> anyhow::Result<Vec<ManagedObject>> {
        Ok(Vec::new())
    }

    fn validate_update(&self, _target: &T, _old: &T) -> ErrorList {
        ErrorList::new()
    }
}

/// Hooks that accept everything and change nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<T: Target> ProviderHooks<T> for NoHooks {}

/// In-process provider: hooks plus one pipeline per operation, all
/// advanced by a single engine
pub struct DelegateProvider<T: Target> {
    name: String,
    definition: PipelineDefinition<T>,
    hooks: Arc<dyn ProviderHooks<T>>,
    engine: Engine,
    cancel: CancelHandle,
    variables: HashMap<String, String>,
}

impl<T: Target> DelegateProvider<T> {
    pub fn new(name: impl Into<String>, definition: PipelineDefinition<T>) -> Self {
        Self {
            name: name.into(),
            definition,
            hooks: Arc::new(NoHooks),
            engine: Engine::new(),
            cancel: CancelHandle::new(),
            variables: HashMap::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: impl ProviderHooks<T> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Expose a variable to every step context
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn definition(&self) -> &PipelineDefinition<T> {
        &self.definition
    }

    /// Signal cancellation to in-flight and future step contexts
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    async fn step(&self, operation: OperationKind, target: &mut T) -> Result<StepOutcome> {
        {
            let unknown = self.definition.unknown_skips(target.skip_set());
            if !unknown.is_empty() {
                warn!(target_name = target.name(), skips = ?unknown, "skip set names steps no pipeline defines");
            }
        }

        let mut ctx = StepContext::with_cancel(operation, target.name(), &self.cancel);
        ctx.variables = self.variables.clone();

        debug!(provider = %self.name, operation = %operation, target_name = target.name(), "delegating to engine");
        self.engine
            .step(&ctx, target, self.definition.steps_for(operation), operation.terminal_phase())
            .await
    }
}

#[async_trait]
impl<T: Target> ProviderFacade<T> for DelegateProvider<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, config_file: &str) -> Result<()> {
        self.hooks
            .init(config_file)
            .await
            .map_err(|source| ProvisionError::Hook { hook: "init", source })
    }

    async fn validate(&self, target: &T) -> Result<ErrorList> {
        Ok(self.hooks.validate(target))
    }

    async fn pre_create(&self, user: &str, target: T) -> Result<T> {
        self.hooks
            .pre_create(user, target)
            .await
            .map_err(|source| ProvisionError::Hook { hook: "pre-create", source })
    }

    async fn after_create(&self, target: &T) -> Result<Vec<ManagedObject>> {
        self.hooks
            .after_create(target)
            .await
            .map_err(|source| ProvisionError::Hook { hook: "after-create", source })
    }

    async fn validate_update(&self, target: &T, old: &T) -> Result<ErrorList> {
        Ok(self.hooks.validate_update(target, old))
    }

    async fn on_create(&self, target: &mut T) -> Result<StepOutcome> {
        self.step(OperationKind::Create, target).await
    }

    async fn on_update(&self, target: &mut T) -> Result<StepOutcome> {
        self.step(OperationKind::Update, target).await
    }

    async fn on_upgrade(&self, target: &mut T) -> Result<StepOutcome> {
        self.step(OperationKind::Upgrade, target).await
    }

    async fn on_scale_up(&self, target: &mut T) -> Result<StepOutcome> {
        self.step(OperationKind::ScaleUp, target).await
    }

    async fn on_scale_down(&self, target: &mut T) -> Result<StepOutcome> {
        self.step(OperationKind::ScaleDown, target).await
    }

    async fn on_delete(&self, target: &mut T) -> Result<StepOutcome> {
        self.step(OperationKind::Delete, target).await
    }
}

impl<T: Target> std::fmt::Debug for DelegateProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateProvider")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
