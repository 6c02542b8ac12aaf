//! Step domain model

use crate::core::context::StepContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// The unit of work behind a named step
///
/// Handlers are re-invoked after a failure until they succeed, so they must
/// be safe to run again against a partially provisioned target.
#[async_trait]
pub trait StepHandler<T>: Send + Sync {
    async fn execute(&self, ctx: &StepContext, target: &mut T) -> anyhow::Result<()>;
}

/// A single named step in a pipeline
pub struct Step<T> {
    name: String,
    handler: Arc<dyn StepHandler<T>>,
}

impl<T> Step<T> {
    pub fn new(name: impl Into<String>, handler: impl StepHandler<T> + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    /// Create a step from a shared handler
    pub fn from_arc(name: impl Into<String>, handler: Arc<dyn StepHandler<T>>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Arc<dyn StepHandler<T>> {
        &self.handler
    }
}

impl<T: Send + 'static> Step<T> {
    /// Create a step from an async closure
    ///
    /// ```ignore
    /// Step::from_fn("markMaster", |_ctx, cluster: &mut Cluster| {
    ///     Box::pin(async move { Ok(()) })
    /// });
    /// ```
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a StepContext, &'a mut T) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
    {
        Self::new(name, FnHandler { f })
    }
}

impl<T> Clone for Step<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<T> fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish_non_exhaustive()
    }
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<T, F> StepHandler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: for<'a> Fn(&'a StepContext, &'a mut T) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync,
{
    async fn execute(&self, ctx: &StepContext, target: &mut T) -> anyhow::Result<()> {
        (self.f)(ctx, target).await
    }
}

/// Check a step name against the allowed identifier shape
pub fn is_valid_step_name(name: &str) -> bool {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("step name pattern compiles"))
        .is_match(name)
}
