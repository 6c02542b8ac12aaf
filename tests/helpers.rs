//! Test utility functions for provisioner
#![allow(dead_code)]

use async_trait::async_trait;
use provisioner::core::{
    Cluster, ConditionStatus, MachineRef, OperationKind, PipelineDefinition, Role, Step, StepContext, StepHandler,
};
use provisioner::execution::{ConditionTracker, StepOutcome};
use provisioner::provider::{DelegateProvider, ProviderFacade};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Step handler that plays back scripted results, then succeeds forever
pub struct ScriptedHandler {
    script: Mutex<VecDeque<Result<(), String>>>,
    fail_forever: bool,
    calls: AtomicUsize,
}

impl ScriptedHandler {
    pub fn ok() -> Arc<Self> {
        Self::with_script(Vec::new())
    }

    /// Fail `times` times with `message`, then succeed
    pub fn failing(times: usize, message: &str) -> Arc<Self> {
        Self::with_script((0..times).map(|_| Err(message.to_string())).collect())
    }

    pub fn always_failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::from([Err(message.to_string())])),
            fail_forever: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn with_script(script: Vec<Result<(), String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fail_forever: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepHandler<Cluster> for ScriptedHandler {
    async fn execute(&self, _ctx: &StepContext, _target: &mut Cluster) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock().unwrap();
            if self.fail_forever {
                script.front().cloned()
            } else {
                script.pop_front()
            }
        };
        match next {
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            _ => Ok(()),
        }
    }
}

/// Steps named after the handlers they wrap, in order
pub fn steps(handlers: &[(&str, &Arc<ScriptedHandler>)]) -> Vec<Step<Cluster>> {
    handlers
        .iter()
        .map(|(name, handler)| {
            let handler: Arc<ScriptedHandler> = Arc::clone(*handler);
            Step::from_arc(*name, handler)
        })
        .collect()
}

pub fn definition(operation: OperationKind, handlers: &[(&str, &Arc<ScriptedHandler>)]) -> PipelineDefinition<Cluster> {
    PipelineDefinition::builder()
        .steps(operation, steps(handlers))
        .build()
        .unwrap()
}

pub fn provider(definition: PipelineDefinition<Cluster>) -> Arc<DelegateProvider<Cluster>> {
    Arc::new(DelegateProvider::new("scripted", definition))
}

/// A valid two-master, one-worker cluster
pub fn cluster(name: &str) -> Cluster {
    let mut cluster = Cluster::new(name)
        .with_machine(MachineRef::new("m1", "10.0.0.1", Role::Master))
        .with_machine(MachineRef::new("w1", "10.0.0.3", Role::Worker))
        .with_machine(MachineRef::new("m2", "10.0.0.2", Role::Master));
    cluster.spec.kubernetes_version = "v1.27.4".to_string();
    cluster
}

/// A cluster that already started `operation`
pub fn begun(name: &str, operation: OperationKind) -> Cluster {
    let mut cluster = cluster(name);
    ConditionTracker::new().begin_operation(&mut cluster, operation).unwrap();
    cluster
}

/// (type, status) of every condition, in order
pub fn conditions(cluster: &Cluster) -> Vec<(String, ConditionStatus)> {
    cluster
        .status
        .conditions
        .iter()
        .map(|c| (c.type_.clone(), c.status))
        .collect()
}

pub fn true_count(cluster: &Cluster) -> usize {
    cluster
        .status
        .conditions
        .iter()
        .filter(|c| c.status == ConditionStatus::True)
        .count()
}

/// Call `operate` until it completes, giving up after `max_calls`
///
/// Returns the number of calls made and whether the operation completed.
pub async fn operate_until_done(
    provider: &dyn ProviderFacade<Cluster>,
    operation: OperationKind,
    cluster: &mut Cluster,
    max_calls: usize,
) -> (usize, bool) {
    for call in 1..=max_calls {
        if let Ok(StepOutcome::Completed { .. }) = provider.operate(operation, cluster).await {
            return (call, true);
        }
    }
    (max_calls, false)
}
