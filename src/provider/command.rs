//! Command provider - pipelines of shell commands defined in YAML

use crate::core::{
    config::{ProviderConfig, StepConfig, StepScope},
    validate_cluster, Cluster, ErrorList, FieldErrorKind, Machine, MachineRef, MachineSpec,
    ManagedObject, OperationKind, Phase, PipelineDefinition, Status, Step, StepContext,
    StepHandler,
};
use crate::error::Result;
use crate::execution::fan_out;
use crate::provider::ProviderHooks;
use crate::remote::{ExecutorFactory, LocalExecutor, RemoteExecutor};
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_POD_SUBNET: &str = "172.25.0.0/16";
pub const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";
pub const DEFAULT_CNI: &str = "calico";
pub const LABEL_CREATED_BY: &str = "provisioner/created-by";

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Substitute `{{ name }}` placeholders; an unknown name is an error
pub fn render(template: &str, vars: &HashMap<String, String>) -> anyhow::Result<String> {
    let re = placeholder_regex();
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in re.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = vars
            .get(name.as_str())
            .ok_or_else(|| anyhow::anyhow!("unknown variable '{}' in command template", name.as_str()))?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// One step that runs a rendered shell command on a set of machines
pub struct CommandStep {
    command: String,
    scope: StepScope,
    timeout: Option<Duration>,
    executors: Arc<dyn ExecutorFactory>,
}

impl CommandStep {
    pub fn new(command: impl Into<String>, scope: StepScope, executors: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            command: command.into(),
            scope,
            timeout: None,
            executors,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn cluster_vars(ctx: &StepContext, cluster: &Cluster) -> HashMap<String, String> {
        let mut vars = ctx.variables.clone();
        vars.insert("cluster".to_string(), cluster.name.clone());
        vars.insert("version".to_string(), cluster.spec.kubernetes_version.clone());
        vars.insert("pod_subnet".to_string(), cluster.spec.network.pod_subnet.clone());
        vars.insert("service_subnet".to_string(), cluster.spec.network.service_subnet.clone());
        let masters: Vec<&str> = cluster.masters().map(|m| m.address.as_str()).collect();
        vars.insert("masters".to_string(), masters.join(","));
        vars
    }

    fn machine_vars(base: &HashMap<String, String>, machine: &MachineRef) -> HashMap<String, String> {
        let mut vars = base.clone();
        vars.insert("address".to_string(), machine.address.clone());
        let hostname = if machine.hostname.is_empty() { &machine.id } else { &machine.hostname };
        vars.insert("hostname".to_string(), hostname.clone());
        vars.insert("role".to_string(), machine.role.to_string());
        vars
    }

    async fn run(&self, executor: &dyn RemoteExecutor, cmd: &str) -> anyhow::Result<()> {
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, executor.exec(cmd))
                .await
                .map_err(|_| anyhow::anyhow!("timed out after {}s", limit.as_secs()))??,
            None => executor.exec(cmd).await?,
        };
        output.into_result(cmd)?;
        Ok(())
    }

    fn select<'a>(&self, cluster: &'a Cluster) -> Vec<&'a MachineRef> {
        match self.scope {
            StepScope::Each => cluster.fan_out_order(),
            StepScope::FirstMaster => cluster.masters().take(1).collect(),
            StepScope::Masters => cluster.masters().collect(),
            StepScope::Workers => cluster.workers().collect(),
            StepScope::Local => Vec::new(),
        }
    }
}

#[async_trait]
impl StepHandler<Cluster> for CommandStep {
    async fn execute(&self, ctx: &StepContext, cluster: &mut Cluster) -> anyhow::Result<()> {
        let cluster: &Cluster = cluster;
        let base = Self::cluster_vars(ctx, cluster);

        if self.scope == StepScope::Local {
            let cmd = render(&self.command, &base)?;
            debug!(step = ?ctx.current_step, "running command on provider host");
            return self.run(&LocalExecutor::new(), &cmd).await;
        }

        let machines: Vec<MachineRef> = self.select(cluster).into_iter().cloned().collect();
        if machines.is_empty() {
            info!(cluster = %cluster.name, scope = ?self.scope, "no machines in scope, nothing to run");
            return Ok(());
        }

        let done = fan_out(&machines, |machine| {
            let vars = Self::machine_vars(&base, machine);
            async move {
                if ctx.is_cancelled() {
                    anyhow::bail!("cancelled before reaching {}", machine.address);
                }
                let cmd = render(&self.command, &vars)?;
                let executor = self
                    .executors
                    .connect(machine)
                    .await
                    .with_context(|| format!("connect to {}", machine.address))?;
                self.run(executor.as_ref(), &cmd).await
            }
        })
        .await?;

        debug!(cluster = %cluster.name, machines = done, "command step finished");
        Ok(())
    }
}

/// Build the pipelines a command provider runs from its configuration
pub fn build_definition(
    config: &ProviderConfig,
    executors: Arc<dyn ExecutorFactory>,
) -> Result<PipelineDefinition<Cluster>> {
    let mut builder = PipelineDefinition::builder();
    for operation in OperationKind::ALL {
        let steps: Vec<Step<Cluster>> = config
            .pipelines
            .steps_for(operation)
            .iter()
            .map(|step| command_step(config, step, Arc::clone(&executors)))
            .collect();
        builder = builder.steps(operation, steps);
    }
    builder.build()
}

fn command_step(config: &ProviderConfig, step: &StepConfig, executors: Arc<dyn ExecutorFactory>) -> Step<Cluster> {
    let mut handler = CommandStep::new(&step.command, step.scope, executors);
    if let Some(secs) = step.timeout_secs.or(config.default_timeout_secs) {
        handler = handler.with_timeout(Duration::from_secs(secs));
    }
    Step::new(&step.name, handler)
}

/// Cluster hooks for command providers: validation, defaults and the
/// machine objects a created cluster owns
#[derive(Debug, Clone, Default)]
pub struct ClusterHooks;

#[async_trait]
impl ProviderHooks<Cluster> for ClusterHooks {
    fn validate(&self, cluster: &Cluster) -> ErrorList {
        validate_cluster(cluster)
    }

    async fn pre_create(&self, user: &str, mut cluster: Cluster) -> anyhow::Result<Cluster> {
        let network = &mut cluster.spec.network;
        if network.pod_subnet.is_empty() {
            network.pod_subnet = DEFAULT_POD_SUBNET.to_string();
        }
        if network.service_subnet.is_empty() {
            network.service_subnet = DEFAULT_SERVICE_SUBNET.to_string();
        }
        if network.cni.is_empty() {
            network.cni = DEFAULT_CNI.to_string();
        }

        for machine in &mut cluster.spec.machines {
            if machine.hostname.is_empty() {
                machine.hostname = format!("{}-{}", cluster.name, machine.id);
            }
        }

        if !user.is_empty() {
            cluster
                .spec
                .labels
                .entry(LABEL_CREATED_BY.to_string())
                .or_insert_with(|| user.to_string());
        }
        cluster.status = Status::default();
        Ok(cluster)
    }

    async fn after_create(&self, cluster: &Cluster) -> anyhow::Result<Vec<ManagedObject>> {
        let machines = cluster
            .fan_out_order()
            .into_iter()
            .map(|m| {
                ManagedObject::Machine(Machine {
                    name: format!("{}-{}", cluster.name, m.id),
                    spec: MachineSpec {
                        address: m.address.clone(),
                        hostname: m.hostname.clone(),
                        cluster: Some(cluster.name.clone()),
                        role: m.role,
                        skip_steps: Default::default(),
                    },
                    status: Status {
                        phase: Phase::Running,
                        ..Default::default()
                    },
                })
            })
            .collect();
        Ok(machines)
    }

    fn validate_update(&self, cluster: &Cluster, old: &Cluster) -> ErrorList {
        let mut errors = validate_cluster(cluster);
        if cluster.name != old.name {
            errors.push(FieldErrorKind::Forbidden, "name", Some(cluster.name.as_str()), "cluster name is immutable");
        }
        let old_net = &old.spec.network;
        let new_net = &cluster.spec.network;
        if !old_net.pod_subnet.is_empty() && new_net.pod_subnet != old_net.pod_subnet {
            errors.push(
                FieldErrorKind::Forbidden,
                "spec.network.podSubnet",
                Some(new_net.pod_subnet.as_str()),
                "pod subnet cannot change after creation",
            );
        }
        if !old_net.service_subnet.is_empty() && new_net.service_subnet != old_net.service_subnet {
            errors.push(
                FieldErrorKind::Forbidden,
                "spec.network.serviceSubnet",
                Some(new_net.service_subnet.as_str()),
                "service subnet cannot change after creation",
            );
        }
        errors
    }
}
