//! Targets - the cluster and machine entities driven through pipelines

use crate::core::state::{Phase, Status};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// An entity whose status is advanced by the engine
///
/// Targets are serializable so they can be persisted between calls and
/// shipped across the plugin boundary unchanged.
pub trait Target: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Kind name used as a storage and registry key
    const KIND: &'static str;

    fn name(&self) -> &str;

    fn status(&self) -> &Status;

    fn status_mut(&mut self) -> &mut Status;

    /// Operator-configured step names to bypass
    fn skip_set(&self) -> &BTreeSet<String>;

    fn phase(&self) -> Phase {
        self.status().phase
    }
}

/// Role a machine plays in its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    #[default]
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => f.write_str("master"),
            Role::Worker => f.write_str("worker"),
        }
    }
}

/// A cluster member as referenced from the cluster spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRef {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub role: Role,
}

impl MachineRef {
    pub fn new(id: impl Into<String>, address: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            hostname: String::new(),
            role,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default)]
    pub pod_subnet: String,
    #[serde(default)]
    pub service_subnet: String,
    #[serde(default)]
    pub cni: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub kubernetes_version: String,

    /// Cluster members, in the order operations fan out over them
    #[serde(default)]
    pub machines: Vec<MachineRef>,

    #[serde(default)]
    pub network: NetworkSpec,

    #[serde(default)]
    pub skip_steps: BTreeSet<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A Kubernetes cluster provisioned on baremetal machines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: Status,
}

impl Cluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_machine(mut self, machine: MachineRef) -> Self {
        self.spec.machines.push(machine);
        self
    }

    /// All members in declaration order
    pub fn machines(&self) -> &[MachineRef] {
        &self.spec.machines
    }

    pub fn masters(&self) -> impl Iterator<Item = &MachineRef> {
        self.spec.machines.iter().filter(|m| m.role == Role::Master)
    }

    pub fn workers(&self) -> impl Iterator<Item = &MachineRef> {
        self.spec.machines.iter().filter(|m| m.role == Role::Worker)
    }

    /// Order operations fan out in: masters, then workers, each as declared
    pub fn fan_out_order(&self) -> Vec<&MachineRef> {
        self.masters().chain(self.workers()).collect()
    }
}

impl Target for Cluster {
    const KIND: &'static str = "cluster";

    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> &Status {
        &self.status
    }

    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    fn skip_set(&self) -> &BTreeSet<String> {
        &self.spec.skip_steps
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub hostname: String,
    /// Cluster this machine joins, if any
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub skip_steps: BTreeSet<String>,
}

/// A single baremetal node driven on its own (join, leave, role changes)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub name: String,
    #[serde(default)]
    pub spec: MachineSpec,
    #[serde(default)]
    pub status: Status,
}

impl Machine {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: MachineSpec {
                address: address.into(),
                ..Default::default()
            },
            status: Status::default(),
        }
    }

    pub fn to_machine_ref(&self) -> MachineRef {
        MachineRef {
            id: self.name.clone(),
            address: self.spec.address.clone(),
            hostname: self.spec.hostname.clone(),
            role: self.spec.role,
        }
    }
}

impl Target for Machine {
    const KIND: &'static str = "machine";

    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> &Status {
        &self.status
    }

    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    fn skip_set(&self) -> &BTreeSet<String> {
        &self.spec.skip_steps
    }
}

/// Objects a provider asks the caller to create after a target was created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "object")]
pub enum ManagedObject {
    Cluster(Cluster),
    Machine(Machine),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_roles_keep_declaration_order() {
        let cluster = Cluster::new("prod")
            .with_machine(MachineRef::new("m1", "10.0.0.1", Role::Master))
            .with_machine(MachineRef::new("w1", "10.0.0.2", Role::Worker))
            .with_machine(MachineRef::new("m2", "10.0.0.3", Role::Master));

        let masters: Vec<_> = cluster.masters().map(|m| m.id.as_str()).collect();
        assert_eq!(masters, vec!["m1", "m2"]);
        let workers: Vec<_> = cluster.workers().map(|m| m.id.as_str()).collect();
        assert_eq!(workers, vec!["w1"]);
        assert_eq!(cluster.machines().len(), 3);

        let order: Vec<_> = cluster.fan_out_order().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["m1", "m2", "w1"]);
    }

    #[test]
    fn test_cluster_parses_from_yaml() {
        let yaml = r#"
name: "edge"
spec:
  kubernetesVersion: "v1.27.4"
  machines:
    - id: "node-1"
      address: "192.168.10.11"
      role: master
    - id: "node-2"
      address: "192.168.10.12"
  skipSteps: ["installGpuDriver"]
"#;
        let cluster: Cluster = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cluster.name(), "edge");
        assert_eq!(cluster.phase(), Phase::Pending);
        assert_eq!(cluster.spec.machines[1].role, Role::Worker);
        assert!(cluster.skip_set().contains("installGpuDriver"));
    }

    #[test]
    fn test_machine_ref_from_machine() {
        let mut machine = Machine::new("node-3", "192.168.10.13");
        machine.spec.role = Role::Master;
        let r = machine.to_machine_ref();
        assert_eq!(r.id, "node-3");
        assert_eq!(r.address, "192.168.10.13");
        assert_eq!(r.role, Role::Master);
    }
}
