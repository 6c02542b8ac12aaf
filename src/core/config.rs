//! Provider configuration from YAML

use crate::core::{pipeline::OperationKind, step::is_valid_step_name};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const DEFAULT_PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_MAGIC_COOKIE_KEY: &str = "PROVISIONER_PLUGIN";
pub const DEFAULT_MAGIC_COOKIE_VALUE: &str = "b7f2c1d4e9a8437f9c0e5d6a1b2c3f4e";

/// Top-level provider configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name, used as the registry key
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Plugin handshake settings
    #[serde(default)]
    pub plugin: PluginConfig,

    /// Default timeout for a single command (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Steps for each lifecycle operation
    #[serde(default)]
    pub pipelines: PipelinesConfig,
}

/// Handshake values both sides of the plugin bridge must agree on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,

    #[serde(default = "default_magic_cookie_key")]
    pub magic_cookie_key: String,

    #[serde(default = "default_magic_cookie_value")]
    pub magic_cookie_value: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            magic_cookie_key: DEFAULT_MAGIC_COOKIE_KEY.to_string(),
            magic_cookie_value: DEFAULT_MAGIC_COOKIE_VALUE.to_string(),
        }
    }
}

fn default_protocol_version() -> u32 {
    DEFAULT_PROTOCOL_VERSION
}

fn default_magic_cookie_key() -> String {
    DEFAULT_MAGIC_COOKIE_KEY.to_string()
}

fn default_magic_cookie_value() -> String {
    DEFAULT_MAGIC_COOKIE_VALUE.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelinesConfig {
    #[serde(default)]
    pub create: Vec<StepConfig>,
    #[serde(default)]
    pub update: Vec<StepConfig>,
    #[serde(default)]
    pub upgrade: Vec<StepConfig>,
    #[serde(default)]
    pub scale_up: Vec<StepConfig>,
    #[serde(default)]
    pub scale_down: Vec<StepConfig>,
    #[serde(default)]
    pub delete: Vec<StepConfig>,
}

impl PipelinesConfig {
    pub fn steps_for(&self, operation: OperationKind) -> &[StepConfig] {
        match operation {
            OperationKind::Create => &self.create,
            OperationKind::Update => &self.update,
            OperationKind::Upgrade => &self.upgrade,
            OperationKind::ScaleUp => &self.scale_up,
            OperationKind::ScaleDown => &self.scale_down,
            OperationKind::Delete => &self.delete,
        }
    }
}

/// Command step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step name within its pipeline
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Command template, rendered per machine
    pub command: String,

    /// Which machines the command runs on
    #[serde(default)]
    pub scope: StepScope,

    /// Timeout for this step (overrides the default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Machines a command step fans out over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepScope {
    /// Every machine, masters and workers in declaration order
    #[default]
    Each,
    /// The first declared master only
    FirstMaster,
    Masters,
    Workers,
    /// Once, on the host running the provider
    Local,
}

impl ProviderConfig {
    /// Load provider configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse provider configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ProviderConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the provider configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Provider name must not be empty");
        }

        for operation in OperationKind::ALL {
            let mut seen = HashSet::new();
            for step in self.pipelines.steps_for(operation) {
                if !is_valid_step_name(&step.name) {
                    anyhow::bail!("Invalid step name '{}' in {} pipeline", step.name, operation);
                }
                if !seen.insert(&step.name) {
                    anyhow::bail!("Duplicate step '{}' in {} pipeline", step.name, operation);
                }
                if step.command.trim().is_empty() {
                    anyhow::bail!("Step '{}' in {} pipeline has an empty command", step.name, operation);
                }
            }
        }

        if self.pipelines.create.is_empty() {
            anyhow::bail!("Provider '{}' defines no create pipeline", self.name);
        }

        Ok(())
    }

    /// Number of steps across all pipelines
    pub fn total_steps(&self) -> usize {
        OperationKind::ALL
            .iter()
            .map(|op| self.pipelines.steps_for(*op).len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
name: "kubeadm-shell"
default_timeout_secs: 900
pipelines:
  create:
    - name: "installPackages"
      command: "ssh root@{{ address }} 'apt-get install -y kubeadm'"
    - name: "initControlPlane"
      scope: first-master
      command: "ssh root@{{ address }} 'kubeadm init'"
  scale-up:
    - name: "joinNode"
      scope: workers
      command: "ssh root@{{ address }} 'kubeadm join'"
"#;

    #[test]
    fn test_parse_provider_config() {
        let config = ProviderConfig::from_yaml(YAML).unwrap();
        assert_eq!(config.name, "kubeadm-shell");
        assert_eq!(config.pipelines.create.len(), 2);
        assert_eq!(config.pipelines.create[0].scope, StepScope::Each);
        assert_eq!(config.pipelines.create[1].scope, StepScope::FirstMaster);
        assert_eq!(config.pipelines.steps_for(OperationKind::ScaleUp)[0].scope, StepScope::Workers);
        assert_eq!(config.plugin, PluginConfig::default());
        assert_eq!(config.total_steps(), 3);
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let yaml = r#"
name: "dup"
pipelines:
  create:
    - name: "a"
      command: "true"
    - name: "a"
      command: "true"
"#;
        let err = ProviderConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate step 'a'"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let yaml = r#"
name: "empty"
pipelines:
  create:
    - name: "a"
      command: "  "
"#;
        assert!(ProviderConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_missing_create_pipeline_rejected() {
        let yaml = r#"
name: "nocreate"
pipelines:
  delete:
    - name: "reset"
      command: "kubeadm reset -f"
"#;
        let err = ProviderConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("no create pipeline"));
    }

    #[test]
    fn test_custom_plugin_settings() {
        let yaml = r#"
name: "custom"
plugin:
  protocol_version: 3
  magic_cookie_key: "MY_KEY"
  magic_cookie_value: "secret"
pipelines:
  create:
    - name: "a"
      scope: local
      command: "true"
"#;
        let config = ProviderConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.plugin.protocol_version, 3);
        assert_eq!(config.plugin.magic_cookie_key, "MY_KEY");
        assert_eq!(config.pipelines.create[0].scope, StepScope::Local);
    }
}
