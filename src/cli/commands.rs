//! CLI command definitions

use crate::core::OperationKind;
use clap::Args;

/// Drive an operation on a cluster until it completes or fails
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to provider YAML file
    #[arg(short, long)]
    pub file: String,

    /// Cluster YAML file; applied before the operation starts
    #[arg(short, long)]
    pub target: Option<String>,

    /// Name of a stored cluster (when no target file is given)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Operation to drive
    #[arg(short, long, default_value_t = OperationKind::Create)]
    pub operation: OperationKind,

    /// User recorded on clusters created by this run
    #[arg(long, env = "USER", default_value = "")]
    pub user: String,

    /// Variable overrides (key=value), available to command templates
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Run commands on this host instead of over ssh
    #[arg(long)]
    pub local: bool,

    /// User for ssh sessions
    #[arg(long, default_value = "root")]
    pub ssh_user: String,

    /// Run the provider in a plugin process started from this program
    #[arg(long)]
    pub plugin: Option<String>,

    /// Seconds to wait between steps
    #[arg(long, default_value_t = 0)]
    pub interval: u64,

    /// Seconds to wait before retrying a failed step
    #[arg(long, default_value_t = 5)]
    pub retry_interval: u64,

    /// Give up after this many consecutive failures (0 = retry forever)
    #[arg(long, default_value_t = 0)]
    pub max_attempts: u32,

    /// Back off exponentially between retries instead of waiting a fixed interval
    #[arg(long)]
    pub backoff: bool,

    /// SQLite database path (defaults to the user data directory)
    #[arg(long)]
    pub db: Option<String>,

    /// Keep state in memory only
    #[arg(long)]
    pub no_history: bool,

    /// Output the final report in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Validate a provider configuration, and optionally a cluster against it
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to provider YAML file
    #[arg(short, long)]
    pub file: String,

    /// Cluster YAML file to validate
    #[arg(short, long)]
    pub target: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the stored status of one cluster
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Cluster name
    pub name: String,

    /// SQLite database path
    #[arg(long)]
    pub db: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List stored clusters
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// SQLite database path
    #[arg(long)]
    pub db: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Serve a provider as a plugin on stdin/stdout
#[derive(Debug, Args, Clone)]
pub struct ServeCommand {
    /// Path to provider YAML file
    #[arg(short, long)]
    pub file: String,

    /// Run commands on this host instead of over ssh
    #[arg(long)]
    pub local: bool,

    /// User for ssh sessions
    #[arg(long, default_value = "root")]
    pub ssh_user: String,

    /// Variable overrides (key=value), available to command templates
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
