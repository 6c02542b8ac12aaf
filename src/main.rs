use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use provisioner::cli::commands::{ListCommand, RunCommand, ServeCommand, StatusCommand, ValidateCommand};
use provisioner::cli::output::*;
use provisioner::cli::{Cli, Command};
use provisioner::core::config::ProviderConfig;
use provisioner::core::{validate_cluster, CancelHandle, Cluster, ManagedObject, OperationKind};
use provisioner::execution::{DriveResult, Driver, Engine, ExponentialBackoff, FixedInterval};
use provisioner::persistence::{InMemoryStore, TargetStore};
use provisioner::provider::command::LABEL_CREATED_BY;
use provisioner::provider::{build_definition, ClusterHooks, DelegateProvider, ProviderFacade};
use provisioner::remote::local::LocalExecutorFactory;
use provisioner::remote::ssh::SshExecutorFactory;
use provisioner::remote::ExecutorFactory;
use provisioner::rpc::{serve_stdio, RemoteProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; stderr only, stdout is the plugin wire when serving
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_operation(cmd, cli.verbose).await?,
        Command::Validate(cmd) => validate_config(cmd)?,
        Command::Status(cmd) => show_status(cmd).await?,
        Command::List(cmd) => list_clusters(cmd).await?,
        Command::Serve(cmd) => serve_plugin(cmd).await?,
    }

    Ok(())
}

fn executors(local: bool, ssh_user: &str) -> Arc<dyn ExecutorFactory> {
    if local {
        Arc::new(LocalExecutorFactory::default())
    } else {
        Arc::new(SshExecutorFactory {
            user: ssh_user.to_string(),
            ..Default::default()
        })
    }
}

fn load_config(path: &str) -> Result<ProviderConfig> {
    ProviderConfig::from_file(path).with_context(|| format!("Failed to load provider config {}", path))
}

fn load_cluster(path: &str) -> Result<Cluster> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read cluster file {}", path))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse cluster file {}", path))
}

/// In-process provider backed by the command pipelines in `config`
fn delegate_provider(
    config: &ProviderConfig,
    local: bool,
    ssh_user: &str,
    variables: &[(String, String)],
    engine: Engine,
) -> Result<DelegateProvider<Cluster>> {
    config.validate()?;
    let definition = build_definition(config, executors(local, ssh_user))?;
    let mut provider = DelegateProvider::new(&config.name, definition)
        .with_hooks(ClusterHooks)
        .with_engine(engine);
    for (key, value) in variables {
        provider = provider.with_variable(key, value);
    }
    Ok(provider)
}

/// Build the provider for `run`, with the handle that interrupts it
async fn build_provider(
    cmd: &RunCommand,
    spinner: ProgressBar,
) -> Result<(Arc<dyn ProviderFacade<Cluster>>, CancelHandle)> {
    let config = load_config(&cmd.file)?;

    if let Some(program) = &cmd.plugin {
        let mut args = vec!["serve".to_string(), "--file".to_string(), cmd.file.clone()];
        if cmd.local {
            args.push("--local".to_string());
        } else {
            args.extend(["--ssh-user".to_string(), cmd.ssh_user.clone()]);
        }
        for (key, value) in &cmd.variable {
            args.extend(["--variable".to_string(), format!("{}={}", key, value)]);
        }
        let provider = RemoteProvider::<Cluster>::spawn(program, &args, &config.plugin)
            .await
            .with_context(|| format!("Failed to start plugin {}", program))?;
        println!("{}Connected to plugin provider {}", INFO, style(provider.name()).bold());
        return Ok((Arc::new(provider), CancelHandle::new()));
    }

    let engine = Engine::new().with_event_handler(move |event| spinner.println(format_engine_event(&event)));
    let provider = delegate_provider(&config, cmd.local, &cmd.ssh_user, &cmd.variable, engine)?;
    println!("{}Loaded provider {}", INFO, style(&config.name).bold());
    let cancel = provider.cancel_handle().clone();
    Ok((Arc::new(provider), cancel))
}

/// First Ctrl-C stops the drive after the running step, the second exits
fn cancel_on_interrupt(cancel: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received, stopping after the current step");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

#[cfg(feature = "sqlite")]
async fn open_store(db: Option<&str>, no_history: bool) -> Result<Arc<dyn TargetStore<Cluster>>> {
    use provisioner::persistence::SqliteTargetStore;

    if no_history {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    let store = match db {
        Some(path) => SqliteTargetStore::<Cluster>::new(path).await?,
        None => SqliteTargetStore::<Cluster>::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_db: Option<&str>, no_history: bool) -> Result<Arc<dyn TargetStore<Cluster>>> {
    if no_history {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    bail!("built without the sqlite feature; only --no-history runs are available")
}

/// Store the cluster from `--target`, returning the name to drive
async fn apply_target(
    cmd: &RunCommand,
    provider: &dyn ProviderFacade<Cluster>,
    store: &dyn TargetStore<Cluster>,
) -> Result<String> {
    let Some(path) = &cmd.target else {
        return cmd.name.clone().context("either --target or --name is required");
    };

    let cluster = load_cluster(path)?;
    if let Some(name) = &cmd.name {
        if name != &cluster.name {
            bail!("--name {} does not match cluster {} in {}", name, cluster.name, path);
        }
    }

    let errors = provider.validate(&cluster).await?;
    if !errors.is_empty() {
        bail!("{} is invalid:\n{}", path, format_errors(&errors));
    }

    match store.load(&cluster.name).await? {
        None => {
            if cmd.operation != OperationKind::Create {
                bail!("cluster '{}' is not stored yet; create it first", cluster.name);
            }
            let cluster = provider.pre_create(&cmd.user, cluster).await?;
            store.save(&cluster).await?;
            println!("{}Registered cluster {}", INFO, style(&cluster.name).bold());
            Ok(cluster.name)
        }
        Some(old) => {
            let mut cluster = provider.pre_create(&cmd.user, cluster).await?;
            if let Some(creator) = old.spec.labels.get(LABEL_CREATED_BY) {
                cluster.spec.labels.insert(LABEL_CREATED_BY.to_string(), creator.clone());
            }
            let errors = provider.validate_update(&cluster, &old).await?;
            if !errors.is_empty() {
                bail!("update of {} rejected:\n{}", cluster.name, format_errors(&errors));
            }
            cluster.status = old.status;
            store.save(&cluster).await?;
            Ok(cluster.name)
        }
    }
}

async fn run_operation(cmd: &RunCommand, verbose: bool) -> Result<()> {
    let spinner = if cmd.json || verbose {
        ProgressBar::hidden()
    } else {
        create_spinner(format!("{}...", cmd.operation))
    };

    let (provider, cancel) = build_provider(cmd, spinner.clone()).await?;
    cancel_on_interrupt(cancel.clone());
    provider.init(&cmd.file).await?;
    let store = open_store(cmd.db.as_deref(), cmd.no_history).await?;
    let name = apply_target(cmd, provider.as_ref(), store.as_ref()).await?;

    let driver = Driver::new(Arc::clone(&provider), Arc::clone(&store))
        .with_interval(Duration::from_secs(cmd.interval))
        .with_cancel(cancel);
    let driver = if cmd.backoff {
        driver.with_retry_policy(ExponentialBackoff::with_max_attempts(cmd.max_attempts))
    } else {
        driver.with_retry_policy(
            FixedInterval::forever(Duration::from_secs(cmd.retry_interval)).with_max_attempts(cmd.max_attempts),
        )
    };

    println!(
        "{}Driving {} of {}",
        ROCKET,
        style(cmd.operation).cyan(),
        style(&name).bold()
    );
    let report = driver.drive(&name, cmd.operation).await?;
    spinner.finish_and_clear();

    let mut objects: Vec<ManagedObject> = Vec::new();
    if report.result == DriveResult::Completed && cmd.operation == OperationKind::Create {
        if let Some(cluster) = store.load(&name).await? {
            objects = provider.after_create(&cluster).await?;
        }
    }

    if cmd.json {
        let data = serde_json::json!({ "report": report, "objects": objects });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("\n{}", format_report(&report));
        for object in &objects {
            if let ManagedObject::Machine(machine) = object {
                println!(
                    "  {}machine {} ({})",
                    INFO,
                    style(&machine.name).bold(),
                    style(&machine.spec.address).dim()
                );
            }
        }
    }

    if report.result == DriveResult::Failed {
        if let Some(err) = &report.last_error {
            error!("{}", err);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn validate_config(cmd: &ValidateCommand) -> Result<()> {
    println!("{}Validating provider...", INFO);

    let checked = load_config(&cmd.file).and_then(|config| {
        config.validate()?;
        build_definition(&config, executors(true, "root"))?;
        Ok(config)
    });

    let config = match checked {
        Ok(config) => config,
        Err(e) => {
            println!("{}Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    };

    println!("{}Provider configuration is valid!", CHECK);
    println!("  Name: {}", style(&config.name).bold());
    for operation in OperationKind::ALL {
        let steps = config.pipelines.steps_for(operation);
        if !steps.is_empty() {
            println!("  {}: {}", operation, style(steps.len()).cyan());
        }
    }

    let mut cluster_errors = None;
    if let Some(path) = &cmd.target {
        let cluster = load_cluster(path)?;
        let errors = validate_cluster(&cluster);
        if errors.is_empty() {
            println!("{}Cluster {} is valid!", CHECK, style(&cluster.name).bold());
        } else {
            println!("{}Cluster {} is invalid:", CROSS, style(&cluster.name).bold());
            println!("{}", format_errors(&errors));
        }
        cluster_errors = Some(errors);
    }

    if cmd.json {
        let data = serde_json::json!({
            "provider": config,
            "clusterErrors": cluster_errors.as_ref().map(|errors| errors.iter().map(|e| e.to_string()).collect::<Vec<_>>()),
        });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    if cluster_errors.is_some_and(|errors| !errors.is_empty()) {
        std::process::exit(1);
    }
    Ok(())
}

async fn show_status(cmd: &StatusCommand) -> Result<()> {
    let store = open_store(cmd.db.as_deref(), false).await?;
    let Some(cluster) = store.load(&cmd.name).await? else {
        println!("{}Cluster {} not found", WARN, style(&cmd.name).bold());
        std::process::exit(1);
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&cluster)?);
        return Ok(());
    }

    let status = &cluster.status;
    println!("{}Cluster {}", INFO, style(&cluster.name).bold());
    println!("  Phase: {}", format_phase(status.phase));
    if let Some(operation) = status.operation {
        println!("  Operation: {}", style(operation).cyan());
    }
    if !status.reason.is_empty() {
        println!("  Reason: {}", style(&status.reason).yellow());
    }
    if !status.message.is_empty() {
        println!("  Message: {}", style(&status.message).dim());
    }
    println!("  Machines: {}", style(cluster.machines().len()).cyan());

    if !status.conditions.is_empty() {
        println!("\n  {}", style("Conditions:").bold());
        let width = terminal_width().saturating_sub(2);
        for condition in &status.conditions {
            println!("  {}", format_condition(condition, width));
        }
    }

    Ok(())
}

async fn list_clusters(cmd: &ListCommand) -> Result<()> {
    let store = open_store(cmd.db.as_deref(), false).await?;
    let clusters = store.list().await?;

    if cmd.json {
        let data = serde_json::json!({ "clusters": clusters });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if clusters.is_empty() {
        println!("{}No clusters stored", INFO);
        return Ok(());
    }

    println!("{}Stored clusters:", INFO);
    for summary in &clusters {
        println!("  {}", format_target_summary(summary));
    }

    Ok(())
}

async fn serve_plugin(cmd: &ServeCommand) -> Result<()> {
    let config = load_config(&cmd.file)?;
    let provider = delegate_provider(&config, cmd.local, &cmd.ssh_user, &cmd.variable, Engine::new())?;
    serve_stdio(Arc::new(provider), config.plugin.clone()).await?;
    Ok(())
}
