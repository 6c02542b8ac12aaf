//! Host and plugin talking over an in-memory stream

mod helpers;

use async_trait::async_trait;
use helpers::*;
use provisioner::core::config::PluginConfig;
use provisioner::core::{Cluster, OperationKind, Phase, PipelineDefinition, Step, StepContext, StepHandler};
use provisioner::error::ProvisionError;
use provisioner::execution::StepOutcome;
use provisioner::provider::{ClusterHooks, DelegateProvider, ProviderFacade};
use provisioner::rpc::{Frame, Handshake, PluginServer, RemoteProvider, Response};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

/// Panics while provisioning any cluster named "cursed"
struct Cursed;

#[async_trait]
impl StepHandler<Cluster> for Cursed {
    async fn execute(&self, _ctx: &StepContext, cluster: &mut Cluster) -> anyhow::Result<()> {
        if cluster.name == "cursed" {
            panic!("kaboom on {}", cluster.name);
        }
        Ok(())
    }
}

fn plugin_provider() -> Arc<dyn ProviderFacade<Cluster>> {
    let (a, b) = (ScriptedHandler::ok(), ScriptedHandler::ok());
    let mut create = steps(&[("prepare", &a), ("initMaster", &b)]);
    create.insert(1, Step::new("bless", Cursed));
    let definition = PipelineDefinition::builder()
        .steps(OperationKind::Create, create)
        .build()
        .unwrap();
    Arc::new(DelegateProvider::new("remote-shell", definition).with_hooks(ClusterHooks))
}

fn serve(plugin: PluginConfig) -> (tokio::io::DuplexStream, JoinHandle<provisioner::Result<()>>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(server);
    let handle = tokio::spawn(PluginServer::new(plugin_provider(), plugin).serve(reader, writer));
    (client, handle)
}

async fn connect(plugin: PluginConfig) -> (provisioner::Result<RemoteProvider<Cluster>>, JoinHandle<provisioner::Result<()>>) {
    let (stream, handle) = serve(PluginConfig::default());
    let (reader, writer) = tokio::io::split(stream);
    (RemoteProvider::connect(reader, writer, &plugin).await, handle)
}

#[tokio::test]
async fn test_create_over_the_bridge() {
    let (remote, _server) = connect(PluginConfig::default()).await;
    let remote = remote.unwrap();
    assert_eq!(remote.name(), "remote-shell");
    assert_eq!(remote.remote_name().await.unwrap(), "remote-shell");

    let invalid = Cluster::new("empty");
    assert!(!remote.validate(&invalid).await.unwrap().is_empty());

    let mut cluster = remote.pre_create("ops", cluster("prod")).await.unwrap();
    assert_eq!(cluster.spec.machines[0].hostname, "prod-m1");

    let (calls, done) = operate_until_done(&remote, OperationKind::Create, &mut cluster, 10).await;
    assert!(done);
    assert_eq!(calls, 3);
    assert_eq!(cluster.status.phase, Phase::Running);
    assert_eq!(true_count(&cluster), 3);

    let objects = remote.after_create(&cluster).await.unwrap();
    assert_eq!(objects.len(), 3);
}

#[tokio::test]
async fn test_config_errors_stay_fatal_across_the_bridge() {
    let (remote, _server) = connect(PluginConfig::default()).await;
    let remote = remote.unwrap();

    let mut cluster = cluster("prod");
    cluster.status.phase = Phase::Upgrading;
    let err = remote.on_upgrade(&mut cluster).await.unwrap_err();
    assert!(err.is_config_error(), "{:?}", err);
}

#[tokio::test]
async fn test_panicking_step_does_not_take_down_the_plugin() {
    let (remote, server) = connect(PluginConfig::default()).await;
    let remote = remote.unwrap();

    let mut cursed = cluster("cursed");
    assert_eq!(remote.on_create(&mut cursed).await.unwrap().step(), "prepare");

    let err = remote.on_create(&mut cursed).await.unwrap_err();
    match err {
        ProvisionError::Remote { message, stack } => {
            assert!(message.contains("kaboom on cursed"), "{}", message);
            assert!(stack.is_some_and(|s| !s.is_empty()));
        }
        other => panic!("unexpected error {:?}", other),
    }

    // Still serving
    let mut blessed = cluster("blessed");
    let (_, done) = operate_until_done(&remote, OperationKind::Create, &mut blessed, 10).await;
    assert!(done);

    drop(remote);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_mismatched_cookie_is_rejected() {
    let plugin = PluginConfig {
        magic_cookie_value: "not-the-cookie".to_string(),
        ..PluginConfig::default()
    };
    let (remote, server) = connect(plugin).await;

    let err = remote.err().unwrap();
    assert!(matches!(err, ProvisionError::Handshake(ref reason) if reason.contains("magic cookie")));
    assert!(matches!(server.await.unwrap(), Err(ProvisionError::Handshake(_))));
}

#[tokio::test]
async fn test_mismatched_protocol_version_is_rejected() {
    let plugin = PluginConfig {
        protocol_version: 2,
        ..PluginConfig::default()
    };
    let (remote, _server) = connect(plugin).await;

    let err = remote.err().unwrap();
    assert!(err.to_string().contains("protocol version"), "{}", err);
}

/// Older hosts still call the create entry point by its former name
#[tokio::test]
async fn test_on_initialize_is_served_as_create() {
    let (stream, _server) = serve(PluginConfig::default());
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    let hello = serde_json::to_string(&Handshake::from(&PluginConfig::default())).unwrap();
    writer.write_all(format!("{}\n", hello).as_bytes()).await.unwrap();
    let reply = lines.next_line().await.unwrap().unwrap();
    assert!(reply.contains("Accepted"), "{}", reply);

    let request = serde_json::json!({
        "id": 41,
        "body": { "method": "OnInitialize", "params": { "target": cluster("prod") } }
    });
    writer.write_all(format!("{}\n", request).as_bytes()).await.unwrap();

    let line = lines.next_line().await.unwrap().unwrap();
    let frame: Frame<Response<Cluster>> = serde_json::from_str(&line).unwrap();
    assert_eq!(frame.id, 41);
    match frame.body {
        Response::Operated { target, result } => {
            assert_eq!(
                result.unwrap(),
                StepOutcome::Advanced {
                    step: "prepare".to_string(),
                    next: "bless".to_string()
                }
            );
            assert_eq!(target.status.conditions.len(), 2);
        }
        other => panic!("unexpected response {:?}", other),
    }

    writer.write_all(b"{not json}\n").await.unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    assert!(line.contains("malformed request"), "{}", line);
}
