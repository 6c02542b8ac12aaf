//! Host side of the bridge: a provider living in another process

use crate::core::{config::PluginConfig, ErrorList, ManagedObject, OperationKind, Target};
use crate::error::{ProvisionError, Result};
use crate::execution::StepOutcome;
use crate::provider::ProviderFacade;
use crate::rpc::protocol::{Frame, Handshake, HandshakeReply, Request, Response};
use crate::rpc::server::write_line;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Connection {
    lines: Lines<BufReader<BoxedReader>>,
    writer: BoxedWriter,
    // Held so the plugin is killed when the provider is dropped
    _child: Option<Child>,
}

impl Connection {
    async fn read_line(&mut self) -> Result<String> {
        self.lines
            .next_line()
            .await
            .map_err(|e| ProvisionError::Transport(e.to_string()))?
            .ok_or_else(|| ProvisionError::Transport("plugin closed the connection".to_string()))
    }
}

/// A [`ProviderFacade`] whose calls are answered by a plugin process
///
/// Calls are serialized over one connection.
pub struct RemoteProvider<T: Target> {
    name: String,
    conn: Mutex<Connection>,
    next_id: AtomicU64,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Target> RemoteProvider<T> {
    /// Handshake over an established stream pair
    pub async fn connect<R, W>(reader: R, writer: W, plugin: &PluginConfig) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::handshake(Box::new(reader), Box::new(writer), None, plugin).await
    }

    /// Start `program` as a plugin and handshake over its stdio
    pub async fn spawn(program: &str, args: &[String], plugin: &PluginConfig) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .env(&plugin.magic_cookie_key, &plugin.magic_cookie_value)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProvisionError::Transport(format!("failed to start plugin {}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProvisionError::Transport("plugin stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProvisionError::Transport("plugin stdout unavailable".to_string()))?;

        debug!(program, pid = ?child.id(), "plugin started");
        Self::handshake(Box::new(stdout), Box::new(stdin), Some(child), plugin).await
    }

    async fn handshake(
        reader: BoxedReader,
        writer: BoxedWriter,
        child: Option<Child>,
        plugin: &PluginConfig,
    ) -> Result<Self> {
        let mut conn = Connection {
            lines: BufReader::new(reader).lines(),
            writer,
            _child: child,
        };

        write_line(&mut conn.writer, &Handshake::from(plugin)).await?;
        let reply = conn
            .read_line()
            .await
            .map_err(|e| ProvisionError::Handshake(e.to_string()))?;

        match serde_json::from_str::<HandshakeReply>(&reply) {
            Ok(HandshakeReply::Accepted { provider, protocol_version }) => {
                info!(provider = %provider, protocol_version, "connected to plugin");
                Ok(Self {
                    name: provider,
                    conn: Mutex::new(conn),
                    next_id: AtomicU64::new(1),
                    _kind: PhantomData,
                })
            }
            Ok(HandshakeReply::Rejected { reason }) => Err(ProvisionError::Handshake(reason)),
            Err(e) => Err(ProvisionError::Handshake(format!("malformed handshake reply: {}", e))),
        }
    }

    /// Send one request and wait for its response
    ///
    /// A `Response::Error` is turned into the matching `ProvisionError`.
    pub async fn call(&self, request: Request<T>) -> Result<Response<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = request.method();
        let mut conn = self.conn.lock().await;

        debug!(id, method, "calling plugin");
        write_line(&mut conn.writer, &Frame { id, body: request }).await?;

        let line = conn.read_line().await?;
        let frame: Frame<Response<T>> =
            serde_json::from_str(&line).map_err(|e| ProvisionError::Transport(format!("malformed response: {}", e)))?;
        if frame.id != id {
            return Err(ProvisionError::Transport(format!(
                "response id {} does not match request id {}",
                frame.id, id
            )));
        }

        match frame.body {
            Response::Error(err) => Err(err.into()),
            body => Ok(body),
        }
    }

    /// Ask the plugin for its name again
    pub async fn remote_name(&self) -> Result<String> {
        match self.call(Request::Name).await? {
            Response::Name(name) => Ok(name),
            _ => Err(unexpected("Name")),
        }
    }

    async fn operate_remote(&self, operation: OperationKind, target: &mut T) -> Result<StepOutcome> {
        match self.call(Request::operate(operation, target.clone())).await? {
            Response::Operated { target: updated, result } => {
                *target = updated;
                result.map_err(Into::into)
            }
            _ => Err(unexpected("On*")),
        }
    }
}

fn unexpected(method: &str) -> ProvisionError {
    ProvisionError::Transport(format!("unexpected response to {}", method))
}

#[async_trait]
impl<T: Target> ProviderFacade<T> for RemoteProvider<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, config_file: &str) -> Result<()> {
        match self
            .call(Request::Init {
                config_file: config_file.to_string(),
            })
            .await?
        {
            Response::Unit => Ok(()),
            _ => Err(unexpected("Init")),
        }
    }

    async fn validate(&self, target: &T) -> Result<ErrorList> {
        match self.call(Request::Validate { target: target.clone() }).await? {
            Response::Validation(errors) => Ok(errors),
            _ => Err(unexpected("Validate")),
        }
    }

    async fn pre_create(&self, user: &str, target: T) -> Result<T> {
        match self
            .call(Request::PreCreate {
                user: user.to_string(),
                target,
            })
            .await?
        {
            Response::Target(target) => Ok(target),
            _ => Err(unexpected("PreCreate")),
        }
    }

    async fn after_create(&self, target: &T) -> Result<Vec<ManagedObject>> {
        match self.call(Request::AfterCreate { target: target.clone() }).await? {
            Response::Objects(objects) => Ok(objects),
            _ => Err(unexpected("AfterCreate")),
        }
    }

    async fn validate_update(&self, target: &T, old: &T) -> Result<ErrorList> {
        match self
            .call(Request::ValidateUpdate {
                target: target.clone(),
                old: old.clone(),
            })
            .await?
        {
            Response::Validation(errors) => Ok(errors),
            _ => Err(unexpected("ValidateUpdate")),
        }
    }

    async fn on_create(&self, target: &mut T) -> Result<StepOutcome> {
        self.operate_remote(OperationKind::Create, target).await
    }

    async fn on_update(&self, target: &mut T) -> Result<StepOutcome> {
        self.operate_remote(OperationKind::Update, target).await
    }

    async fn on_upgrade(&self, target: &mut T) -> Result<StepOutcome> {
        self.operate_remote(OperationKind::Upgrade, target).await
    }

    async fn on_scale_up(&self, target: &mut T) -> Result<StepOutcome> {
        self.operate_remote(OperationKind::ScaleUp, target).await
    }

    async fn on_scale_down(&self, target: &mut T) -> Result<StepOutcome> {
        self.operate_remote(OperationKind::ScaleDown, target).await
    }

    async fn on_delete(&self, target: &mut T) -> Result<StepOutcome> {
        self.operate_remote(OperationKind::Delete, target).await
    }
}
