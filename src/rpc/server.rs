//! Plugin side of the bridge: serves a provider over a byte stream

use crate::core::{config::PluginConfig, OperationKind, Target};
use crate::error::{ProvisionError, Result};
use crate::provider::ProviderFacade;
use crate::rpc::protocol::{
    Frame, Handshake, HandshakeReply, RemoteError, RemoteErrorKind, Request, Response,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

thread_local! {
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Record a backtrace for every panic on the panicking thread
///
/// The previous hook still runs, so the panic is also reported on stderr.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture().to_string();
            PANIC_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// Write one JSON line
pub(crate) async fn write_line<W, M>(writer: &mut W, message: &M) -> Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let mut line = serde_json::to_string(message).map_err(|e| ProvisionError::Transport(e.to_string()))?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ProvisionError::Transport(e.to_string()))?;
    writer.flush().await.map_err(|e| ProvisionError::Transport(e.to_string()))
}

#[derive(Deserialize)]
struct FrameId {
    #[serde(default)]
    id: u64,
}

/// Serves one provider to one client connection
pub struct PluginServer<T: Target> {
    provider: Arc<dyn ProviderFacade<T>>,
    plugin: PluginConfig,
}

impl<T: Target> PluginServer<T> {
    pub fn new(provider: Arc<dyn ProviderFacade<T>>, plugin: PluginConfig) -> Self {
        Self { provider, plugin }
    }

    /// Handshake, then answer requests until the client hangs up
    ///
    /// A rejected handshake ends the connection with a `Handshake` error.
    /// Panics in provider code are returned to the client as errors and do
    /// not stop the server.
    pub async fn serve<R, W>(self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        install_panic_hook();
        let mut lines = BufReader::new(reader).lines();

        let first = lines
            .next_line()
            .await
            .map_err(|e| ProvisionError::Transport(e.to_string()))?
            .ok_or_else(|| ProvisionError::Handshake("connection closed before handshake".to_string()))?;

        let rejection = match serde_json::from_str::<Handshake>(&first) {
            Ok(hello) => hello.mismatch(&self.plugin),
            Err(e) => Some(format!("malformed handshake: {}", e)),
        };
        if let Some(reason) = rejection {
            warn!(%reason, "refusing plugin connection");
            write_line(&mut writer, &HandshakeReply::Rejected { reason: reason.clone() }).await?;
            return Err(ProvisionError::Handshake(reason));
        }

        write_line(
            &mut writer,
            &HandshakeReply::Accepted {
                provider: self.provider.name().to_string(),
                protocol_version: self.plugin.protocol_version,
            },
        )
        .await?;
        info!(provider = %self.provider.name(), "plugin connection accepted");

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ProvisionError::Transport(e.to_string()))?
        {
            if line.trim().is_empty() {
                continue;
            }
            let frame = match serde_json::from_str::<Frame<Request<T>>>(&line) {
                Ok(frame) => frame,
                Err(e) => {
                    let id = serde_json::from_str::<FrameId>(&line).map(|f| f.id).unwrap_or(0);
                    warn!(id, error = %e, "malformed request");
                    let body: Response<T> =
                        Response::Error(RemoteError::new(RemoteErrorKind::Protocol, format!("malformed request: {}", e)));
                    write_line(&mut writer, &Frame { id, body }).await?;
                    continue;
                }
            };

            let method = frame.body.method();
            debug!(id = frame.id, method, "request");
            let body = AssertUnwindSafe(self.dispatch(frame.body))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    let stack = PANIC_STACK.with(|slot| slot.borrow_mut().take());
                    error!(method, %message, "provider panicked");
                    Response::Error(RemoteError::panic(message, stack))
                });
            write_line(&mut writer, &Frame { id: frame.id, body }).await?;
        }

        info!("plugin client disconnected");
        Ok(())
    }

    async fn dispatch(&self, request: Request<T>) -> Response<T> {
        let provider = &self.provider;
        match request {
            Request::Name => Response::Name(provider.name().to_string()),
            Request::Init { config_file } => match provider.init(&config_file).await {
                Ok(()) => Response::Unit,
                Err(e) => Response::Error(RemoteError::from(&e)),
            },
            Request::Validate { target } => match provider.validate(&target).await {
                Ok(errors) => Response::Validation(errors),
                Err(e) => Response::Error(RemoteError::from(&e)),
            },
            Request::PreCreate { user, target } => match provider.pre_create(&user, target).await {
                Ok(target) => Response::Target(target),
                Err(e) => Response::Error(RemoteError::from(&e)),
            },
            Request::AfterCreate { target } => match provider.after_create(&target).await {
                Ok(objects) => Response::Objects(objects),
                Err(e) => Response::Error(RemoteError::from(&e)),
            },
            Request::ValidateUpdate { target, old } => match provider.validate_update(&target, &old).await {
                Ok(errors) => Response::Validation(errors),
                Err(e) => Response::Error(RemoteError::from(&e)),
            },
            Request::OnCreate { target } => self.operate(OperationKind::Create, target).await,
            Request::OnUpdate { target } => self.operate(OperationKind::Update, target).await,
            Request::OnUpgrade { target } => self.operate(OperationKind::Upgrade, target).await,
            Request::OnScaleUp { target } => self.operate(OperationKind::ScaleUp, target).await,
            Request::OnScaleDown { target } => self.operate(OperationKind::ScaleDown, target).await,
            Request::OnDelete { target } => self.operate(OperationKind::Delete, target).await,
        }
    }

    async fn operate(&self, operation: OperationKind, mut target: T) -> Response<T> {
        let result = self
            .provider
            .operate(operation, &mut target)
            .await
            .map_err(|e| RemoteError::from(&e));
        Response::Operated { target, result }
    }
}

/// Run as a plugin on this process's stdin and stdout
///
/// Refuses to start unless the host set the magic cookie in the
/// environment; the binary is not meant to be run by hand.
pub async fn serve_stdio<T: Target>(provider: Arc<dyn ProviderFacade<T>>, plugin: PluginConfig) -> Result<()> {
    match std::env::var(&plugin.magic_cookie_key) {
        Ok(value) if value == plugin.magic_cookie_value => {}
        _ => {
            return Err(ProvisionError::Handshake(format!(
                "this binary is a provisioner plugin and is not meant to be executed directly ({} not set)",
                plugin.magic_cookie_key
            )))
        }
    }

    PluginServer::new(provider, plugin)
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
}
