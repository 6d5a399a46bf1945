//! TCP control server: accept loop, per-connection request handling, and
//! the translation from wire requests to registry operations.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ControlConfig, LivenessConfig};
use crate::control::protocol::{build_remap_table, ControlRequest, ControlResponse};
use crate::error::HostError;
use crate::liveness::LivenessMonitor;
use crate::loader::{LoadParams, LoaderShared};

#[derive(Debug, Error)]
pub enum ControlServerError {
    #[error("failed to bind control listener on {address}: {reason}")]
    BindFailed { address: String, reason: String },
}

/// The RPC-facing adapter: validates requests, builds remapping tables,
/// wires liveness monitors, and forwards to the registry. Holds no
/// component state of its own.
pub struct ControlServer {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_handle: JoinHandle<()>,
}

struct ServerContext {
    shared: Arc<LoaderShared>,
    namespace: String,
    liveness: LivenessConfig,
}

impl ControlServer {
    pub(crate) async fn start(
        shared: Arc<LoaderShared>,
        control: &ControlConfig,
        liveness: &LivenessConfig,
    ) -> Result<Self, ControlServerError> {
        let listener = TcpListener::bind(&control.bind_address).await.map_err(|err| {
            ControlServerError::BindFailed {
                address: control.bind_address.clone(),
                reason: err.to_string(),
            }
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| ControlServerError::BindFailed {
                address: control.bind_address.clone(),
                reason: err.to_string(),
            })?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(8);
        let context = Arc::new(ServerContext {
            shared,
            namespace: control.namespace.clone(),
            liveness: liveness.clone(),
        });

        let accept_handle = tokio::spawn(accept_loop(
            listener,
            context,
            shutdown_tx.clone(),
            shutdown_rx,
        ));

        info!(%local_addr, "control server listening");
        Ok(Self {
            local_addr,
            shutdown_tx,
            accept_handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting requests and wait for in-flight connections to
    /// finish their current request.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(err) = self.accept_handle.await {
            if !err.is_cancelled() {
                warn!(%err, "control accept task failed during shutdown");
            }
        }
        info!("control server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let connection_id = Uuid::new_v4();
                    debug!(%connection_id, %peer, "control connection opened");
                    connections.spawn(handle_connection(
                        stream,
                        Arc::clone(&context),
                        connection_id,
                        shutdown_tx.subscribe(),
                    ));
                }
                Err(err) => {
                    error!(%err, "failed to accept control connection");
                }
            },
            _ = shutdown_rx.recv() => {
                debug!("control accept loop shutting down");
                break;
            }
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn handle_connection(
    stream: TcpStream,
    context: Arc<ServerContext>,
    connection_id: Uuid,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<ControlRequest>(line) {
                        Ok(request) => handle_request(&context, request).await,
                        Err(err) => {
                            warn!(%connection_id, %err, "malformed control request");
                            ControlResponse::failure(format!("malformed request: {err}"))
                        }
                    };

                    let mut payload = match serde_json::to_string(&response) {
                        Ok(payload) => payload,
                        Err(err) => {
                            error!(%connection_id, %err, "failed to encode control response");
                            continue;
                        }
                    };
                    payload.push('\n');

                    if let Err(err) = writer.write_all(payload.as_bytes()).await {
                        debug!(%connection_id, %err, "control connection write failed");
                        break;
                    }
                }
                Ok(None) => {
                    debug!(%connection_id, "control connection closed by peer");
                    break;
                }
                Err(err) => {
                    debug!(%connection_id, %err, "control connection read failed");
                    break;
                }
            },
            _ = shutdown_rx.recv() => {
                debug!(%connection_id, "closing control connection for shutdown");
                break;
            }
        }
    }
}

async fn handle_request(context: &ServerContext, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Load {
            name,
            type_name,
            remap_source,
            remap_target,
            args,
            liveness_id,
        } => {
            let remappings = build_remap_table(&context.namespace, &remap_source, &remap_target);

            let monitor = if liveness_id.is_empty() {
                None
            } else {
                Some(LivenessMonitor::new(liveness_id, &context.liveness))
            };

            let params = LoadParams {
                name,
                type_name,
                remappings,
                args,
                liveness: monitor.clone(),
            };

            match context.shared.load(params).await {
                Ok(()) => {
                    // The registry lock is released; a broken-peer event
                    // from here on reaches the unload mailbox safely.
                    if let Some(monitor) = monitor {
                        monitor.start();
                    }
                    ControlResponse::ok()
                }
                Err(err) => ControlResponse::failure(err.to_string()),
            }
        }

        ControlRequest::Unload { name } => {
            if context.shared.unload(&name).await {
                ControlResponse::ok()
            } else {
                error!(%name, "failed to find component to unload");
                ControlResponse::failure(HostError::NotFound { name }.to_string())
            }
        }

        ControlRequest::List => ControlResponse::with_names(context.shared.list().await),

        ControlRequest::Heartbeat { liveness_id } => {
            if context.shared.heartbeat(&liveness_id).await {
                ControlResponse::ok()
            } else {
                ControlResponse::failure(format!("no liveness channel '{liveness_id}'"))
            }
        }
    }
}
