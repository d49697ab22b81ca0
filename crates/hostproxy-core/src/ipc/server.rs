//! Endpoint server.
//!
//! One [`IpcServer`] serves exactly one (group, version) endpoint. It accepts
//! connections from its [`Listener`], reads length-prefixed JSON-RPC frames,
//! and hands each call to the service a [`Registrant`](crate::Registrant)
//! attached to it.
//!
//! # Thread Safety
//!
//! The server runs on the tokio runtime. Each connection is handled in its own
//! spawned task; the service is shared via `Arc` and must synchronize
//! internally.

use super::listener::{Connection, EndpointAddress, Listener};
use super::protocol::{read_frame, write_frame, IpcRequest, IpcResponse};
use crate::config::IpcConfig;
use crate::version::Version;
use crate::{ProxyError, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// A service attached to an endpoint server.
#[async_trait::async_trait]
pub trait Dispatch: Send + Sync + 'static {
    /// Dispatch a JSON-RPC method call and return the result.
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value>;
}

/// Receiving half of a server's shutdown signal.
pub struct ShutdownSignal {
    accept_rx: oneshot::Receiver<()>,
    conn_rx: watch::Receiver<bool>,
}

/// Sending half of a server's shutdown signal.
#[derive(Debug)]
pub struct ServerHandle {
    accept_tx: Option<oneshot::Sender<()>>,
    conn_tx: watch::Sender<bool>,
}

impl ServerHandle {
    /// Create a connected handle/signal pair.
    pub fn channel() -> (ServerHandle, ShutdownSignal) {
        let (accept_tx, accept_rx) = oneshot::channel();
        let (conn_tx, conn_rx) = watch::channel(false);
        (
            ServerHandle {
                accept_tx: Some(accept_tx),
                conn_tx,
            },
            ShutdownSignal { accept_rx, conn_rx },
        )
    }

    /// Ask the server to stop accepting and close idle connections.
    ///
    /// Does not wait. Returns `false` if the server had already exited or
    /// shutdown was already requested.
    pub fn shutdown(&mut self) -> bool {
        let accepted = match self.accept_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        };
        // Connection handlers may outlive the accept loop.
        let _ = self.conn_tx.send(true);
        accepted
    }
}

/// Handle to a server started with [`IpcServer::start`]. Dropping shuts it down.
pub struct RunningServer {
    address: EndpointAddress,
    handle: ServerHandle,
    task: Option<tokio::task::JoinHandle<Result<()>>>,
}

impl RunningServer {
    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Request shutdown without waiting.
    pub fn shutdown(&mut self) {
        self.handle.shutdown();
    }

    /// Request shutdown and wait for the accept loop to exit.
    pub async fn stop(mut self) -> Result<()> {
        self.handle.shutdown();
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ProxyError::Other(format!("server task failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Per-connection view of the endpoint.
struct Endpoint {
    group: String,
    version: Version,
    service: Option<Arc<dyn Dispatch>>,
}

/// Server for a single (group, version) endpoint.
pub struct IpcServer {
    group: String,
    version: Version,
    service: Option<Arc<dyn Dispatch>>,
}

impl IpcServer {
    pub fn new(group: impl Into<String>, version: Version) -> Self {
        Self {
            group: group.into(),
            version,
            service: None,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Attach the service this endpoint serves.
    pub fn register_service(&mut self, service: Arc<dyn Dispatch>) {
        if self.service.is_some() {
            warn!(
                "Replacing service already registered on {} {}",
                self.group, self.version
            );
        }
        self.service = Some(service);
    }

    /// Serve on `listener` in a background task.
    pub fn start(self, listener: Box<dyn Listener>) -> RunningServer {
        let address = listener.address().clone();
        let (handle, signal) = ServerHandle::channel();
        let task = tokio::spawn(self.serve(listener, signal));
        RunningServer {
            address,
            handle,
            task: Some(task),
        }
    }

    /// Serve until `signal` fires (clean exit) or the listener fails.
    ///
    /// The listener is closed on return either way.
    pub async fn serve(self, mut listener: Box<dyn Listener>, signal: ShutdownSignal) -> Result<()> {
        let ShutdownSignal {
            mut accept_rx,
            conn_rx,
        } = signal;
        let address = listener.address().clone();
        let endpoint = Arc::new(Endpoint {
            group: self.group,
            version: self.version,
            service: self.service,
        });
        let active_connections = Arc::new(AtomicUsize::new(0));

        info!(
            "Serving {} {} on {}",
            endpoint.group, endpoint.version, address
        );

        let result = loop {
            tokio::select! {
                _ = &mut accept_rx => {
                    info!("Endpoint {} {} shutting down", endpoint.group, endpoint.version);
                    break Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok(stream) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= IpcConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting connection on {}: at max capacity ({})",
                                    address,
                                    IpcConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let endpoint = endpoint.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_rx.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, &endpoint, &mut conn_shutdown).await {
                                    debug!("Connection to {} {} ended: {}", endpoint.group, endpoint.version, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept failed on {}: {}", address, e);
                            break Err(ProxyError::Transport {
                                address: address.to_string(),
                                message: e.to_string(),
                                source: Some(e),
                            });
                        }
                    }
                }
            }
        };

        if let Err(e) = listener.close() {
            warn!("Failed to close listener {}: {}", address, e);
        }

        result
    }
}

async fn handle_connection(
    stream: Connection,
    endpoint: &Endpoint,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);

    loop {
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        let frame = tokio::select! {
            result = read_frame(&mut reader) => {
                match result? {
                    Some(f) => f,
                    None => return Ok(()), // Clean disconnect
                }
            }
            _ = shutdown_rx.changed() => {
                return Ok(());
            }
        };

        let response = process_request(&frame, endpoint).await;
        let response_bytes = serde_json::to_vec(&response)?;
        write_frame(&mut writer, &response_bytes).await?;
    }
}

async fn process_request(frame: &[u8], endpoint: &Endpoint) -> IpcResponse {
    let request: IpcRequest = match serde_json::from_slice(frame) {
        Ok(req) => req,
        Err(e) => {
            return IpcResponse::error(None, -32700, format!("Parse error: {}", e));
        }
    };

    if request.jsonrpc != IpcConfig::JSONRPC_VERSION {
        return IpcResponse::error(
            request.id,
            -32600,
            "Invalid Request: expected jsonrpc 2.0".to_string(),
        );
    }

    debug!(
        "{} {} call: {}",
        endpoint.group, endpoint.version, request.method
    );

    if request.method == "health_check" {
        return IpcResponse::success(
            request.id,
            json!({
                "status": "ok",
                "group": endpoint.group,
                "version": endpoint.version,
            }),
        );
    }

    let params = request
        .params
        .unwrap_or_else(|| Value::Object(Default::default()));

    let result = match &endpoint.service {
        Some(service) => service.dispatch(&request.method, params).await,
        None => Err(ProxyError::MethodNotFound(request.method.clone())),
    };

    match result {
        Ok(value) => IpcResponse::success(request.id, value),
        Err(e) => {
            if e.is_rejection() {
                debug!("{} {} {} rejected: {}", endpoint.group, endpoint.version, request.method, e);
            } else {
                warn!("{} {} {} failed: {}", endpoint.group, endpoint.version, request.method, e);
            }
            IpcResponse::from_error(request.id, &e)
        }
    }
}
