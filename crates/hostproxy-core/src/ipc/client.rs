//! Client for a single endpoint.
//!
//! Connects to an endpoint address and provides `call()` for JSON-RPC method
//! invocation. Used by tooling and the integration tests.
//!
//! # Thread Safety
//!
//! The client uses a tokio `Mutex` to serialize access to the stream,
//! allowing safe concurrent use from multiple async tasks.

use super::listener::{Connection, EndpointAddress};
use super::protocol::{read_frame, write_frame, IpcRequest, IpcResponse};
use crate::{ProxyError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Client connected to one endpoint.
pub struct IpcClient {
    stream: Mutex<Connection>,
    address: EndpointAddress,
    next_id: AtomicU64,
}

impl std::fmt::Debug for IpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcClient")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl IpcClient {
    /// Connect to the endpoint at `address`.
    pub async fn connect(address: &EndpointAddress) -> Result<Self> {
        let stream = open_stream(address)
            .await
            .map_err(|e| ProxyError::Transport {
                address: address.to_string(),
                message: format!("connect failed: {}", e),
                source: Some(e),
            })?;

        debug!("IPC client connected to {}", address);

        Ok(Self {
            stream: Mutex::new(stream),
            address: address.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Call a JSON-RPC method.
    ///
    /// Remote errors are mapped back to typed errors where the code allows.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = IpcRequest::new(method, params, id);
        let request_bytes = serde_json::to_vec(&request)?;

        let mut stream = self.stream.lock().await;

        write_frame(&mut *stream, &request_bytes)
            .await
            .map_err(|e| self.lost(e))?;

        let response_bytes = read_frame(&mut *stream)
            .await
            .map_err(|e| self.lost(e))?
            .ok_or_else(|| self.lost("connection closed"))?;

        let response: IpcResponse =
            serde_json::from_slice(&response_bytes).map_err(|e| ProxyError::Json {
                message: format!("Failed to parse IPC response: {}", e),
                source: Some(e),
            })?;

        if let Some(err) = response.error {
            return Err(ProxyError::from_rpc_error(err.code, err.message, err.data.as_ref()));
        }

        response
            .result
            .ok_or_else(|| ProxyError::Other("IPC response missing result".to_string()))
    }

    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    fn lost(&self, cause: impl std::fmt::Display) -> ProxyError {
        ProxyError::Transport {
            address: self.address.to_string(),
            message: cause.to_string(),
            source: None,
        }
    }
}

async fn open_stream(address: &EndpointAddress) -> std::io::Result<Connection> {
    #[cfg(unix)]
    {
        let stream = tokio::net::UnixStream::connect(address.as_path()).await?;
        Ok(Box::new(stream))
    }

    #[cfg(windows)]
    {
        let client = tokio::net::windows::named_pipe::ClientOptions::new().open(address.as_str())?;
        Ok(Box::new(client))
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "local IPC is not supported on this platform",
        ))
    }
}
