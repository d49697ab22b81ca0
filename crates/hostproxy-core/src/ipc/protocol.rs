//! Framing and message types spoken on every endpoint.
//!
//! A frame is the payload length as a big-endian `u32`, then that many bytes
//! of JSON. Payloads are JSON-RPC 2.0 requests and responses; frames over
//! [`IpcConfig::MAX_MESSAGE_SIZE`] are refused in both directions.

use crate::config::IpcConfig;
use crate::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A call addressed to one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

impl IpcRequest {
    /// Request `method` with a numeric `id`.
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: IpcConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::Number(id.into())),
        }
    }
}

/// Reply to an [`IpcRequest`]; exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
    pub id: Option<Value>,
}

impl IpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: IpcConfig::JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Error reply with no `data`.
    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: IpcConfig::JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(IpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    /// Error response for `err`, with its structured fields in `data`.
    pub fn from_error(id: Option<Value>, err: &ProxyError) -> Self {
        let mut response = Self::error(id, err.to_rpc_error_code(), err.to_string());
        if let Some(error) = response.error.as_mut() {
            error.data = err.to_rpc_error_data();
        }
        response
    }
}

/// Error member of an [`IpcResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Next frame from `reader`, or `None` once the peer has hung up between frames.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > IpcConfig::MAX_MESSAGE_SIZE {
        return Err(ProxyError::invalid_argument(format!(
            "IPC message size {} exceeds maximum {}",
            len,
            IpcConfig::MAX_MESSAGE_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Send `payload` as one frame and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > IpcConfig::MAX_MESSAGE_SIZE {
        return Err(ProxyError::invalid_argument(format!(
            "IPC message size {} exceeds maximum {}",
            payload.len(),
            IpcConfig::MAX_MESSAGE_SIZE
        )));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
