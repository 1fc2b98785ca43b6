//! Request/reply wire protocol between the coordinator and handler processes
//!
//! Frames are a 4-byte big-endian length prefix followed by a bincode-encoded
//! envelope. Method parameters and results travel as raw JSON bytes: their
//! schema belongs to the scheduler collaborator and is opaque to the fabric,
//! which only guarantees one request in flight per session and exactly one
//! reply consumed per send.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::errors::{SharedError, SharedResult};

/// Upper bound on a single frame
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Reserved no-op method answered by every handler; used by health checks
pub const PING_METHOD: &str = "ping";

/// One RPC request. The correlation id ties the single expected reply back
/// to this request; a reply carrying any other id means the session alternation
/// was violated by a prior failure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcRequest {
    pub id: Uuid,
    pub method: String,
    /// JSON-encoded parameters, opaque to the fabric
    pub params: Vec<u8>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: &serde_json::Value) -> SharedResult<Self> {
        let params = serde_json::to_vec(params).map_err(|e| SharedError::SerializationError {
            message: format!("Failed to encode params: {e}"),
        })?;
        Ok(Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params,
        })
    }

    /// Decode the parameter bytes back into JSON
    pub fn params_value(&self) -> SharedResult<serde_json::Value> {
        serde_json::from_slice(&self.params).map_err(|e| SharedError::DeserializationError {
            message: format!("Failed to decode params: {e}"),
        })
    }
}

/// The single reply to an [`RpcRequest`]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcResponse {
    pub id: Uuid,
    /// JSON-encoded result on success, handler-side error message otherwise
    pub outcome: Result<Vec<u8>, String>,
}

impl RpcResponse {
    pub fn ok(id: Uuid, value: &serde_json::Value) -> SharedResult<Self> {
        let bytes = serde_json::to_vec(value).map_err(|e| SharedError::SerializationError {
            message: format!("Failed to encode result: {e}"),
        })?;
        Ok(Self {
            id,
            outcome: Ok(bytes),
        })
    }

    pub fn error(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Err(message.into()),
        }
    }

    /// Decode the result bytes back into JSON, or surface the handler error
    pub fn result_value(&self) -> SharedResult<Result<serde_json::Value, String>> {
        match &self.outcome {
            Ok(bytes) => {
                let value =
                    serde_json::from_slice(bytes).map_err(|e| SharedError::DeserializationError {
                        message: format!("Failed to decode result: {e}"),
                    })?;
                Ok(Ok(value))
            }
            Err(message) => Ok(Err(message.clone())),
        }
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<T, W>(writer: &mut W, message: &T) -> SharedResult<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let data = bincode::serialize(message).map_err(|e| SharedError::SerializationError {
        message: format!("Failed to serialize frame: {e}"),
    })?;

    if data.len() > MAX_FRAME_BYTES {
        return Err(SharedError::FrameTooLarge { size: data.len() });
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame
pub async fn read_frame<T, R>(reader: &mut R) -> SharedResult<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_FRAME_BYTES {
        return Err(SharedError::FrameTooLarge { size: len });
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    bincode::deserialize(&data).map_err(|e| SharedError::DeserializationError {
        message: format!("Failed to deserialize frame: {e}"),
    })
}
