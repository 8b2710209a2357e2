use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::PipelineStatus;
use crate::sample::{ChannelId, ChartPoint};

/// Maximum IPC message size (1 MB).
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IPC message too large: {size} bytes (max {MAX_MESSAGE_SIZE})")]
    MessageTooLarge { size: u32 },
    #[error("failed to encode IPC message: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to parse IPC message: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Requests from the imuplotd CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    GetStatus,
    StartMeasurement,
    StopMeasurement,
    Connect,
    Disconnect,
    GetWindow { channel: ChannelId },
    GetConfig,
    ReloadConfig,
    Shutdown,
}

/// Device link state reported via IPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub connected: bool,
}

/// Responses from the daemon to the imuplotd CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Ok,
    Error {
        message: String,
    },
    Status {
        device: DeviceStatus,
        pipeline: PipelineStatus,
    },
    Window {
        channel: ChannelId,
        points: Vec<ChartPoint>,
    },
    Config {
        toml: String,
    },
}

/// Encode a message with a 4-byte little-endian length prefix.
pub fn encode_message(msg: &[u8]) -> Result<Vec<u8>, IpcError> {
    let len = u32::try_from(msg.len()).map_err(|_| IpcError::MessageTooLarge { size: u32::MAX })?;
    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge { size: len });
    }
    let mut buf = Vec::with_capacity(4 + msg.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(msg);
    Ok(buf)
}

/// Encode any IPC message as length-prefixed JSON.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, IpcError> {
    let json = serde_json::to_vec(msg).map_err(IpcError::Serialize)?;
    encode_message(&json)
}

/// Parse a JSON payload read after its length prefix.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, IpcError> {
    serde_json::from_slice(payload).map_err(IpcError::Deserialize)
}

/// Decode a length prefix, rejecting anything over [`MAX_MESSAGE_SIZE`].
pub fn read_length_prefix(buf: &[u8; 4]) -> Result<u32, IpcError> {
    let len = u32::from_le_bytes(*buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge { size: len });
    }
    Ok(len)
}

/// Returns the XDG runtime directory, falling back to `/run/user/{uid}`.
#[must_use]
pub fn xdg_runtime_dir() -> std::path::PathBuf {
    let dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| {
        let uid = unsafe { libc::getuid() };
        format!("/run/user/{uid}")
    });
    std::path::PathBuf::from(dir)
}

/// Returns the default IPC socket path.
#[must_use]
pub fn default_socket_path() -> std::path::PathBuf {
    xdg_runtime_dir().join("imuplotd.sock")
}
