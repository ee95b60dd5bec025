use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Handshake types exchanged between a plugin client and a group host
/// broker, framed as newline-delimited JSON over a Unix stream socket.
///
/// The exchange is a single request/response pair: the client writes one
/// [`GroupRequest`], the broker answers with one [`GroupResponse`] carrying
/// its process id, and the connection is then handed over to the bridge's
/// own protocol. The broker replies *before* it constructs the bridge so
/// the client can detect a crash during plugin initialization by watching
/// that process id instead of waiting on its sockets forever.

/// A request to host one plugin instance inside the shared group process.
///
/// The pair of `plugin_path` and `endpoint_base_dir` identifies a single
/// instantiation: clients generate a fresh `endpoint_base_dir` per instance,
/// so the tuple doubles as the broker's registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupRequest {
    /// Path to the plugin module the bridge should load.
    pub plugin_path: String,
    /// Directory the bridge's own sockets live under, unique per instance.
    pub endpoint_base_dir: String,
}

/// The broker's reply: its process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResponse {
    pub pid: u32,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake I/O failed")]
    Io(#[from] std::io::Error),
    #[error("malformed handshake payload")]
    Malformed(#[from] serde_json::Error),
    #[error("peer disconnected before completing the handshake")]
    Disconnected,
}

/// Read one newline-framed JSON message from an async stream.
pub async fn read_message<T, R>(reader: &mut R) -> Result<T, HandshakeError>
where
    T: DeserializeOwned,
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(HandshakeError::Disconnected);
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Write one newline-framed JSON message to an async stream.
pub async fn write_message<T, W>(writer: &mut W, value: &T) -> Result<(), HandshakeError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut payload = serde_json::to_string(value)?;
    payload.push('\n');
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking client-side handshake: connect to a broker's endpoint, send one
/// request and wait for the broker's process id.
///
/// This is what plugin clients (and the integration tests) use; a connect
/// failure usually means no broker owns the endpoint yet and the caller
/// should launch one and retry.
pub fn request_host(
    socket_path: &Path,
    request: &GroupRequest,
) -> Result<GroupResponse, HandshakeError> {
    let stream = UnixStream::connect(socket_path)?;
    let mut payload = serde_json::to_string(request)?;
    payload.push('\n');
    (&stream).write_all(payload.as_bytes())?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(HandshakeError::Disconnected);
    }
    Ok(serde_json::from_str(line.trim_end())?)
}
