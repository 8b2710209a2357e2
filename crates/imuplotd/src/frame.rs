use anyhow::Result;
use imuplotd_core::ipc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one length-prefixed JSON message. Returns `None` on a clean EOF
/// before the length prefix.
pub async fn read_frame<T, R>(stream: &mut R) -> Result<Option<T>>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = ipc::read_length_prefix(&len_buf)?;
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;

    Ok(Some(ipc::decode(&payload)?))
}

/// Write one length-prefixed JSON message and flush.
pub async fn write_frame<T, W>(stream: &mut W, message: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let encoded = ipc::encode(message)?;
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    Ok(())
}
