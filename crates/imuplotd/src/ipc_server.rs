use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use imuplotd_core::ipc::{IpcRequest, IpcResponse};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::IpcMessage;
use crate::frame::{read_frame, write_frame};

/// Remove a socket file left behind by a crashed daemon.
///
/// A socket that still accepts connections belongs to a live daemon, and
/// starting a second one is refused.
pub async fn cleanup_stale_socket(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    if UnixStream::connect(path).await.is_ok() {
        anyhow::bail!(
            "another imuplotd instance is already running (socket {} is active)",
            path.display()
        );
    }

    info!("removing stale socket file: {}", path.display());
    tokio::fs::remove_file(path)
        .await
        .with_context(|| format!("failed to remove stale socket {}", path.display()))
}

/// Bind with a 077 umask so the socket is private to the user.
fn bind_private(socket_path: &Path) -> Result<UnixListener> {
    // Safety: umask is process-global; this runs during startup before any
    // other thread creates files.
    let old_umask = unsafe { libc::umask(0o077) };
    let listener = UnixListener::bind(socket_path);
    unsafe { libc::umask(old_umask) };
    listener.with_context(|| format!("failed to bind IPC socket at {}", socket_path.display()))
}

/// Accept clients on `socket_path` and forward their requests to the engine.
pub async fn run(
    socket_path: PathBuf,
    request_tx: mpsc::Sender<IpcMessage>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = bind_private(&socket_path)?;
    info!("IPC server listening on {}", socket_path.display());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, _addr)) => {
                    let tx = request_tx.clone();
                    let client_cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_client(stream, tx, client_cancel).await {
                            debug!("IPC client error: {e:#}");
                        }
                    });
                }
                Err(e) => warn!("failed to accept IPC connection: {e}"),
            },
        }
    }

    let _ = tokio::fs::remove_file(&socket_path).await;
    info!("IPC server stopped");
    Ok(())
}

/// Serve one client: each request gets exactly one response, in order.
async fn serve_client(
    mut stream: UnixStream,
    request_tx: mpsc::Sender<IpcMessage>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let request: IpcRequest = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = read_frame(&mut stream) => match result? {
                Some(request) => request,
                None => return Ok(()),
            },
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if request_tx.send(IpcMessage { request, reply_tx }).await.is_err() {
            return Ok(());
        }

        let response = reply_rx.await.unwrap_or_else(|_| IpcResponse::Error {
            message: "daemon shutting down".into(),
        });
        write_frame(&mut stream, &response).await?;
    }
}
