use anyhow::Result;
use imuplotd_core::ipc::IpcRequest;

use super::{check_response, send_request};

/// Send a request that answers with a bare `Ok`.
pub async fn run(request: IpcRequest, done: &str) -> Result<()> {
    check_response(send_request(request).await?)?;
    println!("{done}");
    Ok(())
}
