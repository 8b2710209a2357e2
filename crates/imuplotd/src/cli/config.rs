use anyhow::{Context, Result};
use imuplotd_core::config::Config;
use imuplotd_core::ipc::{IpcRequest, IpcResponse};

use super::{check_response, send_request};
use crate::ConfigCommands;

/// Printed after a successful reload. The engine rebuilds its tickers right
/// away but keeps the running pipeline until the next start.
const RELOAD_NOTICE: &str = "Config reloaded.\n  \
    applied now:        poll_interval_ms, frame_interval_ms\n  \
    applied next start: window, dedup and flush settings\n  \
    applied on restart: [device] settings";

pub async fn run(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let resp = check_response(send_request(IpcRequest::GetConfig).await?)?;
            print!("{}", active_toml(resp)?);
        }
        ConfigCommands::Reload => {
            check_response(send_request(IpcRequest::ReloadConfig).await?)?;
            println!("{RELOAD_NOTICE}");
        }
        ConfigCommands::Dir => {
            let dir = Config::default_dir().context("failed to resolve XDG config directory")?;
            println!("{}", dir.display());
        }
    }
    Ok(())
}

fn active_toml(resp: IpcResponse) -> Result<String> {
    match resp {
        IpcResponse::Config { toml } => Ok(toml),
        other => anyhow::bail!("expected config from daemon, got {other:?}"),
    }
}
