use anyhow::Result;
use imuplotd_core::ipc::{DeviceStatus, IpcRequest, IpcResponse};
use imuplotd_core::pipeline::PipelineStatus;

use super::{check_response, send_request};

pub async fn run() -> Result<()> {
    let resp = check_response(send_request(IpcRequest::GetStatus).await?)?;
    match resp {
        IpcResponse::Status { device, pipeline } => print!("{}", format_status(&device, &pipeline)),
        _ => anyhow::bail!("unexpected response"),
    }
    Ok(())
}

fn opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_owned(), |v| format!("{v:.precision$}"))
}

fn format_status(device: &DeviceStatus, pipeline: &PipelineStatus) -> String {
    let mut out = String::new();
    out.push_str(if device.connected {
        "Device: connected\n"
    } else {
        "Device: disconnected\n"
    });

    if pipeline.measuring {
        out.push_str(&format!(
            "Measurement: running (session start {} ms)\n",
            opt(pipeline.session_start_ms, 1)
        ));
    } else {
        out.push_str("Measurement: stopped\n");
    }

    out.push_str(&format!(
        "  {:<10} {:>14} {:>8} {:>10} {:>10}\n",
        "channel", "watermark ms", "queued", "displayed", "last s"
    ));
    for ch in &pipeline.channels {
        out.push_str(&format!(
            "  {:<10} {:>14} {:>8} {:>10} {:>10}\n",
            ch.channel.to_string(),
            opt(ch.watermark_ms, 1),
            ch.queued,
            ch.displayed,
            opt(ch.last_time, 3),
        ));
    }
    out
}
