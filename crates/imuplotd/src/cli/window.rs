use anyhow::Result;
use imuplotd_core::ipc::{IpcRequest, IpcResponse};
use imuplotd_core::sample::{ChannelId, ChartPoint};

use super::{check_response, send_request};

pub async fn run(channel: ChannelId, tail: Option<usize>) -> Result<()> {
    let resp = check_response(send_request(IpcRequest::GetWindow { channel }).await?)?;
    match resp {
        IpcResponse::Window { channel, points } => {
            if points.is_empty() {
                println!("No points for {channel}.");
            } else {
                print!("{}", format_points(tail_of(&points, tail)));
            }
        }
        _ => anyhow::bail!("unexpected response"),
    }
    Ok(())
}

fn tail_of(points: &[ChartPoint], tail: Option<usize>) -> &[ChartPoint] {
    match tail {
        Some(n) => &points[points.len().saturating_sub(n)..],
        None => points,
    }
}

fn format_points(points: &[ChartPoint]) -> String {
    let mut out = format!("{:>12} {:>12}\n", "time s", "value");
    for p in points {
        out.push_str(&format!("{:>12.4} {:>12.4}\n", p.time, p.value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(n: usize) -> Vec<ChartPoint> {
        (0..n).map(|i| ChartPoint::new(i as f64 * 0.1, i as f64)).collect()
    }

    #[test]
    fn tail_keeps_newest() {
        let points = pts(5);
        let tail = tail_of(&points, Some(2));
        assert_eq!(tail, &points[3..]);
    }

    #[test]
    fn tail_longer_than_window_keeps_all() {
        let points = pts(3);
        assert_eq!(tail_of(&points, Some(10)).len(), 3);
        assert_eq!(tail_of(&points, None).len(), 3);
    }

    #[test]
    fn points_format_one_row_each() {
        let out = format_points(&pts(2));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].ends_with("1.0000"));
    }
}
