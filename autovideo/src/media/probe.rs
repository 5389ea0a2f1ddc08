use std::path::Path;
use tokio::process::Command;

use super::command::run_command_with_logs;
use crate::{Error, Result};

/// Media duration in seconds, as reported by ffprobe.
pub async fn probe_duration(ffprobe_path: &str, media: &Path) -> Result<f64> {
    let mut cmd = Command::new(ffprobe_path);
    cmd.args([
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ])
    .arg(media);

    let output = run_command_with_logs(&mut cmd).await?;
    if !output.status.success() {
        return Err(Error::Other(format!(
            "ffprobe failed on {}: {}",
            media.display(),
            output.stderr_tail(5)
        )));
    }

    parse_duration_output(&output.stdout).ok_or_else(|| {
        Error::Other(format!(
            "ffprobe reported no usable duration for {}",
            media.display()
        ))
    })
}

/// First positive finite number in ffprobe's output lines.
fn parse_duration_output(lines: &[String]) -> Option<f64> {
    lines
        .iter()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|d| d.is_finite() && *d > 0.0)
}
