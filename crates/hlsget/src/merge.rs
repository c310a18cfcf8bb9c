//! Concatenation of the downloaded segments via the external ffmpeg
//! binary and its concat demuxer.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;

use crate::error::HlsgetResult;

/// Probe for a usable ffmpeg by running `ffmpeg --help` and checking
/// for exit status 0.
pub async fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("--help")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Write the concat list (`file '<path>'` per segment, in the given
/// order) to `list_path` and run
/// `ffmpeg -f concat -safe 0 -i <list> <output>`, returning ffmpeg's
/// exit status.
pub async fn concat_segments(
    segments: &[impl AsRef<Path>],
    list_path: &Path,
    output: &Path,
) -> HlsgetResult<ExitStatus> {
    let mut list = String::new();
    for segment in segments {
        list.push_str(&format!("file '{}'\n", segment.as_ref().display()));
    }
    tokio::fs::write(list_path, list).await?;

    log::info!("Concatenating {} segments into {}", segments.len(), output.display());

    let status = Command::new("ffmpeg")
        .args(["-f", "concat", "-safe", "0", "-i"])
        .arg(list_path)
        .arg(output)
        .status()
        .await?;

    Ok(status)
}
