//! External tool driver: spawns `ffmpeg`/`ffprobe`, captures output, and
//! surfaces exit status and a bounded stderr tail (spec §9's open question
//! on captured-stderr size — bounded to the last 4000 bytes here).

pub mod ffmpeg;
pub mod ffprobe;

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::ToolError;

const STDERR_TAIL_BYTES: usize = 4000;

/// Runs `tool` with `args`, awaiting completion on a cooperative `.await`
/// so the subprocess wait doesn't starve the reconciler or health monitor
/// (spec §9). Returns captured stdout on success; on non-zero exit,
/// returns [`ToolError::NonZeroExit`] with a bounded stderr tail.
pub async fn run(tool: &str, args: &[&str]) -> Result<Vec<u8>, ToolError> {
    debug!(tool, ?args, "spawning external tool");

    let output = Command::new(tool)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ToolError::SpawnFailed {
            tool: tool.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(ToolError::NonZeroExit {
            tool: tool.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: tail(&output.stderr),
        });
    }

    Ok(output.stdout)
}

fn tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    if text.len() <= STDERR_TAIL_BYTES {
        return text.into_owned();
    }

    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_passes_through_short_stderr() {
        assert_eq!(tail(b"boom"), "boom");
    }

    #[test]
    fn tail_truncates_on_a_char_boundary() {
        // A multibyte character sits right where the naive cutoff would land.
        let filler = "a".repeat(STDERR_TAIL_BYTES - 1);
        let stderr = format!("{filler}\u{00e9}more");
        let truncated = tail(stderr.as_bytes());
        assert!(truncated.len() <= stderr.len());
        assert!(truncated.ends_with("more"));
    }
}
