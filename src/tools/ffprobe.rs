//! Probes a video's first video stream for duration and dimensions
//! (spec §4.6 step 1).

use std::path::Path;

use serde::Deserialize;

use crate::error::{ToolError, TransformError};

/// Duration and dimensions of a video's first video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    duration: Option<String>,
}

/// Runs `ffprobe` and extracts the first video stream's info. Absence of a
/// video stream is a hard failure per spec §4.6.
pub async fn probe(input: &Path) -> Result<VideoInfo, TransformError> {
    let input_str = input.to_string_lossy();
    let args = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,duration",
        "-of",
        "json",
        input_str.as_ref(),
    ];

    let stdout = crate::tools::run("ffprobe", &args)
        .await
        .map_err(|e: ToolError| TransformError::ProbeFailed(e.to_string()))?;

    let parsed: ProbeOutput = serde_json::from_slice(&stdout)
        .map_err(|e| TransformError::ProbeFailed(format!("invalid ffprobe JSON: {e}")))?;

    let stream = parsed.streams.first().ok_or(TransformError::NoVideoStream)?;

    let duration_seconds = stream
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoInfo {
        duration_seconds,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_json_with_duration() {
        let json = br#"{"streams":[{"width":1920,"height":1080,"duration":"10.016000"}]}"#;
        let parsed: ProbeOutput = serde_json::from_slice(json).unwrap();
        let stream = parsed.streams.first().unwrap();
        assert_eq!(stream.width, Some(1920));
        assert_eq!(stream.height, Some(1080));
        assert_eq!(stream.duration.as_deref(), Some("10.016000"));
    }

    #[test]
    fn empty_streams_is_detectable() {
        let json = br#"{"streams":[]}"#;
        let parsed: ProbeOutput = serde_json::from_slice(json).unwrap();
        assert!(parsed.streams.is_empty());
    }
}
