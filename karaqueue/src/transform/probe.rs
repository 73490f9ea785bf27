//! `ffprobe` invocation and JSON parsing.

use std::path::Path;

use serde::Deserialize;

use super::MediaProbe;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

pub fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
        input.to_string_lossy().into_owned(),
    ]
}

fn parse_secs(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe(json: &str) -> Result<MediaProbe> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Transcode(format!("unreadable ffprobe output: {}", e)))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));
    if video.is_none() && audio.is_none() {
        return Err(Error::Transcode("input has no audio or video stream".to_string()));
    }

    let duration_secs = parse_secs(output.format.as_ref().and_then(|f| f.duration.as_deref()))
        .or_else(|| {
            output
                .streams
                .iter()
                .filter_map(|s| parse_secs(s.duration.as_deref()))
                .reduce(f64::max)
        })
        .unwrap_or(0.0);

    Ok(MediaProbe {
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        duration_secs,
        video_codec: video.and_then(|s| s.codec_name.clone()),
        audio_codec: audio.and_then(|s| s.codec_name.clone()),
    })
}
