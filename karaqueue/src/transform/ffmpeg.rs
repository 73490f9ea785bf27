//! Production transformer built on `ffmpeg`, `sox` and `ffprobe`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{ToolOutput, run_with_timeout, tokio_command};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::probe::{parse_probe, probe_args};
use super::{MediaProbe, TransformOutput, TransformRequest, Transformer};
use crate::{Error, Result};

const AUDIO_BITRATE: &str = "160k";
const OUTPUT_NAME: &str = "output.mp4";

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_sox() -> String {
    "sox".to_string()
}

/// Locations of the external media tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    #[serde(default = "default_sox")]
    pub sox: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            sox: default_sox(),
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn common_ffmpeg_args() -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ]
}

/// Decode the first audio track to 16-bit stereo WAV for `sox`.
pub(crate) fn extract_audio_args(input: &Path, wav: &Path) -> Vec<String> {
    let mut args = common_ffmpeg_args();
    args.extend([
        "-i".to_string(),
        path_arg(input),
        "-map".to_string(),
        "0:a:0".to_string(),
        "-vn".to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
        path_arg(wav),
    ]);
    args
}

/// Time-domain pitch shift; duration is preserved.
pub(crate) fn pitch_args(input: &Path, output: &Path, cents: i32) -> Vec<String> {
    vec![
        path_arg(input),
        path_arg(output),
        "pitch".to_string(),
        cents.to_string(),
    ]
}

/// Mux the source video with `audio` (or the source's own audio) into an
/// H.264/AAC MP4 with faststart.
pub(crate) fn remux_args(
    input: &Path,
    audio: Option<&Path>,
    probe: &MediaProbe,
    output: &Path,
) -> Vec<String> {
    let mut args = common_ffmpeg_args();
    args.extend(["-i".to_string(), path_arg(input)]);
    if let Some(audio) = audio {
        args.extend(["-i".to_string(), path_arg(audio)]);
    }

    args.extend(["-map".to_string(), "0:v:0?".to_string()]);
    let audio_map = if audio.is_some() { "1:a:0" } else { "0:a:0" };
    args.extend(["-map".to_string(), audio_map.to_string()]);

    match probe.video_codec.as_deref() {
        Some("h264") => args.extend(["-c:v".to_string(), "copy".to_string()]),
        Some(_) => args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-crf".to_string(),
            "23".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]),
        None => {}
    }

    if audio.is_none() && probe.audio_codec.as_deref() == Some("aac") {
        args.extend(["-c:a".to_string(), "copy".to_string()]);
    } else {
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            AUDIO_BITRATE.to_string(),
        ]);
    }

    args.extend([
        "-movflags".to_string(),
        "+faststart".to_string(),
        path_arg(output),
    ]);
    args
}

/// First decoded frame as a JPEG.
pub(crate) fn thumbnail_args(input: &Path, output: &Path) -> Vec<String> {
    let mut args = common_ffmpeg_args();
    args.extend([
        "-i".to_string(),
        path_arg(input),
        "-vf".to_string(),
        r"select=eq(n\,0)".to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "3".to_string(),
        path_arg(output),
    ]);
    args
}

/// Transformer that shells out to `ffmpeg`, `sox` and `ffprobe`.
pub struct FfmpegTransformer {
    tools: ToolPaths,
    /// Hard limit for each tool invocation.
    timeout: Duration,
}

impl FfmpegTransformer {
    pub fn new(tools: ToolPaths, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput> {
        debug!(program, ?args, "Running tool");
        let mut cmd = tokio_command(program);
        cmd.args(args).env("LC_ALL", "C");
        let output = run_with_timeout(&mut cmd, self.timeout).await?;
        if !output.success() {
            return Err(Error::Transcode(format!(
                "{} {}",
                program,
                output.diagnostic()
            )));
        }
        Ok(output)
    }

    async fn probe(&self, input: &Path) -> Result<MediaProbe> {
        let output = self.run(&self.tools.ffprobe, &probe_args(input)).await?;
        parse_probe(&output.stdout)
    }

    /// Extract and pitch-shift the audio track. Returns the shifted WAV.
    async fn shift_audio(&self, request: &TransformRequest) -> Result<PathBuf> {
        let wav = request.work_dir.join("audio.wav");
        let shifted = request.work_dir.join("shifted.wav");
        self.run(&self.tools.ffmpeg, &extract_audio_args(&request.input, &wav))
            .await?;
        self.run(
            &self.tools.sox,
            &pitch_args(&wav, &shifted, request.pitch_shift.cents()),
        )
        .await?;
        if let Err(e) = tokio::fs::remove_file(&wav).await {
            debug!(path = %wav.display(), "Failed to remove intermediate audio: {}", e);
        }
        Ok(shifted)
    }

    async fn thumbnail(&self, media: &Path, work_dir: &Path) -> Option<PathBuf> {
        let thumb = work_dir.join("thumb.jpg");
        match self.run(&self.tools.ffmpeg, &thumbnail_args(media, &thumb)).await {
            Ok(_) => Some(thumb),
            Err(e) => {
                warn!(media = %media.display(), "Thumbnail extraction failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Transformer for FfmpegTransformer {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn transform(&self, request: &TransformRequest) -> Result<TransformOutput> {
        let probe = self.probe(&request.input).await?;
        if !probe.has_audio() {
            return Err(Error::Transcode("input has no audio stream".to_string()));
        }

        let shifted = if request.pitch_shift.is_zero() {
            None
        } else {
            Some(self.shift_audio(request).await?)
        };

        let output = request.work_dir.join(OUTPUT_NAME);
        let output_run = self
            .run(
                &self.tools.ffmpeg,
                &remux_args(&request.input, shifted.as_deref(), &probe, &output),
            )
            .await?;

        let thumbnail_path = if probe.has_video() {
            self.thumbnail(&output, &request.work_dir).await
        } else {
            None
        };

        info!(
            item_id = %request.id,
            pitch_shift = %request.pitch_shift,
            duration_secs = probe.duration_secs,
            elapsed_ms = output_run.elapsed.as_millis() as u64,
            "Transform finished"
        );

        Ok(TransformOutput {
            media_path: output,
            thumbnail_path,
            probe,
        })
    }
}
