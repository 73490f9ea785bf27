//! Transform Worker: turns a raw download into a pitch-shifted, embeddable MP4.

mod ffmpeg;
mod probe;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::domain::{ItemId, PitchShift};

pub use ffmpeg::{FfmpegTransformer, ToolPaths};
pub use probe::{parse_probe, probe_args};

/// Input of one transform run.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub id: ItemId,
    /// Raw media produced by the source adapter.
    pub input: PathBuf,
    pub pitch_shift: PitchShift,
    /// Job scratch directory; intermediate and output files go here.
    pub work_dir: PathBuf,
}

/// Stream facts reported by `ffprobe`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaProbe {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: f64,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

impl MediaProbe {
    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }
}

/// Result of a successful transform.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Final H.264/AAC MP4 with the moov atom up front.
    pub media_path: PathBuf,
    /// First-frame JPEG for the embed card, if one could be extracted.
    pub thumbnail_path: Option<PathBuf>,
    pub probe: MediaProbe,
}

/// A transform implementation.
///
/// Failures surface as [`crate::Error::Transcode`] carrying the tool's
/// diagnostic and are never retried.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transform(&self, request: &TransformRequest) -> Result<TransformOutput>;
}
