//! Thin wrapper around the `yt-dlp` binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use process_utils::{RunError, ToolOutput, run_with_timeout, tokio_command};
use serde::Deserialize;
use tracing::debug;

use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Output file stem inside the job directory.
const OUTPUT_STEM: &str = "download";

/// Prefer H.264/AAC at 720p so the remux step can usually copy streams.
const FORMAT_SELECTOR: &str =
    "bv*[vcodec^=avc1][height<=720]+ba[ext=m4a]/b[ext=mp4][height<=720]/bv*[height<=720]+ba/b";

/// Audio-only sites have no muxed format for `b` to pick.
const AUDIO_FORMAT_SELECTOR: &str = "ba[ext=m4a]/ba/b";

/// Fields of `--dump-single-json` we use.
#[derive(Debug, Clone, Deserialize)]
pub struct YtDlpInfo {
    pub title: String,
    pub duration: Option<f64>,
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub is_live: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    path: String,
    timeout: Duration,
}

/// Map yt-dlp's error output onto the error taxonomy.
pub fn classify_ytdlp_failure(diagnostic: &str) -> Error {
    let lower = diagnostic.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&["unsupported url"]) {
        Error::UnsupportedSource(diagnostic.to_string())
    } else if any(&[
        "sign in to confirm your age",
        "age-restricted",
        "age restricted",
        "private video",
        "members-only",
        "join this channel",
        "login required",
        "requires authentication",
        "http error 403",
        "http error 401",
        "premium",
    ]) {
        Error::AccessDenied(diagnostic.to_string())
    } else if any(&[
        "timed out",
        "connection reset",
        "temporary failure in name resolution",
        "network is unreachable",
        "unable to download webpage",
        "http error 5",
        "http error 429",
        "read timed out",
        "incomplete read",
    ]) {
        Error::Fetch(diagnostic.to_string())
    } else {
        Error::SourceUnavailable(diagnostic.to_string())
    }
}

fn map_run_error(err: RunError) -> Error {
    match err {
        RunError::TimedOut { .. } => Error::Fetch(err.to_string()),
        other => Error::Other(other.to_string()),
    }
}

impl YtDlp {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[String]) -> Result<ToolOutput> {
        debug!(program = %self.path, ?args, "Running yt-dlp");
        let mut cmd = tokio_command(&self.path);
        cmd.args(args);
        let output = run_with_timeout(&mut cmd, self.timeout)
            .await
            .map_err(map_run_error)?;
        if !output.success() {
            return Err(classify_ytdlp_failure(&output.diagnostic()));
        }
        Ok(output)
    }

    fn header_args(headers: &[(&str, &str)]) -> Vec<String> {
        headers
            .iter()
            .flat_map(|(k, v)| ["--add-header".to_string(), format!("{}:{}", k, v)])
            .collect()
    }

    /// Fetch metadata without downloading.
    pub async fn probe(&self, url: &str, headers: &[(&str, &str)]) -> Result<YtDlpInfo> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(Self::header_args(headers));
        args.push(url.to_string());

        let output = self.run(&args).await?;
        let info: YtDlpInfo = serde_json::from_str(&output.stdout)
            .map_err(|e| Error::SourceUnavailable(format!("unreadable yt-dlp metadata: {}", e)))?;
        if info.is_live == Some(true) {
            return Err(Error::SourceUnavailable(
                "live streams cannot be queued".to_string(),
            ));
        }
        Ok(info)
    }

    pub(crate) fn download_args(
        url: &str,
        dest_dir: &Path,
        headers: &[(&str, &str)],
        format: &str,
    ) -> Vec<String> {
        let template = dest_dir.join(format!("{}.%(ext)s", OUTPUT_STEM));
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--no-part".to_string(),
            "-f".to_string(),
            format.to_string(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
        ];
        args.extend(Self::header_args(headers));
        args.push(url.to_string());
        args
    }

    /// Download `url` into `dest_dir` and return the produced file.
    pub async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        headers: &[(&str, &str)],
    ) -> Result<PathBuf> {
        self.run(&Self::download_args(url, dest_dir, headers, FORMAT_SELECTOR))
            .await?;
        find_output(dest_dir).await
    }

    /// Like [`YtDlp::download`] for sites that only serve audio.
    pub async fn download_audio(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        self.run(&Self::download_args(url, dest_dir, &[], AUDIO_FORMAT_SELECTOR))
            .await?;
        find_output(dest_dir).await
    }
}

async fn find_output(dest_dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dest_dir)
        .await
        .map_err(|e| io_error("reading directory", dest_dir, e))?;
    let prefix = format!("{}.", OUTPUT_STEM);
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("reading directory", dest_dir, e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && !name.ends_with(".part") && !name.ends_with(".ytdl") {
            return Ok(entry.path());
        }
    }
    Err(Error::SourceUnavailable(
        "yt-dlp finished without producing a file".to_string(),
    ))
}
