//! Best-effort direct download of a media URL.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::info;
use url::Url;

use super::download::write_response;
use super::{ResolvedMedia, SourceAdapter};
use crate::{Error, Result};

const MEDIA_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "mkv", "webm", "m4a", "mp3", "ogg", "flac", "wav"];

pub struct GenericAdapter {
    client: reqwest::Client,
    max_bytes: u64,
}

impl GenericAdapter {
    pub fn new(client: reqwest::Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }

    fn extension(url: &Url) -> Option<String> {
        let name = url.path_segments()?.next_back()?;
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        MEDIA_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
    }

    fn title(url: &Url) -> String {
        url.path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|name| !name.is_empty())
            .map(|name| name.rsplit_once('.').map_or(name, |(stem, _)| stem))
            .map(|stem| stem.replace(['_', '+'], " ").replace("%20", " "))
            .unwrap_or_else(|| url.host_str().unwrap_or("media").to_string())
    }

    fn is_media_type(content_type: &str) -> bool {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        mime.starts_with("video/")
            || mime.starts_with("audio/")
            || mime == "application/octet-stream"
            || mime == "application/mp4"
    }
}

#[async_trait]
impl SourceAdapter for GenericAdapter {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn matches(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
    }

    async fn resolve(&self, url: &Url, dest_dir: &Path) -> Result<ResolvedMedia> {
        let response = self.client.get(url.as_str()).send().await?;
        super::map_status(response.status(), url.as_str())?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let ext = Self::extension(url);
        if !Self::is_media_type(&content_type) && ext.is_none() {
            let content_type = if content_type.is_empty() {
                "no content type"
            } else {
                content_type.as_str()
            };
            return Err(Error::UnsupportedSource(format!(
                "{} is not a media file ({})",
                url, content_type
            )));
        }

        let media_path = dest_dir.join(format!("download.{}", ext.as_deref().unwrap_or("bin")));
        let bytes = write_response(response, &media_path, self.max_bytes).await?;
        let title = Self::title(url);
        info!(url = %url, title = %title, bytes, "Downloaded media");

        Ok(ResolvedMedia {
            title,
            media_path,
            duration_secs: None,
            original_url: Some(url.to_string()),
        })
    }
}
