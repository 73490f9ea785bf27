//! YouTube (and YouTube Music) through `yt-dlp`.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::info;
use url::Url;

use super::{ResolvedMedia, SourceAdapter, YtDlp, check_duration};
use crate::Result;

pub static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:(?:www|m|music)\.)?(?:youtube\.com/(?:watch\?(?:.*&)?v=|embed/|shorts/|v/|live/)|youtu\.be/)([0-9A-Za-z_-]{11})",
    )
    .unwrap()
});

pub struct YoutubeAdapter {
    ytdlp: YtDlp,
    max_duration: Duration,
}

impl YoutubeAdapter {
    pub fn new(ytdlp: YtDlp, max_duration: Duration) -> Self {
        Self {
            ytdlp,
            max_duration,
        }
    }

    /// Canonical watch URL; drops playlist and tracking parameters.
    fn watch_url(url: &Url) -> Option<String> {
        URL_REGEX
            .captures(url.as_str())
            .and_then(|c| c.get(1))
            .map(|id| format!("https://www.youtube.com/watch?v={}", id.as_str()))
    }
}

#[async_trait]
impl SourceAdapter for YoutubeAdapter {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn matches(&self, url: &Url) -> bool {
        URL_REGEX.is_match(url.as_str())
    }

    async fn resolve(&self, url: &Url, dest_dir: &Path) -> Result<ResolvedMedia> {
        let watch_url = Self::watch_url(url).unwrap_or_else(|| url.to_string());
        let info = self.ytdlp.probe(&watch_url, &[]).await?;
        if let Some(duration) = info.duration {
            check_duration(duration, self.max_duration)?;
        }
        info!(url = %watch_url, title = %info.title, "Downloading youtube video");

        let media_path = self.ytdlp.download(&watch_url, dest_dir, &[]).await?;
        Ok(ResolvedMedia {
            title: info.title,
            media_path,
            duration_secs: info.duration,
            original_url: info.webpage_url.or(Some(watch_url)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123", "dQw4w9WgXcQ")]
    #[case("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ", "dQw4w9WgXcQ")]
    #[case("https://youtu.be/dQw4w9WgXcQ?t=42", "dQw4w9WgXcQ")]
    #[case("https://www.youtube.com/shorts/dQw4w9WgXcQ", "dQw4w9WgXcQ")]
    fn test_watch_url(#[case] url: &str, #[case] id: &str) {
        let url = Url::parse(url).unwrap();
        assert_eq!(
            YoutubeAdapter::watch_url(&url).unwrap(),
            format!("https://www.youtube.com/watch?v={}", id)
        );
    }

    #[test]
    fn test_rejects_non_video_pages() {
        let adapter = YoutubeAdapter::new(YtDlp::new("yt-dlp", Duration::from_secs(1)), Duration::from_secs(600));
        assert!(!adapter.matches(&Url::parse("https://www.youtube.com/feed/trending").unwrap()));
        assert!(!adapter.matches(&Url::parse("https://example.com/watch?v=dQw4w9WgXcQ").unwrap()));
    }
}
