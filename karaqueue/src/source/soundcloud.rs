//! SoundCloud tracks through `yt-dlp`. Audio only.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::info;
use url::Url;

use super::{ResolvedMedia, SourceAdapter, YtDlp, check_duration};
use crate::{Error, Result};

pub static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://(?:(?:www|m)\.)?soundcloud\.com/").unwrap());

/// Second path segments that name collections rather than a track.
const NON_TRACK_SEGMENTS: &[&str] = &["sets", "albums", "tracks", "likes", "reposts"];

pub struct SoundcloudAdapter {
    ytdlp: YtDlp,
    max_duration: Duration,
}

impl SoundcloudAdapter {
    pub fn new(ytdlp: YtDlp, max_duration: Duration) -> Self {
        Self {
            ytdlp,
            max_duration,
        }
    }

    /// `https://soundcloud.com/<artist>/<track>` without query or mobile host.
    fn track_url(url: &Url) -> Option<String> {
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        let artist = segments.next()?;
        let track = segments.next()?;
        if segments.next().is_some() || NON_TRACK_SEGMENTS.contains(&track) {
            return None;
        }
        Some(format!("https://soundcloud.com/{}/{}", artist, track))
    }
}

#[async_trait]
impl SourceAdapter for SoundcloudAdapter {
    fn name(&self) -> &'static str {
        "soundcloud"
    }

    fn matches(&self, url: &Url) -> bool {
        URL_REGEX.is_match(url.as_str())
    }

    async fn resolve(&self, url: &Url, dest_dir: &Path) -> Result<ResolvedMedia> {
        let track_url = Self::track_url(url)
            .ok_or_else(|| Error::InvalidUrl(format!("{} is not a soundcloud track", url)))?;
        let info = self.ytdlp.probe(&track_url, &[]).await?;
        // zero while the track is still processing
        let duration = match info.duration {
            Some(d) if d > 0.0 => d,
            _ => return Err(Error::Fetch("no audio info for track".to_string())),
        };
        check_duration(duration, self.max_duration)?;
        info!(url = %track_url, title = %info.title, "Downloading soundcloud audio");

        let media_path = self.ytdlp.download_audio(&track_url, dest_dir).await?;
        Ok(ResolvedMedia {
            title: info.title,
            media_path,
            duration_secs: Some(duration),
            original_url: info.webpage_url.or(Some(track_url)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn adapter() -> SoundcloudAdapter {
        SoundcloudAdapter::new(
            YtDlp::new("yt-dlp", Duration::from_secs(1)),
            Duration::from_secs(600),
        )
    }

    #[rstest]
    #[case("https://soundcloud.com/artist/song", "https://soundcloud.com/artist/song")]
    #[case("https://m.soundcloud.com/artist/song?in=x", "https://soundcloud.com/artist/song")]
    #[case("https://www.soundcloud.com/artist/song/", "https://soundcloud.com/artist/song")]
    fn test_track_url(#[case] url: &str, #[case] expected: &str) {
        let url = Url::parse(url).unwrap();
        assert!(adapter().matches(&url));
        assert_eq!(SoundcloudAdapter::track_url(&url).unwrap(), expected);
    }

    #[rstest]
    #[case("https://soundcloud.com/artist")]
    #[case("https://soundcloud.com/artist/sets/mix")]
    #[case("https://soundcloud.com/artist/likes")]
    fn test_non_track_pages(#[case] url: &str) {
        assert!(SoundcloudAdapter::track_url(&Url::parse(url).unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_rejects_playlists_before_running_ytdlp() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse("https://soundcloud.com/artist/sets/mix").unwrap();
        let err = adapter().resolve(&url, dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[test]
    fn test_ignores_other_hosts() {
        let url = Url::parse("https://notsoundcloud.com/artist/song").unwrap();
        assert!(!adapter().matches(&url));
    }
}
