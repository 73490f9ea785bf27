//! Source Adapters: resolve a URL to a title and a downloaded media file.
//!
//! Each supported site is one [`SourceAdapter`] implementation. The
//! [`SourceRegistry`] picks the first adapter whose URL pattern matches and
//! falls back to the generic direct-download adapter.

mod bilibili;
mod download;
mod generic;
mod niconico;
mod soundcloud;
mod youtube;
mod ytdlp;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::{Error, Result};

pub use bilibili::BilibiliAdapter;
pub use download::{download_to_file, map_status};
pub use generic::GenericAdapter;
pub use niconico::{
    NiconicoAdapter, NiconicoCredentials, NiconicoEndpoints, WatchMetadata, parse_watch_metadata,
};
pub use soundcloud::SoundcloudAdapter;
pub use youtube::YoutubeAdapter;
pub use ytdlp::{YtDlp, classify_ytdlp_failure};

/// A resolved, downloaded source.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub title: String,
    /// Raw media inside the job's scratch directory.
    pub media_path: PathBuf,
    /// Duration reported by the site, when known before transcoding.
    pub duration_secs: Option<f64>,
    /// Canonical page URL, if the site reported one.
    pub original_url: Option<String>,
}

/// One supported site.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn matches(&self, url: &Url) -> bool;

    /// Establish process-wide state (sessions, logins). Called once at startup.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Resolve `url` and download its media into `dest_dir`.
    async fn resolve(&self, url: &Url, dest_dir: &Path) -> Result<ResolvedMedia>;

    /// Tear down process-wide state.
    async fn shutdown(&self) {}
}

/// Reject media longer than the configured limit.
pub fn check_duration(actual_secs: f64, limit: Duration) -> Result<()> {
    if actual_secs > limit.as_secs_f64() {
        return Err(Error::DurationLimitExceeded {
            actual_secs: actual_secs.round() as u64,
            limit_secs: limit.as_secs(),
        });
    }
    Ok(())
}

fn default_max_duration_secs() -> u64 {
    600
}

fn default_max_download_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_ytdlp() -> String {
    "yt-dlp".to_string()
}

/// Settings shared by the adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
    /// Connect timeout for API requests.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Hard limit for one yt-dlp invocation.
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,
    #[serde(default = "default_ytdlp")]
    pub ytdlp_path: String,
    #[serde(default)]
    pub niconico: NiconicoCredentials,
    #[serde(default)]
    pub bilibili_sessdata: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            max_download_bytes: default_max_download_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            tool_timeout_secs: None,
            ytdlp_path: default_ytdlp(),
            niconico: NiconicoCredentials::default(),
            bilibili_sessdata: None,
        }
    }
}

impl SourceConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.unwrap_or(300))
    }
}

/// Adapter lookup by URL.
#[derive(Default)]
pub struct SourceRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    fallback: Option<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The production set of adapters.
    pub fn from_config(config: &SourceConfig, client: reqwest::Client) -> Self {
        let ytdlp = YtDlp::new(config.ytdlp_path.clone(), config.tool_timeout());
        let mut registry = Self::new();
        registry
            .register(Arc::new(NiconicoAdapter::new(
                client.clone(),
                config.niconico.clone(),
                NiconicoEndpoints::default(),
                ytdlp.clone(),
                config.max_duration(),
            )))
            .register(Arc::new(BilibiliAdapter::new(
                client.clone(),
                config.bilibili_sessdata.clone(),
                config.max_duration(),
                config.max_download_bytes,
            )))
            .register(Arc::new(SoundcloudAdapter::new(
                ytdlp.clone(),
                config.max_duration(),
            )))
            .register(Arc::new(YoutubeAdapter::new(ytdlp, config.max_duration())))
            .with_fallback(Arc::new(GenericAdapter::new(
                client,
                config.max_download_bytes,
            )));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_fallback(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        self.fallback = Some(adapter);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.adapters
            .iter()
            .chain(self.fallback.iter())
            .map(|a| a.name())
            .collect()
    }

    /// Pick the adapter for `url`.
    pub fn select(&self, url: &str) -> Result<Arc<dyn SourceAdapter>> {
        let parsed = Url::parse(url).map_err(|_| Error::UnsupportedSource(url.to_string()))?;
        self.adapters
            .iter()
            .find(|a| a.matches(&parsed))
            .or_else(|| self.fallback.as_ref().filter(|f| f.matches(&parsed)))
            .cloned()
            .ok_or_else(|| Error::UnsupportedSource(url.to_string()))
    }

    pub async fn resolve(&self, url: &str, dest_dir: &Path) -> Result<ResolvedMedia> {
        let adapter = self.select(url)?;
        let parsed = Url::parse(url).map_err(|_| Error::UnsupportedSource(url.to_string()))?;
        debug!(adapter = adapter.name(), url, "Resolving source");
        adapter.resolve(&parsed, dest_dir).await
    }

    /// Initialize every adapter. A failing adapter is logged and left
    /// degraded; the others keep working.
    pub async fn init_all(&self) {
        for adapter in self.adapters.iter().chain(self.fallback.iter()) {
            match adapter.init().await {
                Ok(()) => debug!(adapter = adapter.name(), "Source adapter ready"),
                Err(e) => warn!(adapter = adapter.name(), "Source adapter init failed: {}", e),
            }
        }
        info!(adapters = ?self.names(), "Source adapters initialized");
    }

    pub async fn shutdown_all(&self) {
        for adapter in self.adapters.iter().chain(self.fallback.iter()) {
            adapter.shutdown().await;
        }
    }
}
