//! bilibili videos through the public web API.
//!
//! A `SESSDATA` cookie is optional. Without it only lower qualities are
//! offered and member-only or age-gated videos are refused by the API, which
//! surfaces as [`Error::AccessDenied`].

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{COOKIE, REFERER};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use super::{ResolvedMedia, SourceAdapter, check_duration, download_to_file, map_status};
use crate::{Error, Result};

pub static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.|m\.)?bilibili\.com/video/(BV[0-9A-Za-z]{10}|av\d+)").unwrap()
});

const BASE_URL: &str = "https://www.bilibili.com";
const API_BASE: &str = "https://api.bilibili.com";
/// 1080p; the API silently caps it to what the session may access.
const QUALITY: &str = "80";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    bvid: String,
    title: String,
    duration: f64,
    cid: u64,
    #[serde(default)]
    pages: Vec<ViewPage>,
}

#[derive(Debug, Deserialize)]
struct ViewPage {
    cid: u64,
    page: u32,
    #[serde(default)]
    part: String,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct PlayUrlData {
    #[serde(default)]
    durl: Vec<PlayUrlSegment>,
}

#[derive(Debug, Deserialize)]
struct PlayUrlSegment {
    url: String,
}

/// The video a URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
enum VideoRef {
    Bvid(String),
    Aid(u64),
}

impl VideoRef {
    fn from_url(url: &Url) -> Option<Self> {
        let id = URL_REGEX.captures(url.as_str())?.get(1)?.as_str();
        match id.strip_prefix("av") {
            Some(aid) => aid.parse().ok().map(Self::Aid),
            None => Some(Self::Bvid(id.to_string())),
        }
    }

    fn query(&self) -> (&'static str, String) {
        match self {
            Self::Bvid(bvid) => ("bvid", bvid.clone()),
            Self::Aid(aid) => ("aid", aid.to_string()),
        }
    }
}

fn page_number(url: &Url) -> u32 {
    url.query_pairs()
        .find(|(k, _)| k == "p")
        .and_then(|(_, v)| v.parse().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1)
}

pub struct BilibiliAdapter {
    client: reqwest::Client,
    sessdata: Option<String>,
    api_base: String,
    max_duration: Duration,
    max_bytes: u64,
}

impl BilibiliAdapter {
    pub fn new(
        client: reqwest::Client,
        sessdata: Option<String>,
        max_duration: Duration,
        max_bytes: u64,
    ) -> Self {
        Self {
            client,
            sessdata: sessdata.filter(|s| !s.trim().is_empty()),
            api_base: API_BASE.to_string(),
            max_duration,
            max_bytes,
        }
    }

    /// Point API calls somewhere else.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url).header(REFERER, BASE_URL);
        if let Some(sessdata) = &self.sessdata {
            request = request.header(COOKIE, format!("SESSDATA={}", sessdata));
        }
        request
    }

    fn map_api_code(&self, code: i64, message: &str) -> Error {
        let detail = format!("bilibili error {}: {}", code, message);
        match code {
            -403 | -10403 | 87007 | 87008 | -101 => {
                if self.sessdata.is_none() {
                    Error::AccessDenied(format!("{} (a SESSDATA token may be required)", detail))
                } else {
                    Error::AccessDenied(detail)
                }
            }
            -412 | -509 | -799 => Error::Fetch(detail),
            _ => Error::SourceUnavailable(detail),
        }
    }

    async fn call<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self.request(url).query(query).send().await?;
        map_status(response.status(), url)?;
        let body: ApiResponse<T> = response.json().await?;
        if body.code != 0 {
            return Err(self.map_api_code(body.code, &body.message));
        }
        body.data
            .ok_or_else(|| Error::SourceUnavailable(format!("{} returned no data", url)))
    }
}

#[async_trait]
impl SourceAdapter for BilibiliAdapter {
    fn name(&self) -> &'static str {
        "bilibili"
    }

    fn matches(&self, url: &Url) -> bool {
        URL_REGEX.is_match(url.as_str())
    }

    async fn resolve(&self, url: &Url, dest_dir: &Path) -> Result<ResolvedMedia> {
        let video = VideoRef::from_url(url)
            .ok_or_else(|| Error::UnsupportedSource(url.to_string()))?;
        let view: ViewData = self
            .call(
                &format!("{}/x/web-interface/view", self.api_base),
                &[video.query()],
            )
            .await?;

        let page_no = page_number(url);
        let page = view.pages.iter().find(|p| p.page == page_no);
        let (cid, duration, title) = match page {
            Some(page) if view.pages.len() > 1 && !page.part.is_empty() => (
                page.cid,
                page.duration,
                format!("{} - {}", view.title, page.part),
            ),
            Some(page) => (page.cid, page.duration, view.title.clone()),
            None => (view.cid, view.duration, view.title.clone()),
        };
        check_duration(duration, self.max_duration)?;
        debug!(bvid = %view.bvid, cid, duration, "Resolved bilibili video");

        let play: PlayUrlData = self
            .call(
                &format!("{}/x/player/playurl", self.api_base),
                &[
                    ("bvid", view.bvid.clone()),
                    ("cid", cid.to_string()),
                    ("qn", QUALITY.to_string()),
                    ("fnval", "1".to_string()),
                ],
            )
            .await?;
        let segment = match play.durl.as_slice() {
            [single] => single,
            [] => {
                return Err(Error::SourceUnavailable(
                    "bilibili returned no playable stream".to_string(),
                ));
            }
            _ => {
                return Err(Error::SourceUnavailable(
                    "segmented bilibili streams are not supported".to_string(),
                ));
            }
        };

        info!(bvid = %view.bvid, title = %title, "Downloading bilibili video");
        let media_path = dest_dir.join("download.mp4");
        download_to_file(self.request(&segment.url), &media_path, self.max_bytes).await?;

        Ok(ResolvedMedia {
            title,
            media_path,
            duration_secs: Some(duration),
            original_url: Some(format!("{}/video/{}", BASE_URL, view.bvid)),
        })
    }
}
