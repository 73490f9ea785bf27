//! niconico videos. Requires a logged-in `user_session` cookie.
//!
//! The session is process-wide: [`NiconicoAdapter::init`] validates the cached
//! cookie or logs in, every resolve reuses it, and an expired session is
//! re-established transparently.

use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{COOKIE, LOCATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::{ResolvedMedia, SourceAdapter, YtDlp, check_duration, map_status};
use crate::utils::http_client::{client_builder, set_cookie_value};
use crate::{Error, Result};

pub static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:(?:www\.|sp\.)?nicovideo\.jp/watch|nico\.ms)/((?:sm|so|nm)\d+)")
        .unwrap()
});

static SERVER_RESPONSE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+name="server-response"\s+content="([^"]*)""#).unwrap()
});

static API_DATA_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-api-data="([^"]*)""#).unwrap());

const SESSION_COOKIE: &str = "user_session";
/// How long a validated session is trusted before it is checked again.
const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(10 * 60);
const AUTH_TIMEOUT: Duration = Duration::from_secs(15);

/// Login material. The password arrives already base64-decoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NiconicoCredentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// A previously issued `user_session` cookie.
    #[serde(default, skip_serializing)]
    pub session: Option<String>,
}

impl NiconicoCredentials {
    pub fn login_pair(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NiconicoEndpoints {
    pub login_url: String,
    pub my_url: String,
    pub watch_base: String,
}

impl Default for NiconicoEndpoints {
    fn default() -> Self {
        Self {
            login_url: "https://account.nicovideo.jp/login/redirector?site=niconico&next_url=/"
                .to_string(),
            my_url: "https://www.nicovideo.jp/my".to_string(),
            watch_base: "https://www.nicovideo.jp/watch".to_string(),
        }
    }
}

/// What the watch page tells us about a video.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchMetadata {
    pub title: String,
    pub duration_secs: f64,
}

fn unescape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let Some(end) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..end];
        let decoded = match entity {
            "quot" => Some('"'),
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn flag(value: &Value, path: &[&str]) -> bool {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Extract title and duration from a watch page.
///
/// Understands both the current `server-response` meta tag and the older
/// `js-initial-watch-data` element.
pub fn parse_watch_metadata(html: &str) -> Result<WatchMetadata> {
    let (raw, nested) = if let Some(c) = SERVER_RESPONSE_REGEX.captures(html) {
        (c[1].to_string(), true)
    } else if let Some(c) = API_DATA_REGEX.captures(html) {
        (c[1].to_string(), false)
    } else {
        return Err(Error::SourceUnavailable(
            "niconico watch page has no video data".to_string(),
        ));
    };

    let root: Value = serde_json::from_str(&unescape_html(&raw))?;
    let data = if nested {
        match root.get("data").and_then(|d| d.get("response")) {
            Some(response) => response,
            None => {
                let status = root
                    .get("meta")
                    .and_then(|m| m.get("status"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                return Err(match status {
                    401 | 403 => Error::AccessDenied(format!("niconico returned {}", status)),
                    _ => Error::SourceUnavailable(format!("niconico returned status {}", status)),
                });
            }
        }
    } else {
        &root
    };

    let video = data
        .get("video")
        .ok_or_else(|| Error::SourceUnavailable("niconico response has no video".to_string()))?;
    if flag(video, &["isDeleted"]) {
        return Err(Error::SourceUnavailable("video is deleted".to_string()));
    }
    if flag(video, &["isPrivate"]) {
        return Err(Error::AccessDenied("video is private".to_string()));
    }

    let media = data.get("media");
    let playable = media.is_some_and(|m| {
        m.get("domand").is_some_and(|d| !d.is_null())
            || m.get("delivery").is_some_and(|d| !d.is_null())
    });
    if !playable {
        let paid = ["isPremium", "isAdmission", "isPpv"]
            .iter()
            .any(|key| flag(data, &["payment", "video", *key]));
        return Err(if paid {
            Error::AccessDenied("video requires payment or membership".to_string())
        } else {
            Error::SourceUnavailable("video media is not available".to_string())
        });
    }

    let title = video
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::SourceUnavailable("niconico video has no title".to_string()))?;
    let duration_secs = video
        .get("duration")
        .and_then(Value::as_f64)
        .filter(|d| *d > 0.0)
        .ok_or_else(|| Error::Fetch("niconico reported no duration, try again".to_string()))?;

    Ok(WatchMetadata {
        title,
        duration_secs,
    })
}

#[derive(Debug, Clone)]
struct Session {
    cookie: String,
    checked_at: Instant,
}

pub struct NiconicoAdapter {
    client: reqwest::Client,
    credentials: NiconicoCredentials,
    endpoints: NiconicoEndpoints,
    ytdlp: YtDlp,
    max_duration: Duration,
    session: Mutex<Option<Session>>,
}

impl NiconicoAdapter {
    pub fn new(
        client: reqwest::Client,
        credentials: NiconicoCredentials,
        endpoints: NiconicoEndpoints,
        ytdlp: YtDlp,
        max_duration: Duration,
    ) -> Self {
        Self {
            client,
            credentials,
            endpoints,
            ytdlp,
            max_duration,
            session: Mutex::new(None),
        }
    }

    /// Login and validation need to see redirects instead of following them.
    fn auth_client(&self) -> Result<reqwest::Client> {
        Ok(client_builder(AUTH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?)
    }

    fn video_id(url: &Url) -> Option<&str> {
        URL_REGEX
            .captures(url.as_str())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// True if `cookie` still belongs to a logged-in user.
    async fn validate(&self, client: &reqwest::Client, cookie: &str) -> Result<bool> {
        let response = client
            .get(&self.endpoints.my_url)
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, cookie))
            .send()
            .await?;
        let status = response.status();
        if status.is_redirection() {
            return Ok(false);
        }
        map_status(status, &self.endpoints.my_url)?;
        Ok(true)
    }

    async fn login(&self, client: &reqwest::Client) -> Result<String> {
        let (username, password) = self.credentials.login_pair().ok_or_else(|| {
            Error::AccessDenied("niconico login is not configured".to_string())
        })?;

        let response = client
            .post(&self.endpoints.login_url)
            .form(&[("mail_tel", username), ("password", password)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_redirection() && status != StatusCode::OK {
            map_status(status, &self.endpoints.login_url)?;
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if location.contains("cant_login") {
            return Err(Error::AccessDenied(
                "niconico rejected the username or password".to_string(),
            ));
        }
        if let Some(cookie) = set_cookie_value(response.headers(), SESSION_COOKIE)
            && !cookie.is_empty()
            && cookie != "deleted"
        {
            return Ok(cookie);
        }
        if location.contains("mfa") {
            return Err(Error::AccessDenied(
                "niconico account uses two-factor login, provide a session cookie instead"
                    .to_string(),
            ));
        }
        Err(Error::AccessDenied("niconico login failed".to_string()))
    }

    /// Return a usable session cookie, logging in again if needed.
    async fn session_cookie(&self) -> Result<String> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref()
            && session.checked_at.elapsed() < SESSION_CHECK_INTERVAL
        {
            return Ok(session.cookie.clone());
        }

        let client = self.auth_client()?;
        let candidate = guard
            .as_ref()
            .map(|s| s.cookie.clone())
            .or_else(|| self.credentials.session.clone().filter(|s| !s.is_empty()));
        if let Some(cookie) = candidate {
            if self.validate(&client, &cookie).await? {
                debug!("niconico session still valid");
                *guard = Some(Session {
                    cookie: cookie.clone(),
                    checked_at: Instant::now(),
                });
                return Ok(cookie);
            }
            info!("niconico session expired, logging in again");
        }

        *guard = None;
        let cookie = self.login(&client).await?;
        info!("Logged in to niconico");
        *guard = Some(Session {
            cookie: cookie.clone(),
            checked_at: Instant::now(),
        });
        Ok(cookie)
    }

    async fn invalidate(&self) {
        *self.session.lock().await = None;
    }

    async fn fetch_metadata(&self, watch_url: &str, cookie: &str) -> Result<WatchMetadata> {
        let response = self
            .client
            .get(watch_url)
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, cookie))
            .send()
            .await?;
        map_status(response.status(), watch_url)?;
        let html = response.text().await?;
        parse_watch_metadata(&html)
    }

    async fn resolve_with(
        &self,
        watch_url: &str,
        dest_dir: &Path,
        cookie: &str,
    ) -> Result<ResolvedMedia> {
        let meta = self.fetch_metadata(watch_url, cookie).await?;
        check_duration(meta.duration_secs, self.max_duration)?;
        info!(url = %watch_url, title = %meta.title, "Downloading niconico video");

        let header = format!("{}={}", SESSION_COOKIE, cookie);
        let media_path = self
            .ytdlp
            .download(watch_url, dest_dir, &[("Cookie", header.as_str())])
            .await?;
        Ok(ResolvedMedia {
            title: meta.title,
            media_path,
            duration_secs: Some(meta.duration_secs),
            original_url: Some(watch_url.to_string()),
        })
    }
}

#[async_trait]
impl SourceAdapter for NiconicoAdapter {
    fn name(&self) -> &'static str {
        "niconico"
    }

    fn matches(&self, url: &Url) -> bool {
        URL_REGEX.is_match(url.as_str())
    }

    async fn init(&self) -> Result<()> {
        if self.credentials.login_pair().is_none() && self.credentials.session.is_none() {
            return Err(Error::AccessDenied(
                "no niconico credentials configured".to_string(),
            ));
        }
        self.session_cookie().await.map(|_| ())
    }

    async fn resolve(&self, url: &Url, dest_dir: &Path) -> Result<ResolvedMedia> {
        let id = Self::video_id(url).ok_or_else(|| Error::UnsupportedSource(url.to_string()))?;
        let watch_url = format!("{}/{}", self.endpoints.watch_base.trim_end_matches('/'), id);

        let cookie = self.session_cookie().await?;
        match self.resolve_with(&watch_url, dest_dir, &cookie).await {
            Err(Error::AccessDenied(reason)) => {
                // private or paid media is denied even with a live session
                if self.validate(&self.auth_client()?, &cookie).await? {
                    return Err(Error::AccessDenied(reason));
                }
                warn!(url = %watch_url, "Session expired, retrying with a fresh one: {}", reason);
                self.invalidate().await;
                let cookie = self.session_cookie().await?;
                self.resolve_with(&watch_url, dest_dir, &cookie).await
            }
            other => other,
        }
    }

    async fn shutdown(&self) {
        if self.session.lock().await.take().is_some() {
            debug!("niconico session dropped");
        }
    }
}
