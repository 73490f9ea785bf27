//! Process configuration assembled from environment variables.
//!
//! Every key is prefixed with `KARAQUEUE_` except the site credentials.
//! Values are validated once at startup; a bad value fails with
//! [`Error::Configuration`].

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine as _;
use url::Url;

use crate::api::ApiServerConfig;
use crate::domain::RetryPolicy;
use crate::pipeline::{PipelineConfig, StagePoolConfig};
use crate::publish::PublisherConfig;
use crate::queue::QueueConfig;
use crate::source::{NiconicoCredentials, SourceConfig};
use crate::transform::ToolPaths;
use crate::{Error, Result};

const PREFIX: &str = "KARAQUEUE_";

/// Fully validated process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub pipeline: PipelineConfig,
    pub sources: SourceConfig,
    pub publisher: PublisherConfig,
    pub tools: ToolPaths,
    pub api: ApiServerConfig,
    pub admin_users: HashSet<String>,
    /// Daily rolling log files go here when set.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to read variables. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let serving_dir = PathBuf::from(env.required("SERVING_DIR")?);
        let public_base_url = env.required("PUBLIC_BASE_URL")?;
        let public_base_url = Url::parse(&public_base_url).map_err(|e| {
            Error::config(format!(
                "Invalid {}PUBLIC_BASE_URL {:?}: {}",
                PREFIX, public_base_url, e
            ))
        })?;
        if !matches!(public_base_url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "{}PUBLIC_BASE_URL must be an http(s) URL",
                PREFIX
            )));
        }

        let work_dir = env
            .get("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("karaqueue"));
        if work_dir == serving_dir {
            return Err(Error::config(format!(
                "{}WORK_DIR must differ from {}SERVING_DIR",
                PREFIX, PREFIX
            )));
        }

        let max_duration_secs: u64 = env.parse_or("MAX_DURATION_SECS", 600)?;
        if max_duration_secs == 0 {
            return Err(Error::config(format!(
                "{}MAX_DURATION_SECS must be positive",
                PREFIX
            )));
        }
        let max_duration = Duration::from_secs(max_duration_secs);

        let queue = QueueConfig {
            max_queued: env.parse_or("MAX_QUEUED", 20)?,
            max_queued_per_user: env.parse_or("MAX_QUEUED_PER_USER", 2)?,
        };
        if queue.max_queued == 0 || queue.max_queued_per_user == 0 {
            return Err(Error::config("Queue bounds must be positive"));
        }

        let pipeline = PipelineConfig {
            fetch_pool: StagePoolConfig::new(env.parse_or("FETCH_WORKERS", 3)?),
            transcode_pool: StagePoolConfig::new(env.parse_or("TRANSCODE_WORKERS", 1)?),
            fetch_timeout: Duration::from_secs(env.parse_or("FETCH_TIMEOUT_SECS", 300)?),
            transcode_timeout: Duration::from_secs(env.parse_or("TRANSCODE_TIMEOUT_SECS", 600)?),
            retry: RetryPolicy {
                max_retries: env.parse_or("FETCH_MAX_RETRIES", 3)?,
                initial_delay_ms: env.parse_or("FETCH_RETRY_DELAY_MS", 2000)?,
                ..RetryPolicy::default()
            },
            work_dir,
            max_duration,
        };

        let tools = ToolPaths {
            ffmpeg: env.get("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe: env
                .get("FFPROBE_PATH")
                .unwrap_or_else(|| "ffprobe".to_string()),
            sox: env.get("SOX_PATH").unwrap_or_else(|| "sox".to_string()),
        };

        let sources = SourceConfig {
            max_duration_secs,
            ytdlp_path: env.get("YTDLP_PATH").unwrap_or_else(|| "yt-dlp".to_string()),
            tool_timeout_secs: Some(pipeline.fetch_timeout.as_secs()),
            niconico: niconico_credentials(&env)?,
            bilibili_sessdata: env.raw("BILIBILI_SESSDATA"),
            ..SourceConfig::default()
        };

        let bind_addr = match env.get("BIND_ADDR") {
            Some(raw) => SocketAddr::from_str(&raw).map_err(|e| {
                Error::config(format!("Invalid {}BIND_ADDR {:?}: {}", PREFIX, raw, e))
            })?,
            None => ApiServerConfig::default().bind_addr,
        };
        let api = ApiServerConfig {
            bind_addr,
            serve_media: env
                .flag("SERVE_MEDIA")?
                .then(|| serving_dir.clone()),
            ..ApiServerConfig::default()
        };

        let admin_users = env
            .get("ADMIN_USERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            queue,
            pipeline,
            sources,
            publisher: PublisherConfig {
                serving_dir,
                public_base_url,
            },
            tools,
            api,
            admin_users,
            log_dir: env.get("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn niconico_credentials<F>(env: &Env<F>) -> Result<NiconicoCredentials>
where
    F: Fn(&str) -> Option<String>,
{
    let password = match env.raw("NICONICO_PASSWORD") {
        Some(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| Error::config(format!("NICONICO_PASSWORD is not base64: {}", e)))?;
            let password = String::from_utf8(bytes)
                .map_err(|_| Error::config("NICONICO_PASSWORD is not valid UTF-8"))?;
            Some(password)
        }
        None => None,
    };

    Ok(NiconicoCredentials {
        username: env.raw("NICONICO_USERNAME"),
        password,
        session: env.raw("NICONICO_SESSION"),
    })
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unprefixed key, trimmed, blank treated as unset.
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get(&self, key: &str) -> Option<String> {
        self.raw(&format!("{}{}", PREFIX, key))
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| Error::config(format!("{}{} must be set", PREFIX, key)))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.parse().map_err(|e| {
                Error::config(format!("Invalid {}{} {:?}: {}", PREFIX, key, raw, e))
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("0" | "false" | "no" | "off") => Ok(false),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some(other) => Err(Error::config(format!(
                "Invalid {}{} {:?}: expected a boolean",
                PREFIX, key, other
            ))),
        }
    }
}
