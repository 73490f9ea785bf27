//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use karaqueue::config::AppConfig;
use karaqueue::domain::{ItemId, ItemStatus, ItemView};
use karaqueue::queue::QueueHandle;
use karaqueue::services::ServiceContainer;
use karaqueue::source::{ResolvedMedia, SourceAdapter, SourceRegistry};
use karaqueue::transform::{MediaProbe, TransformOutput, TransformRequest, Transformer};
use karaqueue::{Error, Result};
use tempfile::TempDir;
use tokio::sync::Notify;
use url::Url;

pub const PUBLIC_BASE_URL: &str = "https://media.test/karaoke/";
pub const WAIT: Duration = Duration::from_secs(10);

/// Serve `router` on an ephemeral local port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to read local address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

/// Stand-in for a site adapter: `site-a://<title>` resolves to a small file
/// titled after the URL host. Hosts listed in `gates` block until released,
/// hosts listed in `flaky` fail with a transient error a few times first.
#[derive(Default)]
pub struct FakeSite {
    gates: HashMap<String, Arc<Notify>>,
    flaky: HashMap<String, AtomicUsize>,
    started: Arc<Notify>,
    resolves: AtomicUsize,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `site-a://<host>` wait until the returned handle is notified.
    pub fn gate(&mut self, host: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.insert(host.to_string(), gate.clone());
        gate
    }

    /// Make the first `failures` resolves of `site-a://<host>` fail with a
    /// connection reset.
    pub fn flaky(&mut self, host: &str, failures: usize) {
        self.flaky.insert(host.to_string(), AtomicUsize::new(failures));
    }

    /// Notified each time a gated resolve starts waiting.
    pub fn started(&self) -> Arc<Notify> {
        self.started.clone()
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for FakeSite {
    fn name(&self) -> &'static str {
        "site-a"
    }

    fn matches(&self, url: &Url) -> bool {
        url.scheme() == "site-a"
    }

    async fn resolve(&self, url: &Url, dest_dir: &Path) -> Result<ResolvedMedia> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let host = url.host_str().unwrap_or("untitled").to_string();
        if let Some(remaining) = self.flaky.get(&host)
            && remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(Error::Fetch("reset".to_string()));
        }
        if let Some(gate) = self.gates.get(&host) {
            self.started.notify_one();
            gate.notified().await;
        }
        let media_path = dest_dir.join("download.mp4");
        tokio::fs::write(&media_path, format!("media for {}", host)).await?;
        Ok(ResolvedMedia {
            title: host.replace('-', " "),
            media_path,
            duration_secs: Some(42.0),
            original_url: Some(url.to_string()),
        })
    }
}

/// Copies the input through unchanged and reports a fixed probe.
pub struct PassthroughTransformer {
    pub duration_secs: f64,
}

impl Default for PassthroughTransformer {
    fn default() -> Self {
        Self {
            duration_secs: 42.0,
        }
    }
}

#[async_trait]
impl Transformer for PassthroughTransformer {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn transform(&self, request: &TransformRequest) -> Result<TransformOutput> {
        let media_path = request.work_dir.join("output.mp4");
        tokio::fs::copy(&request.input, &media_path)
            .await
            .map_err(|e| Error::Transcode(e.to_string()))?;
        Ok(TransformOutput {
            media_path,
            thumbnail_path: None,
            probe: MediaProbe {
                width: Some(1280),
                height: Some(720),
                duration_secs: self.duration_secs,
                video_codec: Some("h264".to_string()),
                audio_codec: Some("aac".to_string()),
            },
        })
    }
}

/// A running container over temporary directories.
pub struct TestApp {
    pub services: ServiceContainer,
    pub serving_dir: TempDir,
    pub work_dir: TempDir,
}

impl TestApp {
    pub async fn start(sources: SourceRegistry, extra: &[(&str, &str)]) -> Self {
        Self::start_with(sources, Arc::new(PassthroughTransformer::default()), extra).await
    }

    pub async fn start_with(
        sources: SourceRegistry,
        transformer: Arc<dyn Transformer>,
        extra: &[(&str, &str)],
    ) -> Self {
        let serving_dir = TempDir::new().expect("Failed to create serving dir");
        let work_dir = TempDir::new().expect("Failed to create work dir");

        let mut vars: HashMap<String, String> = HashMap::from([
            (
                "KARAQUEUE_SERVING_DIR".to_string(),
                serving_dir.path().display().to_string(),
            ),
            (
                "KARAQUEUE_WORK_DIR".to_string(),
                work_dir.path().display().to_string(),
            ),
            (
                "KARAQUEUE_PUBLIC_BASE_URL".to_string(),
                PUBLIC_BASE_URL.to_string(),
            ),
            ("KARAQUEUE_ADMIN_USERS".to_string(), "admin".to_string()),
            ("KARAQUEUE_FETCH_MAX_RETRIES".to_string(), "0".to_string()),
        ]);
        for (key, value) in extra {
            vars.insert(key.to_string(), value.to_string());
        }
        let config =
            AppConfig::from_lookup(|key| vars.get(key).cloned()).expect("Invalid test config");

        let services = ServiceContainer::with_components(config, sources, transformer);
        services
            .initialize()
            .await
            .expect("Failed to initialize services");

        Self {
            services,
            serving_dir,
            work_dir,
        }
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.services.queue
    }

    pub fn item_dir(&self, id: ItemId) -> std::path::PathBuf {
        self.serving_dir.path().join(id.to_string())
    }

    /// Wait until the snapshot satisfies `predicate`.
    pub async fn wait_until<F>(&self, predicate: F) -> Vec<ItemView>
    where
        F: Fn(&[ItemView]) -> bool,
    {
        let mut rx = self.queue().watch();
        let items = tokio::time::timeout(WAIT, rx.wait_for(|items| predicate(items)))
            .await
            .expect("Timed out waiting for queue state")
            .expect("Queue snapshot channel closed");
        items.to_vec()
    }

    /// Wait until item `id` has `status`.
    pub async fn wait_for_status(&self, id: ItemId, status: ItemStatus) -> ItemView {
        let items = self
            .wait_until(|items| items.iter().any(|i| i.id == id && i.status == status))
            .await;
        items
            .into_iter()
            .find(|i| i.id == id)
            .expect("Item vanished")
    }

    pub async fn shutdown(self) {
        self.services.shutdown().await;
    }
}

/// Poll `check` until it holds.
pub async fn eventually<F>(check: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("Condition never became true");
}

/// Number of entries directly under `dir`.
pub fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|e| e.count()).unwrap_or(0)
}
