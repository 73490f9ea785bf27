//! Service container: builds every component from an [`AppConfig`] and owns
//! their startup and shutdown order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::api::{ApiServer, AppState};
use crate::config::AppConfig;
use crate::logging;
use crate::pipeline::PipelineManager;
use crate::publish::Publisher;
use crate::queue::{Admission, QueueActor, QueueHandle};
use crate::session::SessionService;
use crate::source::SourceRegistry;
use crate::transform::{FfmpegTransformer, Transformer};
use crate::utils::fs::ensure_dir_all;
use crate::utils::http_client::build_client;

/// Upper bound on waiting for background tasks during shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ServiceContainer {
    pub config: AppConfig,
    pub publisher: Arc<Publisher>,
    pub sources: Arc<SourceRegistry>,
    pub queue: QueueHandle,
    pub pipeline: Arc<PipelineManager>,
    pub session: SessionService,
    admissions: Mutex<Option<mpsc::UnboundedReceiver<Admission>>>,
    queue_task: Mutex<Option<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    /// Stops background tasks (notifier, log retention).
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Build the production components.
    pub fn new(config: AppConfig) -> Self {
        let client = build_client(config.sources.request_timeout());
        let sources = SourceRegistry::from_config(&config.sources, client);
        let transformer = Arc::new(FfmpegTransformer::new(
            config.tools.clone(),
            config.pipeline.transcode_timeout,
        ));
        Self::with_components(config, sources, transformer)
    }

    /// Build around caller-supplied sources and transformer.
    pub fn with_components(
        config: AppConfig,
        sources: SourceRegistry,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        let publisher = Arc::new(Publisher::new(config.publisher.clone()));
        let sources = Arc::new(sources);

        let (queue, admissions, queue_task) = QueueActor::spawn(
            config.queue,
            Some(publisher.clone()),
            CancellationToken::new(),
        );
        let pipeline = Arc::new(PipelineManager::new(
            config.pipeline.clone(),
            queue.clone(),
            sources.clone(),
            transformer,
            publisher.clone(),
        ));
        let session = SessionService::new(queue.clone(), config.admin_users.iter().cloned());

        Self {
            config,
            publisher,
            sources,
            queue,
            pipeline,
            session,
            admissions: Mutex::new(Some(admissions)),
            queue_task: Mutex::new(Some(queue_task)),
            background: Mutex::new(Vec::new()),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Prepare directories, log in to the sources and start the pipeline.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing services");

        ensure_dir_all(self.publisher.serving_dir()).await?;
        self.publisher.purge_stale().await?;
        ensure_dir_all(&self.config.pipeline.work_dir).await?;

        // Adapter failures (missing credentials) leave that source degraded.
        self.sources.init_all().await;

        if let Some(admissions) = self.admissions.lock().take() {
            self.pipeline.start(admissions);
        }

        let mut background = self.background.lock();
        background.push(
            self.session
                .spawn_notifier(self.cancellation_token.child_token()),
        );
        if let Some(dir) = &self.config.log_dir {
            background.push(logging::spawn_retention_cleanup(
                dir.clone(),
                self.cancellation_token.child_token(),
            ));
        }

        info!("Services initialized");
        Ok(())
    }

    /// HTTP server bound to this container's session.
    pub fn api_server(&self) -> ApiServer {
        ApiServer::new(self.config.api.clone(), AppState::new(self.session.clone()))
    }

    /// Stop the pipeline, then the queue actor, then the source sessions.
    pub async fn shutdown(&self) {
        info!("Shutting down services");

        self.pipeline.stop().await;

        self.queue.stop();
        let queue_task = self.queue_task.lock().take();
        if let Some(task) = queue_task
            && let Err(e) = task.await
        {
            warn!("Queue actor ended abnormally: {}", e);
        }

        self.sources.shutdown_all().await;

        self.cancellation_token.cancel();
        let tasks: Vec<_> = self.background.lock().drain(..).collect();
        let joined = tokio::time::timeout(DEFAULT_SHUTDOWN_TIMEOUT, async {
            for task in tasks {
                let _ = task.await;
            }
        })
        .await;
        if joined.is_err() {
            warn!("Shutdown timeout reached, abandoning background tasks");
        }

        info!("Services shut down");
    }
}
