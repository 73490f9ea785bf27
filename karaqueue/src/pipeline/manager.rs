//! Pipeline Manager: receives admissions from the queue and runs one job per
//! item, bounded per stage.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::job::{JobContext, run_job};
use super::worker_pool::{StageKind, StagePool, StagePoolConfig};
use crate::domain::RetryPolicy;
use crate::publish::Publisher;
use crate::queue::{Admission, QueueHandle};
use crate::source::SourceRegistry;
use crate::transform::Transformer;

/// Configuration for the Pipeline Manager.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent fetches.
    pub fetch_pool: StagePoolConfig,
    /// Concurrent transcodes, normally one.
    pub transcode_pool: StagePoolConfig,
    /// Limit for one fetch attempt.
    pub fetch_timeout: Duration,
    /// Limit for the whole transcode stage.
    pub transcode_timeout: Duration,
    pub retry: RetryPolicy,
    /// Parent of the per-job scratch directories.
    pub work_dir: PathBuf,
    pub max_duration: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_pool: StagePoolConfig::new(3),
            transcode_pool: StagePoolConfig::new(1),
            fetch_timeout: Duration::from_secs(300),
            transcode_timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
            work_dir: std::env::temp_dir().join("karaqueue"),
            max_duration: Duration::from_secs(600),
        }
    }
}

/// The Pipeline Manager.
pub struct PipelineManager {
    ctx: Arc<JobContext>,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PipelineManager {
    pub fn new(
        config: PipelineConfig,
        queue: QueueHandle,
        sources: Arc<SourceRegistry>,
        transformer: Arc<dyn Transformer>,
        publisher: Arc<Publisher>,
    ) -> Self {
        let ctx = JobContext {
            queue,
            sources,
            transformer,
            publisher,
            fetch_pool: StagePool::new(StageKind::Fetch, config.fetch_pool.clone()),
            transcode_pool: StagePool::new(StageKind::Transcode, config.transcode_pool.clone()),
            config,
            cancellation_token: CancellationToken::new(),
        };
        Self {
            ctx: Arc::new(ctx),
            dispatcher: parking_lot::Mutex::new(None),
        }
    }

    /// Start consuming admissions.
    pub fn start(&self, admissions: mpsc::UnboundedReceiver<Admission>) {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            debug!("Pipeline Manager already started");
            return;
        }
        info!(
            fetch_workers = self.ctx.fetch_pool.max_workers(),
            transcode_workers = self.ctx.transcode_pool.max_workers(),
            work_dir = %self.ctx.config.work_dir.display(),
            "Starting Pipeline Manager"
        );
        *dispatcher = Some(tokio::spawn(dispatch(self.ctx.clone(), admissions)));
    }

    /// Stop accepting work and abandon in-flight jobs.
    pub async fn stop(&self) {
        info!("Stopping Pipeline Manager");
        self.ctx.cancellation_token.cancel();
        self.ctx.fetch_pool.close();
        self.ctx.transcode_pool.close();

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!("Pipeline dispatcher ended abnormally: {}", e);
        }
        info!("Pipeline Manager stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.ctx.cancellation_token.is_cancelled()
    }

    /// Jobs currently holding a fetch slot.
    pub fn active_fetches(&self) -> usize {
        self.ctx.fetch_pool.active_count()
    }

    /// Jobs currently holding a transcode slot.
    pub fn active_transcodes(&self) -> usize {
        self.ctx.transcode_pool.active_count()
    }
}

async fn dispatch(ctx: Arc<JobContext>, mut admissions: mpsc::UnboundedReceiver<Admission>) {
    let mut jobs = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancellation_token.cancelled() => break,
            Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    error!("Pipeline job panicked: {}", e);
                }
            }
            admission = admissions.recv() => match admission {
                Some(admission) => {
                    debug!(item_id = %admission.id, url = %admission.url, "Scheduling item");
                    jobs.spawn(run_job(ctx.clone(), admission));
                }
                None => {
                    debug!("Admission channel closed");
                    break;
                }
            },
        }
    }

    if ctx.cancellation_token.is_cancelled() {
        // Jobs watch the token; anything still running is aborted.
        jobs.shutdown().await;
    } else {
        while jobs.join_next().await.is_some() {}
    }
    debug!("Pipeline dispatcher finished");
}
