//! One item's trip through fetch, transcode and publish.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PipelineConfig;
use super::worker_pool::{StageKind, StagePermit, StagePool};
use crate::domain::{ItemId, ItemStatus, TransitionPayload};
use crate::publish::Publisher;
use crate::queue::{Admission, QueueHandle};
use crate::source::{ResolvedMedia, SourceRegistry, check_duration};
use crate::transform::{TransformOutput, TransformRequest, Transformer};
use crate::utils::fs::ensure_dir_all;
use crate::{Error, Result};

/// Everything a job needs, shared by all jobs.
pub(crate) struct JobContext {
    pub queue: QueueHandle,
    pub sources: Arc<SourceRegistry>,
    pub transformer: Arc<dyn Transformer>,
    pub publisher: Arc<Publisher>,
    pub fetch_pool: StagePool,
    pub transcode_pool: StagePool,
    pub config: PipelineConfig,
    pub cancellation_token: CancellationToken,
}

/// Why a job stopped before reaching `Ready`.
#[derive(Debug)]
enum Abort {
    /// The item left the expected status, usually because it was removed.
    Gone,
    /// A stage failed; the item is moved to `Failed` from `stage`.
    Failed { stage: ItemStatus, error: Error },
    Shutdown,
}

impl Abort {
    fn failed(stage: ItemStatus, error: Error) -> Self {
        Self::Failed { stage, error }
    }
}

type JobResult<T> = std::result::Result<T, Abort>;

/// Drive one admitted item to `Ready` or `Failed`.
pub(crate) async fn run_job(ctx: Arc<JobContext>, admission: Admission) {
    let id = admission.id;
    match process(&ctx, &admission).await {
        Ok(()) => {}
        Err(Abort::Gone) => {
            debug!(item_id = %id, "Item left the pipeline, output discarded");
        }
        Err(Abort::Shutdown) => {
            debug!(item_id = %id, "Pipeline shutting down, job abandoned");
        }
        Err(Abort::Failed { stage, error }) => fail(&ctx, id, stage, &error).await,
    }
}

async fn fail(ctx: &JobContext, id: ItemId, stage: ItemStatus, error: &Error) {
    warn!(item_id = %id, stage = %stage, "Pipeline stage failed: {}", error);
    match ctx
        .queue
        .advance(
            id,
            stage,
            ItemStatus::Failed,
            TransitionPayload::failed(error.reason()),
        )
        .await
    {
        Ok(_) => {}
        Err(e @ Error::StaleTransition { .. }) => {
            debug!(item_id = %id, "Discarding late failure: {}", e);
        }
        Err(e) => warn!(item_id = %id, "Failed to record failure: {}", e),
    }
}

/// Guarded transition. A stale result means the item moved on without us.
async fn transition(
    ctx: &JobContext,
    id: ItemId,
    from: ItemStatus,
    to: ItemStatus,
    payload: TransitionPayload,
) -> JobResult<()> {
    match ctx.queue.advance(id, from, to, payload).await {
        Ok(_) => Ok(()),
        Err(e @ Error::StaleTransition { .. }) => {
            debug!(item_id = %id, from = %from, to = %to, "Discarding late result: {}", e);
            Err(Abort::Gone)
        }
        Err(Error::ManagerStopped) => Err(Abort::Shutdown),
        Err(e) => Err(Abort::failed(from, e)),
    }
}

/// Confirm the item is still in `expected` before or after a unit of work.
async fn ensure_status(ctx: &JobContext, id: ItemId, expected: ItemStatus) -> JobResult<()> {
    match ctx.queue.status(id).await {
        Ok(Some(status)) if status == expected => Ok(()),
        Ok(actual) => {
            debug!(item_id = %id, expected = %expected, ?actual, "Item no longer in expected state");
            Err(Abort::Gone)
        }
        Err(_) => Err(Abort::Shutdown),
    }
}

async fn process(ctx: &JobContext, admission: &Admission) -> JobResult<()> {
    let id = admission.id;

    // Fetch
    let fetch_permit = ctx
        .fetch_pool
        .acquire(id, &ctx.cancellation_token)
        .await
        .ok_or(Abort::Shutdown)?;
    ensure_status(ctx, id, ItemStatus::Pending).await?;
    transition(
        ctx,
        id,
        ItemStatus::Pending,
        ItemStatus::Fetching,
        TransitionPayload::none(),
    )
    .await?;

    let scratch = create_scratch(&ctx.config.work_dir, id)
        .await
        .map_err(|e| Abort::failed(ItemStatus::Fetching, e))?;
    let result = run_stages(ctx, admission, fetch_permit, scratch.path()).await;
    remove_scratch(scratch).await;
    result
}

async fn run_stages(
    ctx: &JobContext,
    admission: &Admission,
    fetch_permit: StagePermit,
    scratch: &Path,
) -> JobResult<()> {
    let id = admission.id;
    let resolved = fetch_with_retry(ctx, admission, scratch).await?;
    drop(fetch_permit);

    ensure_status(ctx, id, ItemStatus::Fetching).await?;
    transition(
        ctx,
        id,
        ItemStatus::Fetching,
        ItemStatus::Transcoding,
        TransitionPayload::titled(resolved.title.clone()),
    )
    .await?;

    // Transcode
    let transcode_permit = ctx
        .transcode_pool
        .acquire(id, &ctx.cancellation_token)
        .await
        .ok_or(Abort::Shutdown)?;
    ensure_status(ctx, id, ItemStatus::Transcoding).await?;
    let output = transcode(ctx, admission, &resolved, scratch).await?;
    drop(transcode_permit);

    // Publish
    ensure_status(ctx, id, ItemStatus::Transcoding).await?;
    let title = display_title(&resolved.title, admission);
    let published = ctx
        .publisher
        .publish(id, &title, &output)
        .await
        .map_err(|e| Abort::failed(ItemStatus::Transcoding, e))?;
    let served_url = published.served_url.clone();

    match transition(
        ctx,
        id,
        ItemStatus::Transcoding,
        ItemStatus::Ready,
        TransitionPayload::published(published),
    )
    .await
    {
        Ok(()) => {
            info!(item_id = %id, title = %title, served_url = %served_url, "Item ready");
            Ok(())
        }
        Err(abort) => {
            // Published after the item went away; never leave it served.
            ctx.publisher.cleanup(id).await;
            Err(abort)
        }
    }
}

fn display_title(title: &str, admission: &Admission) -> String {
    if admission.pitch_shift.is_zero() {
        title.to_string()
    } else {
        format!("{} [{}]", title, admission.pitch_shift)
    }
}

async fn create_scratch(work_dir: &Path, id: ItemId) -> Result<TempDir> {
    ensure_dir_all(work_dir).await?;
    tempfile::Builder::new()
        .prefix(&format!("item-{}-", id))
        .tempdir_in(work_dir)
        .map_err(|e| Error::io_path("creating scratch directory in", work_dir, e))
}

/// Scratch trees hold whole downloads, so deleting one is blocking work.
async fn remove_scratch(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    match tokio::task::spawn_blocking(move || scratch.close()).await {
        Ok(Ok(())) => debug!(path = %path.display(), "Scratch directory removed"),
        Ok(Err(e)) => warn!(path = %path.display(), "Failed to remove scratch directory: {}", e),
        Err(e) => warn!(path = %path.display(), "Scratch cleanup task failed: {}", e),
    }
}

/// Resolve with bounded retries on transient failures. Each attempt gets its
/// own subdirectory so a half-written download never leaks into the next.
async fn fetch_with_retry(
    ctx: &JobContext,
    admission: &Admission,
    scratch: &Path,
) -> JobResult<ResolvedMedia> {
    let id = admission.id;
    let policy = &ctx.config.retry;
    let mut retries = 0;

    loop {
        let attempt_dir = scratch.join(format!("fetch-{}", retries));
        ensure_dir_all(&attempt_dir)
            .await
            .map_err(|e| Abort::failed(ItemStatus::Fetching, e))?;

        let result = tokio::select! {
            biased;
            _ = ctx.cancellation_token.cancelled() => return Err(Abort::Shutdown),
            result = with_timeout(
                StageKind::Fetch,
                ctx.config.fetch_timeout,
                ctx.sources.resolve(&admission.url, &attempt_dir),
            ) => result,
        };

        let error = match result {
            Ok(resolved) => {
                check_duration_if_known(&resolved, ctx.config.max_duration)
                    .map_err(|e| Abort::failed(ItemStatus::Fetching, e))?;
                info!(item_id = %id, title = %resolved.title, retries, "Fetch finished");
                return Ok(resolved);
            }
            Err(e) => e,
        };

        if !error.is_transient() || !policy.should_retry(retries) {
            return Err(Abort::failed(ItemStatus::Fetching, error));
        }

        let delay = policy.delay_for_retry(retries);
        retries += 1;
        warn!(
            item_id = %id,
            retry = retries,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Transient fetch failure, retrying: {}",
            error
        );
        backoff(ctx, id, delay).await?;
        ensure_status(ctx, id, ItemStatus::Fetching).await?;
    }
}

/// Sleep before the next attempt, waking early if the item leaves `Fetching`
/// so a removed item does not hold its fetch slot.
async fn backoff(ctx: &JobContext, id: ItemId, delay: Duration) -> JobResult<()> {
    let mut items = ctx.queue.watch();
    tokio::select! {
        biased;
        _ = ctx.cancellation_token.cancelled() => Err(Abort::Shutdown),
        left = async {
            items
                .wait_for(|items| {
                    !items.iter().any(|i| i.id == id && i.status == ItemStatus::Fetching)
                })
                .await
                .map(|_| ())
        } => match left {
            Ok(()) => {
                debug!(item_id = %id, "Item left the queue during fetch backoff");
                Err(Abort::Gone)
            }
            Err(_) => Err(Abort::Shutdown),
        },
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn check_duration_if_known(resolved: &ResolvedMedia, limit: Duration) -> Result<()> {
    match resolved.duration_secs {
        Some(secs) => check_duration(secs, limit),
        None => Ok(()),
    }
}

async fn transcode(
    ctx: &JobContext,
    admission: &Admission,
    resolved: &ResolvedMedia,
    scratch: &Path,
) -> JobResult<TransformOutput> {
    let request = TransformRequest {
        id: admission.id,
        input: resolved.media_path.clone(),
        pitch_shift: admission.pitch_shift,
        work_dir: PathBuf::from(scratch),
    };

    let output = tokio::select! {
        biased;
        _ = ctx.cancellation_token.cancelled() => return Err(Abort::Shutdown),
        result = with_timeout(
            StageKind::Transcode,
            ctx.config.transcode_timeout,
            ctx.transformer.transform(&request),
        ) => result.map_err(|e| Abort::failed(ItemStatus::Transcoding, e))?,
    };

    // Direct downloads carry no duration until probed.
    check_duration(output.probe.duration_secs, ctx.config.max_duration)
        .map_err(|e| Abort::failed(ItemStatus::Transcoding, e))?;
    Ok(output)
}

async fn with_timeout<T>(
    stage: StageKind,
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => match stage {
            StageKind::Fetch => Err(Error::timed_out("fetch", limit)),
            StageKind::Transcode => Err(Error::Transcode(format!(
                "transcode timed out after {}s",
                limit.as_secs()
            ))),
        },
    }
}
