//! End-to-end tests for the queue actor and the job pipeline.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::header;
use axum::routing::get;
use common::*;
use karaqueue::domain::ItemStatus;
use karaqueue::queue::QueueEvent;
use karaqueue::source::{GenericAdapter, SourceRegistry};
use karaqueue::utils::http_client::build_client;

fn fake_sources(site: impl Into<Arc<FakeSite>>) -> SourceRegistry {
    let site: Arc<FakeSite> = site.into();
    let mut sources = SourceRegistry::new();
    sources.register(site);
    sources
}

#[tokio::test]
async fn test_item_lifecycle_through_playback() {
    let app = TestApp::start(fake_sources(FakeSite::new()), &[]).await;
    let mut events = app.queue().subscribe();
    let alice = app.services.session.requester("alice");

    let item = app
        .queue()
        .enqueue(alice, "site-a://first-song", 2)
        .await
        .unwrap();
    assert_eq!(item.status, ItemStatus::Pending);

    let ready = app.wait_for_status(item.id, ItemStatus::Ready).await;
    assert_eq!(ready.title.as_deref(), Some("first song"));
    assert_eq!(ready.display_name, "first song [+2]");
    assert_eq!(ready.duration_secs, Some(42.0));
    let served_url = ready.served_url.clone().unwrap();
    assert!(served_url.starts_with(&format!("{}{}/?", PUBLIC_BASE_URL, item.id)));

    let dir = app.item_dir(item.id);
    assert_eq!(
        std::fs::read_to_string(dir.join("video.mp4")).unwrap(),
        "media for first-song"
    );
    let html = std::fs::read_to_string(dir.join("index.html")).unwrap();
    assert!(html.contains("og:video"));
    assert!(html.contains("first song [+2]"));

    // Nothing plays until someone asks.
    let outcome = app.queue().skip().await.unwrap();
    assert!(outcome.finished.is_none());
    assert_eq!(outcome.now_playing.unwrap().id, item.id);

    let outcome = app.queue().skip().await.unwrap();
    assert_eq!(outcome.finished.unwrap().id, item.id);
    assert!(outcome.now_playing.is_none());
    assert!(app.queue().snapshot().is_empty());
    eventually(|| !dir.exists()).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let terminal = seen.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal, 1);
    assert!(matches!(seen.first(), Some(QueueEvent::Admitted { .. })));
    assert!(matches!(seen.last(), Some(QueueEvent::Finished { .. })));

    app.shutdown().await;
}

#[tokio::test]
async fn test_skip_before_ready_plays_first_ready_item() {
    let mut site = FakeSite::new();
    let gate = site.gate("slow-song");
    let app = TestApp::start(fake_sources(site), &[]).await;
    let alice = app.services.session.requester("alice");

    let item = app.queue().enqueue(alice, "site-a://slow-song", 0).await.unwrap();
    app.wait_for_status(item.id, ItemStatus::Fetching).await;

    let outcome = app.queue().skip().await.unwrap();
    assert!(outcome.waiting);
    assert!(outcome.now_playing.is_none());
    assert_eq!(app.services.pipeline.active_fetches(), 1);
    assert_eq!(app.services.pipeline.active_transcodes(), 0);

    gate.notify_one();
    let playing = app.wait_for_status(item.id, ItemStatus::Playing).await;
    assert_eq!(playing.display_name, "slow song");

    let pipeline = app.services.pipeline.clone();
    assert!(pipeline.is_running());
    app.shutdown().await;
    assert!(!pipeline.is_running());
}

#[tokio::test]
async fn test_remove_mid_pipeline_leaves_nothing_behind() {
    let mut site = FakeSite::new();
    let gate = site.gate("doomed");
    let started = site.started();
    let app = TestApp::start(fake_sources(site), &[]).await;
    let alice = app.services.session.requester("alice");

    let item = app
        .queue()
        .enqueue(alice.clone(), "site-a://doomed", 1)
        .await
        .unwrap();
    tokio::time::timeout(WAIT, started.notified())
        .await
        .expect("fetch never started");

    let removed = app.queue().remove(item.id, alice).await.unwrap();
    assert_eq!(removed.status, ItemStatus::Removed);
    assert!(app.queue().snapshot().is_empty());

    // The fetch finishes after its item is gone.
    gate.notify_one();
    let work_dir = app.work_dir.path().to_path_buf();
    eventually(|| entry_count(&work_dir) == 0).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!app.item_dir(item.id).exists());
    assert_eq!(entry_count(app.serving_dir.path()), 0);
    assert!(app.queue().snapshot().is_empty());
    assert_eq!(app.queue().status(item.id).await.unwrap(), None);

    app.shutdown().await;
}

#[tokio::test]
async fn test_failed_item_does_not_block_later_items() {
    let app = TestApp::start(fake_sources(FakeSite::new()), &[]).await;
    let alice = app.services.session.requester("alice");
    let bob = app.services.session.requester("bob");

    // Both jobs run side by side.
    let bad = app.queue().enqueue(alice, "bad://url", 0).await.unwrap();
    let good = app
        .queue()
        .enqueue(bob, "site-a://good-song", 0)
        .await
        .unwrap();

    let failed = app.wait_for_status(bad.id, ItemStatus::Failed).await;
    assert!(
        failed
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.contains("Unsupported source")),
        "unexpected reason: {:?}",
        failed.failure_reason
    );
    app.wait_for_status(good.id, ItemStatus::Ready).await;

    // Failed items stay listed until playback moves past them.
    assert_eq!(app.queue().snapshot().len(), 2);

    let outcome = app.queue().skip().await.unwrap();
    assert_eq!(outcome.now_playing.unwrap().id, good.id);
    let remaining = app.queue().snapshot();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].status, ItemStatus::Playing);

    app.shutdown().await;
}

#[tokio::test]
async fn test_transient_fetch_failure_is_retried() {
    let mut site = FakeSite::new();
    site.flaky("shaky-song", 1);
    let site = Arc::new(site);
    let app = TestApp::start(
        fake_sources(site.clone()),
        &[
            ("KARAQUEUE_FETCH_MAX_RETRIES", "1"),
            ("KARAQUEUE_FETCH_RETRY_DELAY_MS", "10"),
        ],
    )
    .await;
    let alice = app.services.session.requester("alice");

    let item = app
        .queue()
        .enqueue(alice, "site-a://shaky-song", 0)
        .await
        .unwrap();
    let ready = app.wait_for_status(item.id, ItemStatus::Ready).await;
    assert_eq!(ready.title.as_deref(), Some("shaky song"));
    assert_eq!(site.resolves(), 2);
    // earlier attempts leave nothing in the work dir
    let work_dir = app.work_dir.path().to_path_buf();
    eventually(|| entry_count(&work_dir) == 0).await;

    app.shutdown().await;
}

#[tokio::test]
async fn test_fetch_fails_once_retries_run_out() {
    let mut site = FakeSite::new();
    site.flaky("dead-link", 5);
    let site = Arc::new(site);
    let app = TestApp::start(
        fake_sources(site.clone()),
        &[
            ("KARAQUEUE_FETCH_MAX_RETRIES", "1"),
            ("KARAQUEUE_FETCH_RETRY_DELAY_MS", "10"),
        ],
    )
    .await;
    let alice = app.services.session.requester("alice");

    let item = app
        .queue()
        .enqueue(alice, "site-a://dead-link", 0)
        .await
        .unwrap();
    let failed = app.wait_for_status(item.id, ItemStatus::Failed).await;
    assert_eq!(failed.failure_reason.as_deref(), Some("Fetch failed: reset"));
    assert_eq!(site.resolves(), 2);

    app.shutdown().await;
}

#[tokio::test]
async fn test_remove_during_fetch_backoff_stops_retrying() {
    let mut site = FakeSite::new();
    site.flaky("flapping", 5);
    let site = Arc::new(site);
    let app = TestApp::start(
        fake_sources(site.clone()),
        &[
            ("KARAQUEUE_FETCH_MAX_RETRIES", "3"),
            ("KARAQUEUE_FETCH_RETRY_DELAY_MS", "60000"),
        ],
    )
    .await;
    let alice = app.services.session.requester("alice");

    let item = app
        .queue()
        .enqueue(alice.clone(), "site-a://flapping", 0)
        .await
        .unwrap();
    eventually(|| site.resolves() == 1).await;
    assert_eq!(app.queue().status(item.id).await.unwrap(), Some(ItemStatus::Fetching));

    app.queue().remove(item.id, alice).await.unwrap();

    // the job wakes from its backoff and gives back its slot
    let pipeline = app.services.pipeline.clone();
    eventually(|| pipeline.active_fetches() == 0).await;
    let work_dir = app.work_dir.path().to_path_buf();
    eventually(|| entry_count(&work_dir) == 0).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(site.resolves(), 1);
    assert_eq!(app.queue().status(item.id).await.unwrap(), None);
    assert!(app.queue().snapshot().is_empty());

    app.shutdown().await;
}

#[tokio::test]
async fn test_duration_limit_fails_item() {
    let transformer = Arc::new(PassthroughTransformer {
        duration_secs: 900.0,
    });
    let app = TestApp::start_with(
        fake_sources(FakeSite::new()),
        transformer,
        &[("KARAQUEUE_MAX_DURATION_SECS", "600")],
    )
    .await;
    let alice = app.services.session.requester("alice");

    let item = app.queue().enqueue(alice, "site-a://epic", 0).await.unwrap();
    let failed = app.wait_for_status(item.id, ItemStatus::Failed).await;
    assert!(failed.failure_reason.unwrap().contains("limit is 600s"));
    assert!(!app.item_dir(item.id).exists());

    app.shutdown().await;
}

#[tokio::test]
async fn test_reset_removes_published_output() {
    let app = TestApp::start(fake_sources(FakeSite::new()), &[]).await;
    let alice = app.services.session.requester("alice");
    let admin = app.services.session.requester("admin");

    let item = app.queue().enqueue(alice, "site-a://song", 0).await.unwrap();
    app.wait_for_status(item.id, ItemStatus::Ready).await;
    let dir = app.item_dir(item.id);
    assert!(dir.exists());

    assert_eq!(app.queue().reset(admin.clone()).await.unwrap(), 1);
    assert!(app.queue().snapshot().is_empty());
    eventually(|| !dir.exists()).await;

    // Identifiers keep counting after a reset.
    let next = app.queue().enqueue(admin, "site-a://encore", 0).await.unwrap();
    assert!(next.id > item.id);

    app.shutdown().await;
}

#[tokio::test]
async fn test_generic_source_downloads_over_http() {
    let router = Router::new()
        .route(
            "/media/duet_song.mp4",
            get(|| async { ([(header::CONTENT_TYPE, "video/mp4")], "generic media bytes") }),
        )
        .route(
            "/page.html",
            get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<html></html>") }),
        );
    let addr = spawn_server(router).await;

    let mut sources = SourceRegistry::new();
    sources.with_fallback(Arc::new(GenericAdapter::new(
        build_client(Duration::from_secs(5)),
        1024 * 1024,
    )));
    let app = TestApp::start(sources, &[]).await;
    let alice = app.services.session.requester("alice");
    let bob = app.services.session.requester("bob");

    let song = app
        .queue()
        .enqueue(alice, format!("http://{}/media/duet_song.mp4", addr), 0)
        .await
        .unwrap();
    let page = app
        .queue()
        .enqueue(bob.clone(), format!("http://{}/page.html", addr), 0)
        .await
        .unwrap();
    let missing = app
        .queue()
        .enqueue(bob, format!("http://{}/media/gone.mp4", addr), 0)
        .await
        .unwrap();

    let ready = app.wait_for_status(song.id, ItemStatus::Ready).await;
    assert_eq!(ready.title.as_deref(), Some("duet song"));
    assert_eq!(
        std::fs::read_to_string(app.item_dir(song.id).join("video.mp4")).unwrap(),
        "generic media bytes"
    );

    app.wait_for_status(page.id, ItemStatus::Failed).await;
    app.wait_for_status(missing.id, ItemStatus::Failed).await;

    app.shutdown().await;
}
