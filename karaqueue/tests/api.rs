//! HTTP route tests driven through `tower::ServiceExt::oneshot`.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use karaqueue::api::{ApiServer, ApiServerConfig, AppState, USER_ID_HEADER, create_router};
use karaqueue::queue::{QueueActor, QueueConfig, QueueHandle};
use karaqueue::session::SessionService;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn setup() -> (Router, QueueHandle) {
    let (queue, _admissions, _task) = QueueActor::spawn(
        QueueConfig {
            max_queued: 5,
            max_queued_per_user: 2,
        },
        None,
        CancellationToken::new(),
    );
    let session = SessionService::new(queue.clone(), ["admin".to_string()]);
    (create_router(AppState::new(session)), queue)
}

fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn add(router: &Router, user: &str, url: &str) -> (StatusCode, Value) {
    send(
        router,
        request(
            Method::POST,
            "/api/queue",
            Some(user),
            Some(json!({ "url": url })),
        ),
    )
    .await
}

#[tokio::test]
async fn test_add_and_list() {
    let (router, _queue) = setup();

    let (status, body) = send(
        &router,
        request(
            Method::POST,
            "/api/queue",
            Some("alice"),
            Some(json!({ "url": "https://a.test/song.mp4", "pitch_shift": -3 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["kind"], "added");
    assert_eq!(body["message"], "Loading `https://a.test/song.mp4`...");
    assert_eq!(body["item"]["id"], 1);
    assert_eq!(body["item"]["pitch_shift"], -3);
    assert_eq!(body["item"]["status"], "pending");

    let (status, body) = send(&router, request(Method::GET, "/api/queue", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "queue");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert!(body["message"].as_str().unwrap().starts_with("Up Next"));
}

#[tokio::test]
async fn test_add_rejections() {
    let (router, _queue) = setup();

    let (status, body) = send(
        &router,
        request(
            Method::POST,
            "/api/queue",
            None,
            Some(json!({ "url": "https://a.test/a.mp4" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, _) = send(
        &router,
        request(
            Method::POST,
            "/api/queue",
            Some("alice"),
            Some(json!({ "url": "https://a.test/a.mp4", "pitch_shift": 13 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = add(&router, "alice", "not a url").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        request(Method::POST, "/api/queue", Some("alice"), Some(json!({ "pitch_shift": 1 }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(add(&router, "alice", "https://a.test/1.mp4").await.0, StatusCode::CREATED);
    assert_eq!(add(&router, "alice", "https://a.test/2.mp4").await.0, StatusCode::CREATED);
    let (status, body) = add(&router, "alice", "https://a.test/3.mp4").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Each user may only have 2 songs in the queue!");
}

#[tokio::test]
async fn test_queue_full() {
    let (router, _queue) = setup();
    for (user, n) in [("a", 1), ("a", 2), ("b", 3), ("b", 4), ("c", 5)] {
        let (status, _) = add(&router, user, &format!("https://a.test/{}.mp4", n)).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = add(&router, "d", "https://a.test/6.mp4").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Queue is full! Remove some songs first.");
}

#[tokio::test]
async fn test_remove_permissions() {
    let (router, _queue) = setup();
    add(&router, "alice", "https://a.test/song.mp4").await;

    let (status, _) = send(&router, request(Method::DELETE, "/api/queue/1", Some("bob"), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) =
        send(&router, request(Method::DELETE, "/api/queue/1", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "removed");
    assert_eq!(body["item"]["status"], "removed");

    let (status, body) =
        send(&router, request(Method::DELETE, "/api/queue/1", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_admin_can_remove_any_item() {
    let (router, _queue) = setup();
    add(&router, "alice", "https://a.test/song.mp4").await;

    let (status, _) = send(&router, request(Method::DELETE, "/api/queue/1", Some("admin"), None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_move_is_privileged_and_one_based() {
    let (router, _queue) = setup();
    add(&router, "alice", "https://a.test/first.mp4").await;
    add(&router, "bob", "https://a.test/second.mp4").await;

    let move_to = |user: &'static str, position: usize| {
        request(
            Method::POST,
            "/api/queue/2/move",
            Some(user),
            Some(json!({ "position": position })),
        )
    };

    assert_eq!(send(&router, move_to("bob", 1)).await.0, StatusCode::FORBIDDEN);
    assert_eq!(send(&router, move_to("admin", 0)).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(send(&router, move_to("admin", 3)).await.0, StatusCode::BAD_REQUEST);

    let (status, body) = send(&router, move_to("admin", 1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "moved");
    assert_eq!(body["items"][0]["id"], 2);
    assert_eq!(body["items"][1]["id"], 1);
}

#[tokio::test]
async fn test_skip_and_reset() {
    let (router, _queue) = setup();

    let (status, body) = send(&router, request(Method::POST, "/api/queue/skip", Some("bob"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No songs in queue!");

    add(&router, "alice", "https://a.test/song.mp4").await;
    let (_, body) = send(&router, request(Method::POST, "/api/queue/skip", Some("bob"), None)).await;
    assert_eq!(body["waiting"], true);

    let (status, _) = send(&router, request(Method::POST, "/api/queue/reset", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) =
        send(&router, request(Method::POST, "/api/queue/reset", Some("admin"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["message"], "Queue cleared, 1 songs removed.");
}

#[tokio::test]
async fn test_help_and_health() {
    let (router, queue) = setup();

    let (status, body) = send(&router, request(Method::GET, "/api/help", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "help");
    assert!(body["message"].as_str().unwrap().contains("`remove id`"));

    let (status, body) = send(&router, request(Method::GET, "/api/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    queue.stop();
    let (status, body) = send(&router, request(Method::GET, "/api/health", None, None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "stopped");
}

#[tokio::test]
async fn test_media_mount_serves_ranges() {
    let (queue, _admissions, _task) =
        QueueActor::spawn(QueueConfig::default(), None, CancellationToken::new());
    let session = SessionService::new(queue, Vec::<String>::new());
    let media = tempfile::tempdir().unwrap();
    std::fs::create_dir(media.path().join("7")).unwrap();
    std::fs::write(media.path().join("7").join("video.mp4"), b"0123456789").unwrap();

    let server = ApiServer::new(
        ApiServerConfig {
            serve_media: Some(media.path().to_path_buf()),
            ..ApiServerConfig::default()
        },
        AppState::new(session),
    );
    let request = Request::builder()
        .uri("/media/7/video.mp4")
        .header(header::RANGE, "bytes=2-5")
        .body(Body::empty())
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"2345");
}
