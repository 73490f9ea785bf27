//! HTTP routes for the session commands.

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{StatusCode, request::Parts},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use super::server::AppState;
use crate::domain::ItemId;
use crate::session::{SessionCommand, SessionReply};

/// Header carrying the caller's identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity taken from the `X-User-Id` header.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or_else(|| ApiError::bad_request("Missing X-User-Id header"))
    }
}

#[derive(Debug, Deserialize)]
pub struct AddRequest {
    pub url: String,
    #[serde(default)]
    pub pitch_shift: i32,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    /// 1-based target position.
    pub position: usize,
}

/// A command reply plus its rendered text.
#[derive(Debug, Serialize)]
pub struct ReplyBody {
    pub message: String,
    #[serde(flatten)]
    pub reply: SessionReply,
}

impl From<SessionReply> for ReplyBody {
    fn from(reply: SessionReply) -> Self {
        Self {
            message: reply.message(),
            reply,
        }
    }
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/queue", post(add).get(list))
        .route("/api/queue/skip", post(skip))
        .route("/api/queue/reset", post(reset))
        .route("/api/queue/{id}", delete(remove))
        .route("/api/queue/{id}/move", post(reorder))
        .route("/api/help", get(help))
        .route("/api/health", get(health))
        .with_state(state)
}

async fn run(state: &AppState, user: &str, command: SessionCommand) -> ApiResult<Json<ReplyBody>> {
    let reply = state.session.execute(user, command).await?;
    Ok(Json(reply.into()))
}

async fn add(
    State(state): State<AppState>,
    UserId(user): UserId,
    body: Result<Json<AddRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ReplyBody>)> {
    let Json(request) = body?;
    let reply = run(
        &state,
        &user,
        SessionCommand::Add {
            url: request.url,
            pitch_shift: request.pitch_shift,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, reply))
}

async fn list(State(state): State<AppState>) -> ApiResult<Json<ReplyBody>> {
    // Listing needs no identity.
    run(&state, "", SessionCommand::List).await
}

async fn skip(State(state): State<AppState>, UserId(user): UserId) -> ApiResult<Json<ReplyBody>> {
    run(&state, &user, SessionCommand::Skip).await
}

async fn remove(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<u64>,
) -> ApiResult<Json<ReplyBody>> {
    run(&state, &user, SessionCommand::Remove { id: ItemId(id) }).await
}

async fn reorder(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<u64>,
    body: Result<Json<MoveRequest>, JsonRejection>,
) -> ApiResult<Json<ReplyBody>> {
    let Json(request) = body?;
    run(
        &state,
        &user,
        SessionCommand::Reorder {
            id: ItemId(id),
            position: request.position,
        },
    )
    .await
}

async fn reset(State(state): State<AppState>, UserId(user): UserId) -> ApiResult<Json<ReplyBody>> {
    run(&state, &user, SessionCommand::Reset).await
}

async fn help(State(state): State<AppState>) -> ApiResult<Json<ReplyBody>> {
    run(&state, "", SessionCommand::Help).await
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    queue_len: usize,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let queue = state.session.queue();
    let (status, code) = if queue.is_stopped() {
        ("stopped", StatusCode::SERVICE_UNAVAILABLE)
    } else {
        ("healthy", StatusCode::OK)
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: state.start_time.elapsed().as_secs(),
            queue_len: queue.snapshot().len(),
        }),
    )
}
