//! The stateless HTTP surface over the gateway core. JSON in, JSON out;
//! every error body carries `{error_kind, message, retry_after?}`.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{sse::Event as SseEvent, IntoResponse, Response, Sse},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tower_http::trace::TraceLayer;
use tracing::debug;

use muster_core::{ConnectionState, MusterError};

use crate::Gateway;

/// Build the axum router for the gateway surface.
pub fn build_router(gateway: Gateway) -> Router {
    Router::new()
        .route("/send", post(send_handler))
        .route("/send-file", post(send_file_handler))
        .route("/messages", get(messages_handler))
        .route("/channels", get(channels_handler))
        .route("/guild", get(guild_handler))
        .route("/bots", get(bots_handler))
        .route("/health", get(health_handler))
        .route("/subscribe", get(subscribe_handler))
        .route(
            "/attachments/{bot}/{channel_id}/{message_id}",
            get(attachments_handler),
        )
        .route(
            "/attachments/{bot}/{channel_id}/{message_id}/download",
            get(attachment_download_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Error body served with every non-2xx response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error_kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

/// Wrapper mapping the error taxonomy onto HTTP statuses.
struct ApiError(MusterError);

impl From<MusterError> for ApiError {
    fn from(e: MusterError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            MusterError::UnknownBot(_) | MusterError::UnknownChannel(_) => StatusCode::NOT_FOUND,
            MusterError::DuplicateBotToken { .. } => StatusCode::CONFLICT,
            MusterError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            MusterError::Forbidden(_) | MusterError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            MusterError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MusterError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            MusterError::Config(_) | MusterError::Serialization(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error_kind: err.kind(),
            message: err.to_string(),
            retry_after: err.retry_after_secs(),
        };
        (status, Json(body)).into_response()
    }
}

/// 503 with a transport body when the identity exists but is not serving.
fn degraded_response(bot: &str, state: ConnectionState) -> Response {
    let body = ErrorBody {
        error_kind: "transport",
        message: format!("bot '{bot}' is {state}, not ready"),
        retry_after: None,
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

/// Pre-check an identity's connection state so degraded identities answer
/// 503 rather than a generic 500.
fn check_serving(gateway: &Gateway, bot: &str) -> Result<(), Response> {
    match gateway.connection_state(bot) {
        None => Err(ApiError(MusterError::UnknownBot(bot.to_string())).into_response()),
        Some(ConnectionState::Ready) => Ok(()),
        Some(state) => Err(degraded_response(bot, state)),
    }
}

// ── Send ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SendRequest {
    bot: String,
    channel_id: String,
    content: String,
    #[serde(default)]
    reply_to: Option<String>,
    /// Attachment URLs appended to the message body.
    #[serde(default)]
    attachments: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    message_id: String,
}

async fn send_handler(
    State(gateway): State<Gateway>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, Response> {
    check_serving(&gateway, &req.bot)?;
    let mut content = req.content;
    for url in &req.attachments {
        content.push('\n');
        content.push_str(url);
    }
    let message_id = gateway
        .send(&req.bot, &req.channel_id, &content, req.reply_to.as_deref())
        .await
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(SendResponse { message_id }))
}

// ── Send file ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SendFileRequest {
    bot: String,
    channel_id: String,
    /// Server-local file to upload…
    #[serde(default)]
    path: Option<String>,
    /// …or raw bytes (base64) plus a filename.
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

async fn send_file_handler(
    State(gateway): State<Gateway>,
    Json(req): Json<SendFileRequest>,
) -> Result<Json<SendResponse>, Response> {
    check_serving(&gateway, &req.bot)?;

    let (filename, bytes) = match (&req.path, &req.data, &req.filename) {
        (Some(path), None, _) => {
            let name = std::path::Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file")
                .to_string();
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                ApiError(MusterError::Config(format!("cannot read {path}: {e}"))).into_response()
            })?;
            (name, bytes)
        }
        (None, Some(data), Some(filename)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| {
                    ApiError(MusterError::Config(format!("invalid base64 data: {e}")))
                        .into_response()
                })?;
            (filename.clone(), bytes)
        }
        _ => {
            return Err(ApiError(MusterError::Config(
                "send-file requires either `path` or `data`+`filename`".into(),
            ))
            .into_response());
        }
    };

    let message_id = gateway
        .send_file(
            &req.bot,
            &req.channel_id,
            &filename,
            bytes,
            req.content.as_deref(),
        )
        .await
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(SendResponse { message_id }))
}

// ── History / introspection ────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessagesParams {
    bot: String,
    channel_id: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    before: Option<String>,
}

fn default_limit() -> usize {
    20
}

async fn messages_handler(
    State(gateway): State<Gateway>,
    Query(params): Query<MessagesParams>,
) -> Result<Json<serde_json::Value>, Response> {
    check_serving(&gateway, &params.bot)?;
    let messages = gateway
        .messages(
            &params.bot,
            &params.channel_id,
            params.limit,
            params.before.as_deref(),
        )
        .await
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}

#[derive(Debug, Deserialize)]
struct ChannelsParams {
    bot: String,
    #[serde(default)]
    guild_id: Option<String>,
}

async fn channels_handler(
    State(gateway): State<Gateway>,
    Query(params): Query<ChannelsParams>,
) -> Result<Json<serde_json::Value>, Response> {
    check_serving(&gateway, &params.bot)?;
    let channels = gateway
        .channels(&params.bot, params.guild_id.as_deref())
        .await
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(channels))
}

#[derive(Debug, Deserialize)]
struct GuildParams {
    bot: String,
    guild_id: String,
}

async fn guild_handler(
    State(gateway): State<Gateway>,
    Query(params): Query<GuildParams>,
) -> Result<Json<serde_json::Value>, Response> {
    check_serving(&gateway, &params.bot)?;
    let guild = gateway
        .guild_info(&params.bot, &params.guild_id)
        .await
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(guild))
}

async fn bots_handler(State(gateway): State<Gateway>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "bots": gateway.bots() }))
}

async fn health_handler(State(gateway): State<Gateway>) -> Json<crate::GatewayHealth> {
    Json(gateway.health())
}

// ── Attachments ────────────────────────────────────────────────

async fn attachments_handler(
    State(gateway): State<Gateway>,
    Path((bot, channel_id, message_id)): Path<(String, String, String)>,
) -> Result<Json<serde_json::Value>, Response> {
    check_serving(&gateway, &bot)?;
    let attachments = gateway
        .message_attachments(&bot, &channel_id, &message_id)
        .await
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(serde_json::json!({ "attachments": attachments })))
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    filename: String,
}

async fn attachment_download_handler(
    State(gateway): State<Gateway>,
    Path((bot, channel_id, message_id)): Path<(String, String, String)>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, Response> {
    check_serving(&gateway, &bot)?;
    let bytes = gateway
        .download_attachment(&bot, &channel_id, &message_id, &params.filename)
        .await
        .map_err(|e| ApiError(e).into_response())?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

// ── Subscription (SSE) ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    bot: String,
    subscriber: String,
}

/// Long-lived stream of this identity's inbound events, one JSON event per
/// SSE message, in receive order. Each `(bot, subscriber)` pair gets an
/// independent buffered view; lag drops the oldest events server-side.
async fn subscribe_handler(
    State(gateway): State<Gateway>,
    Query(params): Query<SubscribeParams>,
) -> Result<Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>>, Response> {
    let mut stream = gateway
        .subscribe(&params.bot)
        .map_err(|e| ApiError(e).into_response())?;
    debug!(bot = %params.bot, subscriber = %params.subscriber, "subscription opened");

    let sse_stream = async_stream::stream! {
        while let Some(event) = stream.next().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(SseEvent::default().data(data));
        }
    };
    Ok(Sse::new(sse_stream))
}

