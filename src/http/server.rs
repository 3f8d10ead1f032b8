//! HTTP surface: liveness for the supervisor, a status snapshot for
//! operators, and on-demand media download.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::sync::status::WorkerStatus;
use crate::sync::worker::ApiSlot;
use crate::telegram::api::TelegramError;
use crate::telegram::session::SessionManager;
use crate::{AppError, Result};

/// Shared state behind the HTTP handlers.
pub struct HttpState {
    /// In-memory worker snapshot.
    pub status: Arc<WorkerStatus>,
    /// Session manager, for the status endpoint's session facts.
    pub session: Arc<SessionManager>,
    /// Live upstream client slot, for media downloads.
    pub api_slot: Arc<ApiSlot>,
}

/// Serve the health/status/download surface until cancellation.
///
/// # Errors
///
/// Returns `AppError::Http` if the listener cannot bind or the server
/// fails.
pub async fn serve(state: Arc<HttpState>, port: u16, ct: CancellationToken) -> Result<()> {
    let router = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/download", get(download))
        .with_state(state);

    let bind = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {bind}: {err}")))?;

    info!(%bind, "http surface listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("http server error: {err}")))?;

    info!("http surface shut down");
    Ok(())
}

/// `GET /health` — 200 when running-and-fresh or starting, 503 otherwise.
#[allow(clippy::unused_async)] // axum handlers must be async.
async fn health(State(state): State<Arc<HttpState>>) -> Response {
    let now = Utc::now();
    let status = state.status.status();

    let body = serde_json::json!({
        "status": status.as_str(),
        "uptime_s": state.status.uptime_secs(now),
        "messages_received": state.status.messages_received(),
    });

    if state.status.is_healthy(now) {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        let diagnostic = serde_json::json!({
            "status": status.as_str(),
            "uptime_s": state.status.uptime_secs(now),
            "messages_received": state.status.messages_received(),
            "last_heartbeat": state.status.last_heartbeat().map(|hb| hb.to_rfc3339()),
            "recent_errors": state.status.recent_errors(5),
        });
        (StatusCode::SERVICE_UNAVAILABLE, Json(diagnostic)).into_response()
    }
}

/// `GET /status` — worker snapshot, session facts, env presence flags.
#[allow(clippy::unused_async)] // axum handlers must be async.
async fn status(State(state): State<Arc<HttpState>>) -> Response {
    let body = serde_json::json!({
        "worker": {
            "status": state.status.status().as_str(),
            "started_at": state.status.started_at().map(|t| t.to_rfc3339()),
            "last_heartbeat": state.status.last_heartbeat().map(|t| t.to_rfc3339()),
            "messages_received": state.status.messages_received(),
            "recent_errors": state.status.recent_errors(10),
        },
        "session": state.session.info(),
        "environment": Config::env_presence(),
    });

    (StatusCode::OK, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    telegram_chat_id: Option<i64>,
    telegram_message_id: Option<i64>,
}

/// `GET /download?telegram_chat_id=X&telegram_message_id=Y` — media bytes.
async fn download(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<DownloadParams>,
) -> Response {
    let (Some(chat_id), Some(message_id)) =
        (params.telegram_chat_id, params.telegram_message_id)
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "telegram_chat_id and telegram_message_id are required",
        );
    };

    let Some(api) = state.api_slot.get().await else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "telegram client not ready");
    };

    match api.download_media(chat_id, message_id).await {
        Ok(Some(payload)) => {
            let mime = payload
                .mime
                .unwrap_or_else(|| "application/octet-stream".to_string());
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime),
                    (
                        header::CACHE_CONTROL,
                        "public, max-age=86400".to_string(),
                    ),
                ],
                payload.bytes,
            )
                .into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "message has no media"),
        Err(TelegramError::NotFound(msg) | TelegramError::AccessDenied(msg)) => {
            error_response(StatusCode::NOT_FOUND, &msg)
        }
        Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, &err.to_string()),
    }
}

fn error_response(code: StatusCode, message: &str) -> Response {
    (code, Json(serde_json::json!({ "error": message }))).into_response()
}
