//! HTTP control surface: health, debug state, the synchronous message
//! exchange used by test harnesses, and reset.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use frontdesk_db::DbPool;

use crate::bootstrap::AppState;
use crate::session::SessionCommand;

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions/{id}/ws", get(crate::ws::upgrade))
        .route("/sessions/{id}/state", get(session_state))
        .route("/sessions/{id}/message", post(post_message))
        .route("/sessions/{id}/reset", post(reset_session))
        .with_state(app)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

pub async fn health(State(app): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&app.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "frontdesk-server runtime initialized".to_string(),
        },
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

/// Debug dump of a session's state. Inspection never creates a session.
async fn session_state(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let handle =
        app.registry.existing(&session_id).await.ok_or(StatusCode::NOT_FOUND)?;

    let (tx, rx) = oneshot::channel();
    handle.send(SessionCommand::StateDump { reply: tx }).await;
    let state = rx.await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({
        "sessionId": session_id,
        "state": state,
        "lastEventId": handle.shared.bus.last_event_id(),
        "speaking": handle.shared.is_speaking(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub text: String,
    pub phone_number: Option<String>,
    pub call_session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub reply: String,
    pub turn_id: u64,
    pub message_id: Uuid,
}

/// Synchronous one-message exchange: the request waits for the turn's final
/// reply. The same events still flow to any WebSocket subscribers.
async fn post_message(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, StatusCode> {
    if request.text.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let handle = app.registry.handle(&session_id).await;
    let (tx, rx) = oneshot::channel();
    handle
        .send(SessionCommand::UserMessage {
            text: request.text,
            phone_number: request.phone_number,
            call_session_id: request.call_session_id,
            reply: Some(tx),
        })
        .await;

    let receipt = rx.await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(MessageResponse {
        reply: receipt.reply,
        turn_id: receipt.turn_id,
        message_id: receipt.message_id,
    }))
}

async fn reset_session(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let handle = app.registry.handle(&session_id).await;
    let (tx, rx) = oneshot::channel();
    handle.send(SessionCommand::Reset { done: Some(tx) }).await;
    rx.await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({"sessionId": session_id, "status": "reset"})))
}
