//! WebSocket surface: one connection subscribes to a session's event stream
//! and feeds user input into it.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::bootstrap::AppState;
use crate::events::ConnectionId;
use crate::session::{SessionCommand, SessionHandle};

pub async fn upgrade(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, app, session_id))
}

async fn handle_socket(socket: WebSocket, app: AppState, session_id: String) {
    let handle = app.registry.handle(&session_id).await;
    let (sender, mut outbound) = mpsc::unbounded_channel::<String>();
    let connection_id = handle.shared.bus.register(sender.clone());
    tracing::info!(
        event_name = "ws.connected",
        session_id = %session_id,
        connection_id = %connection_id,
    );

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(raw)) => {
                handle_frame(&app, &handle, connection_id, &sender, raw.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Binary and ping/pong frames carry no protocol meaning here.
            }
            Err(error) => {
                tracing::debug!(
                    event_name = "ws.transport_error",
                    session_id = %session_id,
                    error = %error,
                );
                break;
            }
        }
    }

    handle.shared.bus.unregister(connection_id);
    writer.abort();
    tracing::info!(
        event_name = "ws.disconnected",
        session_id = %session_id,
        connection_id = %connection_id,
    );
}

/// One inbound text frame. Malformed frames are logged and dropped; the
/// protocol never answers garbage with an error frame.
pub(crate) async fn handle_frame(
    app: &AppState,
    handle: &SessionHandle,
    connection_id: ConnectionId,
    sender: &mpsc::UnboundedSender<String>,
    raw: &str,
) {
    let frame: Value = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::debug!(
                event_name = "ws.malformed_frame",
                session_id = %handle.shared.session_id,
                error = %error,
            );
            return;
        }
    };

    match frame.get("type").and_then(Value::as_str) {
        Some("message") | Some("final_transcript") => {
            let Some(text) = frame.get("text").and_then(Value::as_str) else {
                tracing::debug!(
                    event_name = "ws.malformed_frame",
                    session_id = %handle.shared.session_id,
                    reason = "missing text",
                );
                return;
            };
            handle
                .send(SessionCommand::UserMessage {
                    text: text.to_owned(),
                    phone_number: frame
                        .get("phoneNumber")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    call_session_id: frame
                        .get("callSessionId")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    reply: None,
                })
                .await;
        }
        Some("barge_in") => {
            let debounce =
                std::time::Duration::from_millis(app.registry.config().barge_in_debounce_ms);
            handle.shared.barge_in(debounce);
        }
        Some("resync") => {
            let last_event_id = frame.get("lastEventId").and_then(Value::as_u64);
            let (events, gap) = handle.shared.bus.events_since(last_event_id);
            // Answered out of band on this connection only; the broadcast
            // counter is not consumed.
            let payload = json!({
                "type": "resync",
                "role": "system",
                "data": {
                    "events": events,
                    "gap": gap,
                    "lastEventId": handle.shared.bus.last_event_id(),
                },
            });
            tracing::debug!(
                event_name = "ws.resync",
                session_id = %handle.shared.session_id,
                connection_id = %connection_id,
                gap,
            );
            let _ = sender.send(payload.to_string());
        }
        other => {
            tracing::debug!(
                event_name = "ws.malformed_frame",
                session_id = %handle.shared.session_id,
                frame_type = other.unwrap_or("missing"),
            );
        }
    }
}
