//! Turn lifecycle: created, acknowledged at most once, terminated by exactly
//! one final or error event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use frontdesk_agent::llm::{ChatMessage, ProposedCall};
use frontdesk_agent::runtime::{TurnEngine, TurnObserver};
use frontdesk_core::config::SessionConfig;
use frontdesk_core::domain::session::{SessionState, Turn};
use frontdesk_core::events::{EventDraft, EventRole, EventType};
use frontdesk_core::store::SessionStore;

use crate::session::SessionShared;

const ACK_TEXT: &str = "Working on that, one moment.";
const APOLOGY_TEXT: &str =
    "Sorry, something went wrong on my end. Could you say that again?";

#[derive(Clone, Debug)]
pub struct TurnReceipt {
    pub reply: String,
    pub turn_id: u64,
    pub message_id: Uuid,
}

/// Emits the single acknowledgement a turn is allowed, whether the trigger
/// is the first tool invocation or the fallback timer. The flag makes the
/// two racers idempotent.
struct AckEmitter {
    shared: Arc<SessionShared>,
    acked: AtomicBool,
    turn_id: u64,
    message_id: Uuid,
}

impl AckEmitter {
    fn acknowledge(&self, trigger: &'static str) {
        if self.acked.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(
            event_name = "turn.acknowledged",
            session_id = %self.shared.session_id,
            turn_id = self.turn_id,
            trigger,
        );
        self.shared.bus.emit(
            EventType::Status,
            EventDraft::text(ACK_TEXT).with_turn(self.turn_id, self.message_id),
        );
    }
}

impl TurnObserver for AckEmitter {
    fn tool_execution_started(&self, calls: &[ProposedCall]) {
        self.acknowledge("tool_execution");
        let names: Vec<&str> = calls.iter().map(|call| call.name.as_str()).collect();
        self.shared.bus.emit(
            EventType::ToolCall,
            EventDraft::default()
                .with_data(json!({"tools": names}))
                .with_turn(self.turn_id, self.message_id)
                .with_role(EventRole::System),
        );
    }
}

/// Drives one session's turns in sequence. Owned by the session actor, so
/// everything here is single-threaded per session.
pub struct TurnController {
    config: SessionConfig,
    next_turn_id: u64,
    history: VecDeque<ChatMessage>,
}

impl TurnController {
    pub fn new(config: SessionConfig) -> Self {
        Self { config, next_turn_id: 1, history: VecDeque::new() }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.next_turn_id = 1;
    }

    fn push_history(&mut self, message: ChatMessage) {
        self.history.push_back(message);
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
    }

    /// One user message in, exactly one terminal event out.
    pub async fn run_user_turn(
        &mut self,
        shared: &Arc<SessionShared>,
        engine: &TurnEngine,
        store: &dyn SessionStore,
        state: &mut SessionState,
        text: String,
    ) -> TurnReceipt {
        let turn = Turn::new(self.next_turn_id);
        self.next_turn_id += 1;

        tracing::info!(
            event_name = "turn.created",
            session_id = %shared.session_id,
            turn_id = turn.turn_id,
            correlation_id = %turn.message_id,
        );

        self.push_history(ChatMessage::user(text));

        let ack = Arc::new(AckEmitter {
            shared: shared.clone(),
            acked: AtomicBool::new(false),
            turn_id: turn.turn_id,
            message_id: turn.message_id,
        });
        let timer = {
            let ack = ack.clone();
            let delay = Duration::from_millis(self.config.fallback_timeout_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                ack.acknowledge("fallback_timer");
            })
        };

        let history: Vec<ChatMessage> = self.history.iter().cloned().collect();
        let result = engine.run_turn(state.clone(), history, ack.as_ref()).await;
        timer.abort();

        let reply = match result {
            Ok(outcome) => {
                *state = outcome.state;
                outcome.reply
            }
            Err(error) => {
                tracing::error!(
                    event_name = "turn.errored",
                    session_id = %shared.session_id,
                    turn_id = turn.turn_id,
                    error = %error,
                );
                state.touch();
                let event = EventDraft::text(APOLOGY_TEXT)
                    .with_turn(turn.turn_id, turn.message_id)
                    .with_correlation_id(turn.message_id.to_string());
                shared.bus.emit(EventType::Error, event);
                return TurnReceipt {
                    reply: APOLOGY_TEXT.to_owned(),
                    turn_id: turn.turn_id,
                    message_id: turn.message_id,
                };
            }
        };

        self.push_history(ChatMessage::assistant(reply.clone()));
        if let Err(error) = store.save(&shared.session_id, state).await {
            // Persistence trouble must not cost the caller their reply.
            tracing::error!(
                event_name = "turn.persist_failed",
                session_id = %shared.session_id,
                turn_id = turn.turn_id,
                error = %error,
            );
        }

        shared.set_speaking(true);
        shared.bus.emit(
            EventType::Final,
            EventDraft::text(reply.clone())
                .with_turn(turn.turn_id, turn.message_id)
                .with_correlation_id(turn.message_id.to_string()),
        );
        tracing::info!(
            event_name = "turn.completed",
            session_id = %shared.session_id,
            turn_id = turn.turn_id,
            correlation_id = %turn.message_id,
        );

        TurnReceipt { reply, turn_id: turn.turn_id, message_id: turn.message_id }
    }
}
