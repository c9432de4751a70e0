//! Session actors and the registry that owns them.
//!
//! One tokio task per conversation id is the sole writer of that session's
//! state; every mutation arrives through its mailbox and runs to completion
//! before the next one starts. Barge-in and resync deliberately bypass the
//! mailbox: they touch only the shared speaking flag and the event bus, so
//! an in-flight turn can never delay them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;

use frontdesk_agent::runtime::TurnEngine;
use frontdesk_core::config::SessionConfig;
use frontdesk_core::domain::session::SessionState;
use frontdesk_core::events::{EventDraft, EventRole, EventType};
use frontdesk_core::store::SessionStore;

use crate::events::EventBus;
use crate::turn::{TurnController, TurnReceipt};

/// The slice of a session that lives outside the actor: the event bus, the
/// speaking flag, and barge-in debounce state.
pub struct SessionShared {
    pub session_id: String,
    pub bus: EventBus,
    speaking: AtomicBool,
    last_barge_in: std::sync::Mutex<Option<Instant>>,
}

impl SessionShared {
    pub fn new(session_id: String, event_buffer_capacity: usize) -> Self {
        Self {
            session_id,
            bus: EventBus::new(event_buffer_capacity),
            speaking: AtomicBool::new(false),
            last_barge_in: std::sync::Mutex::new(None),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    /// The human started talking over the agent. Clears the speaking flag
    /// and emits one `speaking` event; repeats inside the debounce window
    /// are dropped without a trace on the bus. Never touches the in-flight
    /// turn, whose final event still delivers.
    pub fn barge_in(&self, debounce: Duration) -> bool {
        {
            let mut last = self.last_barge_in.lock().expect("barge-in lock poisoned");
            let now = Instant::now();
            if last.is_some_and(|previous| now.duration_since(previous) < debounce) {
                tracing::debug!(
                    event_name = "session.barge_in_debounced",
                    session_id = %self.session_id,
                );
                return false;
            }
            *last = Some(now);
        }

        self.set_speaking(false);
        self.bus.emit(
            EventType::Speaking,
            EventDraft::default()
                .with_data(json!({"speaking": false, "reason": "barge_in"}))
                .with_role(EventRole::System),
        );
        tracing::info!(event_name = "session.barge_in", session_id = %self.session_id);
        true
    }
}

pub enum SessionCommand {
    UserMessage {
        text: String,
        phone_number: Option<String>,
        call_session_id: Option<String>,
        reply: Option<oneshot::Sender<TurnReceipt>>,
    },
    Reset {
        done: Option<oneshot::Sender<()>>,
    },
    StateDump {
        reply: oneshot::Sender<SessionState>,
    },
}

#[derive(Clone)]
pub struct SessionHandle {
    pub shared: Arc<SessionShared>,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::error!(
                event_name = "session.mailbox_closed",
                session_id = %self.shared.session_id,
            );
        }
    }
}

/// Everything an actor needs beyond its own state.
pub struct SessionDeps {
    pub store: Arc<dyn SessionStore>,
    pub engine: Arc<TurnEngine>,
    pub config: SessionConfig,
}

pub struct SessionRegistry {
    deps: Arc<SessionDeps>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(deps: Arc<SessionDeps>) -> Self {
        Self { deps, sessions: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.deps.config
    }

    /// The handle for a conversation id, spawning its actor on first use.
    pub async fn handle(&self, session_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(session_id) {
            return handle.clone();
        }

        let shared = Arc::new(SessionShared::new(
            session_id.to_owned(),
            self.deps.config.event_buffer_capacity,
        ));
        let (tx, rx) = mpsc::channel(32);
        let handle = SessionHandle { shared: shared.clone(), commands: tx };
        sessions.insert(session_id.to_owned(), handle.clone());

        tokio::spawn(run_actor(shared, self.deps.clone(), rx));
        tracing::info!(event_name = "session.created", session_id);
        handle
    }

    /// The handle only if the session already exists; debug surfaces use
    /// this to avoid creating sessions as a side effect of inspection.
    pub async fn existing(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(session_id).cloned()
    }
}

async fn run_actor(
    shared: Arc<SessionShared>,
    deps: Arc<SessionDeps>,
    mut mailbox: mpsc::Receiver<SessionCommand>,
) {
    let mut state = match deps.store.load(&shared.session_id).await {
        Ok(Some(state)) => state,
        Ok(None) => SessionState::default(),
        Err(error) => {
            tracing::error!(
                event_name = "session.load_failed",
                session_id = %shared.session_id,
                error = %error,
            );
            SessionState::default()
        }
    };
    let mut controller = TurnController::new(deps.config.clone());

    // Messages that arrive mid-turn wait here, in order, and run strictly
    // after the active turn completes.
    while let Some(command) = mailbox.recv().await {
        match command {
            SessionCommand::UserMessage { text, phone_number, call_session_id, reply } => {
                if let Some(phone_number) = phone_number {
                    state.phone_number = Some(phone_number);
                }
                if let Some(call_session_id) = call_session_id {
                    state.call_session_id = Some(call_session_id);
                }

                let receipt = controller
                    .run_user_turn(&shared, &deps.engine, deps.store.as_ref(), &mut state, text)
                    .await;
                if let Some(reply) = reply {
                    let _ = reply.send(receipt);
                }
            }
            SessionCommand::Reset { done } => {
                state.reset();
                controller.reset();
                if let Err(error) = deps.store.save(&shared.session_id, &state).await {
                    tracing::error!(
                        event_name = "session.reset_persist_failed",
                        session_id = %shared.session_id,
                        error = %error,
                    );
                }
                tracing::info!(event_name = "session.reset", session_id = %shared.session_id);
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            SessionCommand::StateDump { reply } => {
                let _ = reply.send(state.clone());
            }
        }
    }
}
