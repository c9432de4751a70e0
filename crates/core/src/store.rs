use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::session::SessionState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session state could not be serialized: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("session state could not be deserialized: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Durable per-session persistence. The store is opaque to the orchestrator
/// beyond load/save of one state record; serialization of writes for a given
/// session is the session actor's job, not the store's.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError>;
    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError>;
}

/// Default in-process store; also the test double of choice.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        self.sessions.lock().await.insert(session_id.to_owned(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{InMemorySessionStore, SessionStore};
    use crate::domain::session::SessionState;

    #[tokio::test]
    async fn missing_session_loads_as_none() {
        let store = InMemorySessionStore::new();
        assert!(store.load("conv-1").await.expect("load succeeds").is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_state() {
        let store = InMemorySessionStore::new();
        let mut state = SessionState::default();
        state.phone_number = Some("+15550001111".to_owned());
        state.apply_updates([("k".to_owned(), json!({"v": 1}))].into_iter().collect());

        store.save("conv-1", &state).await.expect("save succeeds");
        let loaded = store.load("conv-1").await.expect("load succeeds").expect("present");
        assert_eq!(loaded, state);
    }
}
