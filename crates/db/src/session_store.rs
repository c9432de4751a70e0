use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use frontdesk_core::domain::session::SessionState;
use frontdesk_core::store::{SessionStore, StoreError};

use crate::DbPool;

/// One row per conversation; the whole [`SessionState`] is stored as a JSON
/// blob. Writes for a given session are already serialized by the owning
/// session actor, so plain upserts suffice.
pub struct SqliteSessionStore {
    pool: DbPool,
}

impl SqliteSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        let row = sqlx::query("SELECT state FROM session_state WHERE session_id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::Backend(error.to_string()))?;

        match row {
            Some(row) => {
                let raw: String = row.get("state");
                let state = serde_json::from_str(&raw).map_err(StoreError::Deserialize)?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        let raw = serde_json::to_string(state).map_err(StoreError::Serialize)?;
        sqlx::query(
            "INSERT INTO session_state (session_id, state, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (session_id) DO UPDATE SET
                 state = excluded.state,
                 updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::Backend(error.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use frontdesk_core::domain::session::{SessionState, VERIFICATION_KEY};
    use frontdesk_core::store::SessionStore;

    use super::SqliteSessionStore;
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqliteSessionStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30, 5_000).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        SqliteSessionStore::new(pool)
    }

    #[tokio::test]
    async fn missing_session_loads_as_none() {
        let store = store().await;
        assert!(store.load("conv-1").await.expect("load succeeds").is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_state() {
        let store = store().await;
        let mut state = SessionState::default();
        state.phone_number = Some("+15550001111".to_owned());
        state.apply_updates(
            [(
                VERIFICATION_KEY.to_owned(),
                json!({"verified": true, "customer_id": "c1", "zip_attempts": 2}),
            )]
            .into_iter()
            .collect(),
        );

        store.save("conv-1", &state).await.expect("save succeeds");
        let loaded = store.load("conv-1").await.expect("load succeeds").expect("present");
        assert_eq!(loaded, state);
        assert!(loaded.is_verified());
    }

    #[tokio::test]
    async fn saving_twice_upserts_the_row() {
        let store = store().await;
        let mut state = SessionState::default();
        store.save("conv-1", &state).await.expect("first save");

        state.apply_updates([("note".to_owned(), json!("updated"))].into_iter().collect());
        store.save("conv-1", &state).await.expect("second save");

        let loaded = store.load("conv-1").await.expect("load succeeds").expect("present");
        assert_eq!(loaded.domain_state.get("note"), Some(&json!("updated")));
    }
}
