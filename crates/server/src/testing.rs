//! Shared test doubles for the server crate.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use frontdesk_agent::llm::{ChatMessage, ModelClient, ModelError, ModelTurn, ToolDescriptor};

/// Plays back a fixed script of model turns; optionally simulates a slow
/// model for timer tests.
pub(crate) struct ScriptedModel {
    script: Mutex<Vec<Result<ModelTurn, ModelError>>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub(crate) fn new(turns: Vec<Result<ModelTurn, ModelError>>) -> Self {
        Self { script: Mutex::new(turns), delay: None }
    }

    pub(crate) fn slow(turns: Vec<Result<ModelTurn, ModelError>>, delay: Duration) -> Self {
        Self { script: Mutex::new(turns), delay: Some(delay) }
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn next_turn(
        &self,
        _system_prompt: &str,
        _history: &[ChatMessage],
        _tools: &[ToolDescriptor],
    ) -> Result<ModelTurn, ModelError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock().await;
        if script.is_empty() {
            Err(ModelError::MalformedResponse("script exhausted".into()))
        } else {
            script.remove(0)
        }
    }
}
