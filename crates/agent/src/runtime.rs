//! The turn engine: a bounded propose/execute/merge loop per user message.

use std::sync::Arc;

use thiserror::Error;

use frontdesk_core::domain::session::SessionState;
use frontdesk_core::gating::available_tools;

use crate::executor::{execute_calls, merge_state_updates, ToolOutcome};
use crate::llm::{ChatMessage, ModelClient, ModelError, ModelTurn, ProposedCall};
use crate::narration::{aggregate_reply, results_digest};
use crate::tools::{ToolContext, ToolRegistry};

const SYSTEM_PROMPT: &str = "\
You are the phone assistant for a home services company. Be brief, warm, and \
concrete. Before sharing any account details you must verify the caller: look \
up their account, then check the ZIP code on file with verify_account. When a \
tool presents numbered options, ask the caller to pick one and resolve their \
answer against those options. Confirm before cancelling or moving an \
appointment; if the caller declines or changes their mind, call abort_workflow \
instead of leaving the flow open. If you cannot help, offer to escalate to a \
human.";

/// Hook for the orchestrating layer; fires when tool execution begins, which
/// is the moment a turn counts as acknowledged.
pub trait TurnObserver: Send + Sync {
    fn tool_execution_started(&self, calls: &[ProposedCall]);
}

pub struct NoopObserver;

impl TurnObserver for NoopObserver {
    fn tool_execution_started(&self, _calls: &[ProposedCall]) {}
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub state: SessionState,
}

/// Only orchestration-level failure surfaces here; individual tool failures
/// are absorbed into outcomes and narrated.
#[derive(Debug, Error)]
pub enum TurnEngineError {
    #[error("model failed before the turn made any progress: {0}")]
    Model(#[from] ModelError),
    #[error("turn ended without a reply or any tool outcomes")]
    EmptyTurn,
}

pub struct TurnEngine {
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    max_tool_iterations: u32,
    max_zip_attempts: u32,
}

impl TurnEngine {
    pub fn new(
        model: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        max_tool_iterations: u32,
        max_zip_attempts: u32,
    ) -> Self {
        Self { model, registry, max_tool_iterations: max_tool_iterations.max(1), max_zip_attempts }
    }

    /// Drive one turn to a reply. The returned state carries every merged
    /// tool patch; the caller persists it once.
    pub async fn run_turn(
        &self,
        mut state: SessionState,
        history: Vec<ChatMessage>,
        observer: &dyn TurnObserver,
    ) -> Result<TurnOutcome, TurnEngineError> {
        let mut messages = history;
        let mut last_outcomes: Vec<ToolOutcome> = Vec::new();

        for iteration in 0..self.max_tool_iterations {
            let tools = self.registry.descriptors_for(&available_tools(&state));
            let turn = match self.model.next_turn(SYSTEM_PROMPT, &messages, &tools).await {
                Ok(turn) => turn,
                Err(error) if iteration == 0 => return Err(error.into()),
                Err(error) => {
                    // Progress was made; fall back to narrating it rather
                    // than erroring the whole turn.
                    tracing::warn!(
                        event_name = "turn.model_failed_midway",
                        iteration,
                        error = %error,
                    );
                    break;
                }
            };

            match turn {
                ModelTurn::Reply(reply) => return Ok(TurnOutcome { reply, state }),
                ModelTurn::ToolCalls(calls) => {
                    tracing::debug!(
                        event_name = "turn.tool_calls_proposed",
                        iteration,
                        count = calls.len(),
                    );
                    observer.tool_execution_started(&calls);

                    let ctx =
                        ToolContext { state: state.clone(), max_zip_attempts: self.max_zip_attempts };
                    let outcomes = execute_calls(&self.registry, &ctx, calls).await;
                    state.apply_updates(merge_state_updates(&outcomes));
                    messages.push(ChatMessage::user(results_digest(&outcomes)));
                    last_outcomes = outcomes;
                }
            }
        }

        if last_outcomes.is_empty() {
            return Err(TurnEngineError::EmptyTurn);
        }
        tracing::debug!(event_name = "turn.finalized_from_narration");
        Ok(TurnOutcome { reply: aggregate_reply(&last_outcomes), state })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    use frontdesk_core::domain::session::SessionState;
    use frontdesk_crm::InMemoryCrm;

    use super::{NoopObserver, TurnEngine, TurnEngineError, TurnObserver};
    use crate::llm::{
        ChatMessage, ChatRole, ModelClient, ModelError, ModelTurn, ProposedCall, ToolDescriptor,
    };
    use crate::tools::ToolRegistry;

    /// Plays back a fixed script of model turns, recording what it was shown.
    struct ScriptedModelClient {
        script: Mutex<VecDeque<Result<ModelTurn, ModelError>>>,
        offered_tools: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedModelClient {
        fn new(turns: Vec<Result<ModelTurn, ModelError>>) -> Self {
            Self {
                script: Mutex::new(turns.into()),
                offered_tools: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModelClient {
        async fn next_turn(
            &self,
            _system_prompt: &str,
            _history: &[ChatMessage],
            tools: &[ToolDescriptor],
        ) -> Result<ModelTurn, ModelError> {
            self.offered_tools
                .lock()
                .await
                .push(tools.iter().map(|tool| tool.name.clone()).collect());
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or(Err(ModelError::MalformedResponse("script exhausted".into())))
        }
    }

    struct CountingObserver {
        fired: AtomicUsize,
    }

    impl TurnObserver for CountingObserver {
        fn tool_execution_started(&self, _calls: &[ProposedCall]) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn engine(turns: Vec<Result<ModelTurn, ModelError>>) -> (TurnEngine, Arc<ScriptedModelClient>) {
        let model = Arc::new(ScriptedModelClient::new(turns));
        let registry = Arc::new(ToolRegistry::standard(Arc::new(InMemoryCrm::with_fixtures())));
        (TurnEngine::new(model.clone(), registry, 4, 3), model)
    }

    fn verify_call(zip: &str) -> ProposedCall {
        ProposedCall {
            name: "verify_account".to_owned(),
            arguments: json!({"customer_id": "c1", "zip": zip}),
        }
    }

    #[tokio::test]
    async fn plain_reply_finishes_the_turn_immediately() {
        let (engine, _) = engine(vec![Ok(ModelTurn::Reply("Hi there!".to_owned()))]);
        let outcome = engine
            .run_turn(SessionState::default(), vec![ChatMessage::user("hello")], &NoopObserver)
            .await
            .expect("turn succeeds");
        assert_eq!(outcome.reply, "Hi there!");
    }

    #[tokio::test]
    async fn tool_loop_merges_state_and_feeds_results_back() {
        let (engine, model) = engine(vec![
            Ok(ModelTurn::ToolCalls(vec![verify_call("78704")])),
            Ok(ModelTurn::Reply("You're verified! How can I help?".to_owned())),
        ]);
        let observer = CountingObserver { fired: AtomicUsize::new(0) };

        let outcome = engine
            .run_turn(SessionState::default(), vec![ChatMessage::user("my zip is 78704")], &observer)
            .await
            .expect("turn succeeds");

        assert!(outcome.reply.contains("verified"));
        assert!(outcome.state.is_verified(), "merged patch must land in the returned state");
        assert_eq!(observer.fired.load(Ordering::SeqCst), 1);

        // The second model exchange sees the widened tool set.
        let offered = model.offered_tools.lock().await;
        assert!(offered[1].len() > offered[0].len());
        assert!(offered[1].contains(&"list_upcoming_appointments".to_owned()));
    }

    #[tokio::test]
    async fn iteration_bound_finalizes_with_aggregate_narration() {
        // The script keeps proposing tool calls and never replies.
        let (engine, _) = engine(vec![
            Ok(ModelTurn::ToolCalls(vec![verify_call("00000")])),
            Ok(ModelTurn::ToolCalls(vec![verify_call("00001")])),
            Ok(ModelTurn::ToolCalls(vec![verify_call("00002")])),
            Ok(ModelTurn::ToolCalls(vec![verify_call("00003")])),
            Ok(ModelTurn::Reply("never reached".to_owned())),
        ]);

        let outcome = engine
            .run_turn(SessionState::default(), vec![ChatMessage::user("verify me")], &NoopObserver)
            .await
            .expect("turn finalizes from narration");
        assert_ne!(outcome.reply, "never reached");
        assert!(outcome.reply.contains("ZIP"));
    }

    #[tokio::test]
    async fn model_failure_on_the_first_exchange_is_an_error() {
        let (engine, _) =
            engine(vec![Err(ModelError::MalformedResponse("bad payload".into()))]);
        let error = engine
            .run_turn(SessionState::default(), vec![ChatMessage::user("hello")], &NoopObserver)
            .await
            .expect_err("nothing to fall back on");
        assert!(matches!(error, TurnEngineError::Model(_)));
    }

    #[tokio::test]
    async fn model_failure_after_progress_narrates_instead_of_erroring() {
        let (engine, _) = engine(vec![
            Ok(ModelTurn::ToolCalls(vec![verify_call("78704")])),
            Err(ModelError::MalformedResponse("bad payload".into())),
        ]);

        let outcome = engine
            .run_turn(SessionState::default(), vec![ChatMessage::user("my zip is 78704")], &NoopObserver)
            .await
            .expect("falls back to narration");
        assert!(outcome.reply.contains("verified"));
        assert!(outcome.state.is_verified());
    }

    #[tokio::test]
    async fn history_roles_are_preserved() {
        let (engine, _) = engine(vec![Ok(ModelTurn::Reply("ok".to_owned()))]);
        let history = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("second"),
        ];
        assert_eq!(history[1].role, ChatRole::Assistant);
        engine
            .run_turn(SessionState::default(), history, &NoopObserver)
            .await
            .expect("turn succeeds");
    }
}
