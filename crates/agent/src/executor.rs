//! Parallel tool execution with per-call error absorption.
//!
//! A turn's tool calls run concurrently; a failing or panicking handler
//! becomes a structured error outcome and never aborts its siblings. The
//! combined state patch is produced once, after every call has settled.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinSet;

use frontdesk_core::gating::{available_tools, ToolName};

use crate::llm::ProposedCall;
use crate::tools::{HandlerError, ToolContext, ToolRegistry};

/// Result of one proposed call, successful or not. `fallback` always carries
/// something safe to say about this call.
#[derive(Clone, Debug)]
pub struct ToolOutcome {
    pub tool_name: String,
    pub ok: bool,
    pub result: Value,
    pub summary: Option<String>,
    pub state_updates: Option<Map<String, Value>>,
    pub fallback: String,
}

impl ToolOutcome {
    fn rejected(tool_name: impl Into<String>, reason: String, fallback: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            ok: false,
            result: serde_json::json!({"error": reason}),
            summary: None,
            state_updates: None,
            fallback: fallback.into(),
        }
    }
}

/// Run every proposed call, concurrently, and return outcomes in proposal
/// order. Never fails as a whole.
pub async fn execute_calls(
    registry: &Arc<ToolRegistry>,
    ctx: &ToolContext,
    calls: Vec<ProposedCall>,
) -> Vec<ToolOutcome> {
    let allowed = available_tools(&ctx.state);
    let mut outcomes: Vec<Option<ToolOutcome>> = Vec::with_capacity(calls.len());
    let mut running = JoinSet::new();
    // Task id to (slot, name, fallback), so even a panicked call can be
    // attributed to its own slot.
    let mut spawned: HashMap<tokio::task::Id, (usize, ToolName, &'static str)> = HashMap::new();

    for (index, call) in calls.into_iter().enumerate() {
        outcomes.push(None);

        let name = match ToolName::from_str(&call.name) {
            Ok(name) => name,
            Err(error) => {
                tracing::warn!(event_name = "tool.unknown", tool = %call.name);
                outcomes[index] = Some(ToolOutcome::rejected(
                    call.name,
                    error.to_string(),
                    "I can't help with that particular request.",
                ));
                continue;
            }
        };

        let registered = match registry.get(name) {
            Some(registered) => registered,
            None => {
                // ensure_complete() makes this unreachable in a running
                // service, but a partial test registry still gets an answer.
                outcomes[index] = Some(ToolOutcome::rejected(
                    name.as_str(),
                    "tool is not registered".to_owned(),
                    "I can't help with that particular request.",
                ));
                continue;
            }
        };

        if !allowed.contains(&name) {
            tracing::warn!(event_name = "tool.gated", tool = %name);
            outcomes[index] = Some(ToolOutcome::rejected(
                name.as_str(),
                "tool is not available in the current session state".to_owned(),
                "I need to verify your account before I can do that.",
            ));
            continue;
        }

        if let Err(error) = ToolRegistry::validate_arguments(&registered.spec, &call.arguments) {
            outcomes[index] = Some(ToolOutcome::rejected(
                name.as_str(),
                error.to_string(),
                "I'm missing a detail I need for that; could you give me a bit more?",
            ));
            continue;
        }

        let handler = registered.handler.clone();
        let fallback = registered.spec.fallback;
        let call_ctx = ctx.clone();
        let handle = running.spawn(async move {
            let outcome = match handler.execute(&call_ctx, call.arguments).await {
                Ok(raw) => ToolOutcome {
                    tool_name: name.as_str().to_owned(),
                    ok: true,
                    result: raw.result,
                    summary: raw.summary,
                    state_updates: raw.state_updates,
                    fallback: fallback.to_owned(),
                },
                Err(error) => {
                    tracing::warn!(event_name = "tool.failed", tool = %name, error = %error);
                    let fallback_text = match &error {
                        HandlerError::InvalidArguments(_) => {
                            "I'm missing a detail I need for that; could you give me a bit \
                             more?"
                                .to_owned()
                        }
                        HandlerError::Crm(_) => fallback.to_owned(),
                    };
                    ToolOutcome::rejected(name.as_str(), error.to_string(), fallback_text)
                }
            };
            outcome
        });
        spawned.insert(handle.id(), (index, name, fallback));
    }

    while let Some(joined) = running.join_next_with_id().await {
        match joined {
            Ok((task_id, outcome)) => {
                if let Some((index, _, _)) = spawned.get(&task_id) {
                    outcomes[*index] = Some(outcome);
                }
            }
            Err(join_error) => {
                // A panicking handler is isolated to its own slot; its
                // siblings still settle normally.
                if let Some((index, name, fallback)) = spawned.get(&join_error.id()) {
                    tracing::error!(
                        event_name = "tool.panicked",
                        tool = %name,
                        error = %join_error,
                    );
                    outcomes[*index] = Some(ToolOutcome::rejected(
                        name.as_str(),
                        join_error.to_string(),
                        *fallback,
                    ));
                }
            }
        }
    }

    outcomes.into_iter().flatten().collect()
}

/// Fold every outcome's state patch into one, last writer wins per key. The
/// caller applies the merged patch to session state exactly once.
pub fn merge_state_updates(outcomes: &[ToolOutcome]) -> Map<String, Value> {
    let mut merged = Map::new();
    for outcome in outcomes {
        if let Some(updates) = &outcome.state_updates {
            for (key, value) in updates {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use frontdesk_core::domain::session::SessionState;
    use frontdesk_core::gating::ToolName;
    use frontdesk_crm::InMemoryCrm;

    use super::{execute_calls, merge_state_updates, ToolOutcome};
    use crate::llm::ProposedCall;
    use crate::tools::{
        HandlerError, ToolContext, ToolHandler, ToolRawResult, ToolRegistry, ToolSpec,
    };

    fn ctx() -> ToolContext {
        ToolContext { state: SessionState::default(), max_zip_attempts: 3 }
    }

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::standard(Arc::new(InMemoryCrm::with_fixtures())))
    }

    #[tokio::test]
    async fn unknown_tool_becomes_an_error_outcome() {
        let outcomes = execute_calls(
            &registry(),
            &ctx(),
            vec![ProposedCall { name: "launch_rocket".to_owned(), arguments: json!({}) }],
        )
        .await;

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].ok);
        assert!(!outcomes[0].fallback.is_empty());
    }

    #[tokio::test]
    async fn gated_tool_is_rejected_for_unverified_sessions() {
        let outcomes = execute_calls(
            &registry(),
            &ctx(),
            vec![ProposedCall {
                name: "list_upcoming_appointments".to_owned(),
                arguments: json!({"customer_id": "c1"}),
            }],
        )
        .await;

        assert!(!outcomes[0].ok);
        assert!(outcomes[0].fallback.contains("verify"));
    }

    #[tokio::test]
    async fn one_failing_call_does_not_poison_its_siblings() {
        let outcomes = execute_calls(
            &registry(),
            &ctx(),
            vec![
                ProposedCall {
                    name: ToolName::VerifyAccount.as_str().to_owned(),
                    // Missing `zip`: schema validation rejects it.
                    arguments: json!({"customer_id": "c1"}),
                },
                ProposedCall {
                    name: ToolName::LookupCustomerByPhone.as_str().to_owned(),
                    arguments: json!({"phone": "+15550001111"}),
                },
            ],
        )
        .await;

        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].ok);
        assert!(outcomes[1].ok, "sibling call must still run: {:?}", outcomes[1]);
        assert_eq!(outcomes[1].result["found"], json!(true));
    }

    #[tokio::test]
    async fn outcomes_come_back_in_proposal_order() {
        let calls: Vec<ProposedCall> = ["+15550001111", "+15550002222"]
            .into_iter()
            .map(|phone| ProposedCall {
                name: ToolName::LookupCustomerByPhone.as_str().to_owned(),
                arguments: json!({"phone": phone}),
            })
            .collect();

        let outcomes = execute_calls(&registry(), &ctx(), calls).await;
        assert_eq!(outcomes[0].result["customer_id"], json!("c1"));
        assert_eq!(outcomes[1].result["customer_id"], json!("c2"));
    }

    struct SlowOk;

    #[async_trait]
    impl ToolHandler for SlowOk {
        async fn execute(
            &self,
            _ctx: &ToolContext,
            _args: Value,
        ) -> Result<ToolRawResult, HandlerError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(ToolRawResult::new(json!({"ok": true})))
        }
    }

    struct Panics;

    #[async_trait]
    impl ToolHandler for Panics {
        async fn execute(
            &self,
            _ctx: &ToolContext,
            _args: Value,
        ) -> Result<ToolRawResult, HandlerError> {
            panic!("handler blew up");
        }
    }

    fn open_spec(name: ToolName, fallback: &'static str) -> ToolSpec {
        ToolSpec {
            name,
            description: "test",
            parameters: json!({"type": "object", "properties": {}, "required": []}),
            fallback,
        }
    }

    #[tokio::test]
    async fn panicking_handler_keeps_its_slot_and_its_fallback() {
        let mut registry = ToolRegistry::default();
        registry.register(open_spec(ToolName::GetServicePolicy, "policy fallback"), SlowOk);
        registry.register(open_spec(ToolName::Escalate, "escalate fallback"), Panics);
        let registry = Arc::new(registry);

        let outcomes = execute_calls(
            &registry,
            &ctx(),
            vec![
                ProposedCall {
                    name: ToolName::GetServicePolicy.as_str().to_owned(),
                    arguments: json!({}),
                },
                ProposedCall {
                    name: ToolName::Escalate.as_str().to_owned(),
                    arguments: json!({}),
                },
            ],
        )
        .await;

        assert_eq!(outcomes.len(), 2, "one outcome per proposed call");
        assert!(outcomes[0].ok, "the slow sibling still settles normally");
        assert!(!outcomes[1].ok);
        assert_eq!(outcomes[1].tool_name, "escalate");
        assert_eq!(outcomes[1].fallback, "escalate fallback");
    }

    #[test]
    fn merge_is_last_writer_wins_per_key() {
        let first = ToolOutcome {
            tool_name: "a".to_owned(),
            ok: true,
            result: Value::Null,
            summary: None,
            state_updates: Some(
                [
                    ("shared".to_owned(), json!(1)),
                    ("first_only".to_owned(), json!("x")),
                ]
                .into_iter()
                .collect(),
            ),
            fallback: String::new(),
        };
        let second = ToolOutcome {
            state_updates: Some([("shared".to_owned(), json!(2))].into_iter().collect()),
            ..first.clone()
        };

        let merged = merge_state_updates(&[first, second]);
        assert_eq!(merged.get("shared"), Some(&json!(2)));
        assert_eq!(merged.get("first_only"), Some(&json!("x")));
    }
}
