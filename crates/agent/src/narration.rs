//! Turning a batch of tool outcomes into one voice.
//!
//! However many tools ran in parallel, the caller hears a single unified
//! reply, never one sentence per tool call stitched together by the client.

use serde_json::{json, Value};

use crate::executor::ToolOutcome;

/// One reply covering every outcome. Successful outcomes contribute their
/// summaries; failed ones contribute their fallbacks. Used verbatim when the
/// model cannot produce a final reply itself.
pub fn aggregate_reply(outcomes: &[ToolOutcome]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let part = if outcome.ok {
            outcome.summary.clone().unwrap_or_else(|| outcome.fallback.clone())
        } else {
            outcome.fallback.clone()
        };
        let part = part.trim();
        if !part.is_empty() && !parts.iter().any(|existing| existing == part) {
            parts.push(part.to_owned());
        }
    }

    if parts.is_empty() {
        "I wasn't able to get anywhere with that. Could you try rephrasing?".to_owned()
    } else {
        parts.join(" ")
    }
}

/// Raw results folded into a single tool-results message for the model's
/// next iteration.
pub fn results_digest(outcomes: &[ToolOutcome]) -> String {
    let entries: Vec<Value> = outcomes
        .iter()
        .map(|outcome| {
            json!({
                "tool": outcome.tool_name,
                "ok": outcome.ok,
                "result": outcome.result,
            })
        })
        .collect();
    format!("Tool results: {}", Value::Array(entries))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{aggregate_reply, results_digest};
    use crate::executor::ToolOutcome;

    fn ok_outcome(name: &str, summary: &str) -> ToolOutcome {
        ToolOutcome {
            tool_name: name.to_owned(),
            ok: true,
            result: json!({"ok": true}),
            summary: Some(summary.to_owned()),
            state_updates: None,
            fallback: "fallback text".to_owned(),
        }
    }

    fn failed_outcome(name: &str, fallback: &str) -> ToolOutcome {
        ToolOutcome {
            tool_name: name.to_owned(),
            ok: false,
            result: json!({"error": "boom"}),
            summary: None,
            state_updates: None,
            fallback: fallback.to_owned(),
        }
    }

    #[test]
    fn mixed_outcomes_become_exactly_one_reply() {
        let reply = aggregate_reply(&[
            ok_outcome("get_next_appointment", "Your next appointment is Tuesday at 9 AM."),
            failed_outcome("get_open_invoices", "I couldn't pull up your billing details."),
        ]);

        assert!(reply.contains("Tuesday at 9 AM"));
        assert!(reply.contains("billing details"));
        // One unified string, no per-tool separators leaked to the caller.
        assert!(!reply.contains("get_next_appointment"));
    }

    #[test]
    fn duplicate_sentences_collapse() {
        let reply = aggregate_reply(&[
            failed_outcome("a", "Something went wrong."),
            failed_outcome("b", "Something went wrong."),
        ]);
        assert_eq!(reply, "Something went wrong.");
    }

    #[test]
    fn empty_batch_still_says_something_safe() {
        assert!(!aggregate_reply(&[]).is_empty());
    }

    #[test]
    fn digest_is_one_parseable_message() {
        let digest = results_digest(&[
            ok_outcome("verify_account", "ok"),
            failed_outcome("escalate", "fallback"),
        ]);
        let raw = digest.strip_prefix("Tool results: ").expect("prefixed");
        let parsed: Value = serde_json::from_str(raw).expect("valid json");
        assert_eq!(parsed.as_array().expect("array").len(), 2);
    }
}
