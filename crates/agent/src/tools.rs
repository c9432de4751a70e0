//! Tool registry: the closed catalog wired to handlers and schemas.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use frontdesk_core::domain::session::SessionState;
use frontdesk_core::gating::ToolName;
use frontdesk_crm::CrmError;

use crate::llm::ToolDescriptor;

/// Registry entry: what the model sees plus the texts the orchestrator falls
/// back on when the call cannot run or cannot be narrated.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: &'static str,
    pub parameters: Value,
    /// Safe reply used when this tool fails or is called badly.
    pub fallback: &'static str,
}

/// Per-turn execution context handed to every handler. Carries an immutable
/// snapshot of session state; handlers express changes only through
/// [`ToolRawResult::state_updates`].
#[derive(Clone)]
pub struct ToolContext {
    pub state: SessionState,
    pub max_zip_attempts: u32,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Crm(#[from] CrmError),
}

/// What a handler hands back: the raw result fed to the model, a one-line
/// human summary for aggregate narration, and an optional domain-state
/// patch. Patches from parallel calls are merged last-writer-wins and
/// applied exactly once per execution round.
#[derive(Clone, Debug, Default)]
pub struct ToolRawResult {
    pub result: Value,
    pub summary: Option<String>,
    pub state_updates: Option<Map<String, Value>>,
}

impl ToolRawResult {
    pub fn new(result: Value) -> Self {
        Self { result, summary: None, state_updates: None }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_state_updates(mut self, updates: Map<String, Value>) -> Self {
        self.state_updates = Some(updates);
        self
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError>;
}

pub struct RegisteredTool {
    pub spec: ToolSpec,
    pub handler: Arc<dyn ToolHandler>,
}

#[derive(Debug, Error)]
#[error("tool catalog is incomplete; missing handlers for: {missing:?}")]
pub struct IncompleteRegistry {
    pub missing: Vec<ToolName>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<ToolName, RegisteredTool>,
}

impl ToolRegistry {
    pub fn register<H>(&mut self, spec: ToolSpec, handler: H)
    where
        H: ToolHandler + 'static,
    {
        self.tools.insert(spec.name, RegisteredTool { spec, handler: Arc::new(handler) });
    }

    pub fn get(&self, name: ToolName) -> Option<&RegisteredTool> {
        self.tools.get(&name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Startup check: every name in the catalog must have a handler, so a
    /// missing registration is a boot failure rather than a runtime surprise.
    pub fn ensure_complete(&self) -> Result<(), IncompleteRegistry> {
        let missing: Vec<ToolName> =
            ToolName::ALL.into_iter().filter(|name| !self.tools.contains_key(name)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(IncompleteRegistry { missing })
        }
    }

    /// Descriptors for the given (already gated) subset, in catalog order.
    pub fn descriptors_for(&self, names: &BTreeSet<ToolName>) -> Vec<ToolDescriptor> {
        ToolName::ALL
            .into_iter()
            .filter(|name| names.contains(name))
            .filter_map(|name| self.tools.get(&name))
            .map(|registered| ToolDescriptor {
                name: registered.spec.name.as_str().to_owned(),
                description: registered.spec.description.to_owned(),
                parameters: registered.spec.parameters.clone(),
            })
            .collect()
    }

    /// Cheap structural validation: the arguments must be an object carrying
    /// every property the schema marks required.
    pub fn validate_arguments(spec: &ToolSpec, args: &Value) -> Result<(), HandlerError> {
        let object = args
            .as_object()
            .ok_or_else(|| HandlerError::InvalidArguments("arguments must be an object".into()))?;

        if let Some(required) = spec.parameters.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    return Err(HandlerError::InvalidArguments(format!(
                        "missing required argument `{key}`"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use frontdesk_core::gating::ToolName;

    use super::{ToolRegistry, ToolSpec};

    fn spec() -> ToolSpec {
        ToolSpec {
            name: ToolName::VerifyAccount,
            description: "test",
            parameters: json!({
                "type": "object",
                "properties": {"customer_id": {"type": "string"}, "zip": {"type": "string"}},
                "required": ["customer_id", "zip"],
            }),
            fallback: "fallback",
        }
    }

    #[test]
    fn empty_registry_reports_every_missing_tool() {
        let registry = ToolRegistry::default();
        let error = registry.ensure_complete().expect_err("registry is empty");
        assert_eq!(error.missing.len(), ToolName::ALL.len());
    }

    #[test]
    fn missing_required_argument_fails_validation() {
        let spec = spec();
        assert!(ToolRegistry::validate_arguments(&spec, &json!({"customer_id": "c1"})).is_err());
        assert!(ToolRegistry::validate_arguments(
            &spec,
            &json!({"customer_id": "c1", "zip": "78704"})
        )
        .is_ok());
        assert!(ToolRegistry::validate_arguments(&spec, &json!("not an object")).is_err());
    }
}
