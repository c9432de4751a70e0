use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Domain-state key holding the caller's verification progress.
pub const VERIFICATION_KEY: &str = "verification";
/// Domain-state key holding the pending multi-option selection, if any.
pub const SELECTION_KEY: &str = "selection";
/// Domain-state key holding the active workflow id, if any.
pub const WORKFLOW_KEY: &str = "workflow";

/// Authoritative per-conversation state. Exactly one copy exists per
/// conversation id; all mutations go through the owning session actor.
///
/// `domain_state` is an opaque extension map so tool handlers can carry
/// sub-states the orchestrator does not know about. The orchestrator itself
/// only reads the few keys exposed through the typed accessors below, and
/// tools never write the map directly - their patches arrive through
/// [`SessionState::apply_updates`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub phone_number: Option<String>,
    pub call_session_id: Option<String>,
    pub domain_state: Map<String, Value>,
    pub last_activity_at: DateTime<Utc>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phone_number: None,
            call_session_id: None,
            domain_state: Map::new(),
            last_activity_at: Utc::now(),
        }
    }
}

impl SessionState {
    /// Merge a combined tool patch into the domain-state map, last writer
    /// wins per key. Applied exactly once per turn, after every tool call in
    /// that turn has completed.
    pub fn apply_updates(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            if value.is_null() {
                self.domain_state.remove(&key);
            } else {
                self.domain_state.insert(key, value);
            }
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Reset is an explicit operation: domain state is cleared but the record
    /// and its correlation identifiers survive.
    pub fn reset(&mut self) {
        self.domain_state.clear();
        self.touch();
    }

    /// Typed view of the verification sub-state. Absent or malformed data
    /// reads as "not verified" so gating fails closed.
    pub fn verification(&self) -> VerificationState {
        self.domain_state
            .get(VERIFICATION_KEY)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    pub fn is_verified(&self) -> bool {
        self.verification().verified
    }

    /// The pending selection the agent is waiting on, if any. Malformed data
    /// reads as "no selection".
    pub fn active_selection(&self) -> Option<WorkflowSelection> {
        self.domain_state
            .get(SELECTION_KEY)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn active_workflow_id(&self) -> Option<String> {
        self.domain_state
            .get(WORKFLOW_KEY)
            .and_then(Value::as_object)
            .and_then(|workflow| workflow.get("workflow_id"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// A workflow is considered active when either a reschedule/cancel
    /// workflow id or a pending selection is present.
    pub fn has_active_workflow(&self) -> bool {
        self.active_workflow_id().is_some() || self.active_selection().is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationState {
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub zip_attempts: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    Appointment,
    Slot,
    Confirmation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Reschedule,
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOption {
    pub id: String,
    pub label: String,
}

/// "The agent is waiting on the human to pick one of these options."
/// At most one exists per conversation; presenting a new one silently
/// supersedes a stale one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSelection {
    pub kind: SelectionKind,
    pub options: Vec<SelectionOption>,
    pub presented_at: DateTime<Utc>,
    pub workflow_type: WorkflowType,
}

/// One request/response cycle triggered by a single inbound user message.
/// Exactly one turn is active per session at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub turn_id: u64,
    pub message_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(turn_id: u64) -> Self {
        Self { turn_id, message_id: Uuid::new_v4(), started_at: Utc::now() }
    }
}
