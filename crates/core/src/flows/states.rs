use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::session::{SelectionOption, WorkflowSelection};

/// Where a conversation stands across its two sub-flows. Derived from
/// session state, never stored directly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowPhase {
    CollectingVerification,
    Verified,
    AwaitingSelection,
    AwaitingConfirmation,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowEvent {
    /// A verify-account tool call succeeded and supplied the customer id.
    VerificationSucceeded { customer_id: String },
    /// A verify-account tool call failed; counts against the ZIP attempts.
    VerificationFailed,
    /// A list/slot tool result requires the caller to choose. Silently
    /// supersedes any prior pending selection (last-presented-wins).
    OptionsPresented { workflow_id: String, selection: WorkflowSelection },
    /// The caller picked one of the presented appointment/slot options.
    SelectionResolved { option_id: String },
    /// The caller answered a confirmation-kind selection.
    ConfirmationAccepted,
    ConfirmationDeclined,
    /// The reschedule/cancel flow finished (mutating tool ran).
    WorkflowCompleted,
    /// The caller walked away from the flow.
    WorkflowAborted,
}

/// Outcome of a transition: a domain-state patch to feed through
/// `SessionState::apply_updates`, plus the option the caller resolved, when
/// the event consumed one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkflowTransition {
    pub patch: Map<String, Value>,
    pub resolved_option: Option<SelectionOption>,
}
