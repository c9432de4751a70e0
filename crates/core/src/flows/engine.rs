use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::domain::session::{
    SelectionKind, SessionState, VerificationState, SELECTION_KEY, VERIFICATION_KEY, WORKFLOW_KEY,
};
use crate::flows::states::{WorkflowEvent, WorkflowPhase, WorkflowTransition};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowTransitionError {
    #[error("verification cannot regress once the session is verified")]
    AlreadyVerified,
    #[error("no pending selection to resolve")]
    NoPendingSelection,
    #[error("pending selection is {actual:?}, which event {event} cannot resolve")]
    WrongSelectionKind { actual: SelectionKind, event: &'static str },
    #[error("option `{option_id}` is not among the presented choices")]
    UnknownOption { option_id: String },
}

/// Pure transition function for the verification and reschedule/cancel
/// sub-flows. Produces a domain-state patch; never mutates session state
/// itself and never performs I/O.
#[derive(Clone, Debug, Default)]
pub struct WorkflowEngine;

impl WorkflowEngine {
    pub fn phase(&self, state: &SessionState) -> WorkflowPhase {
        match state.active_selection() {
            Some(selection) if selection.kind == SelectionKind::Confirmation => {
                WorkflowPhase::AwaitingConfirmation
            }
            Some(_) => WorkflowPhase::AwaitingSelection,
            None if state.is_verified() => WorkflowPhase::Verified,
            None => WorkflowPhase::CollectingVerification,
        }
    }

    pub fn apply(
        &self,
        state: &SessionState,
        event: &WorkflowEvent,
    ) -> Result<WorkflowTransition, WorkflowTransitionError> {
        match event {
            WorkflowEvent::VerificationSucceeded { customer_id } => {
                let verification = VerificationState {
                    verified: true,
                    customer_id: Some(customer_id.clone()),
                    zip_attempts: state.verification().zip_attempts,
                };
                Ok(patch_only(verification_patch(&verification)))
            }
            WorkflowEvent::VerificationFailed => {
                let mut verification = state.verification();
                if verification.verified {
                    return Err(WorkflowTransitionError::AlreadyVerified);
                }
                verification.zip_attempts += 1;
                Ok(patch_only(verification_patch(&verification)))
            }
            WorkflowEvent::OptionsPresented { workflow_id, selection } => {
                // Last-presented-wins: a stale pending selection is replaced,
                // never merged or queued.
                let mut patch = Map::new();
                patch.insert(
                    SELECTION_KEY.to_owned(),
                    serde_json::to_value(selection).unwrap_or(Value::Null),
                );
                patch.insert(WORKFLOW_KEY.to_owned(), json!({ "workflow_id": workflow_id }));
                Ok(patch_only(patch))
            }
            WorkflowEvent::SelectionResolved { option_id } => {
                let selection =
                    state.active_selection().ok_or(WorkflowTransitionError::NoPendingSelection)?;
                if selection.kind == SelectionKind::Confirmation {
                    return Err(WorkflowTransitionError::WrongSelectionKind {
                        actual: selection.kind,
                        event: "selection_resolved",
                    });
                }
                let resolved = selection
                    .options
                    .iter()
                    .find(|option| option.id == *option_id)
                    .cloned()
                    .ok_or_else(|| WorkflowTransitionError::UnknownOption {
                        option_id: option_id.clone(),
                    })?;

                let mut patch = Map::new();
                patch.insert(SELECTION_KEY.to_owned(), Value::Null);
                Ok(WorkflowTransition { patch, resolved_option: Some(resolved) })
            }
            WorkflowEvent::ConfirmationAccepted => {
                let selection =
                    state.active_selection().ok_or(WorkflowTransitionError::NoPendingSelection)?;
                if selection.kind != SelectionKind::Confirmation {
                    return Err(WorkflowTransitionError::WrongSelectionKind {
                        actual: selection.kind,
                        event: "confirmation_accepted",
                    });
                }
                let mut patch = Map::new();
                patch.insert(SELECTION_KEY.to_owned(), Value::Null);
                Ok(patch_only(patch))
            }
            WorkflowEvent::ConfirmationDeclined => {
                let selection =
                    state.active_selection().ok_or(WorkflowTransitionError::NoPendingSelection)?;
                if selection.kind != SelectionKind::Confirmation {
                    return Err(WorkflowTransitionError::WrongSelectionKind {
                        actual: selection.kind,
                        event: "confirmation_declined",
                    });
                }
                Ok(patch_only(clear_workflow_patch()))
            }
            WorkflowEvent::WorkflowCompleted | WorkflowEvent::WorkflowAborted => {
                Ok(patch_only(clear_workflow_patch()))
            }
        }
    }
}

fn patch_only(patch: Map<String, Value>) -> WorkflowTransition {
    WorkflowTransition { patch, resolved_option: None }
}

fn verification_patch(verification: &VerificationState) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(
        VERIFICATION_KEY.to_owned(),
        serde_json::to_value(verification).unwrap_or(Value::Null),
    );
    patch
}

fn clear_workflow_patch() -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(SELECTION_KEY.to_owned(), Value::Null);
    patch.insert(WORKFLOW_KEY.to_owned(), Value::Null);
    patch
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{WorkflowEngine, WorkflowTransitionError};
    use crate::domain::session::{
        SelectionKind, SelectionOption, SessionState, WorkflowSelection, WorkflowType,
    };
    use crate::flows::states::{WorkflowEvent, WorkflowPhase};

    fn engine() -> WorkflowEngine {
        WorkflowEngine
    }

    fn selection(kind: SelectionKind) -> WorkflowSelection {
        WorkflowSelection {
            kind,
            options: vec![
                SelectionOption { id: "opt-1".to_owned(), label: "Tuesday 9 AM".to_owned() },
                SelectionOption { id: "opt-2".to_owned(), label: "Wednesday 1 PM".to_owned() },
            ],
            presented_at: Utc::now(),
            workflow_type: WorkflowType::Reschedule,
        }
    }

    fn present(state: &mut SessionState, kind: SelectionKind) {
        let transition = engine()
            .apply(
                state,
                &WorkflowEvent::OptionsPresented {
                    workflow_id: "wf-1".to_owned(),
                    selection: selection(kind),
                },
            )
            .expect("presenting options always succeeds");
        state.apply_updates(transition.patch);
    }

    #[test]
    fn verification_succeeds_once_and_stays_verified() {
        let mut state = SessionState::default();
        assert_eq!(engine().phase(&state), WorkflowPhase::CollectingVerification);

        let transition = engine()
            .apply(
                &state,
                &WorkflowEvent::VerificationSucceeded { customer_id: "c1".to_owned() },
            )
            .expect("verification success applies");
        state.apply_updates(transition.patch);

        assert!(state.is_verified());
        assert_eq!(state.verification().customer_id.as_deref(), Some("c1"));
        assert_eq!(engine().phase(&state), WorkflowPhase::Verified);

        // One-way flag: a later failure event is an invalid transition.
        let error = engine()
            .apply(&state, &WorkflowEvent::VerificationFailed)
            .expect_err("verified sessions do not regress");
        assert_eq!(error, WorkflowTransitionError::AlreadyVerified);
    }

    #[test]
    fn failed_verification_increments_zip_attempts() {
        let mut state = SessionState::default();
        for expected in 1..=3 {
            let transition = engine()
                .apply(&state, &WorkflowEvent::VerificationFailed)
                .expect("failure applies while unverified");
            state.apply_updates(transition.patch);
            assert_eq!(state.verification().zip_attempts, expected);
        }
        assert!(!state.is_verified());
    }

    #[test]
    fn new_selection_silently_supersedes_pending_one() {
        let mut state = SessionState::default();
        present(&mut state, SelectionKind::Appointment);
        assert_eq!(state.active_selection().map(|s| s.kind), Some(SelectionKind::Appointment));

        present(&mut state, SelectionKind::Slot);
        let current = state.active_selection().expect("selection present");
        assert_eq!(current.kind, SelectionKind::Slot);
        assert_eq!(current.options.len(), 2, "no merging with the replaced selection");
    }

    #[test]
    fn resolving_a_selection_consumes_it_and_returns_the_option() {
        let mut state = SessionState::default();
        present(&mut state, SelectionKind::Appointment);

        let transition = engine()
            .apply(&state, &WorkflowEvent::SelectionResolved { option_id: "opt-2".to_owned() })
            .expect("known option resolves");
        state.apply_updates(transition.patch);

        assert_eq!(
            transition.resolved_option.map(|option| option.id),
            Some("opt-2".to_owned())
        );
        assert!(state.active_selection().is_none());
        // Workflow id survives resolution; the mutating tool still needs it.
        assert!(state.has_active_workflow());
    }

    #[test]
    fn unknown_option_is_rejected() {
        let mut state = SessionState::default();
        present(&mut state, SelectionKind::Slot);

        let error = engine()
            .apply(&state, &WorkflowEvent::SelectionResolved { option_id: "opt-9".to_owned() })
            .expect_err("unknown option must not resolve");
        assert!(matches!(error, WorkflowTransitionError::UnknownOption { .. }));
    }

    #[test]
    fn confirmation_gate_blocks_index_resolution() {
        let mut state = SessionState::default();
        present(&mut state, SelectionKind::Confirmation);
        assert_eq!(engine().phase(&state), WorkflowPhase::AwaitingConfirmation);

        let error = engine()
            .apply(&state, &WorkflowEvent::SelectionResolved { option_id: "opt-1".to_owned() })
            .expect_err("confirmation selections await yes/no");
        assert!(matches!(error, WorkflowTransitionError::WrongSelectionKind { .. }));
    }

    #[test]
    fn declined_confirmation_aborts_the_workflow() {
        let mut state = SessionState::default();
        present(&mut state, SelectionKind::Confirmation);

        let transition = engine()
            .apply(&state, &WorkflowEvent::ConfirmationDeclined)
            .expect("declining is a valid answer");
        state.apply_updates(transition.patch);

        assert!(state.active_selection().is_none());
        assert!(!state.has_active_workflow());
    }

    #[test]
    fn accepted_confirmation_clears_selection_but_keeps_workflow() {
        let mut state = SessionState::default();
        present(&mut state, SelectionKind::Confirmation);

        let transition = engine()
            .apply(&state, &WorkflowEvent::ConfirmationAccepted)
            .expect("accepting is a valid answer");
        state.apply_updates(transition.patch);

        assert!(state.active_selection().is_none());
        assert!(state.has_active_workflow());

        let transition = engine()
            .apply(&state, &WorkflowEvent::WorkflowCompleted)
            .expect("completion always applies");
        state.apply_updates(transition.patch);
        assert!(!state.has_active_workflow());
    }

    #[test]
    fn resolving_without_a_pending_selection_is_invalid() {
        let state = SessionState::default();
        let error = engine()
            .apply(&state, &WorkflowEvent::ConfirmationAccepted)
            .expect_err("nothing pending");
        assert_eq!(error, WorkflowTransitionError::NoPendingSelection);
    }
}
