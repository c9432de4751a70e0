//! Core domain for the frontdesk conversation orchestrator.
//!
//! This crate holds everything the rest of the workspace agrees on and
//! nothing that does I/O on its own:
//! - `config` - layered application configuration (file, env, overrides)
//! - `domain` - session state, verification/workflow sub-states, CRM records
//! - `events` - the per-session ordered event log with resync semantics
//! - `flows` - the verification and reschedule/cancel workflow state machine
//! - `gating` - the pure policy mapping session state to callable tools
//! - `store` - the session persistence seam
//!
//! The orchestration itself (turns, tool execution, transport) lives in the
//! `frontdesk-agent` and `frontdesk-server` crates.

pub mod config;
pub mod domain;
pub mod events;
pub mod flows;
pub mod gating;
pub mod store;

pub use domain::crm::{
    Appointment, AppointmentSlot, Customer, EscalationOutcome, Invoice, ServicePolicy,
};
pub use domain::session::{
    SelectionKind, SelectionOption, SessionState, Turn, VerificationState, WorkflowSelection,
    WorkflowType,
};
pub use events::{EventDraft, EventLog, EventRole, EventType, SessionEvent};
pub use flows::{WorkflowEngine, WorkflowEvent, WorkflowTransition, WorkflowTransitionError};
pub use gating::{available_tools, ToolName, ToolRequirements};
pub use store::{InMemorySessionStore, SessionStore, StoreError};
