//! The conversational brain: a bounded model-with-tools loop over the CRM
//! tool catalog.
//!
//! The model is strictly a translator and narrator. It never decides what a
//! session is allowed to do; the gating policy in `frontdesk-core` filters
//! the catalog before the model ever sees it, and the executor re-checks
//! every proposed call against the same policy.

pub mod executor;
pub mod handlers;
pub mod llm;
pub mod narration;
pub mod runtime;
pub mod tools;

pub use executor::{execute_calls, merge_state_updates, ToolOutcome};
pub use llm::{ChatMessage, ChatRole, HttpModelClient, ModelClient, ModelError, ModelTurn,
    ProposedCall, ToolDescriptor};
pub use runtime::{NoopObserver, TurnEngine, TurnEngineError, TurnObserver, TurnOutcome};
pub use tools::{ToolContext, ToolHandler, ToolRawResult, ToolRegistry};
