pub mod engine;
pub mod states;

pub use engine::{WorkflowEngine, WorkflowTransitionError};
pub use states::{WorkflowEvent, WorkflowPhase, WorkflowTransition};
