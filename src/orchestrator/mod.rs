pub mod history;
pub mod manager;

pub use history::{TransitionKind, TransitionOutcome, TransitionRecord, TransitionRejection};
pub use manager::{AdvanceDecision, ReworkPolicy, WorkflowManager, WorkflowSettings, WorkflowStatus};
