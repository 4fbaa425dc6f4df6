//! Guided multi-step workflows.
//!
//! A workflow collects an ordered list of fields, shows a preview and then
//! commits, is edited, or is cancelled. While it runs the subject is held
//! busy so that notifications queue instead of interleaving with prompts.

pub mod catalog;
pub mod definition;
pub mod engine;
pub mod session;

pub use catalog::{WorkflowCatalog, PRICE_TBD};
pub use definition::{
    CommitRule, FanOut, Shortcut, StepInput, StepSpec, ValidationError, Validator,
    WorkflowDefinition, WorkflowKind,
};
pub use engine::{FanOutReport, InputDisposition, SessionHandle, WorkflowEngine};
pub use session::{StepOutcome, WorkflowInput, WorkflowSession};
