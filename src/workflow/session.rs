//! The per-subject guided workflow state machine.
//!
//! `WorkflowSession` is the machine's shared storage. Handlers only update
//! the session and record a [`StepOutcome`]; the engine reads that outcome
//! after each input and performs the side effects it names.

use statig::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::definition::{StepInput, WorkflowDefinition};
use crate::persistence::Fields;
use crate::transport::MediaItem;
use crate::SubjectId;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowInput {
    Text(String),
    Attachment(MediaItem),
    /// The current step's canned value.
    Shortcut,
    Done,
    Edit,
    Cancel,
    Confirm,
    CommitSucceeded,
    /// The referent vanished or permission was lost.
    CommitRejected,
    /// Storage failed; the session may be confirmed again.
    CommitFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Prompt { step: usize },
    Reprompt { step: usize, reason: String },
    MediaAdded { count: usize },
    Preview,
    Commit,
    Committed,
    Cancelled,
    Ignored,
}

#[derive(Debug)]
pub struct WorkflowSession {
    pub subject_id: SubjectId,
    pub definition: Arc<WorkflowDefinition>,
    pub collected_fields: BTreeMap<String, String>,
    pub media_items: Vec<MediaItem>,
    pub context: Fields,
    current_step: Option<usize>,
    outcome: StepOutcome,
}

impl WorkflowSession {
    pub fn new(subject_id: SubjectId, definition: Arc<WorkflowDefinition>, context: Fields) -> Self {
        Self {
            subject_id,
            definition,
            collected_fields: BTreeMap::new(),
            media_items: Vec::new(),
            context,
            current_step: Some(0),
            outcome: StepOutcome::Prompt { step: 0 },
        }
    }

    /// What the most recent input asked the engine to do.
    pub fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }

    /// The step being collected, or `None` past the last step.
    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.collected_fields.get(name).map(String::as_str)
    }

    fn advance(&mut self, step: usize) -> Outcome<State> {
        let next = step + 1;
        if next < self.definition.step_count() {
            self.current_step = Some(next);
            self.outcome = StepOutcome::Prompt { step: next };
            Transition(State::collecting(next))
        } else {
            self.current_step = None;
            self.outcome = StepOutcome::Preview;
            Transition(State::preview())
        }
    }

    fn ignore(&mut self, event: &WorkflowInput) -> Outcome<State> {
        debug!(
            subject_id = %self.subject_id,
            workflow = %self.definition.kind,
            input = ?event,
            "Input not accepted in current state"
        );
        self.outcome = StepOutcome::Ignored;
        Handled
    }
}

#[state_machine(initial = "State::collecting(0)", state(derive(Debug)))]
impl WorkflowSession {
    #[state]
    fn collecting(&mut self, step: &mut usize, event: &WorkflowInput) -> Outcome<State> {
        let Some(spec) = self.definition.step(*step).cloned() else {
            return self.ignore(event);
        };

        match (spec.input, event) {
            (StepInput::Text(validator), WorkflowInput::Text(raw)) => match validator.validate(raw) {
                Ok(value) => {
                    self.collected_fields.insert(spec.field.to_string(), value);
                    self.advance(*step)
                }
                Err(err) => {
                    self.outcome = StepOutcome::Reprompt {
                        step: *step,
                        reason: err.reason,
                    };
                    Handled
                }
            },
            (StepInput::Text(_), WorkflowInput::Shortcut) => match spec.shortcut {
                Some(shortcut) => {
                    self.collected_fields
                        .insert(spec.field.to_string(), shortcut.value.to_string());
                    self.advance(*step)
                }
                None => self.ignore(event),
            },
            (StepInput::Media, WorkflowInput::Attachment(item)) => {
                self.media_items.push(item.clone());
                self.outcome = StepOutcome::MediaAdded {
                    count: self.media_items.len(),
                };
                Handled
            }
            (StepInput::Media, WorkflowInput::Done) => self.advance(*step),
            _ => self.ignore(event),
        }
    }

    #[state]
    fn preview(&mut self, event: &WorkflowInput) -> Outcome<State> {
        match event {
            WorkflowInput::Edit => {
                self.media_items.clear();
                self.current_step = Some(0);
                self.outcome = StepOutcome::Prompt { step: 0 };
                Transition(State::collecting(0))
            }
            WorkflowInput::Cancel => {
                self.outcome = StepOutcome::Cancelled;
                Transition(State::cancelled())
            }
            WorkflowInput::Confirm => {
                self.outcome = StepOutcome::Commit;
                Transition(State::committing())
            }
            _ => self.ignore(event),
        }
    }

    #[state]
    fn committing(&mut self, event: &WorkflowInput) -> Outcome<State> {
        match event {
            WorkflowInput::CommitSucceeded => {
                self.outcome = StepOutcome::Committed;
                Transition(State::committed())
            }
            WorkflowInput::CommitRejected => {
                self.outcome = StepOutcome::Cancelled;
                Transition(State::cancelled())
            }
            WorkflowInput::CommitFailed => {
                self.outcome = StepOutcome::Preview;
                Transition(State::preview())
            }
            _ => self.ignore(event),
        }
    }

    #[state]
    fn committed(&mut self, event: &WorkflowInput) -> Outcome<State> {
        self.ignore(event)
    }

    #[state]
    fn cancelled(&mut self, event: &WorkflowInput) -> Outcome<State> {
        self.ignore(event)
    }
}
