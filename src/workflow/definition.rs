use std::fmt;
use thiserror::Error;

use crate::access::Requirement;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowKind {
    Registration,
    ConsumerRequest,
    SupplierResponse,
    AdminSetRole,
    AdminBroadcast,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Registration => "registration",
            WorkflowKind::ConsumerRequest => "consumer_request",
            WorkflowKind::SupplierResponse => "supplier_response",
            WorkflowKind::AdminSetRole => "admin_set_role",
            WorkflowKind::AdminBroadcast => "admin_broadcast",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Any text with something left after trimming.
    NonEmpty,
    /// Keeps only the digits; at least ten are required.
    Phone,
    /// A non-negative chat subject id that fits a `SubjectId`.
    SubjectId,
    /// One of a fixed set of lowercase words.
    OneOf(&'static [&'static str]),
}

impl Validator {
    /// Normalise raw input, or explain why it is not acceptable.
    pub fn validate(&self, raw: &str) -> Result<String, ValidationError> {
        let trimmed = raw.trim();
        match self {
            Validator::NonEmpty => {
                if trimmed.is_empty() {
                    Err(ValidationError::new("The value must not be empty."))
                } else {
                    Ok(trimmed.to_string())
                }
            }
            Validator::Phone => {
                let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
                if digits.len() < 10 {
                    Err(ValidationError::new("Please enter a valid phone number."))
                } else {
                    Ok(digits)
                }
            }
            Validator::SubjectId => {
                let digits_only = !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit());
                match trimmed.parse::<crate::SubjectId>() {
                    Ok(id) if digits_only => Ok(id.to_string()),
                    _ => Err(ValidationError::new("Please enter a numeric id.")),
                }
            }
            Validator::OneOf(allowed) => {
                let lowered = trimmed.to_lowercase();
                if allowed.contains(&lowered.as_str()) {
                    Ok(lowered)
                } else {
                    Err(ValidationError::new(format!(
                        "Allowed values: {}",
                        allowed.join(" / ")
                    )))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepInput {
    Text(Validator),
    /// Repeated attachments, closed by an explicit Done.
    Media,
}

/// A canned value offered as an action instead of typed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortcut {
    pub label: &'static str,
    pub value: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    pub field: &'static str,
    pub label: &'static str,
    pub prompt: &'static str,
    pub input: StepInput,
    pub shortcut: Option<Shortcut>,
}

impl StepSpec {
    pub fn text(field: &'static str, label: &'static str, prompt: &'static str, validator: Validator) -> Self {
        Self {
            field,
            label,
            prompt,
            input: StepInput::Text(validator),
            shortcut: None,
        }
    }

    pub fn media(field: &'static str, label: &'static str, prompt: &'static str) -> Self {
        Self {
            field,
            label,
            prompt,
            input: StepInput::Media,
            shortcut: None,
        }
    }

    pub fn with_shortcut(mut self, label: &'static str, value: &'static str) -> Self {
        self.shortcut = Some(Shortcut { label, value });
        self
    }

    pub fn accumulates_media(&self) -> bool {
        matches!(self.input, StepInput::Media)
    }
}

/// How a confirmed session is written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitRule {
    CompleteRegistration,
    OpenRequest,
    SubmitResponse,
    AssignRole,
    Broadcast,
}

/// Who hears about a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    None,
    RegisteredSuppliers,
    RequestOwner,
    AllRegistered,
}

#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub kind: WorkflowKind,
    pub steps: Vec<StepSpec>,
    pub ttl_seconds: u64,
    pub requirement: Option<Requirement>,
    pub commit: CommitRule,
    pub fan_out: FanOut,
    pub preview_heading: &'static str,
}

impl WorkflowDefinition {
    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.get(index)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}
