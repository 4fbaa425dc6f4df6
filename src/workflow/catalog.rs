use std::sync::Arc;

use super::definition::{
    CommitRule, FanOut, StepSpec, Validator, WorkflowDefinition, WorkflowKind,
};
use crate::access::Requirement;
use crate::config::GateConfig;
use crate::domain::Role;

pub const PRICE_TBD: &str = "Price to be confirmed";

const ROLE_NAMES: &[&str] = &["consumer", "supplier", "admin"];

/// The fixed set of guided workflows.
#[derive(Debug, Clone)]
pub struct WorkflowCatalog {
    registration: Arc<WorkflowDefinition>,
    consumer_request: Arc<WorkflowDefinition>,
    supplier_response: Arc<WorkflowDefinition>,
    admin_set_role: Arc<WorkflowDefinition>,
    admin_broadcast: Arc<WorkflowDefinition>,
}

impl WorkflowCatalog {
    pub fn standard(gate: &GateConfig) -> Self {
        let short = gate.short_flow_ttl_seconds;
        let long = gate.long_flow_ttl_seconds;

        Self {
            registration: Arc::new(WorkflowDefinition {
                kind: WorkflowKind::Registration,
                steps: vec![StepSpec::text(
                    "phone",
                    "Phone",
                    "Welcome! Please enter your phone number.",
                    Validator::Phone,
                )],
                ttl_seconds: short,
                requirement: None,
                commit: CommitRule::CompleteRegistration,
                fan_out: FanOut::None,
                preview_heading: "Is this number correct?",
            }),
            consumer_request: Arc::new(WorkflowDefinition {
                kind: WorkflowKind::ConsumerRequest,
                steps: vec![
                    StepSpec::text(
                        "text",
                        "What is needed",
                        "What do you need? Describe your request.",
                        Validator::NonEmpty,
                    ),
                    StepSpec::media(
                        "media",
                        "Attachments",
                        "Attach photos or files (several are fine), then press Done.",
                    ),
                ],
                ttl_seconds: short,
                requirement: Some(Requirement::Role(Role::Consumer)),
                commit: CommitRule::OpenRequest,
                fan_out: FanOut::RegisteredSuppliers,
                preview_heading: "Is everything correct?",
            }),
            supplier_response: Arc::new(WorkflowDefinition {
                kind: WorkflowKind::SupplierResponse,
                steps: vec![
                    StepSpec::text("price", "Price", "Enter your price.", Validator::NonEmpty)
                        .with_shortcut("Price to be confirmed", PRICE_TBD),
                    StepSpec::text(
                        "eta",
                        "Delivery time",
                        "Enter the estimated delivery time.",
                        Validator::NonEmpty,
                    ),
                    StepSpec::text(
                        "description",
                        "Description",
                        "Describe your offer.",
                        Validator::NonEmpty,
                    ),
                    StepSpec::media(
                        "media",
                        "Attachments",
                        "Attach photos or files for your response, then press Done.",
                    ),
                ],
                ttl_seconds: long,
                requirement: Some(Requirement::Role(Role::Supplier)),
                commit: CommitRule::SubmitResponse,
                fan_out: FanOut::RequestOwner,
                preview_heading: "Check your response:",
            }),
            admin_set_role: Arc::new(WorkflowDefinition {
                kind: WorkflowKind::AdminSetRole,
                steps: vec![
                    StepSpec::text(
                        "target",
                        "User id",
                        "Enter the chat id of the user whose role should change.",
                        Validator::SubjectId,
                    ),
                    StepSpec::text(
                        "role",
                        "Role",
                        "Enter the role: consumer / supplier / admin",
                        Validator::OneOf(ROLE_NAMES),
                    ),
                ],
                ttl_seconds: short,
                requirement: Some(Requirement::Admin),
                commit: CommitRule::AssignRole,
                fan_out: FanOut::None,
                preview_heading: "Change this role?",
            }),
            admin_broadcast: Arc::new(WorkflowDefinition {
                kind: WorkflowKind::AdminBroadcast,
                steps: vec![StepSpec::text(
                    "text",
                    "Message",
                    "Enter the text to send to every registered user.",
                    Validator::NonEmpty,
                )],
                ttl_seconds: short,
                requirement: Some(Requirement::Admin),
                commit: CommitRule::Broadcast,
                fan_out: FanOut::AllRegistered,
                preview_heading: "Send this broadcast?",
            }),
        }
    }

    pub fn definition(&self, kind: WorkflowKind) -> Arc<WorkflowDefinition> {
        let definition = match kind {
            WorkflowKind::Registration => &self.registration,
            WorkflowKind::ConsumerRequest => &self.consumer_request,
            WorkflowKind::SupplierResponse => &self.supplier_response,
            WorkflowKind::AdminSetRole => &self.admin_set_role,
            WorkflowKind::AdminBroadcast => &self.admin_broadcast,
        };
        Arc::clone(definition)
    }
}
