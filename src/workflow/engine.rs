use serde_json::{json, Value};
use statig::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::catalog::WorkflowCatalog;
use super::definition::{
    CommitRule, FanOut, ValidationError, WorkflowDefinition, WorkflowKind,
};
use super::session::{StepOutcome, WorkflowInput, WorkflowSession};
use crate::access::{AccessGuard, Requirement};
use crate::dispatch::{Delivery, NotificationDispatcher};
use crate::domain::{
    find_user, load_request, registered_users, Request, RequestStatus, Response,
    ResponseStatus, Role,
};
use crate::error::RelayError;
use crate::gate::{BusyGate, QueuedEvent};
use crate::persistence::{encode, fields, EntityId, EntityKind, Fields, Persistence};
use crate::render;
use crate::transport::{deliver, Outbound, Transport};
use crate::SubjectId;

pub type SessionHandle = Arc<Mutex<StateMachine<WorkflowSession>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDisposition {
    /// No workflow is running for the subject.
    NoSession,
    Consumed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub queued: usize,
    pub dropped: usize,
    pub failed: usize,
}

/// What a successful commit produced.
struct CommitReceipt {
    reply: String,
    menu: Option<Role>,
    event: Option<QueuedEvent>,
    owner: Option<SubjectId>,
}

/// Drives guided workflows: gate acquisition on entry, step collection,
/// preview, and commit with fan-out and flush.
pub struct WorkflowEngine {
    gate: Arc<BusyGate>,
    dispatcher: Arc<NotificationDispatcher>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn Persistence>,
    catalog: WorkflowCatalog,
    guard: AccessGuard,
    sessions: Mutex<HashMap<SubjectId, SessionHandle>>,
}

impl WorkflowEngine {
    pub fn new(
        gate: Arc<BusyGate>,
        dispatcher: Arc<NotificationDispatcher>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn Persistence>,
        catalog: WorkflowCatalog,
        guard: AccessGuard,
    ) -> Self {
        Self {
            gate,
            dispatcher,
            transport,
            store,
            catalog,
            guard,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Enter a workflow. Any session the subject already had is discarded.
    pub async fn start(
        &self,
        subject_id: SubjectId,
        kind: WorkflowKind,
        context: Fields,
    ) -> Result<(), RelayError> {
        let definition = self.catalog.definition(kind);
        if let Some(requirement) = definition.requirement {
            self.check_access(subject_id, requirement).await?;
        }
        if definition.commit == CommitRule::SubmitResponse {
            open_request_from(self.store.as_ref(), &context).await?;
        }

        self.gate
            .set_busy(subject_id, kind.as_str(), definition.ttl_seconds)
            .await;

        let machine = WorkflowSession::new(subject_id, Arc::clone(&definition), context).state_machine();
        let replaced = self
            .sessions
            .lock()
            .await
            .insert(subject_id, Arc::new(Mutex::new(machine)))
            .is_some();
        info!(subject_id = %subject_id, workflow = %kind, replaced = replaced, "Workflow started");

        if let Some(step) = definition.step(0) {
            self.send(subject_id, render::step_prompt(step)).await;
        }
        Ok(())
    }

    /// Feed one input to the subject's running workflow.
    pub async fn handle(
        &self,
        subject_id: SubjectId,
        input: WorkflowInput,
    ) -> Result<InputDisposition, RelayError> {
        let Some(handle) = self.session(subject_id).await else {
            return Ok(InputDisposition::NoSession);
        };
        let mut machine = handle.lock().await;
        machine.handle(&input);

        let outcome = machine.inner().outcome().clone();
        let definition = Arc::clone(&machine.inner().definition);
        match outcome {
            StepOutcome::Prompt { step } => {
                if let Some(spec) = definition.step(step) {
                    self.send(subject_id, render::step_prompt(spec)).await;
                }
            }
            StepOutcome::Reprompt { step, reason } => {
                if let Some(spec) = definition.step(step) {
                    self.send(subject_id, render::reprompt(spec, &reason)).await;
                }
            }
            StepOutcome::MediaAdded { count } => {
                self.send(subject_id, render::media_added(count)).await;
            }
            StepOutcome::Preview => {
                self.send(subject_id, render::preview(machine.inner())).await;
            }
            StepOutcome::Commit => {
                self.commit(subject_id, &handle, &mut machine).await;
            }
            StepOutcome::Cancelled => {
                self.remove_session(subject_id, &handle).await;
                info!(subject_id = %subject_id, workflow = %definition.kind, "Workflow cancelled");
                self.send(subject_id, Outbound::text("Cancelled.")).await;
                self.dispatcher.flush(subject_id).await;
            }
            StepOutcome::Committed | StepOutcome::Ignored => {
                self.send(subject_id, Outbound::text(render::IGNORED_HINT)).await;
            }
        }
        Ok(InputDisposition::Consumed)
    }

    /// Drop the subject's session without flushing. The busy window is left
    /// for the timeout watcher.
    pub async fn abandon(&self, subject_id: SubjectId) -> bool {
        let removed = self.sessions.lock().await.remove(&subject_id).is_some();
        if removed {
            info!(subject_id = %subject_id, "Workflow abandoned");
        }
        removed
    }

    pub async fn has_session(&self, subject_id: SubjectId) -> bool {
        self.sessions.lock().await.contains_key(&subject_id)
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn session(&self, subject_id: SubjectId) -> Option<SessionHandle> {
        self.sessions.lock().await.get(&subject_id).cloned()
    }

    /// Remove the entry only if it is still the session we were driving.
    async fn remove_session(&self, subject_id: SubjectId, handle: &SessionHandle) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(&subject_id)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            sessions.remove(&subject_id);
        }
    }

    async fn check_access(&self, subject_id: SubjectId, requirement: Requirement) -> Result<(), RelayError> {
        let user = find_user(self.store.as_ref(), subject_id).await?;
        self.guard.check(subject_id, user.as_ref(), requirement)
    }

    async fn commit(
        &self,
        subject_id: SubjectId,
        handle: &SessionHandle,
        machine: &mut StateMachine<WorkflowSession>,
    ) {
        let definition = Arc::clone(&machine.inner().definition);
        match self.persist(machine.inner()).await {
            Ok(receipt) => {
                machine.handle(&WorkflowInput::CommitSucceeded);
                self.remove_session(subject_id, handle).await;
                info!(subject_id = %subject_id, workflow = %definition.kind, "Workflow committed");

                self.send(subject_id, Outbound::text(receipt.reply)).await;
                if let Some(role) = receipt.menu {
                    self.send(subject_id, render::main_menu(role)).await;
                }
                if let Some(event) = receipt.event {
                    let report = self
                        .fan_out(subject_id, definition.fan_out, receipt.owner, event)
                        .await;
                    if definition.fan_out == FanOut::AllRegistered {
                        self.send(
                            subject_id,
                            Outbound::text(format!(
                                "Broadcast finished. Delivered: {}, queued: {}.",
                                report.delivered, report.queued
                            )),
                        )
                        .await;
                    }
                }
                self.dispatcher.flush(subject_id).await;
            }
            Err(err) if is_rejection(&err) => {
                machine.handle(&WorkflowInput::CommitRejected);
                self.remove_session(subject_id, handle).await;
                warn!(subject_id = %subject_id, workflow = %definition.kind, error = %err, "Commit rejected");

                let text = render::rejection_text(&err)
                    .unwrap_or_else(|| render::GENERIC_FAILURE.to_string());
                self.send(subject_id, Outbound::text(text)).await;
                self.dispatcher.flush(subject_id).await;
            }
            Err(err) => {
                machine.handle(&WorkflowInput::CommitFailed);
                error!(subject_id = %subject_id, workflow = %definition.kind, error = %err, "Commit failed");

                self.send(subject_id, Outbound::text(render::GENERIC_FAILURE)).await;
                self.send(subject_id, render::preview(machine.inner())).await;
            }
        }
    }

    async fn persist(&self, session: &WorkflowSession) -> Result<CommitReceipt, RelayError> {
        let store = self.store.as_ref();
        let subject_id = session.subject_id;
        if session.definition.requirement == Some(Requirement::Admin) {
            self.check_access(subject_id, Requirement::Admin).await?;
        }

        match session.definition.commit {
            CommitRule::CompleteRegistration => {
                let user = find_user(store, subject_id).await?.ok_or(RelayError::NotFound {
                    kind: EntityKind::User,
                    id: subject_id,
                })?;
                let phone = required_field(session, "phone")?;
                store
                    .update_entity(
                        EntityKind::User,
                        user.id,
                        fields(json!({ "phone": phone, "is_registered": true })),
                    )
                    .await?;
                Ok(CommitReceipt {
                    reply: "Registration complete.".to_string(),
                    menu: Some(user.role),
                    event: None,
                    owner: None,
                })
            }
            CommitRule::OpenRequest => {
                let user = find_user(store, subject_id).await?.ok_or(RelayError::NotFound {
                    kind: EntityKind::User,
                    id: subject_id,
                })?;
                let request = Request {
                    id: 0,
                    consumer_id: subject_id,
                    text: required_field(session, "text")?,
                    media: session.media_items.clone(),
                    status: RequestStatus::Open,
                };
                let request_id = store.save_entity(EntityKind::Request, encode(&request)?).await?;
                store
                    .update_entity(
                        EntityKind::User,
                        user.id,
                        fields(json!({ "sent_requests_count": user.sent_requests_count + 1 })),
                    )
                    .await?;
                Ok(CommitReceipt {
                    reply: "Your request has been sent.".to_string(),
                    menu: Some(user.role),
                    event: Some(QueuedEvent::new_request(request_id)),
                    owner: None,
                })
            }
            CommitRule::SubmitResponse => {
                let request = open_request_from(store, &session.context).await?;
                let response = Response {
                    id: 0,
                    request_id: request.id,
                    supplier_id: subject_id,
                    price: required_field(session, "price")?,
                    eta: required_field(session, "eta")?,
                    description: required_field(session, "description")?,
                    media: session.media_items.clone(),
                    status: ResponseStatus::Pending,
                };
                let response_id = store.save_entity(EntityKind::Response, encode(&response)?).await?;
                Ok(CommitReceipt {
                    reply: "Your response has been sent.".to_string(),
                    menu: Some(Role::Supplier),
                    event: Some(QueuedEvent::new_response(request.id, response_id)),
                    owner: Some(request.consumer_id),
                })
            }
            CommitRule::AssignRole => {
                let target: SubjectId = required_field(session, "target")?
                    .parse()
                    .map_err(|_| ValidationError::new("Please enter a numeric id."))?;
                let role: Role = required_field(session, "role")?
                    .parse()
                    .map_err(ValidationError::new)?;
                let user = find_user(store, target).await?.ok_or(RelayError::NotFound {
                    kind: EntityKind::User,
                    id: target,
                })?;
                store
                    .update_entity(EntityKind::User, user.id, fields(json!({ "role": role })))
                    .await?;
                info!(target = %target, role = %role, "Role assigned");
                Ok(CommitReceipt {
                    reply: format!("Role of user {target} changed to {role}."),
                    menu: None,
                    event: None,
                    owner: None,
                })
            }
            CommitRule::Broadcast => {
                let text = required_field(session, "text")?;
                Ok(CommitReceipt {
                    reply: "Broadcast accepted.".to_string(),
                    menu: None,
                    event: Some(QueuedEvent::broadcast(text)),
                    owner: None,
                })
            }
        }
    }

    /// Notify every target through the gate. Failures are logged per target.
    async fn fan_out(
        &self,
        subject_id: SubjectId,
        rule: FanOut,
        owner: Option<SubjectId>,
        event: QueuedEvent,
    ) -> FanOutReport {
        let targets: Vec<SubjectId> = match rule {
            FanOut::None => Vec::new(),
            FanOut::RequestOwner => owner.into_iter().collect(),
            FanOut::RegisteredSuppliers | FanOut::AllRegistered => {
                let role = (rule == FanOut::RegisteredSuppliers).then_some(Role::Supplier);
                match registered_users(self.store.as_ref(), role).await {
                    Ok(users) => users.into_iter().map(|u| u.subject_id).collect(),
                    Err(err) => {
                        error!(subject_id = %subject_id, error = %err, "Failed to resolve notification targets");
                        Vec::new()
                    }
                }
            }
        };

        let mut report = FanOutReport::default();
        for target in targets {
            match self.dispatcher.notify(target, event.clone()).await {
                Ok(Delivery::Delivered) => report.delivered += 1,
                Ok(Delivery::Queued) => report.queued += 1,
                Ok(Delivery::Dropped) => report.dropped += 1,
                Err(err) => {
                    warn!(target = %target, kind = %event.kind, error = %err, "Notification failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            subject_id = %subject_id,
            kind = %event.kind,
            delivered = report.delivered,
            queued = report.queued,
            "Commit fanned out"
        );
        report
    }

    async fn send(&self, subject_id: SubjectId, message: Outbound) {
        if let Err(err) = deliver(self.transport.as_ref(), subject_id, message).await {
            warn!(subject_id = %subject_id, error = %err, "Failed to send workflow reply");
        }
    }

    pub fn definition(&self, kind: WorkflowKind) -> Arc<WorkflowDefinition> {
        self.catalog.definition(kind)
    }
}

fn is_rejection(err: &RelayError) -> bool {
    err.is_stale() || matches!(err, RelayError::Permission { .. } | RelayError::Validation(_))
}

fn required_field(session: &WorkflowSession, name: &str) -> Result<String, RelayError> {
    session
        .field(name)
        .map(str::to_string)
        .ok_or_else(|| ValidationError::new(format!("Missing {name}; please start again.")).into())
}

/// The request a supplier is answering; it must still be open.
async fn open_request_from(store: &dyn Persistence, context: &Fields) -> Result<Request, RelayError> {
    let request_id: EntityId = context
        .get("request_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ValidationError::new("No request selected."))?;
    let request = load_request(store, request_id)
        .await?
        .ok_or(RelayError::NotFound {
            kind: EntityKind::Request,
            id: request_id,
        })?;
    if !request.is_open() {
        return Err(RelayError::StaleReferent {
            kind: EntityKind::Request,
            id: request_id,
            expected: "open",
        });
    }
    Ok(request)
}
