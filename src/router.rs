//! Routes each inbound interaction to a workflow, a browsing mode or a
//! one-shot action.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::access::{AccessGuard, Requirement};
use crate::actions::ActionCode;
use crate::config::GateConfig;
use crate::dispatch::NotificationDispatcher;
use crate::domain::{
    find_user, get_or_create_user, load_request, load_response, open_requests,
    responses_by_supplier, responses_for_request, set_request_status, Profile, Request,
    RequestStatus, ResponseStatus, Role, User,
};
use crate::error::RelayError;
use crate::gate::{BusyGate, QueuedEvent};
use crate::persistence::{fields, EntityId, EntityKind, Fields, Persistence};
use crate::render;
use crate::transport::{deliver, MediaItem, Outbound, Transport};
use crate::workflow::{InputDisposition, WorkflowEngine, WorkflowInput, WorkflowKind};
use crate::SubjectId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundPayload {
    Command { name: String },
    Text { text: String },
    Attachment { media: MediaItem },
    Action { data: String },
}

/// One interaction as reported by the chat platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    pub subject: SubjectId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(flatten)]
    pub payload: InboundPayload,
}

impl Inbound {
    pub fn new(subject: SubjectId, payload: InboundPayload) -> Self {
        Self {
            subject,
            username: None,
            full_name: None,
            payload,
        }
    }

    pub fn command(subject: SubjectId, name: &str) -> Self {
        Self::new(subject, InboundPayload::Command { name: name.to_string() })
    }

    pub fn text(subject: SubjectId, text: &str) -> Self {
        Self::new(subject, InboundPayload::Text { text: text.to_string() })
    }

    pub fn attachment(subject: SubjectId, media: MediaItem) -> Self {
        Self::new(subject, InboundPayload::Attachment { media })
    }

    pub fn action(subject: SubjectId, code: ActionCode) -> Self {
        Self::new(subject, InboundPayload::Action { data: code.to_string() })
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            InboundPayload::Command { .. } => "command",
            InboundPayload::Text { .. } => "text",
            InboundPayload::Attachment { .. } => "attachment",
            InboundPayload::Action { .. } => "action",
        }
    }

    pub fn profile(&self) -> Profile {
        Profile {
            username: self.username.clone(),
            full_name: self.full_name.clone(),
        }
    }
}

pub struct Router {
    engine: Arc<WorkflowEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    gate: Arc<BusyGate>,
    store: Arc<dyn Persistence>,
    transport: Arc<dyn Transport>,
    guard: AccessGuard,
    ttls: GateConfig,
}

impl Router {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        dispatcher: Arc<NotificationDispatcher>,
        gate: Arc<BusyGate>,
        store: Arc<dyn Persistence>,
        transport: Arc<dyn Transport>,
        guard: AccessGuard,
        ttls: GateConfig,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            gate,
            store,
            transport,
            guard,
            ttls,
        }
    }

    /// Route one interaction and turn any error into a reply.
    pub async fn handle(&self, inbound: Inbound) {
        let subject_id = inbound.subject;
        if let Err(err) = self.route(inbound).await {
            self.report_error(subject_id, &err).await;
        }
    }

    pub async fn route(&self, inbound: Inbound) -> Result<(), RelayError> {
        let user = get_or_create_user(self.store.as_ref(), inbound.subject, &inbound.profile()).await?;
        match inbound.payload {
            InboundPayload::Command { name } => self.command(&user, name.trim_start_matches('/')).await,
            InboundPayload::Text { text } => {
                self.workflow_input(user.subject_id, WorkflowInput::Text(text), render::FALLBACK_HINT)
                    .await
            }
            InboundPayload::Attachment { media } => {
                self.workflow_input(user.subject_id, WorkflowInput::Attachment(media), render::FALLBACK_HINT)
                    .await
            }
            InboundPayload::Action { data } => match data.parse::<ActionCode>() {
                Ok(code) => self.action(&user, code).await,
                Err(err) => {
                    debug!(subject_id = %user.subject_id, error = %err, "Unrouted action");
                    self.reply(user.subject_id, Outbound::text(render::FALLBACK_HINT)).await;
                    Ok(())
                }
            },
        }
    }

    pub async fn report_error(&self, subject_id: SubjectId, err: &RelayError) {
        match render::rejection_text(err) {
            Some(text) => {
                debug!(subject_id = %subject_id, error = %err, "Interaction rejected");
                self.reply(subject_id, Outbound::text(text)).await;
            }
            None if matches!(err, RelayError::Transport(_)) => {
                warn!(subject_id = %subject_id, error = %err, "Reply could not be delivered");
            }
            None => {
                error!(subject_id = %subject_id, error = %err, "Interaction failed");
                self.reply(subject_id, Outbound::text(render::GENERIC_FAILURE)).await;
            }
        }
    }

    async fn command(&self, user: &User, name: &str) -> Result<(), RelayError> {
        let subject_id = user.subject_id;
        match name {
            "start" => {
                self.engine.abandon(subject_id).await;
                if user.is_registered {
                    self.reply(subject_id, Outbound::text("Welcome back!")).await;
                    self.reply(subject_id, render::main_menu(user.role)).await;
                    Ok(())
                } else {
                    self.engine
                        .start(subject_id, WorkflowKind::Registration, Fields::new())
                        .await
                }
            }
            "menu" => {
                self.engine.abandon(subject_id).await;
                if user.is_registered {
                    self.reply(subject_id, render::main_menu(user.role)).await;
                } else {
                    self.reply(subject_id, Outbound::text("Please register first with /start."))
                        .await;
                }
                Ok(())
            }
            "admin" => {
                self.guard.check(subject_id, Some(user), Requirement::Admin)?;
                self.engine.abandon(subject_id).await;
                self.reply(subject_id, render::admin_menu()).await;
                Ok(())
            }
            _ => {
                self.reply(subject_id, Outbound::text(render::FALLBACK_HINT)).await;
                Ok(())
            }
        }
    }

    async fn action(&self, user: &User, code: ActionCode) -> Result<(), RelayError> {
        let subject_id = user.subject_id;
        match code {
            ActionCode::Refresh => {
                if user.is_registered {
                    self.reply(subject_id, render::main_menu(user.role)).await;
                }
                Ok(())
            }
            ActionCode::CreateRequest => {
                self.engine
                    .start(subject_id, WorkflowKind::ConsumerRequest, Fields::new())
                    .await
            }
            ActionCode::SupplierReply(request_id) => {
                self.engine
                    .start(
                        subject_id,
                        WorkflowKind::SupplierResponse,
                        fields(json!({ "request_id": request_id })),
                    )
                    .await
            }
            ActionCode::AdminSetRole => {
                self.engine
                    .start(subject_id, WorkflowKind::AdminSetRole, Fields::new())
                    .await
            }
            ActionCode::AdminBroadcast => {
                self.engine
                    .start(subject_id, WorkflowKind::AdminBroadcast, Fields::new())
                    .await
            }
            ActionCode::Done
            | ActionCode::Shortcut
            | ActionCode::Edit
            | ActionCode::Cancel
            | ActionCode::Confirm => {
                let input = match code {
                    ActionCode::Done => WorkflowInput::Done,
                    ActionCode::Shortcut => WorkflowInput::Shortcut,
                    ActionCode::Edit => WorkflowInput::Edit,
                    ActionCode::Cancel => WorkflowInput::Cancel,
                    _ => WorkflowInput::Confirm,
                };
                self.workflow_input(subject_id, input, "This action is no longer available.")
                    .await
            }
            ActionCode::MyRequests => self.browse_my_requests(user).await,
            ActionCode::OpenRequests => self.browse_open_requests(user).await,
            ActionCode::MyResponses => self.browse_my_responses(user).await,
            ActionCode::ExitProcess => {
                self.engine.abandon(subject_id).await;
                self.dispatcher.flush(subject_id).await;
                self.reply(subject_id, Outbound::text("You are back in normal mode."))
                    .await;
                Ok(())
            }
            ActionCode::ViewResponses(request_id) => {
                let request = self.owned_request(user, request_id).await?;
                let responses = responses_for_request(self.store.as_ref(), request.id).await?;
                if responses.is_empty() {
                    self.reply(subject_id, Outbound::text("No responses yet.")).await;
                }
                for response in &responses {
                    self.reply(subject_id, render::response_item(response)).await;
                }
                Ok(())
            }
            ActionCode::CloseRequest(request_id) | ActionCode::StopResponses(request_id) => {
                let request = self.owned_request(user, request_id).await?;
                set_request_status(self.store.as_ref(), request.id, RequestStatus::Closed).await?;
                info!(subject_id = %subject_id, request_id = %request.id, "Request closed");
                self.reply(
                    subject_id,
                    Outbound::text("Request closed. No more responses will be accepted."),
                )
                .await;
                Ok(())
            }
            ActionCode::ContactSupplier(response_id) => self.select_response(user, response_id).await,
            ActionCode::AdminStats => {
                self.guard.check(subject_id, Some(user), Requirement::Admin)?;
                let stats = self.stats().await?;
                self.reply(subject_id, Outbound::text(stats)).await;
                Ok(())
            }
        }
    }

    async fn workflow_input(
        &self,
        subject_id: SubjectId,
        input: WorkflowInput,
        hint: &str,
    ) -> Result<(), RelayError> {
        if self.engine.handle(subject_id, input).await? == InputDisposition::NoSession {
            self.reply(subject_id, Outbound::text(hint)).await;
        }
        Ok(())
    }

    async fn browse_my_requests(&self, user: &User) -> Result<(), RelayError> {
        let subject_id = user.subject_id;
        self.guard
            .check(subject_id, Some(user), Requirement::Role(Role::Consumer))?;
        self.gate
            .set_busy(subject_id, "consumer_view_requests", self.ttls.short_flow_ttl_seconds)
            .await;

        let requests = open_requests(self.store.as_ref(), Some(subject_id)).await?;
        if requests.is_empty() {
            self.reply(subject_id, Outbound::text("You have no open requests."))
                .await;
        }
        for request in &requests {
            self.reply(subject_id, render::my_request_item(request)).await;
        }
        self.reply(
            subject_id,
            render::exit_prompt("You are browsing your requests. Press Exit to return to normal mode."),
        )
        .await;
        Ok(())
    }

    async fn browse_open_requests(&self, user: &User) -> Result<(), RelayError> {
        let subject_id = user.subject_id;
        self.guard
            .check(subject_id, Some(user), Requirement::Role(Role::Supplier))?;

        let requests = open_requests(self.store.as_ref(), None).await?;
        if requests.is_empty() {
            self.reply(subject_id, Outbound::text("There are no open requests."))
                .await;
            return Ok(());
        }

        self.gate
            .set_busy(subject_id, "supplier_view_open", self.ttls.long_flow_ttl_seconds)
            .await;
        for request in &requests {
            self.reply(subject_id, render::open_request_item(request)).await;
        }
        self.reply(
            subject_id,
            render::exit_prompt("You are browsing open requests. Press Exit to return to normal mode."),
        )
        .await;
        Ok(())
    }

    async fn browse_my_responses(&self, user: &User) -> Result<(), RelayError> {
        let subject_id = user.subject_id;
        self.guard
            .check(subject_id, Some(user), Requirement::Role(Role::Supplier))?;
        self.gate
            .set_busy(subject_id, "supplier_view_my_responses", self.ttls.long_flow_ttl_seconds)
            .await;

        let store = self.store.as_ref();
        let responses = responses_by_supplier(store, subject_id).await?;
        if responses.is_empty() {
            self.reply(subject_id, Outbound::text("You have no responses yet."))
                .await;
        }
        for response in &responses {
            let request = load_request(store, response.request_id).await?;
            self.reply(subject_id, render::own_response_item(request.as_ref(), response))
                .await;
        }
        self.reply(
            subject_id,
            render::exit_prompt("Done browsing. Press Exit to return to normal mode."),
        )
        .await;
        Ok(())
    }

    /// Mark a response selected, hand the consumer the supplier's contact and
    /// tell the supplier through the gate.
    async fn select_response(&self, user: &User, response_id: EntityId) -> Result<(), RelayError> {
        let store = self.store.as_ref();
        let subject_id = user.subject_id;

        let mut response = load_response(store, response_id)
            .await?
            .ok_or(RelayError::NotFound {
                kind: EntityKind::Response,
                id: response_id,
            })?;
        let owned = load_request(store, response.request_id)
            .await?
            .is_some_and(|request| request.consumer_id == subject_id);
        if !owned {
            return Err(RelayError::NotFound {
                kind: EntityKind::Response,
                id: response_id,
            });
        }
        let supplier = find_user(store, response.supplier_id)
            .await?
            .ok_or(RelayError::NotFound {
                kind: EntityKind::User,
                id: response.supplier_id,
            })?;

        store
            .update_entity(
                EntityKind::Response,
                response_id,
                fields(json!({ "status": ResponseStatus::Selected })),
            )
            .await?;
        response.status = ResponseStatus::Selected;
        info!(subject_id = %subject_id, response_id = %response_id, "Response selected");

        self.reply(
            subject_id,
            Outbound::text(format!(
                "Supplier contact:\n{}\n\nResponse:\n{}",
                render::contact_view(&supplier),
                render::response_view(&response)
            )),
        )
        .await;

        let event = QueuedEvent::response_selected(response_id, render::contact_view(user));
        if let Err(err) = self.dispatcher.notify(supplier.subject_id, event).await {
            warn!(supplier = %supplier.subject_id, error = %err, "Failed to notify supplier");
        }
        Ok(())
    }

    async fn owned_request(&self, user: &User, request_id: EntityId) -> Result<Request, RelayError> {
        load_request(self.store.as_ref(), request_id)
            .await?
            .filter(|request| request.consumer_id == user.subject_id)
            .ok_or(RelayError::NotFound {
                kind: EntityKind::Request,
                id: request_id,
            })
    }

    async fn stats(&self) -> Result<String, RelayError> {
        let users = self.count(EntityKind::User, json!({})).await?;
        let consumers = self.count(EntityKind::User, json!({ "role": Role::Consumer })).await?;
        let suppliers = self.count(EntityKind::User, json!({ "role": Role::Supplier })).await?;
        let requests = self.count(EntityKind::Request, json!({})).await?;
        let responses = self.count(EntityKind::Response, json!({})).await?;
        Ok(format!(
            "Statistics:\n- Users: {users}\n- Consumers: {consumers}\n- Suppliers: {suppliers}\n- Requests: {requests}\n- Responses: {responses}"
        ))
    }

    async fn count(&self, kind: EntityKind, filter: serde_json::Value) -> Result<usize, RelayError> {
        Ok(self.store.find_entities(kind, fields(filter)).await?.len())
    }

    async fn reply(&self, subject_id: SubjectId, message: Outbound) {
        if let Err(err) = deliver(self.transport.as_ref(), subject_id, message).await {
            warn!(subject_id = %subject_id, error = %err, "Failed to send reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_lines_deserialize_by_type() {
        let line = r#"{"subject": 5, "username": "ann", "type": "command", "name": "/start"}"#;
        let inbound: Inbound = serde_json::from_str(line).unwrap();
        assert_eq!(inbound.subject, 5);
        assert_eq!(inbound.profile().username.as_deref(), Some("ann"));
        assert_eq!(
            inbound.payload,
            InboundPayload::Command {
                name: "/start".into()
            }
        );

        let line = r#"{"subject": 5, "type": "attachment", "media": {"kind": "photo", "ref": "f1"}}"#;
        let inbound: Inbound = serde_json::from_str(line).unwrap();
        assert_eq!(inbound.kind(), "attachment");
        assert_eq!(
            inbound.payload,
            InboundPayload::Attachment {
                media: MediaItem::photo("f1")
            }
        );
    }

    #[test]
    fn action_constructor_uses_wire_code() {
        let inbound = Inbound::action(1, ActionCode::SupplierReply(9));
        assert_eq!(
            inbound.payload,
            InboundPayload::Action {
                data: "sup:reply:9".into()
            }
        );
    }
}
