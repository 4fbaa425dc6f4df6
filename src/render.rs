//! Presentation: every subject-facing string and action set.

use crate::actions::ActionCode;
use crate::domain::{Request, Response, Role, User};
use crate::error::RelayError;
use crate::persistence::EntityKind;
use crate::transport::{ActionSet, Outbound};
use crate::workflow::{StepInput, StepSpec, WorkflowSession};

pub const EXPIRED_NOTICE: &str =
    "Your session expired. You have been returned to normal mode.";
pub const FALLBACK_HINT: &str = "Use /start to begin or /menu for the menu.";
pub const IGNORED_HINT: &str = "Please answer the current question or use the buttons above.";
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again later.";

pub fn request_view(request: &Request) -> String {
    let status = if request.is_open() { "open" } else { "closed" };
    format!(
        "Request #{}\nStatus: {}\n\nWhat is needed:\n{}",
        request.id, status, request.text
    )
}

pub fn response_view(response: &Response) -> String {
    let status = match response.status {
        crate::domain::ResponseStatus::Pending => "pending",
        crate::domain::ResponseStatus::Selected => "selected",
    };
    format!(
        "Response #{}\nPrice: {}\nDelivery time: {}\n\nDescription:\n{}\n\nResponse status: {}",
        response.id, response.price, response.eta, response.description, status
    )
}

/// The best way to reach a user: profile link, then phone, then a direct link.
pub fn contact_view(user: &User) -> String {
    if let Some(username) = user.username.as_deref().filter(|u| !u.is_empty()) {
        return format!("https://t.me/{username}");
    }
    if let Some(phone) = user.phone.as_deref().filter(|p| !p.is_empty()) {
        return phone.to_string();
    }
    format!("tg://user?id={}", user.subject_id)
}

pub fn main_menu(role: Role) -> Outbound {
    let actions = match role {
        Role::Consumer => ActionSet::new()
            .with("Create request", ActionCode::CreateRequest)
            .with("My requests", ActionCode::MyRequests),
        Role::Supplier => ActionSet::new()
            .with("Open requests", ActionCode::OpenRequests)
            .with("My responses", ActionCode::MyResponses),
        Role::Admin => admin_actions(),
    };
    Outbound::text("Menu:").with_actions(actions)
}

fn admin_actions() -> ActionSet {
    ActionSet::new()
        .with("Statistics", ActionCode::AdminStats)
        .with("Assign role", ActionCode::AdminSetRole)
        .with("Broadcast", ActionCode::AdminBroadcast)
}

pub fn admin_menu() -> Outbound {
    Outbound::text("Admin panel:").with_actions(admin_actions())
}

pub fn exit_prompt(text: &str) -> Outbound {
    Outbound::text(text).with_actions(ActionSet::new().with("Exit", ActionCode::ExitProcess))
}

pub fn step_prompt(step: &StepSpec) -> Outbound {
    let mut actions = ActionSet::new();
    if let Some(shortcut) = step.shortcut {
        actions = actions.with(shortcut.label, ActionCode::Shortcut);
    }
    if step.accumulates_media() {
        actions = actions.with("Done", ActionCode::Done);
    }
    Outbound::text(step.prompt).with_actions(actions)
}

pub fn reprompt(step: &StepSpec, reason: &str) -> Outbound {
    let mut message = step_prompt(step);
    message.text = format!("{reason}\n{}", step.prompt);
    message
}

pub fn media_added(count: usize) -> Outbound {
    Outbound::text(format!(
        "Attachment added ({count} so far). Send more or press Done."
    ))
    .with_actions(ActionSet::new().with("Done", ActionCode::Done))
}

/// Everything collected so far, with the confirm/edit/cancel choices.
pub fn preview(session: &WorkflowSession) -> Outbound {
    let definition = &session.definition;
    let mut text = definition.preview_heading.to_string();
    for step in &definition.steps {
        if let StepInput::Text(_) = step.input {
            if let Some(value) = session.field(step.field) {
                text.push_str(&format!("\n\n{}:\n{}", step.label, value));
            }
        }
    }

    Outbound::text(text)
        .with_media(session.media_items.clone())
        .with_actions(
            ActionSet::new()
                .with("Confirm", ActionCode::Confirm)
                .with("Edit", ActionCode::Edit)
                .with("Cancel", ActionCode::Cancel),
        )
}

pub fn my_request_item(request: &Request) -> Outbound {
    Outbound::text(request_view(request))
        .with_media(request.media.clone())
        .with_actions(
            ActionSet::new()
                .with("View responses", ActionCode::ViewResponses(request.id))
                .with("Close request", ActionCode::CloseRequest(request.id)),
        )
}

pub fn open_request_item(request: &Request) -> Outbound {
    Outbound::text(request_view(request))
        .with_media(request.media.clone())
        .with_actions(ActionSet::new().with("Reply", ActionCode::SupplierReply(request.id)))
}

pub fn response_item(response: &Response) -> Outbound {
    Outbound::text(response_view(response))
        .with_media(response.media.clone())
        .with_actions(response_actions(response))
}

fn response_actions(response: &Response) -> ActionSet {
    ActionSet::new()
        .with("Contact supplier", ActionCode::ContactSupplier(response.id))
        .with(
            "Stop responses for this request",
            ActionCode::StopResponses(response.request_id),
        )
}

pub fn own_response_item(request: Option<&Request>, response: &Response) -> Outbound {
    let request_part = request
        .map(request_view)
        .unwrap_or_else(|| "Request not found".to_string());
    Outbound::text(format!("{request_part}\n\n{}", response_view(response)))
        .with_media(response.media.clone())
}

pub fn new_request_notice(request: &Request) -> Outbound {
    let mut message = open_request_item(request);
    message.text = format!("New request!\n\n{}", message.text);
    message
}

pub fn new_response_notice(request: &Request, response: &Response) -> Outbound {
    Outbound::text(format!(
        "A supplier replied to your request.\n\n{}\n\n{}",
        request_view(request),
        response_view(response)
    ))
    .with_media(response.media.clone())
    .with_actions(response_actions(response))
}

pub fn response_selected_notice(request: &Request, response: &Response, contact: &str) -> Outbound {
    Outbound::text(format!(
        "Your response was selected!\n\n{}\n\n{}\n\nConsumer contact: {}",
        request_view(request),
        response_view(response),
        contact
    ))
}

pub fn broadcast_notice(text: &str) -> Outbound {
    Outbound::text(format!("Broadcast:\n\n{text}"))
}

/// What the subject is told when an operation is refused. `None` means the
/// error is ours and gets the generic failure message.
pub fn rejection_text(err: &RelayError) -> Option<String> {
    let text = match err {
        RelayError::Validation(err) => err.reason.clone(),
        RelayError::Permission { required } if required == "admin" => "Access denied.".to_string(),
        RelayError::Permission { required } => {
            format!("This action is only available to a registered {required}.")
        }
        RelayError::StaleReferent {
            kind: EntityKind::Request,
            ..
        } => "This request is already closed.".to_string(),
        RelayError::StaleReferent { kind, .. } => format!("This {kind} is no longer available."),
        RelayError::NotFound { kind, .. } => {
            let mut name = kind.as_str().to_string();
            if let Some(first) = name.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            format!("{name} not found.")
        }
        RelayError::MalformedEvent { .. } | RelayError::Transport(_) | RelayError::Persistence(_) => {
            return None
        }
    };
    Some(text)
}
