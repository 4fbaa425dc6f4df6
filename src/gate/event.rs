use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::persistence::{EntityId, Fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A consumer opened a request; addressed to suppliers.
    NewRequest,
    /// A supplier answered a request; addressed to its owner.
    NewResponse,
    /// A consumer picked a response; addressed to its supplier.
    ResponseSelected,
    /// Free-form admin announcement.
    Broadcast,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::NewRequest => "new_request",
            EventKind::NewResponse => "new_response",
            EventKind::ResponseSelected => "response_selected",
            EventKind::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

/// A notification deferred until its target subject is free.
///
/// Payloads carry references (ids), not rendered text, so that the
/// referent can be re-validated at delivery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub kind: EventKind,
    pub payload: Fields,
}

impl QueuedEvent {
    pub fn new(kind: EventKind, payload: Fields) -> Self {
        Self { kind, payload }
    }

    pub fn new_request(request_id: EntityId) -> Self {
        let mut payload = Fields::new();
        payload.insert("request_id".into(), Value::from(request_id));
        Self::new(EventKind::NewRequest, payload)
    }

    pub fn new_response(request_id: EntityId, response_id: EntityId) -> Self {
        let mut payload = Fields::new();
        payload.insert("request_id".into(), Value::from(request_id));
        payload.insert("response_id".into(), Value::from(response_id));
        Self::new(EventKind::NewResponse, payload)
    }

    pub fn response_selected(response_id: EntityId, consumer_contact: impl Into<String>) -> Self {
        let mut payload = Fields::new();
        payload.insert("response_id".into(), Value::from(response_id));
        payload.insert("contact".into(), Value::from(consumer_contact.into()));
        Self::new(EventKind::ResponseSelected, payload)
    }

    pub fn broadcast(text: impl Into<String>) -> Self {
        let mut payload = Fields::new();
        payload.insert("text".into(), Value::from(text.into()));
        Self::new(EventKind::Broadcast, payload)
    }

    pub fn id(&self, key: &str) -> Option<EntityId> {
        self.payload.get(key).and_then(Value::as_i64)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
