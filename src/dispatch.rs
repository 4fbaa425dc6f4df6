//! Cross-subject notifications, arbitrated by the busy gate.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{load_request, load_response, ResponseStatus};
use crate::error::RelayError;
use crate::gate::{Admission, BusyGate, EventKind, QueuedEvent};
use crate::persistence::{EntityKind, Persistence};
use crate::render;
use crate::transport::{deliver, Outbound, Transport};
use crate::SubjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Queued,
    /// The referent was already invalid; nothing was sent.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub dropped: usize,
    pub failed: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.delivered + self.dropped + self.failed
    }
}

pub struct NotificationDispatcher {
    gate: Arc<BusyGate>,
    store: Arc<dyn Persistence>,
    transport: Arc<dyn Transport>,
}

impl NotificationDispatcher {
    pub fn new(gate: Arc<BusyGate>, store: Arc<dyn Persistence>, transport: Arc<dyn Transport>) -> Self {
        Self {
            gate,
            store,
            transport,
        }
    }

    /// Deliver now, or queue behind the subject's busy window.
    pub async fn notify(&self, subject_id: SubjectId, event: QueuedEvent) -> Result<Delivery, RelayError> {
        let kind = event.kind;
        let event = match self.gate.admit(subject_id, event).await {
            Admission::Queued => {
                info!(subject_id = %subject_id, kind = %kind, "Notification queued");
                return Ok(Delivery::Queued);
            }
            Admission::Free { event, leftovers } => {
                // A window that lapsed without a sweep still owes its queue.
                if !leftovers.is_empty() {
                    self.deliver_queued(subject_id, leftovers).await;
                }
                event
            }
        };

        let message = match self.render(&event).await {
            Ok(message) => message,
            Err(err) if err.is_stale() => {
                debug!(subject_id = %subject_id, kind = %event.kind, error = %err, "Notification dropped");
                return Ok(Delivery::Dropped);
            }
            Err(err) => return Err(err),
        };

        deliver(self.transport.as_ref(), subject_id, message).await?;
        debug!(subject_id = %subject_id, kind = %event.kind, "Notification delivered");
        Ok(Delivery::Delivered)
    }

    /// Clear the subject's window and deliver whatever queued up, in order.
    /// Events whose referent is gone are dropped; send failures are counted
    /// and the flush carries on.
    pub async fn flush(&self, subject_id: SubjectId) -> FlushReport {
        let events = self.gate.clear_busy(subject_id).await;
        self.deliver_queued(subject_id, events).await
    }

    async fn deliver_queued(&self, subject_id: SubjectId, events: Vec<QueuedEvent>) -> FlushReport {
        let mut report = FlushReport::default();

        for event in events {
            let message = match self.render(&event).await {
                Ok(message) => message,
                Err(err) if err.is_stale() => {
                    debug!(subject_id = %subject_id, kind = %event.kind, error = %err, "Queued event dropped");
                    report.dropped += 1;
                    continue;
                }
                Err(err) => {
                    warn!(subject_id = %subject_id, kind = %event.kind, error = %err, "Failed to render queued event");
                    report.failed += 1;
                    continue;
                }
            };

            match deliver(self.transport.as_ref(), subject_id, message).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(subject_id = %subject_id, kind = %event.kind, error = %err, "Failed to deliver queued event");
                    report.failed += 1;
                }
            }
        }

        if report.total() > 0 {
            info!(
                subject_id = %subject_id,
                delivered = report.delivered,
                dropped = report.dropped,
                failed = report.failed,
                "Queue flushed"
            );
        }
        report
    }

    /// Re-read the event's referents and build the message. Fails with a
    /// stale error when the referent no longer justifies a notification.
    async fn render(&self, event: &QueuedEvent) -> Result<Outbound, RelayError> {
        let store = self.store.as_ref();
        match event.kind {
            EventKind::NewRequest => {
                let request_id = required_id(event, "request_id")?;
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
                Ok(render::new_request_notice(&request))
            }
            EventKind::NewResponse => {
                let request_id = required_id(event, "request_id")?;
                let response_id = required_id(event, "response_id")?;
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
                let response = load_response(store, response_id)
                    .await?
                    .ok_or(RelayError::NotFound {
                        kind: EntityKind::Response,
                        id: response_id,
                    })?;
                Ok(render::new_response_notice(&request, &response))
            }
            EventKind::ResponseSelected => {
                let response_id = required_id(event, "response_id")?;
                let contact = event.text("contact").ok_or(RelayError::MalformedEvent {
                    kind: event.kind,
                    field: "contact",
                })?;
                let response = load_response(store, response_id)
                    .await?
                    .ok_or(RelayError::NotFound {
                        kind: EntityKind::Response,
                        id: response_id,
                    })?;
                if response.status != ResponseStatus::Selected {
                    return Err(RelayError::StaleReferent {
                        kind: EntityKind::Response,
                        id: response_id,
                        expected: "selected",
                    });
                }
                let request = load_request(store, response.request_id)
                    .await?
                    .ok_or(RelayError::NotFound {
                        kind: EntityKind::Request,
                        id: response.request_id,
                    })?;
                Ok(render::response_selected_notice(&request, &response, contact))
            }
            EventKind::Broadcast => {
                let text = event.text("text").ok_or(RelayError::MalformedEvent {
                    kind: event.kind,
                    field: "text",
                })?;
                Ok(render::broadcast_notice(text))
            }
        }
    }
}

fn required_id(event: &QueuedEvent, field: &'static str) -> Result<i64, RelayError> {
    event.id(field).ok_or(RelayError::MalformedEvent {
        kind: event.kind,
        field,
    })
}
