//! Outbound chat transport.
//!
//! The relay only ever addresses a single known subject. Concrete wire
//! formats live behind [`Transport`]; [`JsonLinesTransport`] is the adapter
//! used by the binary.

pub mod json_lines;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub use json_lines::JsonLinesTransport;

use crate::SubjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Document,
}

/// An attachment reference as handed to us by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    #[serde(rename = "ref")]
    pub reference: String,
}

impl MediaItem {
    pub fn photo(reference: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Photo,
            reference: reference.into(),
        }
    }

    pub fn document(reference: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Document,
            reference: reference.into(),
        }
    }
}

/// A labeled choice the subject can select; `data` comes back verbatim as
/// an inbound action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSet {
    pub choices: Vec<Choice>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: impl Into<String>, data: impl ToString) -> Self {
        self.choices.push(Choice {
            label: label.into(),
            data: data.to_string(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Delivery to subject {subject_id} was rejected: {reason}")]
    Rejected { subject_id: SubjectId, reason: String },

    #[error("Transport I/O error: {message}")]
    Io { message: String },

    #[error("Failed to encode outbound message: {message}")]
    Encoding { message: String },
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(
        &self,
        subject_id: SubjectId,
        text: String,
        actions: Option<ActionSet>,
    ) -> Result<(), TransportError>;

    async fn send_media_group(
        &self,
        subject_id: SubjectId,
        items: Vec<MediaItem>,
        caption: String,
        actions: Option<ActionSet>,
    ) -> Result<(), TransportError>;
}

/// A rendered message: text, optional attachments and optional actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outbound {
    pub text: String,
    pub media: Vec<MediaItem>,
    pub actions: Option<ActionSet>,
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, media: Vec<MediaItem>) -> Self {
        self.media = media;
        self
    }

    pub fn with_actions(mut self, actions: ActionSet) -> Self {
        self.actions = (!actions.is_empty()).then_some(actions);
        self
    }
}

/// Deliver a rendered message. With attachments, the text rides as the
/// group caption and the actions follow as a separate prompt.
pub async fn deliver(
    transport: &dyn Transport,
    subject_id: SubjectId,
    message: Outbound,
) -> Result<(), TransportError> {
    if message.media.is_empty() {
        return transport
            .send_text(subject_id, message.text, message.actions)
            .await;
    }

    transport
        .send_media_group(subject_id, message.media, message.text, None)
        .await?;
    if let Some(actions) = message.actions {
        transport
            .send_text(subject_id, "Actions:".to_string(), Some(actions))
            .await?;
    }
    Ok(())
}
