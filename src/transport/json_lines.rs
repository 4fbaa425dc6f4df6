use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{ActionSet, MediaItem, Transport, TransportError};
use crate::SubjectId;

/// Writes each outbound message as one JSON object per line.
pub struct JsonLinesTransport {
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line<'a> {
    Text {
        subject: SubjectId,
        text: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        actions: Option<&'a ActionSet>,
    },
    MediaGroup {
        subject: SubjectId,
        items: &'a [MediaItem],
        caption: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        actions: Option<&'a ActionSet>,
    },
}

impl JsonLinesTransport {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    async fn write_line(&self, line: &Line<'_>) -> Result<(), TransportError> {
        let mut encoded = serde_json::to_vec(line).map_err(|e| TransportError::Encoding {
            message: e.to_string(),
        })?;
        encoded.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&encoded).await.map_err(io_error)?;
        out.flush().await.map_err(io_error)
    }
}

fn io_error(err: std::io::Error) -> TransportError {
    TransportError::Io {
        message: err.to_string(),
    }
}

#[async_trait]
impl Transport for JsonLinesTransport {
    async fn send_text(
        &self,
        subject_id: SubjectId,
        text: String,
        actions: Option<ActionSet>,
    ) -> Result<(), TransportError> {
        self.write_line(&Line::Text {
            subject: subject_id,
            text: &text,
            actions: actions.as_ref(),
        })
        .await
    }

    async fn send_media_group(
        &self,
        subject_id: SubjectId,
        items: Vec<MediaItem>,
        caption: String,
        actions: Option<ActionSet>,
    ) -> Result<(), TransportError> {
        self.write_line(&Line::MediaGroup {
            subject: subject_id,
            items: &items,
            caption: &caption,
            actions: actions.as_ref(),
        })
        .await
    }
}
