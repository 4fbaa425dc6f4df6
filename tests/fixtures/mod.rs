//! Shared harness for integration tests: a fully wired relay over an
//! in-memory store, a manual clock and a transport that records every send.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use supply_relay::actions::ActionCode;
use supply_relay::domain::{find_user, Role, User};
use supply_relay::persistence::{encode, EntityKind, InMemoryStore, Persistence};
use supply_relay::transport::{ActionSet, MediaItem, Transport, TransportError};
use supply_relay::{Inbound, ManualClock, Relay, RelayConfig, SubjectId};

pub const ADMIN: SubjectId = 900;

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub subject: SubjectId,
    pub text: String,
    pub media: Vec<MediaItem>,
    pub actions: Vec<String>,
}

/// Transport that keeps every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn for_subject(&self, subject: SubjectId) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|sent| sent.subject == subject)
            .collect()
    }

    pub fn texts_for(&self, subject: SubjectId) -> Vec<String> {
        self.for_subject(subject)
            .into_iter()
            .map(|sent| sent.text)
            .collect()
    }

    pub fn last_text(&self, subject: SubjectId) -> Option<String> {
        self.texts_for(subject).pop()
    }

    /// True if any message to `subject` contains `needle`.
    pub fn saw(&self, subject: SubjectId, needle: &str) -> bool {
        self.texts_for(subject).iter().any(|text| text.contains(needle))
    }

    pub fn count_containing(&self, subject: SubjectId, needle: &str) -> usize {
        self.texts_for(subject)
            .iter()
            .filter(|text| text.contains(needle))
            .count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    fn push(&self, subject: SubjectId, text: String, media: Vec<MediaItem>, actions: Option<ActionSet>) {
        let actions = actions
            .map(|set| set.choices.into_iter().map(|choice| choice.data).collect())
            .unwrap_or_default();
        self.sent.lock().unwrap().push(Sent {
            subject,
            text,
            media,
            actions,
        });
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(
        &self,
        subject_id: SubjectId,
        text: String,
        actions: Option<ActionSet>,
    ) -> Result<(), TransportError> {
        self.push(subject_id, text, Vec::new(), actions);
        Ok(())
    }

    async fn send_media_group(
        &self,
        subject_id: SubjectId,
        items: Vec<MediaItem>,
        caption: String,
        actions: Option<ActionSet>,
    ) -> Result<(), TransportError> {
        self.push(subject_id, caption, items, actions);
        Ok(())
    }
}

pub struct Harness {
    pub relay: Relay,
    pub store: Arc<InMemoryStore>,
    pub transport: Arc<RecordingTransport>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        let mut config = RelayConfig::default();
        config.bot.admin_ids = vec![ADMIN];
        Self::with_config(config)
    }

    pub fn with_config(config: RelayConfig) -> Self {
        Self::wrapping(config, |recording| recording)
    }

    /// Route sends through `wrap`, which ends in the recording transport.
    pub fn wrapping(
        config: RelayConfig,
        wrap: impl FnOnce(Arc<RecordingTransport>) -> Arc<dyn Transport>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let clock = Arc::new(ManualClock::default());
        let relay = Relay::build_with_clock(&config, store.clone(), wrap(transport.clone()), clock.clone());
        Self {
            relay,
            store,
            transport,
            clock,
        }
    }

    /// Store a registered user with the given role.
    pub async fn register(&self, subject: SubjectId, role: Role) {
        let user = User {
            id: 0,
            subject_id: subject,
            username: Some(format!("user{subject}")),
            full_name: None,
            phone: Some("77011234567".into()),
            role,
            is_registered: true,
            sent_requests_count: 0,
        };
        self.store
            .save_entity(EntityKind::User, encode(&user).unwrap())
            .await
            .unwrap();
    }

    pub async fn user(&self, subject: SubjectId) -> Option<User> {
        find_user(self.store.as_ref(), subject).await.unwrap()
    }

    pub async fn send(&self, inbound: Inbound) {
        self.relay.router.handle(inbound).await;
    }

    pub async fn text(&self, subject: SubjectId, text: &str) {
        self.send(Inbound::text(subject, text)).await;
    }

    pub async fn action(&self, subject: SubjectId, code: ActionCode) {
        self.send(Inbound::action(subject, code)).await;
    }

    pub async fn command(&self, subject: SubjectId, name: &str) {
        self.send(Inbound::command(subject, name)).await;
    }

    pub async fn attach(&self, subject: SubjectId, media: MediaItem) {
        self.send(Inbound::attachment(subject, media)).await;
    }

    /// Walk a consumer through a full request and confirm it.
    pub async fn create_request(&self, consumer: SubjectId, text: &str) {
        self.action(consumer, ActionCode::CreateRequest).await;
        self.text(consumer, text).await;
        self.action(consumer, ActionCode::Done).await;
        self.action(consumer, ActionCode::Confirm).await;
    }

    /// Walk a supplier through a full response and confirm it.
    pub async fn reply_to(&self, supplier: SubjectId, request_id: i64, price: &str) {
        self.action(supplier, ActionCode::SupplierReply(request_id)).await;
        self.text(supplier, price).await;
        self.text(supplier, "3 days").await;
        self.text(supplier, "steel, DN50").await;
        self.action(supplier, ActionCode::Done).await;
        self.action(supplier, ActionCode::Confirm).await;
    }

    pub async fn is_busy(&self, subject: SubjectId) -> bool {
        self.relay.gate.is_busy(subject).await
    }

    pub async fn has_session(&self, subject: SubjectId) -> bool {
        self.relay.engine.has_session(subject).await
    }
}
