//! Typed views over the stored business entities.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

use crate::persistence::{
    encode, fields, Entity, EntityId, EntityKind, Persistence, PersistenceError,
};
use crate::transport::MediaItem;
use crate::SubjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Consumer,
    Supplier,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Consumer => "consumer",
            Role::Supplier => "supplier",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "consumer" => Ok(Role::Consumer),
            "supplier" => Ok(Role::Supplier),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: EntityId,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub is_registered: bool,
    #[serde(default)]
    pub sent_requests_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: EntityId,
    pub consumer_id: SubjectId,
    pub text: String,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    pub status: RequestStatus,
}

impl Request {
    pub fn is_open(&self) -> bool {
        self.status == RequestStatus::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Pending,
    Selected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: EntityId,
    pub request_id: EntityId,
    pub supplier_id: SubjectId,
    pub price: String,
    pub eta: String,
    pub description: String,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    pub status: ResponseStatus,
}

/// Profile details the chat platform reports alongside each interaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

fn decode_all<T: serde::de::DeserializeOwned>(
    entities: Vec<Entity>,
) -> Result<Vec<T>, PersistenceError> {
    entities.iter().map(Entity::decode).collect()
}

pub async fn find_user(
    store: &dyn Persistence,
    subject_id: SubjectId,
) -> Result<Option<User>, PersistenceError> {
    let found = store
        .find_entities(EntityKind::User, fields(json!({ "subject_id": subject_id })))
        .await?;
    found.first().map(Entity::decode).transpose()
}

/// Fetch the subject's user record, creating it on first contact and
/// refreshing the profile fields otherwise.
pub async fn get_or_create_user(
    store: &dyn Persistence,
    subject_id: SubjectId,
    profile: &Profile,
) -> Result<User, PersistenceError> {
    if let Some(mut user) = find_user(store, subject_id).await? {
        if user.username != profile.username || user.full_name != profile.full_name {
            user.username = profile.username.clone();
            user.full_name = profile.full_name.clone();
            store
                .update_entity(
                    EntityKind::User,
                    user.id,
                    fields(json!({
                        "username": user.username,
                        "full_name": user.full_name,
                    })),
                )
                .await?;
        }
        return Ok(user);
    }

    let mut user = User {
        id: 0,
        subject_id,
        username: profile.username.clone(),
        full_name: profile.full_name.clone(),
        phone: None,
        role: Role::Consumer,
        is_registered: false,
        sent_requests_count: 0,
    };
    user.id = store.save_entity(EntityKind::User, encode(&user)?).await?;
    Ok(user)
}

pub async fn registered_users(
    store: &dyn Persistence,
    role: Option<Role>,
) -> Result<Vec<User>, PersistenceError> {
    let mut query = json!({ "is_registered": true });
    if let Some(role) = role {
        query["role"] = json!(role);
    }
    decode_all(store.find_entities(EntityKind::User, fields(query)).await?)
}

pub async fn load_request(
    store: &dyn Persistence,
    id: EntityId,
) -> Result<Option<Request>, PersistenceError> {
    store
        .load_entity(EntityKind::Request, id)
        .await?
        .as_ref()
        .map(Entity::decode)
        .transpose()
}

pub async fn load_response(
    store: &dyn Persistence,
    id: EntityId,
) -> Result<Option<Response>, PersistenceError> {
    store
        .load_entity(EntityKind::Response, id)
        .await?
        .as_ref()
        .map(Entity::decode)
        .transpose()
}

/// Open requests, newest first. With `consumer_id`, only that consumer's.
pub async fn open_requests(
    store: &dyn Persistence,
    consumer_id: Option<SubjectId>,
) -> Result<Vec<Request>, PersistenceError> {
    let mut query = json!({ "status": RequestStatus::Open });
    if let Some(consumer_id) = consumer_id {
        query["consumer_id"] = json!(consumer_id);
    }
    let mut requests: Vec<Request> =
        decode_all(store.find_entities(EntityKind::Request, fields(query)).await?)?;
    requests.reverse();
    Ok(requests)
}

pub async fn responses_for_request(
    store: &dyn Persistence,
    request_id: EntityId,
) -> Result<Vec<Response>, PersistenceError> {
    let mut responses: Vec<Response> = decode_all(
        store
            .find_entities(EntityKind::Response, fields(json!({ "request_id": request_id })))
            .await?,
    )?;
    responses.reverse();
    Ok(responses)
}

pub async fn responses_by_supplier(
    store: &dyn Persistence,
    supplier_id: SubjectId,
) -> Result<Vec<Response>, PersistenceError> {
    let mut responses: Vec<Response> = decode_all(
        store
            .find_entities(EntityKind::Response, fields(json!({ "supplier_id": supplier_id })))
            .await?,
    )?;
    responses.reverse();
    Ok(responses)
}

pub async fn set_request_status(
    store: &dyn Persistence,
    id: EntityId,
    status: RequestStatus,
) -> Result<(), PersistenceError> {
    store
        .update_entity(EntityKind::Request, id, fields(json!({ "status": status })))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;

    fn profile(username: &str) -> Profile {
        Profile {
            username: Some(username.to_string()),
            full_name: None,
        }
    }

    #[tokio::test]
    async fn first_contact_creates_an_unregistered_consumer() {
        let store = InMemoryStore::new();
        let user = get_or_create_user(&store, 42, &profile("ann")).await.unwrap();

        assert_eq!(user.subject_id, 42);
        assert_eq!(user.role, Role::Consumer);
        assert!(!user.is_registered);
        assert_eq!(find_user(&store, 42).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn repeat_contact_refreshes_profile_without_duplicating() {
        let store = InMemoryStore::new();
        get_or_create_user(&store, 42, &profile("ann")).await.unwrap();
        let user = get_or_create_user(&store, 42, &profile("anna")).await.unwrap();

        assert_eq!(user.username.as_deref(), Some("anna"));
        assert_eq!(store.count(EntityKind::User).await, 1);
    }

    #[tokio::test]
    async fn open_requests_are_newest_first_and_skip_closed() {
        let store = InMemoryStore::new();
        for text in ["a", "b", "c"] {
            let request = Request {
                id: 0,
                consumer_id: 1,
                text: text.into(),
                media: vec![],
                status: RequestStatus::Open,
            };
            store
                .save_entity(EntityKind::Request, encode(&request).unwrap())
                .await
                .unwrap();
        }
        set_request_status(&store, 2, RequestStatus::Closed).await.unwrap();

        let texts: Vec<_> = open_requests(&store, Some(1))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(texts, vec!["c", "a"]);
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!("Supplier".parse::<Role>(), Ok(Role::Supplier));
        assert!("owner".parse::<Role>().is_err());
    }
}
