//! Storage collaborator for business entities.
//!
//! The relay never owns the lifecycle of users, requests or responses; it
//! reads and writes them through [`Persistence`]. Entities are stored as a
//! flat JSON field map so that any backend can hold them.

pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub use memory::InMemoryStore;
#[cfg(feature = "database")]
pub use sqlite::SqliteStore;

pub type EntityId = i64;
pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Request,
    Response,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Request => "request",
            EntityKind::Response => "response",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{kind} #{id} does not exist")]
    Missing { kind: EntityKind, id: EntityId },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {reason}")]
    Backend { reason: String },
}

/// A stored entity: its kind, store-assigned id and field map.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub kind: EntityKind,
    pub id: EntityId,
    pub fields: Fields,
}

impl Entity {
    /// Decode into a typed record. The entity id is exposed as the `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PersistenceError> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::from(self.id));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    /// True when every filter field is present with an equal value.
    pub fn matches(&self, filter: &Fields) -> bool {
        filter
            .iter()
            .all(|(key, expected)| self.fields.get(key) == Some(expected))
    }
}

/// Field map from a JSON object; any other value yields an empty map.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        _ => Fields::new(),
    }
}

/// Encode a typed record into a field map, dropping its `id`.
pub fn encode<T: Serialize>(record: &T) -> Result<Fields, PersistenceError> {
    match serde_json::to_value(record)? {
        Value::Object(mut fields) => {
            fields.remove("id");
            Ok(fields)
        }
        other => Err(PersistenceError::Backend {
            reason: format!("expected an object, got {other}"),
        }),
    }
}

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_entity(
        &self,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Option<Entity>, PersistenceError>;

    /// Store a new entity and return its id.
    async fn save_entity(&self, kind: EntityKind, fields: Fields)
        -> Result<EntityId, PersistenceError>;

    /// Merge `fields` into an existing entity.
    async fn update_entity(
        &self,
        kind: EntityKind,
        id: EntityId,
        fields: Fields,
    ) -> Result<(), PersistenceError>;

    /// All entities of `kind` whose fields equal every entry of `filter`,
    /// in ascending id order.
    async fn find_entities(
        &self,
        kind: EntityKind,
        filter: Fields,
    ) -> Result<Vec<Entity>, PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        #[serde(default)]
        id: EntityId,
        body: String,
    }

    #[test]
    fn encode_strips_id_and_decode_restores_it() {
        let fields = encode(&Note {
            id: 99,
            body: "hello".to_string(),
        })
        .unwrap();
        assert!(!fields.contains_key("id"));

        let entity = Entity {
            kind: EntityKind::Request,
            id: 7,
            fields,
        };
        let note: Note = entity.decode().unwrap();
        assert_eq!(
            note,
            Note {
                id: 7,
                body: "hello".to_string()
            }
        );
    }

    #[test]
    fn filter_requires_every_field_to_match() {
        let entity = Entity {
            kind: EntityKind::User,
            id: 1,
            fields: json!({"role": "supplier", "is_registered": true})
                .as_object()
                .cloned()
                .unwrap(),
        };

        let mut filter = Fields::new();
        filter.insert("role".into(), json!("supplier"));
        assert!(entity.matches(&filter));

        filter.insert("is_registered".into(), json!(false));
        assert!(!entity.matches(&filter));
    }
}
