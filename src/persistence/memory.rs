use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Entity, EntityId, EntityKind, Fields, Persistence, PersistenceError};

/// Process-local entity store. Ids are assigned per kind starting at 1.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<BTreeMap<EntityKind, Table>>,
}

#[derive(Debug, Default)]
struct Table {
    next_id: EntityId,
    rows: BTreeMap<EntityId, Fields>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, kind: EntityKind) -> usize {
        self.tables
            .read()
            .await
            .get(&kind)
            .map(|table| table.rows.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Persistence for InMemoryStore {
    async fn load_entity(
        &self,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Option<Entity>, PersistenceError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&kind)
            .and_then(|table| table.rows.get(&id))
            .map(|fields| Entity {
                kind,
                id,
                fields: fields.clone(),
            }))
    }

    async fn save_entity(
        &self,
        kind: EntityKind,
        fields: Fields,
    ) -> Result<EntityId, PersistenceError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(kind).or_default();
        table.next_id += 1;
        let id = table.next_id;
        table.rows.insert(id, fields);
        debug!(kind = %kind, id = id, "Entity saved");
        Ok(id)
    }

    async fn update_entity(
        &self,
        kind: EntityKind,
        id: EntityId,
        fields: Fields,
    ) -> Result<(), PersistenceError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(&kind)
            .and_then(|table| table.rows.get_mut(&id))
            .ok_or(PersistenceError::Missing { kind, id })?;
        row.extend(fields);
        Ok(())
    }

    async fn find_entities(
        &self,
        kind: EntityKind,
        filter: Fields,
    ) -> Result<Vec<Entity>, PersistenceError> {
        let tables = self.tables.read().await;
        let Some(table) = tables.get(&kind) else {
            return Ok(Vec::new());
        };
        Ok(table
            .rows
            .iter()
            .map(|(id, fields)| Entity {
                kind,
                id: *id,
                fields: fields.clone(),
            })
            .filter(|entity| entity.matches(&filter))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn ids_are_assigned_per_kind() {
        let store = InMemoryStore::new();
        let a = store
            .save_entity(EntityKind::Request, fields(json!({"text": "a"})))
            .await
            .unwrap();
        let b = store
            .save_entity(EntityKind::Request, fields(json!({"text": "b"})))
            .await
            .unwrap();
        let u = store
            .save_entity(EntityKind::User, fields(json!({"subject_id": 5})))
            .await
            .unwrap();

        assert_eq!((a, b, u), (1, 2, 1));
        assert_eq!(store.count(EntityKind::Request).await, 2);
    }

    #[tokio::test]
    async fn kinds_keep_separate_tables() {
        let store = InMemoryStore::new();
        for kind in [EntityKind::Response, EntityKind::User, EntityKind::Request] {
            store
                .save_entity(kind, fields(json!({"kind": kind.as_str()})))
                .await
                .unwrap();
        }

        for kind in [EntityKind::User, EntityKind::Request, EntityKind::Response] {
            let entity = store.load_entity(kind, 1).await.unwrap().unwrap();
            assert_eq!(entity.fields["kind"], json!(kind.as_str()));
            assert_eq!(store.count(kind).await, 1);
        }
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = InMemoryStore::new();
        let id = store
            .save_entity(
                EntityKind::Request,
                fields(json!({"text": "pipes", "status": "open"})),
            )
            .await
            .unwrap();

        store
            .update_entity(EntityKind::Request, id, fields(json!({"status": "closed"})))
            .await
            .unwrap();

        let entity = store
            .load_entity(EntityKind::Request, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.fields["text"], json!("pipes"));
        assert_eq!(entity.fields["status"], json!("closed"));
    }

    #[tokio::test]
    async fn update_of_missing_entity_fails() {
        let store = InMemoryStore::new();
        let err = store
            .update_entity(EntityKind::Response, 3, Fields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Missing { id: 3, .. }));
    }

    #[tokio::test]
    async fn find_filters_by_equality() {
        let store = InMemoryStore::new();
        for role in ["consumer", "supplier", "supplier"] {
            store
                .save_entity(EntityKind::User, fields(json!({"role": role})))
                .await
                .unwrap();
        }

        let suppliers = store
            .find_entities(EntityKind::User, fields(json!({"role": "supplier"})))
            .await
            .unwrap();
        let ids: Vec<_> = suppliers.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
