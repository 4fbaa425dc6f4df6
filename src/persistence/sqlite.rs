use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

use super::{Entity, EntityId, EntityKind, Fields, Persistence, PersistenceError};

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        PersistenceError::Backend {
            reason: err.to_string(),
        }
    }
}

/// SQLite-backed store keeping each entity as a JSON document.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and ensure the schema exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                fields TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!("SQLite entity store ready at {}", database_url);
        Ok(Self { pool })
    }

    fn decode_fields(raw: &str) -> Result<Fields, PersistenceError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn load_entity(
        &self,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Option<Entity>, PersistenceError> {
        let row = sqlx::query("SELECT fields FROM entities WHERE id = ?1 AND kind = ?2")
            .bind(id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("fields");
                Ok(Some(Entity {
                    kind,
                    id,
                    fields: Self::decode_fields(&raw)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn save_entity(
        &self,
        kind: EntityKind,
        fields: Fields,
    ) -> Result<EntityId, PersistenceError> {
        let raw = serde_json::to_string(&fields)?;
        let result = sqlx::query("INSERT INTO entities (kind, fields) VALUES (?1, ?2)")
            .bind(kind.as_str())
            .bind(raw)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_entity(
        &self,
        kind: EntityKind,
        id: EntityId,
        fields: Fields,
    ) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT fields FROM entities WHERE id = ?1 AND kind = ?2")
            .bind(id)
            .bind(kind.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(PersistenceError::Missing { kind, id })?;

        let raw: String = row.get("fields");
        let mut merged = Self::decode_fields(&raw)?;
        merged.extend(fields);

        sqlx::query("UPDATE entities SET fields = ?1 WHERE id = ?2")
            .bind(serde_json::to_string(&merged)?)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_entities(
        &self,
        kind: EntityKind,
        filter: Fields,
    ) -> Result<Vec<Entity>, PersistenceError> {
        let rows = sqlx::query("SELECT id, fields FROM entities WHERE kind = ?1 ORDER BY id ASC")
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("fields");
            let entity = Entity {
                kind,
                id: row.get("id"),
                fields: Self::decode_fields(&raw)?,
            };
            if entity.matches(&filter) {
                entities.push(entity);
            }
        }
        Ok(entities)
    }
}
