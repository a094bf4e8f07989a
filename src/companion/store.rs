//! Companion store backends.

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::companion::profile::Companion;
use crate::companion::traits::PersonalityTraits;
use crate::core::config::StorageConfig;
use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{CompanionId, OwnerId};
use crate::memory::store::StoreFuture;

/// Persistence for companion records.
///
/// `insert` enforces the unique-owner constraint; `update` replaces the
/// stored record wholesale (callers go through the registry, which is the
/// only mutation path).
pub trait CompanionStore: Send + Sync {
    /// Insert a new companion.
    ///
    /// # Errors
    /// Returns a validation error if the owner already has a companion,
    /// or a storage error if persistence fails.
    fn insert(&self, companion: Companion) -> StoreFuture<'_, EngineResult<()>>;

    /// Fetch a companion by id.
    ///
    /// # Errors
    /// Returns a storage error if the lookup fails.
    fn get(&self, id: CompanionId) -> StoreFuture<'_, EngineResult<Option<Companion>>>;

    /// Fetch a companion by owner.
    ///
    /// # Errors
    /// Returns a storage error if the lookup fails.
    fn get_by_owner(&self, owner: OwnerId) -> StoreFuture<'_, EngineResult<Option<Companion>>>;

    /// Replace a stored companion.
    ///
    /// # Errors
    /// Returns `NotFound` if the companion does not exist, or a storage
    /// error if persistence fails.
    fn update(&self, companion: Companion) -> StoreFuture<'_, EngineResult<()>>;
}

/// DashMap-backed companion store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryCompanionStore {
    companions: DashMap<CompanionId, Companion>,
    owners: DashMap<OwnerId, CompanionId>,
}

impl InMemoryCompanionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompanionStore for InMemoryCompanionStore {
    fn insert(&self, companion: Companion) -> StoreFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            if self.owners.contains_key(&companion.owner_id) {
                return Err(EngineError::Validation(format!(
                    "owner {} already has a companion",
                    companion.owner_id
                )));
            }

            self.owners.insert(companion.owner_id, companion.id);
            self.companions.insert(companion.id, companion);
            Ok(())
        })
    }

    fn get(&self, id: CompanionId) -> StoreFuture<'_, EngineResult<Option<Companion>>> {
        Box::pin(async move { Ok(self.companions.get(&id).map(|entry| entry.clone())) })
    }

    fn get_by_owner(&self, owner: OwnerId) -> StoreFuture<'_, EngineResult<Option<Companion>>> {
        Box::pin(async move {
            let Some(id) = self.owners.get(&owner).map(|entry| *entry) else {
                return Ok(None);
            };
            Ok(self.companions.get(&id).map(|entry| entry.clone()))
        })
    }

    fn update(&self, companion: Companion) -> StoreFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            let Some(mut entry) = self.companions.get_mut(&companion.id) else {
                return Err(EngineError::NotFound(companion.id));
            };
            *entry = companion;
            Ok(())
        })
    }
}

/// `SQLite` implementation of companion storage.
pub struct SqliteCompanionStore {
    conn: Connection,
    table: String,
}

impl SqliteCompanionStore {
    /// Initialize the companion store, creating the schema if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(storage: &StorageConfig) -> EngineResult<Self> {
        let conn = Connection::open(&storage.sqlite_path).await?;
        let table = storage.companion_table.clone();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    traits_json TEXT NOT NULL,
                    interests_json TEXT NOT NULL,
                    communication_style TEXT NOT NULL,
                    description TEXT NOT NULL,
                    relationship_level INTEGER NOT NULL,
                    interaction_count INTEGER NOT NULL,
                    last_interaction_ms INTEGER,
                    active INTEGER NOT NULL,
                    created_ms INTEGER NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

type CompanionRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    Option<i64>,
    i64,
    i64,
);

fn row_to_companion(row: CompanionRow) -> EngineResult<Companion> {
    let (
        id,
        owner_id,
        name,
        traits_json,
        interests_json,
        communication_style,
        description,
        relationship_level,
        interaction_count,
        last_interaction_ms,
        active,
        created_ms,
    ) = row;

    let parse_ts = |ms: i64| {
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| EngineError::Storage("invalid timestamp".to_string()))
    };

    let traits: PersonalityTraits = serde_json::from_str(&traits_json)?;
    Ok(Companion {
        id: CompanionId::from_str(&id)
            .map_err(|err| EngineError::Storage(format!("invalid companion id: {err}")))?,
        owner_id: OwnerId::from_str(&owner_id)
            .map_err(|err| EngineError::Storage(format!("invalid owner id: {err}")))?,
        name,
        traits,
        interests: serde_json::from_str(&interests_json)?,
        communication_style,
        description,
        relationship_level: u32::try_from(relationship_level)
            .map_err(|_| EngineError::Storage("invalid relationship level".to_string()))?,
        interaction_count: u64::try_from(interaction_count)
            .map_err(|_| EngineError::Storage("invalid interaction count".to_string()))?,
        last_interaction_at: last_interaction_ms.map(parse_ts).transpose()?,
        active: active != 0,
        created_at: parse_ts(created_ms)?,
    })
}

const COMPANION_COLUMNS: &str = "id, owner_id, name, traits_json, interests_json, \
     communication_style, description, relationship_level, interaction_count, \
     last_interaction_ms, active, created_ms";

fn read_companion_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CompanionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

impl CompanionStore for SqliteCompanionStore {
    fn insert(&self, companion: Companion) -> StoreFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            let traits_json = serde_json::to_string(&companion.traits)?;
            let interests_json = serde_json::to_string(&companion.interests)?;
            let owner = companion.owner_id;
            let result = self
                .conn
                .call(move |conn| {
                    let inserted = conn.execute(
                        &format!(
                            "INSERT OR IGNORE INTO {table} ({COMPANION_COLUMNS})
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                        ),
                        rusqlite::params![
                            companion.id.to_string(),
                            companion.owner_id.to_string(),
                            companion.name,
                            traits_json,
                            interests_json,
                            companion.communication_style,
                            companion.description,
                            i64::from(companion.relationship_level),
                            i64::try_from(companion.interaction_count).unwrap_or(i64::MAX),
                            companion.last_interaction_at.map(|ts| ts.timestamp_millis()),
                            i64::from(companion.active),
                            companion.created_at.timestamp_millis(),
                        ],
                    )?;
                    Ok(inserted)
                })
                .await?;

            if result == 0 {
                return Err(EngineError::Validation(format!(
                    "owner {owner} already has a companion"
                )));
            }
            Ok(())
        })
    }

    fn get(&self, id: CompanionId) -> StoreFuture<'_, EngineResult<Option<Companion>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let id_str = id.to_string();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT {COMPANION_COLUMNS} FROM {table} WHERE id = ?1"),
                            rusqlite::params![id_str],
                            read_companion_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            row.map(row_to_companion).transpose()
        })
    }

    fn get_by_owner(&self, owner: OwnerId) -> StoreFuture<'_, EngineResult<Option<Companion>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let owner_str = owner.to_string();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT {COMPANION_COLUMNS} FROM {table} WHERE owner_id = ?1"),
                            rusqlite::params![owner_str],
                            read_companion_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            row.map(row_to_companion).transpose()
        })
    }

    fn update(&self, companion: Companion) -> StoreFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            let traits_json = serde_json::to_string(&companion.traits)?;
            let interests_json = serde_json::to_string(&companion.interests)?;
            let id = companion.id;
            let updated = self
                .conn
                .call(move |conn| {
                    let updated = conn.execute(
                        &format!(
                            "UPDATE {table}
                             SET name = ?2, traits_json = ?3, interests_json = ?4,
                                 communication_style = ?5, description = ?6,
                                 relationship_level = ?7, interaction_count = ?8,
                                 last_interaction_ms = ?9, active = ?10
                             WHERE id = ?1"
                        ),
                        rusqlite::params![
                            companion.id.to_string(),
                            companion.name,
                            traits_json,
                            interests_json,
                            companion.communication_style,
                            companion.description,
                            i64::from(companion.relationship_level),
                            i64::try_from(companion.interaction_count).unwrap_or(i64::MAX),
                            companion.last_interaction_at.map(|ts| ts.timestamp_millis()),
                            i64::from(companion.active),
                        ],
                    )?;
                    Ok(updated)
                })
                .await?;

            if updated == 0 {
                return Err(EngineError::NotFound(id));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn companion(owner: OwnerId) -> Companion {
        let traits = PersonalityTraits::new(0.9, 0.8, 0.4, 0.4).unwrap();
        Companion::new(
            owner,
            "Nova",
            traits,
            vec!["astronomy".to_string()],
            "A stargazer at heart.".to_string(),
        )
    }

    #[tokio::test]
    async fn test_in_memory_unique_owner() {
        let store = InMemoryCompanionStore::new();
        let owner = OwnerId::new();
        store.insert(companion(owner)).await.unwrap();
        assert!(store.insert(companion(owner)).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let storage = StorageConfig {
            sqlite_path: ":memory:".into(),
            ..StorageConfig::default()
        };
        let store = SqliteCompanionStore::new(&storage).await.unwrap();
        let owner = OwnerId::new();
        let original = companion(owner);
        store.insert(original.clone()).await.unwrap();

        let loaded = store.get(original.id).await.unwrap().unwrap();
        // Timestamps round-trip at millisecond precision, so compare fields.
        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.owner_id, original.owner_id);
        assert_eq!(loaded.name, original.name);
        assert_eq!(loaded.traits, original.traits);
        assert_eq!(loaded.interests, original.interests);
        assert_eq!(loaded.communication_style, original.communication_style);
        assert_eq!(loaded.description, original.description);
        assert!(loaded.active);

        let by_owner = store.get_by_owner(owner).await.unwrap().unwrap();
        assert_eq!(by_owner.id, original.id);

        assert!(store.insert(companion(owner)).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_update_missing_is_not_found() {
        let storage = StorageConfig {
            sqlite_path: ":memory:".into(),
            ..StorageConfig::default()
        };
        let store = SqliteCompanionStore::new(&storage).await.unwrap();
        let ghost = companion(OwnerId::new());
        assert!(matches!(
            store.update(ghost).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
