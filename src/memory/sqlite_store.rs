//! `SQLite`-backed memory store.
//!
//! Embeddings are stored as little-endian `f32` BLOBs. Candidate sets are
//! per-companion and small, so cosine similarity and the hybrid score are
//! computed in Rust over companion-scoped rows; the retrieval touch runs in
//! a single transaction over the returned ids.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use tokio_rusqlite::Connection;

use crate::core::config::{RetrievalConfig, StorageConfig};
use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{CompanionId, MemoryId};
use crate::memory::ranking::{RankedMemory, rank_records};
use crate::memory::record::MemoryRecord;
use crate::memory::store::{DecayParams, MemoryStore, StoreFuture};

/// `SQLite` implementation of memory storage.
pub struct SqliteMemoryStore {
    conn: Connection,
    table: String,
    config: RetrievalConfig,
}

impl SqliteMemoryStore {
    /// Initialize the memory store, creating the schema if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(storage: &StorageConfig, config: RetrievalConfig) -> EngineResult<Self> {
        let conn = Connection::open(&storage.sqlite_path).await?;
        let table = storage.memory_table.clone();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    companion_id TEXT NOT NULL,
                    content TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    importance REAL NOT NULL,
                    category TEXT,
                    metadata_json TEXT NOT NULL,
                    access_count INTEGER NOT NULL,
                    last_accessed_ms INTEGER,
                    created_ms INTEGER NOT NULL,
                    expires_ms INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_{table_name}_companion_created
                    ON {table_name} (companion_id, created_ms);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            table,
            config,
        })
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> EngineResult<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(EngineError::Storage(
            "embedding blob length is not a multiple of 4".to_string(),
        ));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

type MemoryRow = (
    String,
    String,
    String,
    Vec<u8>,
    f64,
    Option<String>,
    String,
    i64,
    Option<i64>,
    i64,
    Option<i64>,
);

fn row_to_record(row: MemoryRow) -> EngineResult<MemoryRecord> {
    let (
        id,
        companion_id,
        content,
        embedding,
        importance,
        category,
        metadata_json,
        access_count,
        last_accessed_ms,
        created_ms,
        expires_ms,
    ) = row;

    let parse_ts = |ms: i64| {
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| EngineError::Storage("invalid timestamp".to_string()))
    };

    Ok(MemoryRecord {
        id: MemoryId::from_str(&id)
            .map_err(|err| EngineError::Storage(format!("invalid memory id: {err}")))?,
        companion_id: CompanionId::from_str(&companion_id)
            .map_err(|err| EngineError::Storage(format!("invalid companion id: {err}")))?,
        content,
        embedding: blob_to_embedding(&embedding)?,
        importance,
        category,
        metadata: serde_json::from_str(&metadata_json)?,
        access_count: u32::try_from(access_count)
            .map_err(|_| EngineError::Storage("invalid access count".to_string()))?,
        last_accessed_at: last_accessed_ms.map(parse_ts).transpose()?,
        created_at: parse_ts(created_ms)?,
        expires_at: expires_ms.map(parse_ts).transpose()?,
    })
}

impl MemoryStore for SqliteMemoryStore {
    fn insert(&self, record: MemoryRecord) -> StoreFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            record.validate()?;
            let table = self.table.clone();
            let metadata_json = serde_json::to_string(&record.metadata)?;
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table}
                            (id, companion_id, content, embedding, importance, category,
                             metadata_json, access_count, last_accessed_ms, created_ms, expires_ms)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                        ),
                        rusqlite::params![
                            record.id.to_string(),
                            record.companion_id.to_string(),
                            record.content,
                            embedding_to_blob(&record.embedding),
                            record.importance,
                            record.category,
                            metadata_json,
                            i64::from(record.access_count),
                            record.last_accessed_at.map(|ts| ts.timestamp_millis()),
                            record.created_at.timestamp_millis(),
                            record.expires_at.map(|ts| ts.timestamp_millis()),
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn retrieve(
        &self,
        companion_id: CompanionId,
        query_embedding: Vec<f32>,
        k: usize,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, EngineResult<Vec<RankedMemory>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let companion = companion_id.to_string();
            let now_ms = now.timestamp_millis();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT id, companion_id, content, embedding, importance, category,
                                metadata_json, access_count, last_accessed_ms, created_ms, expires_ms
                         FROM {table}
                         WHERE companion_id = ?1
                           AND (expires_ms IS NULL OR expires_ms > ?2)"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![companion, now_ms], |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, Vec<u8>>(3)?,
                                row.get::<_, f64>(4)?,
                                row.get::<_, Option<String>>(5)?,
                                row.get::<_, String>(6)?,
                                row.get::<_, i64>(7)?,
                                row.get::<_, Option<i64>>(8)?,
                                row.get::<_, i64>(9)?,
                                row.get::<_, Option<i64>>(10)?,
                            ))
                        })?
                        .collect::<Result<Vec<MemoryRow>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            let mut candidates = Vec::with_capacity(rows.len());
            for row in rows {
                candidates.push(row_to_record(row)?);
            }

            let mut ranked = rank_records(candidates, &query_embedding, &self.config, now);
            ranked.truncate(k);

            if !ranked.is_empty() {
                let table = self.table.clone();
                let ids: Vec<String> = ranked.iter().map(|hit| hit.record.id.to_string()).collect();
                self.conn
                    .call(move |conn| {
                        let tx = conn.transaction()?;
                        {
                            let mut stmt = tx.prepare(&format!(
                                "UPDATE {table}
                                 SET access_count = access_count + 1, last_accessed_ms = ?1
                                 WHERE id = ?2"
                            ))?;
                            for id in &ids {
                                stmt.execute(rusqlite::params![now_ms, id])?;
                            }
                        }
                        tx.commit()?;
                        Ok(())
                    })
                    .await?;

                for hit in &mut ranked {
                    hit.record.record_access(now);
                }
            }

            Ok(ranked)
        })
    }

    fn decay(
        &self,
        companion_id: CompanionId,
        params: DecayParams,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, EngineResult<usize>> {
        Box::pin(async move {
            let table = self.table.clone();
            let companion = companion_id.to_string();
            let cutoff_ms = (now
                - chrono::Duration::seconds(params.older_than_seconds as i64))
            .timestamp_millis();
            let touched = self
                .conn
                .call(move |conn| {
                    let touched = conn.execute(
                        &format!(
                            "UPDATE {table}
                             SET importance = MAX(importance * ?1, ?2)
                             WHERE companion_id = ?3
                               AND COALESCE(last_accessed_ms, created_ms) <= ?4"
                        ),
                        rusqlite::params![
                            params.factor,
                            params.importance_floor,
                            companion,
                            cutoff_ms
                        ],
                    )?;
                    Ok(touched)
                })
                .await?;
            Ok(touched)
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, EngineResult<usize>> {
        Box::pin(async move {
            let table = self.table.clone();
            let now_ms = now.timestamp_millis();
            let removed = self
                .conn
                .call(move |conn| {
                    let removed = conn.execute(
                        &format!(
                            "DELETE FROM {table}
                             WHERE expires_ms IS NOT NULL AND expires_ms <= ?1"
                        ),
                        rusqlite::params![now_ms],
                    )?;
                    Ok(removed)
                })
                .await?;
            Ok(removed)
        })
    }

    fn count(&self, companion_id: CompanionId) -> StoreFuture<'_, EngineResult<u64>> {
        Box::pin(async move {
            let table = self.table.clone();
            let companion = companion_id.to_string();
            let count = self
                .conn
                .call(move |conn| {
                    let count = conn.query_row(
                        &format!("SELECT COUNT(*) FROM {table} WHERE companion_id = ?1"),
                        rusqlite::params![companion],
                        |row| row.get::<_, i64>(0),
                    )?;
                    Ok(count)
                })
                .await?;
            u64::try_from(count).map_err(|_| EngineError::Storage("invalid count".to_string()))
        })
    }

    fn companion_ids(&self) -> StoreFuture<'_, EngineResult<Vec<CompanionId>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let ids = self
                .conn
                .call(move |conn| {
                    let mut stmt =
                        conn.prepare(&format!("SELECT DISTINCT companion_id FROM {table}"))?;
                    let ids = stmt
                        .query_map([], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(ids)
                })
                .await?;

            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                out.push(
                    CompanionId::from_str(&id)
                        .map_err(|err| EngineError::Storage(format!("invalid companion id: {err}")))?,
                );
            }
            Ok(out)
        })
    }
}
