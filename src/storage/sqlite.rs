//! SQLite store backend
//!
//! Persistent local cache backing the authoritative half of the dual
//! store. Sequence and JSON-shaped fields are stored as serialized TEXT
//! columns; embeddings are stored as little-endian f32 BLOBs.

use crate::error::{MetanoiaError, Result};
use crate::storage::{KnowledgeStore, WindowCounts};
use crate::types::{KnowledgeUnit, TrackedReflexion, UnitId, UsageEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge_units (
    id            TEXT PRIMARY KEY,
    domain        TEXT NOT NULL,
    success       INTEGER NOT NULL,
    reasoning     TEXT NOT NULL,
    confidence    REAL NOT NULL,
    success_rate  REAL NOT NULL,
    usage_count   INTEGER NOT NULL,
    lessons       TEXT NOT NULL,
    related_units TEXT NOT NULL,
    transferable  INTEGER NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_units_domain ON knowledge_units(domain);

CREATE TABLE IF NOT EXISTS reflexions (
    id              TEXT PRIMARY KEY,
    project         TEXT NOT NULL,
    content         TEXT NOT NULL,
    validity_score  REAL NOT NULL,
    usage_count     INTEGER NOT NULL,
    successful_uses INTEGER NOT NULL,
    marked_stale    INTEGER NOT NULL,
    stale_reason    TEXT,
    embedding       BLOB,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reflexions_project ON reflexions(project);

CREATE TABLE IF NOT EXISTS usage_events (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    reflexion_id TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    success      INTEGER NOT NULL,
    context      TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_reflexion ON usage_events(reflexion_id, timestamp);
"#;

/// SQLite store backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        info!("Opening local store at {}", path.as_ref().display());
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for tests and ephemeral runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MetanoiaError::Store("connection lock poisoned".to_string()))
    }

    /// Serialize f32 vector to bytes
    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize bytes to f32 vector
    fn deserialize_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
        if bytes.len() % 4 != 0 {
            return Err(MetanoiaError::Store(
                "invalid embedding byte length".to_string(),
            ));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| {
                let mut arr = [0u8; 4];
                arr.copy_from_slice(chunk);
                f32::from_le_bytes(arr)
            })
            .collect())
    }

    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| MetanoiaError::Store(format!("invalid timestamp '{}': {}", s, e)))
    }

    fn row_to_unit(row: &Row<'_>) -> rusqlite::Result<UnitRow> {
        Ok(UnitRow {
            id: row.get(0)?,
            domain: row.get(1)?,
            success: row.get::<_, i64>(2)? != 0,
            reasoning: row.get(3)?,
            confidence: row.get(4)?,
            success_rate: row.get(5)?,
            usage_count: row.get::<_, i64>(6)? as u64,
            lessons: row.get(7)?,
            related_units: row.get(8)?,
            transferable: row.get::<_, i64>(9)? != 0,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn row_to_reflexion(row: &Row<'_>) -> rusqlite::Result<ReflexionRow> {
        Ok(ReflexionRow {
            id: row.get(0)?,
            project: row.get(1)?,
            content: row.get(2)?,
            validity_score: row.get(3)?,
            usage_count: row.get::<_, i64>(4)? as u64,
            successful_uses: row.get::<_, i64>(5)? as u64,
            marked_stale: row.get::<_, i64>(6)? != 0,
            stale_reason: row.get(7)?,
            embedding: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

/// Raw unit row before JSON/timestamp decoding
struct UnitRow {
    id: String,
    domain: String,
    success: bool,
    reasoning: String,
    confidence: f64,
    success_rate: f64,
    usage_count: u64,
    lessons: String,
    related_units: String,
    transferable: bool,
    created_at: String,
    updated_at: String,
}

impl UnitRow {
    fn decode(self) -> Result<KnowledgeUnit> {
        Ok(KnowledgeUnit {
            id: UnitId(self.id),
            domain: self.domain,
            success: self.success,
            reasoning: serde_json::from_str(&self.reasoning)?,
            confidence: self.confidence,
            success_rate: self.success_rate,
            usage_count: self.usage_count,
            lessons: serde_json::from_str(&self.lessons)?,
            related_units: serde_json::from_str::<BTreeSet<UnitId>>(&self.related_units)?,
            transferable: self.transferable,
            created_at: SqliteStore::parse_timestamp(&self.created_at)?,
            updated_at: SqliteStore::parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Raw reflexion row before decoding
struct ReflexionRow {
    id: String,
    project: String,
    content: String,
    validity_score: f64,
    usage_count: u64,
    successful_uses: u64,
    marked_stale: bool,
    stale_reason: Option<String>,
    embedding: Option<Vec<u8>>,
    created_at: String,
    updated_at: String,
}

impl ReflexionRow {
    fn decode(self) -> Result<TrackedReflexion> {
        let embedding = match self.embedding {
            Some(bytes) => Some(SqliteStore::deserialize_embedding(&bytes)?),
            None => None,
        };
        Ok(TrackedReflexion {
            id: UnitId(self.id),
            project: self.project,
            content: self.content,
            validity_score: self.validity_score,
            usage_count: self.usage_count,
            successful_uses: self.successful_uses,
            marked_stale: self.marked_stale,
            stale_reason: self.stale_reason,
            embedding,
            created_at: SqliteStore::parse_timestamp(&self.created_at)?,
            updated_at: SqliteStore::parse_timestamp(&self.updated_at)?,
        })
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn upsert_unit(&self, unit: &KnowledgeUnit) -> Result<()> {
        let reasoning = serde_json::to_string(&unit.reasoning)?;
        let lessons = serde_json::to_string(&unit.lessons)?;
        let related = serde_json::to_string(&unit.related_units)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO knowledge_units
                (id, domain, success, reasoning, confidence, success_rate,
                 usage_count, lessons, related_units, transferable, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                domain = excluded.domain,
                success = excluded.success,
                reasoning = excluded.reasoning,
                confidence = excluded.confidence,
                success_rate = excluded.success_rate,
                usage_count = excluded.usage_count,
                lessons = excluded.lessons,
                related_units = excluded.related_units,
                transferable = excluded.transferable,
                updated_at = excluded.updated_at",
            params![
                unit.id.0,
                unit.domain,
                unit.success as i64,
                reasoning,
                unit.confidence,
                unit.success_rate,
                unit.usage_count as i64,
                lessons,
                related,
                unit.transferable as i64,
                unit.created_at.to_rfc3339(),
                unit.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_unit(&self, id: &UnitId) -> Result<Option<KnowledgeUnit>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, domain, success, reasoning, confidence, success_rate,
                        usage_count, lessons, related_units, transferable, created_at, updated_at
                 FROM knowledge_units WHERE id = ?1",
                params![id.0],
                Self::row_to_unit,
            )
            .optional()?;
        drop(conn);
        row.map(UnitRow::decode).transpose()
    }

    async fn list_units(&self, domain: Option<&str>) -> Result<Vec<KnowledgeUnit>> {
        let conn = self.lock()?;
        let mut rows = Vec::new();
        match domain {
            Some(d) => {
                let mut stmt = conn.prepare(
                    "SELECT id, domain, success, reasoning, confidence, success_rate,
                            usage_count, lessons, related_units, transferable, created_at, updated_at
                     FROM knowledge_units WHERE domain = ?1 ORDER BY id",
                )?;
                let mapped = stmt.query_map(params![d], Self::row_to_unit)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, domain, success, reasoning, confidence, success_rate,
                            usage_count, lessons, related_units, transferable, created_at, updated_at
                     FROM knowledge_units ORDER BY id",
                )?;
                let mapped = stmt.query_map([], Self::row_to_unit)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
        }
        drop(conn);
        rows.into_iter().map(UnitRow::decode).collect()
    }

    async fn delete_unit(&self, id: &UnitId) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM knowledge_units WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    async fn upsert_reflexion(&self, reflexion: &TrackedReflexion) -> Result<()> {
        let embedding = reflexion
            .embedding
            .as_ref()
            .map(|e| Self::serialize_embedding(e));

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reflexions
                (id, project, content, validity_score, usage_count, successful_uses,
                 marked_stale, stale_reason, embedding, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                project = excluded.project,
                content = excluded.content,
                validity_score = excluded.validity_score,
                usage_count = excluded.usage_count,
                successful_uses = excluded.successful_uses,
                marked_stale = excluded.marked_stale,
                stale_reason = excluded.stale_reason,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at",
            params![
                reflexion.id.0,
                reflexion.project,
                reflexion.content,
                reflexion.validity_score,
                reflexion.usage_count as i64,
                reflexion.successful_uses as i64,
                reflexion.marked_stale as i64,
                reflexion.stale_reason,
                embedding,
                reflexion.created_at.to_rfc3339(),
                reflexion.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_reflexion(&self, id: &UnitId) -> Result<Option<TrackedReflexion>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, project, content, validity_score, usage_count, successful_uses,
                        marked_stale, stale_reason, embedding, created_at, updated_at
                 FROM reflexions WHERE id = ?1",
                params![id.0],
                Self::row_to_reflexion,
            )
            .optional()?;
        drop(conn);
        row.map(ReflexionRow::decode).transpose()
    }

    async fn list_reflexions(&self, project: Option<&str>) -> Result<Vec<TrackedReflexion>> {
        let conn = self.lock()?;
        let mut rows = Vec::new();
        match project {
            Some(p) => {
                let mut stmt = conn.prepare(
                    "SELECT id, project, content, validity_score, usage_count, successful_uses,
                            marked_stale, stale_reason, embedding, created_at, updated_at
                     FROM reflexions WHERE project = ?1 ORDER BY id",
                )?;
                let mapped = stmt.query_map(params![p], Self::row_to_reflexion)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, project, content, validity_score, usage_count, successful_uses,
                            marked_stale, stale_reason, embedding, created_at, updated_at
                     FROM reflexions ORDER BY id",
                )?;
                let mapped = stmt.query_map([], Self::row_to_reflexion)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
        }
        drop(conn);
        rows.into_iter().map(ReflexionRow::decode).collect()
    }

    async fn append_event(&self, event: &UsageEvent) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO usage_events (reflexion_id, timestamp, success, context)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.reflexion_id.0,
                event.timestamp.to_rfc3339(),
                event.success as i64,
                event.context,
            ],
        )?;
        Ok(())
    }

    async fn query_window(
        &self,
        id: &UnitId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowCounts> {
        let conn = self.lock()?;
        let (total, successes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(success), 0)
             FROM usage_events
             WHERE reflexion_id = ?1 AND timestamp >= ?2 AND timestamp < ?3",
            params![id.0, start.to_rfc3339(), end.to_rfc3339()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(WindowCounts {
            total: total as u64,
            successes: successes as u64,
        })
    }
}
