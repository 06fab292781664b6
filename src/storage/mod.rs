//! Storage layer for the Metanoia adaptive learning core
//!
//! Exposes the durable-store collaborator through the narrow surface this
//! core needs: point upserts, append-only usage events, and windowed
//! aggregate counts. The remote half of the dual store is an
//! asynchronously-replicated shadow behind the same trait; the
//! [`ReplicatedStore`] wrapper owns the fan-out semantics.

pub mod memory;
pub mod replicated;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use replicated::ReplicatedStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::{KnowledgeUnit, TrackedReflexion, UnitId, UsageEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Aggregate outcome counts over a time window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub total: u64,
    pub successes: u64,
}

/// Store trait defining all operations this core requires of its
/// durable-store collaborator
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert or replace a knowledge unit
    async fn upsert_unit(&self, unit: &KnowledgeUnit) -> Result<()>;

    /// Fetch a knowledge unit by ID
    async fn get_unit(&self, id: &UnitId) -> Result<Option<KnowledgeUnit>>;

    /// List knowledge units, optionally filtered by domain
    async fn list_units(&self, domain: Option<&str>) -> Result<Vec<KnowledgeUnit>>;

    /// Remove a pruned knowledge unit
    async fn delete_unit(&self, id: &UnitId) -> Result<()>;

    /// Insert or replace a tracked reflexion
    async fn upsert_reflexion(&self, reflexion: &TrackedReflexion) -> Result<()>;

    /// Fetch a tracked reflexion by ID
    async fn get_reflexion(&self, id: &UnitId) -> Result<Option<TrackedReflexion>>;

    /// List tracked reflexions, optionally filtered by project
    async fn list_reflexions(&self, project: Option<&str>) -> Result<Vec<TrackedReflexion>>;

    /// Append one usage event to the outcome log
    async fn append_event(&self, event: &UsageEvent) -> Result<()>;

    /// Aggregate outcome counts for a reflexion between two instants
    async fn query_window(
        &self,
        id: &UnitId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowCounts>;
}
