//! In-memory store backend
//!
//! Backs tests and embedded use where persistence is not required. The
//! event log is append-only, matching the durability contract of the
//! sqlite backend.

use crate::error::Result;
use crate::storage::{KnowledgeStore, WindowCounts};
use crate::types::{KnowledgeUnit, TrackedReflexion, UnitId, UsageEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory store
#[derive(Default)]
pub struct InMemoryStore {
    units: RwLock<HashMap<UnitId, KnowledgeUnit>>,
    reflexions: RwLock<HashMap<UnitId, TrackedReflexion>>,
    events: RwLock<Vec<UsageEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events recorded across all reflexions
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn upsert_unit(&self, unit: &KnowledgeUnit) -> Result<()> {
        self.units
            .write()
            .await
            .insert(unit.id.clone(), unit.clone());
        Ok(())
    }

    async fn get_unit(&self, id: &UnitId) -> Result<Option<KnowledgeUnit>> {
        Ok(self.units.read().await.get(id).cloned())
    }

    async fn list_units(&self, domain: Option<&str>) -> Result<Vec<KnowledgeUnit>> {
        let units = self.units.read().await;
        let mut result: Vec<KnowledgeUnit> = units
            .values()
            .filter(|u| domain.map_or(true, |d| u.domain == d))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    async fn delete_unit(&self, id: &UnitId) -> Result<()> {
        self.units.write().await.remove(id);
        Ok(())
    }

    async fn upsert_reflexion(&self, reflexion: &TrackedReflexion) -> Result<()> {
        self.reflexions
            .write()
            .await
            .insert(reflexion.id.clone(), reflexion.clone());
        Ok(())
    }

    async fn get_reflexion(&self, id: &UnitId) -> Result<Option<TrackedReflexion>> {
        Ok(self.reflexions.read().await.get(id).cloned())
    }

    async fn list_reflexions(&self, project: Option<&str>) -> Result<Vec<TrackedReflexion>> {
        let reflexions = self.reflexions.read().await;
        let mut result: Vec<TrackedReflexion> = reflexions
            .values()
            .filter(|r| project.map_or(true, |p| r.project == p))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    async fn append_event(&self, event: &UsageEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn query_window(
        &self,
        id: &UnitId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowCounts> {
        let events = self.events.read().await;
        let mut counts = WindowCounts::default();
        for event in events.iter() {
            if event.reflexion_id == *id && event.timestamp >= start && event.timestamp < end {
                counts.total += 1;
                if event.success {
                    counts.successes += 1;
                }
            }
        }
        Ok(counts)
    }
}
