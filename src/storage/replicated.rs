//! Dual-store fan-out with local-authoritative semantics
//!
//! Writes land on the local store first (a failure there fails the call),
//! then fan out to the optional remote store best-effort (a failure there
//! is logged, never raised). Merged reads issue both queries concurrently
//! and merge by id with remote precedence, since the remote copy carries
//! richer cross-project metadata. The remote store is eventually
//! consistent and is never consulted for read-after-write-critical logic.

use crate::error::Result;
use crate::storage::{KnowledgeStore, WindowCounts};
use crate::types::{KnowledgeUnit, TrackedReflexion, UnitId, UsageEvent};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Local-authoritative store pair
pub struct ReplicatedStore {
    local: Arc<dyn KnowledgeStore>,
    remote: Option<Arc<dyn KnowledgeStore>>,
}

impl ReplicatedStore {
    /// Local-only configuration (remote replication disabled)
    pub fn new(local: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    /// Enable best-effort replication to a remote store
    pub fn with_remote(local: Arc<dyn KnowledgeStore>, remote: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            local,
            remote: Some(remote),
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Upsert a knowledge unit: local hard, remote soft
    pub async fn upsert_unit(&self, unit: &KnowledgeUnit) -> Result<()> {
        self.local.upsert_unit(unit).await?;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.upsert_unit(unit).await {
                warn!("Remote unit replication failed for {}: {}", unit.id, e);
            }
        }
        Ok(())
    }

    /// Upsert a reflexion: local hard, remote soft
    pub async fn upsert_reflexion(&self, reflexion: &TrackedReflexion) -> Result<()> {
        self.local.upsert_reflexion(reflexion).await?;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.upsert_reflexion(reflexion).await {
                warn!(
                    "Remote reflexion replication failed for {}: {}",
                    reflexion.id, e
                );
            }
        }
        Ok(())
    }

    /// Append a usage event: local hard, remote soft
    pub async fn append_event(&self, event: &UsageEvent) -> Result<()> {
        self.local.append_event(event).await?;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.append_event(event).await {
                warn!(
                    "Remote event replication failed for {}: {}",
                    event.reflexion_id, e
                );
            }
        }
        Ok(())
    }

    /// Delete a pruned unit from both stores (remote soft)
    pub async fn delete_unit(&self, id: &UnitId) -> Result<()> {
        self.local.delete_unit(id).await?;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete_unit(id).await {
                warn!("Remote unit delete failed for {}: {}", id, e);
            }
        }
        Ok(())
    }

    // Authoritative reads go to the local store only.

    pub async fn get_unit(&self, id: &UnitId) -> Result<Option<KnowledgeUnit>> {
        self.local.get_unit(id).await
    }

    pub async fn list_units(&self, domain: Option<&str>) -> Result<Vec<KnowledgeUnit>> {
        self.local.list_units(domain).await
    }

    pub async fn get_reflexion(&self, id: &UnitId) -> Result<Option<TrackedReflexion>> {
        self.local.get_reflexion(id).await
    }

    pub async fn list_reflexions(&self, project: Option<&str>) -> Result<Vec<TrackedReflexion>> {
        self.local.list_reflexions(project).await
    }

    pub async fn query_window(
        &self,
        id: &UnitId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowCounts> {
        self.local.query_window(id, start, end).await
    }

    /// Cross-store reflexion listing for similarity search.
    ///
    /// Both stores are queried concurrently; results merge by id with the
    /// remote entry winning on duplicates. Either side failing degrades to
    /// the other side's results.
    pub async fn merged_reflexions(&self, project: Option<&str>) -> Result<Vec<TrackedReflexion>> {
        let (local_result, remote_result) = match &self.remote {
            Some(remote) => tokio::join!(
                self.local.list_reflexions(project),
                remote.list_reflexions(project)
            ),
            None => (self.local.list_reflexions(project).await, Ok(Vec::new())),
        };

        let local = local_result.unwrap_or_else(|e| {
            warn!("Local reflexion listing failed, degrading to remote: {}", e);
            Vec::new()
        });
        let remote = remote_result.unwrap_or_else(|e| {
            warn!("Remote reflexion listing failed, degrading to local: {}", e);
            Vec::new()
        });

        let mut merged: HashMap<UnitId, TrackedReflexion> = HashMap::new();
        for reflexion in local {
            merged.insert(reflexion.id.clone(), reflexion);
        }
        // Remote wins on duplicate id
        for reflexion in remote {
            merged.insert(reflexion.id.clone(), reflexion);
        }

        let mut result: Vec<TrackedReflexion> = merged.into_values().collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }
}
