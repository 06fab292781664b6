//! Validity tracker
//!
//! Maintains the authoritative history of outcomes for tracked reflexions
//! and derives validity and drift signals from it. The tracker is the only
//! writer of reflexion state; concurrent usage recordings for the same id
//! serialize through a per-id lock so read-modify-write of the counters
//! never loses updates.
//!
//! A tracker constructed without a store (`detached`) degrades every
//! read-heavy operation to empty or neutral results instead of failing, so
//! it is never a single point of failure for the caller. Required writes
//! (`track`) still report the missing store.

use super::drift::{drift_severity, half_validity, DriftReport};
use crate::config::ValidityConfig;
use crate::embeddings::{cosine_similarity, EmbeddingService};
use crate::error::{MetanoiaError, Result};
use crate::storage::ReplicatedStore;
use crate::types::{KnowledgeUnit, Severity, TrackedReflexion, UnitId, UsageEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Bound on retained drift reports
const MAX_DRIFT_HISTORY: usize = 1000;

/// Advisory produced when a reflexion is marked stale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessAdvisory {
    pub reflexion_id: UnitId,
    pub project: String,
    pub validity: f64,
    pub reason: String,
    pub recommendation: String,
    pub created_at: DateTime<Utc>,
}

/// One cross-domain similarity match
#[derive(Debug, Clone)]
pub struct SimilarUnit {
    pub reflexion: TrackedReflexion,
    pub similarity: f32,
}

/// Result of a cross-domain similarity search
#[derive(Debug, Clone, Default)]
pub struct SimilarityReport {
    /// Matches at or above the requested threshold, descending by similarity
    pub matches: Vec<SimilarUnit>,

    /// `max(similarity × validity_score)` over the matches, 0 if empty
    pub transfer_potential: f64,
}

/// Aggregate view over tracked reflexions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidityStats {
    pub total_reflexions: u64,
    pub average_validity: f64,
    pub stale_count: u64,
    pub recent_drift_events: u64,
}

/// Validity tracker
pub struct ValidityTracker {
    store: Option<Arc<ReplicatedStore>>,
    embeddings: Option<Arc<dyn EmbeddingService>>,
    config: ValidityConfig,
    id_locks: Mutex<HashMap<UnitId, Arc<Mutex<()>>>>,
    advisories: RwLock<Vec<StalenessAdvisory>>,
    drift_history: RwLock<Vec<DriftReport>>,
}

impl ValidityTracker {
    pub fn new(store: Arc<ReplicatedStore>, config: ValidityConfig) -> Self {
        Self {
            store: Some(store),
            embeddings: None,
            config,
            id_locks: Mutex::new(HashMap::new()),
            advisories: RwLock::new(Vec::new()),
            drift_history: RwLock::new(Vec::new()),
        }
    }

    /// Attach an embedding provider for similarity search
    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingService>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    /// Tracker without a store; reads degrade to neutral results
    pub fn detached(config: ValidityConfig) -> Self {
        Self {
            store: None,
            embeddings: None,
            config,
            id_locks: Mutex::new(HashMap::new()),
            advisories: RwLock::new(Vec::new()),
            drift_history: RwLock::new(Vec::new()),
        }
    }

    fn window(&self) -> Duration {
        Duration::days(self.config.drift_window_days)
    }

    async fn id_lock(&self, id: &UnitId) -> Arc<Mutex<()>> {
        let mut locks = self.id_locks.lock().await;
        locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Idempotent upsert of a tracked reflexion.
    ///
    /// The local write is authoritative and its failure fails the call; the
    /// remote replication inside the store is best-effort. When an embedding
    /// provider is attached and the reflexion has no embedding yet, one is
    /// requested; an embedding failure is logged and the reflexion is
    /// tracked without a vector, never with a fabricated one.
    pub async fn track(&self, reflexion: &TrackedReflexion) -> Result<()> {
        let store = self.store.as_ref().ok_or(MetanoiaError::StoreUnavailable)?;

        let mut reflexion = reflexion.clone();
        if reflexion.embedding.is_none() {
            if let Some(embeddings) = &self.embeddings {
                match embeddings.embed(&reflexion.content).await {
                    Ok(vector) => reflexion.embedding = Some(vector),
                    Err(e) => {
                        warn!(
                            "Embedding failed for {}, tracking without vector: {}",
                            reflexion.id, e
                        );
                    }
                }
            }
        }

        store.upsert_reflexion(&reflexion).await?;
        debug!("Tracked reflexion {} in {}", reflexion.id, reflexion.project);
        Ok(())
    }

    /// Idempotent upsert of a knowledge unit (dual-write, local
    /// authoritative). The tracker is the only writer of unit state.
    pub async fn track_unit(&self, unit: &KnowledgeUnit) -> Result<()> {
        let store = self.store.as_ref().ok_or(MetanoiaError::StoreUnavailable)?;
        store.upsert_unit(unit).await?;
        debug!("Tracked knowledge unit {} in {}", unit.id, unit.domain);
        Ok(())
    }

    /// Stored knowledge units, optionally filtered by domain; empty when
    /// degraded
    pub async fn units(&self, domain: Option<&str>) -> Vec<KnowledgeUnit> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.list_units(domain).await {
            Ok(units) => units,
            Err(e) => {
                warn!("Unit listing failed, returning empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Remove units the evolution engine flagged for pruning. Returns how
    /// many were deleted; a failed delete is logged and skipped so one bad
    /// unit never aborts the batch.
    pub async fn remove_units(&self, units: &[KnowledgeUnit]) -> Result<usize> {
        let store = self.store.as_ref().ok_or(MetanoiaError::StoreUnavailable)?;
        let mut removed = 0;
        for unit in units {
            match store.delete_unit(&unit.id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to delete unit {}: {}", unit.id, e),
            }
        }
        Ok(removed)
    }

    /// Append a usage outcome and recompute validity.
    pub async fn record_usage(
        &self,
        id: &UnitId,
        success: bool,
        context: Option<String>,
    ) -> Result<()> {
        self.record_usage_at(id, success, context, Utc::now()).await
    }

    /// [`record_usage`](Self::record_usage) against an explicit instant.
    pub async fn record_usage_at(
        &self,
        id: &UnitId,
        success: bool,
        context: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let store = self.store.as_ref().ok_or(MetanoiaError::StoreUnavailable)?;

        // Serialize read-modify-write per id; different ids proceed freely
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        let mut reflexion = store
            .get_reflexion(id)
            .await?
            .ok_or_else(|| MetanoiaError::UnitNotFound(id.to_string()))?;

        let mut event = UsageEvent::new(id.clone(), success, context);
        event.timestamp = now;
        store.append_event(&event).await?;

        reflexion.usage_count += 1;
        if success {
            reflexion.successful_uses += 1;
        }
        reflexion.updated_at = now;
        store.upsert_reflexion(&reflexion).await?;

        self.recalculate_validity_inner(store, reflexion, now).await
    }

    /// Recompute the validity score over the trailing window.
    pub async fn recalculate_validity(&self, id: &UnitId) -> Result<()> {
        let now = Utc::now();
        let store = self.store.as_ref().ok_or(MetanoiaError::StoreUnavailable)?;
        let reflexion = store
            .get_reflexion(id)
            .await?
            .ok_or_else(|| MetanoiaError::UnitNotFound(id.to_string()))?;
        self.recalculate_validity_inner(store, reflexion, now).await
    }

    async fn recalculate_validity_inner(
        &self,
        store: &ReplicatedStore,
        mut reflexion: TrackedReflexion,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let counts = store
            .query_window(&reflexion.id, now - self.window(), now)
            .await?;

        // Insufficient evidence: never extrapolate from small samples
        if counts.total < self.config.min_usage_for_validity {
            debug!(
                "Skipping validity recompute for {}: {} events in window, need {}",
                reflexion.id, counts.total, self.config.min_usage_for_validity
            );
            return Ok(());
        }

        let validity = counts.successes as f64 / counts.total as f64;
        reflexion.validity_score = validity;
        reflexion.updated_at = now;

        if validity < self.config.validity_threshold && !reflexion.marked_stale {
            let reason = format!(
                "validity {:.2} fell below threshold {:.2} over {} uses",
                validity, self.config.validity_threshold, counts.total
            );
            warn!("Marking reflexion {} stale: {}", reflexion.id, reason);

            reflexion.marked_stale = true;
            reflexion.stale_reason = Some(reason.clone());

            self.advisories.write().await.push(StalenessAdvisory {
                reflexion_id: reflexion.id.clone(),
                project: reflexion.project.clone(),
                validity,
                reason,
                recommendation: "retrain or retire this reflexion".to_string(),
                created_at: now,
            });
        }

        store.upsert_reflexion(&reflexion).await
    }

    /// Compare validity across the two halves of the trailing window.
    pub async fn detect_drift(&self, id: &UnitId) -> Result<DriftReport> {
        self.detect_drift_at(id, Utc::now()).await
    }

    /// [`detect_drift`](Self::detect_drift) against an explicit instant.
    pub async fn detect_drift_at(&self, id: &UnitId, now: DateTime<Utc>) -> Result<DriftReport> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(Self::neutral_report(id, now)),
        };

        let half = self.window() / 2;
        let midpoint = now - half;

        let older = store.query_window(id, now - self.window(), midpoint).await?;
        let recent = store.query_window(id, midpoint, now).await?;

        let older_validity = half_validity(older.total, older.successes);
        let recent_validity = half_validity(recent.total, recent.successes);
        let validity_change = recent_validity - older_validity;

        let drift_detected =
            validity_change.abs() > 0.1 || recent_validity < self.config.validity_threshold;

        let report = DriftReport {
            reflexion_id: id.clone(),
            recent_validity,
            older_validity,
            validity_change,
            drift_detected,
            severity: drift_severity(validity_change),
            checked_at: now,
        };

        if drift_detected {
            info!(
                "Drift on {}: change {:+.2} ({})",
                id, validity_change, report.severity
            );
        }

        let mut history = self.drift_history.write().await;
        history.push(report.clone());
        if history.len() > MAX_DRIFT_HISTORY {
            let excess = history.len() - MAX_DRIFT_HISTORY;
            history.drain(..excess);
        }

        Ok(report)
    }

    fn neutral_report(id: &UnitId, now: DateTime<Utc>) -> DriftReport {
        DriftReport {
            reflexion_id: id.clone(),
            recent_validity: 1.0,
            older_validity: 1.0,
            validity_change: 0.0,
            drift_detected: false,
            severity: Severity::Low,
            checked_at: now,
        }
    }

    /// Cross-domain similarity search over both stores.
    ///
    /// Local and remote listings are queried concurrently and merged by id
    /// with remote precedence. Candidates without embeddings are skipped;
    /// an unembeddable source degrades the search to an empty report.
    pub async fn find_similar(&self, id: &UnitId, threshold: f32) -> Result<SimilarityReport> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(SimilarityReport::default()),
        };

        let source = match store.get_reflexion(id).await? {
            Some(source) => source,
            None => return Err(MetanoiaError::UnitNotFound(id.to_string())),
        };

        let source_embedding = match &source.embedding {
            Some(embedding) => embedding.clone(),
            None => match &self.embeddings {
                Some(embeddings) => match embeddings.embed(&source.content).await {
                    Ok(vector) => vector,
                    Err(e) => {
                        warn!("Cannot embed {} for similarity search: {}", id, e);
                        return Ok(SimilarityReport::default());
                    }
                },
                None => {
                    debug!("No embedding for {} and no provider attached", id);
                    return Ok(SimilarityReport::default());
                }
            },
        };

        let candidates = store.merged_reflexions(None).await?;

        let mut matches: Vec<SimilarUnit> = candidates
            .into_iter()
            .filter(|candidate| candidate.id != *id)
            .filter_map(|candidate| {
                let embedding = candidate.embedding.as_ref()?;
                let similarity = cosine_similarity(&source_embedding, embedding);
                (similarity >= threshold).then(|| SimilarUnit {
                    reflexion: candidate,
                    similarity,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let transfer_potential = matches
            .iter()
            .map(|m| m.similarity as f64 * m.reflexion.validity_score)
            .fold(0.0_f64, f64::max);

        Ok(SimilarityReport {
            matches,
            transfer_potential,
        })
    }

    /// Aggregate counts over tracked reflexions; zeroed when degraded.
    pub async fn stats(&self, project: Option<&str>) -> ValidityStats {
        self.stats_at(project, Utc::now()).await
    }

    /// [`stats`](Self::stats) against an explicit instant.
    pub async fn stats_at(&self, project: Option<&str>, now: DateTime<Utc>) -> ValidityStats {
        let store = match &self.store {
            Some(store) => store,
            None => return ValidityStats::default(),
        };

        let reflexions = match store.list_reflexions(project).await {
            Ok(reflexions) => reflexions,
            Err(e) => {
                warn!("Stats listing failed, returning zeroed stats: {}", e);
                return ValidityStats::default();
            }
        };

        let total = reflexions.len() as u64;
        let stale = reflexions.iter().filter(|r| r.marked_stale).count() as u64;
        let average = if reflexions.is_empty() {
            0.0
        } else {
            reflexions.iter().map(|r| r.validity_score).sum::<f64>() / reflexions.len() as f64
        };

        let window_start = now - self.window();
        let drift_events = self
            .drift_history
            .read()
            .await
            .iter()
            .filter(|r| r.drift_detected && r.checked_at >= window_start)
            .count() as u64;

        ValidityStats {
            total_reflexions: total,
            average_validity: average,
            stale_count: stale,
            recent_drift_events: drift_events,
        }
    }

    /// Advisories produced by staleness marking, oldest first
    pub async fn advisories(&self) -> Vec<StalenessAdvisory> {
        self.advisories.read().await.clone()
    }

    /// Mean of the positive validity changes across recorded drift checks,
    /// 0.0 when none improved. Feeds shared-learning trial scaling.
    pub async fn average_recent_improvement(&self) -> f64 {
        let history = self.drift_history.read().await;
        let improvements: Vec<f64> = history
            .iter()
            .filter(|r| r.validity_change > 0.0)
            .map(|r| r.validity_change)
            .collect();
        if improvements.is_empty() {
            0.0
        } else {
            improvements.iter().sum::<f64>() / improvements.len() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStore, KnowledgeStore};

    fn tracker_with_store() -> (ValidityTracker, Arc<InMemoryStore>) {
        let local = Arc::new(InMemoryStore::new());
        let store = Arc::new(ReplicatedStore::new(local.clone()));
        let config = ValidityConfig {
            drift_window_days: 30,
            min_usage_for_validity: 5,
            validity_threshold: 0.6,
        };
        (ValidityTracker::new(store, config), local)
    }

    #[tokio::test]
    async fn test_track_and_record_usage() {
        let (tracker, _local) = tracker_with_store();
        let reflexion = TrackedReflexion::new("proj", "use retries for flaky endpoints");
        tracker.track(&reflexion).await.unwrap();

        tracker
            .record_usage(&reflexion.id, true, Some("deploy".to_string()))
            .await
            .unwrap();

        let store = tracker.store.as_ref().unwrap();
        let stored = store.get_reflexion(&reflexion.id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 1);
        assert_eq!(stored.successful_uses, 1);
    }

    #[tokio::test]
    async fn test_insufficient_evidence_leaves_score_unchanged() {
        let (tracker, _local) = tracker_with_store();
        let mut reflexion = TrackedReflexion::new("proj", "trace");
        reflexion.validity_score = 0.9;
        tracker.track(&reflexion).await.unwrap();

        // 3 failures, below min_usage_for_validity = 5
        for _ in 0..3 {
            tracker.record_usage(&reflexion.id, false, None).await.unwrap();
        }

        let store = tracker.store.as_ref().unwrap();
        let stored = store.get_reflexion(&reflexion.id).await.unwrap().unwrap();
        assert!((stored.validity_score - 0.9).abs() < f64::EPSILON);
        assert!(!stored.marked_stale);
    }

    #[tokio::test]
    async fn test_low_validity_marks_stale_and_creates_advisory() {
        let (tracker, _local) = tracker_with_store();
        let reflexion = TrackedReflexion::new("proj", "trace");
        tracker.track(&reflexion).await.unwrap();

        // 1 success, 5 failures: validity 1/6 < 0.6
        tracker.record_usage(&reflexion.id, true, None).await.unwrap();
        for _ in 0..5 {
            tracker.record_usage(&reflexion.id, false, None).await.unwrap();
        }

        let store = tracker.store.as_ref().unwrap();
        let stored = store.get_reflexion(&reflexion.id).await.unwrap().unwrap();
        assert!(stored.marked_stale);
        assert!(stored.stale_reason.is_some());

        let advisories = tracker.advisories().await;
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].reflexion_id, reflexion.id);
    }

    #[tokio::test]
    async fn test_drift_positive_change_detected() {
        let (tracker, local) = tracker_with_store();
        let reflexion = TrackedReflexion::new("proj", "trace");
        tracker.track(&reflexion).await.unwrap();

        let now = Utc::now();

        // Older half: all failures; recent half: all successes
        for days_ago in [25, 22, 20] {
            let mut event = UsageEvent::new(reflexion.id.clone(), false, None);
            event.timestamp = now - Duration::days(days_ago);
            local.append_event(&event).await.unwrap();
        }
        for days_ago in [10, 5, 2] {
            let mut event = UsageEvent::new(reflexion.id.clone(), true, None);
            event.timestamp = now - Duration::days(days_ago);
            local.append_event(&event).await.unwrap();
        }

        let report = tracker.detect_drift_at(&reflexion.id, now).await.unwrap();
        assert!(report.validity_change > 0.0);
        assert!(report.drift_detected);
        assert_eq!(report.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_drift_unused_half_defaults_valid() {
        let (tracker, local) = tracker_with_store();
        let reflexion = TrackedReflexion::new("proj", "trace");
        tracker.track(&reflexion).await.unwrap();

        let now = Utc::now();
        // Only recent successes; older half empty
        for days_ago in [10, 5] {
            let mut event = UsageEvent::new(reflexion.id.clone(), true, None);
            event.timestamp = now - Duration::days(days_ago);
            local.append_event(&event).await.unwrap();
        }

        let report = tracker.detect_drift_at(&reflexion.id, now).await.unwrap();
        assert_eq!(report.older_validity, 1.0);
        assert_eq!(report.recent_validity, 1.0);
        assert!(!report.drift_detected);
    }

    #[tokio::test]
    async fn test_find_similar_sorts_and_scores_transfer() {
        let (tracker, local) = tracker_with_store();

        let mut source = TrackedReflexion::new("proj-a", "source");
        source.embedding = Some(vec![1.0, 0.0, 0.0]);
        tracker.track(&source).await.unwrap();

        let mut close = TrackedReflexion::new("proj-b", "close");
        close.embedding = Some(vec![0.9, 0.1, 0.0]);
        close.validity_score = 0.8;
        local.upsert_reflexion(&close).await.unwrap();

        let mut far = TrackedReflexion::new("proj-c", "far");
        far.embedding = Some(vec![0.0, 1.0, 0.0]);
        far.validity_score = 1.0;
        local.upsert_reflexion(&far).await.unwrap();

        let report = tracker.find_similar(&source.id, 0.7).await.unwrap();
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].reflexion.id, close.id);
        assert!(report.transfer_potential > 0.7);
    }

    #[tokio::test]
    async fn test_find_similar_without_embeddings_degrades_empty() {
        let (tracker, _local) = tracker_with_store();
        let source = TrackedReflexion::new("proj", "no vector");
        tracker.track(&source).await.unwrap();

        let report = tracker.find_similar(&source.id, 0.5).await.unwrap();
        assert!(report.matches.is_empty());
        assert_eq!(report.transfer_potential, 0.0);
    }

    #[tokio::test]
    async fn test_detached_tracker_degrades_to_neutral() {
        let tracker = ValidityTracker::detached(ValidityConfig::default());
        let id = UnitId::new();

        let report = tracker.detect_drift(&id).await.unwrap();
        assert!(!report.drift_detected);

        let similar = tracker.find_similar(&id, 0.5).await.unwrap();
        assert!(similar.matches.is_empty());

        let stats = tracker.stats(None).await;
        assert_eq!(stats, ValidityStats::default());

        // Required write still reports the missing store
        let reflexion = TrackedReflexion::new("proj", "trace");
        assert!(matches!(
            tracker.track(&reflexion).await,
            Err(MetanoiaError::StoreUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_usage_recording_loses_no_updates() {
        let (tracker, _local) = tracker_with_store();
        let reflexion = TrackedReflexion::new("proj", "trace");
        tracker.track(&reflexion).await.unwrap();

        let tracker = Arc::new(tracker);
        let mut handles = Vec::new();
        for i in 0..10 {
            let tracker = tracker.clone();
            let id = reflexion.id.clone();
            handles.push(tokio::spawn(async move {
                tracker.record_usage(&id, i % 2 == 0, None).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let store = tracker.store.as_ref().unwrap();
        let stored = store.get_reflexion(&reflexion.id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 10);
        assert_eq!(stored.successful_uses, 5);
    }

    #[tokio::test]
    async fn test_unit_lifecycle_through_tracker() {
        let (tracker, _local) = tracker_with_store();

        let unit = KnowledgeUnit::new("routing", true);
        tracker.track_unit(&unit).await.unwrap();
        assert_eq!(tracker.units(Some("routing")).await.len(), 1);

        let removed = tracker.remove_units(std::slice::from_ref(&unit)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(tracker.units(Some("routing")).await.is_empty());
    }

    #[tokio::test]
    async fn test_stats_counts_stale_and_average() {
        let (tracker, local) = tracker_with_store();

        let mut healthy = TrackedReflexion::new("proj", "a");
        healthy.validity_score = 1.0;
        local.upsert_reflexion(&healthy).await.unwrap();

        let mut stale = TrackedReflexion::new("proj", "b");
        stale.validity_score = 0.2;
        stale.marked_stale = true;
        stale.stale_reason = Some("degraded".to_string());
        local.upsert_reflexion(&stale).await.unwrap();

        let stats = tracker.stats(Some("proj")).await;
        assert_eq!(stats.total_reflexions, 2);
        assert_eq!(stats.stale_count, 1);
        assert!((stats.average_validity - 0.6).abs() < f64::EPSILON);
    }
}
