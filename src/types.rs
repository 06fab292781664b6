//! Core data types for the Metanoia adaptive learning core
//!
//! This module defines the fundamental data structures shared across the
//! validity tracker, evolution engine, trigger engine, and task coordinator:
//! knowledge units, tracked reflexions, usage events, and retraining work
//! items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for knowledge units and tracked reflexions
///
/// Wraps a string so that both random v4 ids and deterministic merge ids
/// (`merged-<sorted source ids>`) live in the same type without mixing with
/// other identifiers in the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
    /// Create a new random unit ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Deterministic ID for a merge of the given source units.
    ///
    /// Source ids are sorted before joining, so merging the same set twice
    /// yields the same ID regardless of input order.
    pub fn merged(sources: &[UnitId]) -> Self {
        let mut parts: Vec<&str> = sources.iter().map(|id| id.0.as_str()).collect();
        parts.sort_unstable();
        Self(format!("merged-{}", parts.join("-")))
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Severity bucket shared by drift reports and fired triggers
///
/// Ordered from least to most severe so that `Ord` comparisons are
/// meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// One discrete learned fact, pattern, or prompt variant
///
/// Confidence and success rate are always clamped to `[0, 1]`; the usage
/// count is monotonically non-decreasing. Units are created on the first
/// successful experience and mutated through
/// [`KnowledgeEvolutionEngine::update_from_experience`](crate::evolution::KnowledgeEvolutionEngine::update_from_experience).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeUnit {
    pub id: UnitId,

    /// Knowledge domain this unit belongs to (expert role, project area)
    pub domain: String,

    /// Whether the originating experience succeeded
    pub success: bool,

    /// Reasoning steps captured from the originating experience
    pub reasoning: Vec<String>,

    /// Confidence in this unit, in `[0, 1]`
    pub confidence: f64,

    /// Fraction of uses that succeeded, in `[0, 1]`
    pub success_rate: f64,

    /// Number of times this unit has been applied
    pub usage_count: u64,

    /// Lessons accumulated from failed applications
    pub lessons: Vec<String>,

    /// Ids of related units (merge provenance, cross-references)
    pub related_units: BTreeSet<UnitId>,

    /// Whether this unit is a candidate for cross-domain transfer
    pub transferable: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeUnit {
    /// Create a fresh unit from a first experience
    pub fn new(domain: impl Into<String>, success: bool) -> Self {
        let now = Utc::now();
        Self {
            id: UnitId::new(),
            domain: domain.into(),
            success,
            reasoning: Vec::new(),
            confidence: 0.5,
            success_rate: if success { 1.0 } else { 0.0 },
            usage_count: 0,
            lessons: Vec::new(),
            related_units: BTreeSet::new(),
            transferable: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Days elapsed since this unit was created
    pub fn age_in_days(&self, now: DateTime<Utc>) -> f64 {
        now.signed_duration_since(self.created_at).num_seconds() as f64 / 86_400.0
    }

    /// Clamp confidence and success rate back into `[0, 1]`
    pub fn clamp_scores(&mut self) {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self.success_rate = self.success_rate.clamp(0.0, 1.0);
    }
}

/// A reasoning trace with a measurable outcome history
///
/// `successful_uses <= usage_count` always holds; `marked_stale` implies a
/// stale reason is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedReflexion {
    pub id: UnitId,

    /// Project this trace was captured in
    pub project: String,

    /// Text of the trace, used for similarity embedding
    pub content: String,

    /// Rolling success rate over the drift window, in `[0, 1]`
    pub validity_score: f64,

    pub usage_count: u64,
    pub successful_uses: u64,

    pub marked_stale: bool,
    pub stale_reason: Option<String>,

    /// Similarity embedding, if the embedding provider has produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedReflexion {
    pub fn new(project: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: UnitId::new(),
            project: project.into(),
            content: content.into(),
            validity_score: 1.0,
            usage_count: 0,
            successful_uses: 0,
            marked_stale: false,
            stale_reason: None,
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One outcome record for a tracked reflexion. Append-only, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub reflexion_id: UnitId,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl UsageEvent {
    pub fn new(reflexion_id: UnitId, success: bool, context: Option<String>) -> Self {
        Self {
            reflexion_id,
            timestamp: Utc::now(),
            success,
            context,
        }
    }
}

/// Caller-supplied feedback attached to an experience
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Feedback {
    /// Evidence score in `[0, 1]`; when absent, success maps to 1.0 and
    /// failure to 0.0
    pub score: Option<f64>,

    /// Free-form comment; captured as a lesson on failure
    pub comment: Option<String>,
}

/// Priority of a retraining task. `Critical` drains first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// One unit of retraining/optimization work for a knowledge domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainTask {
    /// Expert role or knowledge domain this task retrains
    pub domain: String,

    /// Opaque request payload handed to the executor
    pub payload: serde_json::Value,

    pub priority: TaskPriority,

    /// Optimizer trial budget; shared learning may scale this upward
    pub num_trials: u32,
}

impl RetrainTask {
    pub fn new(domain: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            domain: domain.into(),
            payload,
            priority: TaskPriority::Medium,
            num_trials: 10,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Terminal outcome of a retraining task, written exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    pub domain: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Retries consumed before the terminal outcome; never exceeds the
    /// configured maximum
    pub retries: u32,
}
