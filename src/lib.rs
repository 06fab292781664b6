//! Metanoia - Adaptive Drift-Detection and Retraining-Trigger Core
//!
//! A library for agentic learning systems that:
//! - Tracks the validity of learned knowledge over time from observed outcomes
//! - Detects drift between adjacent time windows and marks stale knowledge
//! - Evolves knowledge units: pruning, confidence updates, merging, reflection
//! - Evaluates a registry of trigger conditions against a live event stream,
//!   with cooldown, rate limiting, and deduplication
//! - Executes retraining work with bounded concurrency, retry with backoff,
//!   and optional cross-task shared learning
//!
//! # Architecture
//!
//! The system is organized into four components, built bottom-up:
//! - **Validity**: outcome history, validity scores, drift detection
//! - **Evolution**: prune/merge/confidence decisions and periodic reflection
//! - **Triggers**: when autonomous intervention should fire
//! - **Coordinator**: bounded-concurrency retraining execution
//!
//! Collaborators (LLM provider, embedding provider, durable store) live
//! behind traits; the remote half of the dual store is a best-effort
//! replica, never authoritative.
//!
//! # Example
//!
//! ```ignore
//! use metanoia::{
//!     MetanoiaConfig, ReplicatedStore, SqliteStore, TrackedReflexion, ValidityTracker,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MetanoiaConfig::default();
//!     let local = Arc::new(SqliteStore::open("metanoia.db")?);
//!     let store = Arc::new(ReplicatedStore::new(local));
//!     let tracker = ValidityTracker::new(store, config.validity);
//!
//!     let reflexion = TrackedReflexion::new("my-project", "prefer batched writes");
//!     tracker.track(&reflexion).await?;
//!     tracker.record_usage(&reflexion.id, true, None).await?;
//!
//!     let drift = tracker.detect_drift(&reflexion.id).await?;
//!     println!("drift detected: {}", drift.drift_detected);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod embeddings;
pub mod error;
pub mod evolution;
pub mod services;
pub mod storage;
pub mod triggers;
pub mod types;
pub mod validity;

// Re-export commonly used types
pub use config::{
    ConfigError, CoordinatorConfig, EvolutionConfig, MetanoiaConfig, TriggerConfig, ValidityConfig,
};
pub use coordinator::{
    CoordinatorStats, DomainInsights, InsightSource, RetrainExecutor, TaskCoordinator,
};
pub use error::{MetanoiaError, Result};
pub use evolution::{AutoEvolution, EvolutionReport, KnowledgeEvolutionEngine, PruningDecision};
pub use storage::{InMemoryStore, KnowledgeStore, ReplicatedStore, SqliteStore};
pub use triggers::{
    EventFeed, FiredTrigger, TriggerCondition, TriggerDefinition, TriggerEngine,
};
pub use types::{
    Feedback, KnowledgeUnit, RetrainTask, Severity, TaskPriority, TrackedReflexion,
    TrainingResult, UnitId, UsageEvent,
};
pub use validity::{DriftReport, StalenessAdvisory, ValidityStats, ValidityTracker};
