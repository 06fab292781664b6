// Triggers Module - Autonomous intervention decisions
//
// Evaluates a registry of trigger conditions (threshold, pattern,
// anomaly, schedule) against the live event stream, applying cooldown,
// rate limiting, and deduplication before emitting the highest-priority
// fired trigger as the decision to invoke downstream retraining.
//
// Components:
// - types: trigger definitions and evaluation results
// - feed: bounded metric/event buffers the engine reads
// - conditions: pure condition evaluators and severity derivation
// - engine: registry, firing discipline, invocation history

pub mod conditions;
pub mod engine;
pub mod feed;
pub mod types;

pub use conditions::ConditionMatch;
pub use engine::TriggerEngine;
pub use feed::{EventFeed, MetricPoint, StreamEvent};
pub use types::{
    AnomalyMethod, CompareOp, EvaluationOutcome, FiredTrigger, TriggerCondition, TriggerDefinition,
};

// Custom serde module for Duration (serialize/deserialize as seconds),
// shared by the trigger definition types
pub(crate) mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
