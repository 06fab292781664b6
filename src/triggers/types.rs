//! Trigger definitions and evaluation results
//!
//! A trigger pairs a named condition (threshold, pattern, anomaly, or
//! schedule) with firing discipline: priority, cooldown, and an optional
//! hourly rate limit. Triggers are disabled rather than deleted in normal
//! operation.

use crate::types::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Comparison operator for threshold conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

/// Tolerance used for floating-point equality comparisons
pub const EQ_TOLERANCE: f64 = 1e-4;

impl CompareOp {
    /// Evaluate `lhs <op> rhs`, with tolerance on equality
    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => (lhs - rhs).abs() <= EQ_TOLERANCE,
            CompareOp::Ne => (lhs - rhs).abs() > EQ_TOLERANCE,
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        };
        write!(f, "{}", s)
    }
}

/// Statistical test used by anomaly conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMethod {
    /// `|value − mean| / stddev > sensitivity`, stddev floored at 1
    ZScore,
    /// Outside `[Q1 − s·IQR, Q3 + s·IQR]`, percentiles by index
    Iqr,
    /// Modified z-score `0.6745·(value − median)/MAD > sensitivity`, MAD
    /// floored at 1
    Mad,
}

/// Condition evaluated on each tick
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TriggerCondition {
    /// Mean of a named metric over a window compared against a value
    Threshold {
        metric: String,
        operator: CompareOp,
        value: f64,
        #[serde(with = "crate::triggers::serde_duration")]
        window: Duration,
        min_samples: usize,
    },

    /// Ordered event subsequence within a bounded recent window
    Pattern {
        event_sequence: Vec<String>,
        min_occurrences: usize,
        #[serde(with = "crate::triggers::serde_duration")]
        max_timespan: Duration,
        /// Count a trailing prefix match covering at least half the
        /// sequence as an occurrence
        allow_partial: bool,
    },

    /// Detection-window sample tested against a baseline distribution
    Anomaly {
        metric: String,
        method: AnomalyMethod,
        sensitivity: f64,
        #[serde(with = "crate::triggers::serde_duration")]
        detection_window: Duration,
        #[serde(with = "crate::triggers::serde_duration")]
        baseline_window: Duration,
        min_samples: usize,
    },

    /// Interval-based firing; cron expressions are declared but never fire
    Schedule {
        #[serde(with = "crate::triggers::serde_duration")]
        interval: Duration,
        #[serde(skip_serializing_if = "Option::is_none")]
        cron: Option<String>,
    },
}

impl TriggerCondition {
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerCondition::Threshold { .. } => "threshold",
            TriggerCondition::Pattern { .. } => "pattern",
            TriggerCondition::Anomaly { .. } => "anomaly",
            TriggerCondition::Schedule { .. } => "schedule",
        }
    }
}

/// A named condition plus firing discipline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub id: String,
    pub condition: TriggerCondition,

    /// Total-order tie break; higher fires first
    pub priority: u8,

    /// Minimum elapsed time between two firings
    #[serde(with = "crate::triggers::serde_duration")]
    pub cooldown: Duration,

    /// Trailing-hour invocation cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_invocations_per_hour: Option<u32>,

    pub enabled: bool,
}

impl TriggerDefinition {
    pub fn new(id: impl Into<String>, condition: TriggerCondition) -> Self {
        Self {
            id: id.into(),
            condition,
            priority: 50,
            cooldown: Duration::from_secs(300),
            max_invocations_per_hour: None,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_rate_limit(mut self, max_per_hour: u32) -> Self {
        self.max_invocations_per_hour = Some(max_per_hour);
        self
    }
}

/// One fired trigger. Consumed immediately by the invocation decision,
/// only logged otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiredTrigger {
    pub trigger_id: String,
    pub reason: String,
    pub severity: Severity,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
    pub context: serde_json::Value,
}

/// Result of one evaluation tick
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub should_trigger: bool,

    /// Fired triggers, descending by priority, deduplicated by
    /// `(trigger_id, reason)`
    pub fired: Vec<FiredTrigger>,

    pub next_evaluation_time: DateTime<Utc>,
}
