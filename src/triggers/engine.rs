//! Trigger engine
//!
//! Holds the registry of trigger definitions and evaluates every enabled
//! trigger against the live feed on each tick. A disabled trigger is
//! skipped entirely; an enabled one must be outside its cooldown and under
//! its hourly rate limit before its condition is evaluated at all.
//!
//! The engine never records invocations on its own; the caller calls
//! [`TriggerEngine::record_invocation`] after the downstream action
//! actually ran, so a fired-but-not-acted-on trigger stays eligible.

use super::conditions::{
    derive_severity, evaluate_anomaly, evaluate_pattern, evaluate_schedule, evaluate_threshold,
};
use super::feed::EventFeed;
use super::types::{EvaluationOutcome, FiredTrigger, TriggerCondition, TriggerDefinition};
use crate::config::TriggerConfig;
use crate::error::{MetanoiaError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

struct EngineInner {
    triggers: HashMap<String, TriggerDefinition>,
    invocations: HashMap<String, Vec<DateTime<Utc>>>,
}

/// Trigger engine
pub struct TriggerEngine {
    config: TriggerConfig,
    feed: Arc<EventFeed>,
    inner: RwLock<EngineInner>,
}

impl TriggerEngine {
    pub fn new(config: TriggerConfig, feed: Arc<EventFeed>) -> Self {
        Self {
            config,
            feed,
            inner: RwLock::new(EngineInner {
                triggers: HashMap::new(),
                invocations: HashMap::new(),
            }),
        }
    }

    /// Register or update a trigger definition
    pub fn register_trigger(&self, trigger: TriggerDefinition) {
        if let TriggerCondition::Schedule { cron: Some(expr), .. } = &trigger.condition {
            warn!(
                "Trigger '{}' uses cron expression '{}': cron scheduling is not implemented and the trigger will never fire",
                trigger.id, expr
            );
        }
        debug!("Registering trigger '{}' ({})", trigger.id, trigger.condition.kind());
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.triggers.insert(trigger.id.clone(), trigger);
    }

    /// Remove a trigger and its invocation history
    pub fn unregister_trigger(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.triggers.remove(id);
        inner.invocations.remove(id);
    }

    /// Enable or disable a registered trigger
    pub fn set_trigger_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.triggers.get_mut(id) {
            Some(trigger) => {
                trigger.enabled = enabled;
                Ok(())
            }
            None => Err(MetanoiaError::Validation(format!(
                "unknown trigger '{}'",
                id
            ))),
        }
    }

    /// Fetch a trigger definition by id
    pub fn trigger(&self, id: &str) -> Option<TriggerDefinition> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.triggers.get(id).cloned()
    }

    /// Evaluate all enabled triggers against the feed now.
    pub fn evaluate_triggers(&self) -> EvaluationOutcome {
        self.evaluate_triggers_at(Utc::now())
    }

    /// [`evaluate_triggers`](Self::evaluate_triggers) against an explicit
    /// instant, for deterministic clock-driven tests.
    pub fn evaluate_triggers_at(&self, now: DateTime<Utc>) -> EvaluationOutcome {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

        // Deterministic evaluation order regardless of map layout
        let mut ids: Vec<&String> = inner.triggers.keys().collect();
        ids.sort();

        let mut fired = Vec::new();
        for id in ids {
            let trigger = &inner.triggers[id];
            if !trigger.enabled {
                continue;
            }

            let history = inner.invocations.get(id).map(Vec::as_slice).unwrap_or(&[]);
            if self.cooling_down(trigger, history, now) {
                debug!("Trigger '{}' cooling down", id);
                continue;
            }
            if self.rate_limited(trigger, history, now) {
                debug!("Trigger '{}' rate limited", id);
                continue;
            }

            if let Some(firing) = self.evaluate_condition(trigger, history, now) {
                fired.push(firing);
            }
        }
        drop(inner);

        // Highest priority first; stable, so equal priorities keep id order
        fired.sort_by(|a, b| b.priority.cmp(&a.priority));
        let fired = dedup_firings(fired);

        if !fired.is_empty() {
            info!(
                "{} trigger(s) fired, top: '{}' ({})",
                fired.len(),
                fired[0].trigger_id,
                fired[0].severity
            );
        }

        EvaluationOutcome {
            should_trigger: !fired.is_empty(),
            fired,
            next_evaluation_time: now + ChronoDuration::from_std(self.config.poll_interval)
                .unwrap_or_else(|_| ChronoDuration::seconds(60)),
        }
    }

    /// The actionable decision: the single highest-priority fired trigger,
    /// or nothing.
    pub fn should_invoke(&self) -> Option<FiredTrigger> {
        self.should_invoke_at(Utc::now())
    }

    /// [`should_invoke`](Self::should_invoke) against an explicit instant.
    pub fn should_invoke_at(&self, now: DateTime<Utc>) -> Option<FiredTrigger> {
        self.evaluate_triggers_at(now).fired.into_iter().next()
    }

    /// Record that the caller acted on a fired trigger.
    pub fn record_invocation(&self, id: &str) {
        self.record_invocation_at(id, Utc::now());
    }

    /// [`record_invocation`](Self::record_invocation) against an explicit
    /// instant.
    pub fn record_invocation_at(&self, id: &str, now: DateTime<Utc>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let history = inner.invocations.entry(id.to_string()).or_default();
        history.push(now);
        let max = self.config.max_invocation_history;
        if history.len() > max {
            let excess = history.len() - max;
            history.drain(..excess);
        }
    }

    fn cooling_down(
        &self,
        trigger: &TriggerDefinition,
        history: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> bool {
        let cooldown = match ChronoDuration::from_std(trigger.cooldown) {
            Ok(cooldown) => cooldown,
            Err(_) => return false,
        };
        history.last().is_some_and(|last| now - *last < cooldown)
    }

    fn rate_limited(
        &self,
        trigger: &TriggerDefinition,
        history: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> bool {
        let Some(max_per_hour) = trigger.max_invocations_per_hour else {
            return false;
        };
        let hour_ago = now - ChronoDuration::hours(1);
        let recent = history.iter().filter(|t| **t > hour_ago).count();
        recent >= max_per_hour as usize
    }

    fn evaluate_condition(
        &self,
        trigger: &TriggerDefinition,
        history: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> Option<FiredTrigger> {
        let matched = match &trigger.condition {
            TriggerCondition::Threshold {
                metric,
                operator,
                value,
                window,
                min_samples,
            } => {
                let window = ChronoDuration::from_std(*window).ok()?;
                let samples = self.feed.metric_window(metric, now - window, now);
                evaluate_threshold(metric, &samples, *operator, *value, *min_samples)
            }
            TriggerCondition::Pattern {
                event_sequence,
                min_occurrences,
                max_timespan,
                allow_partial,
            } => {
                let max_timespan = ChronoDuration::from_std(*max_timespan).ok()?;
                // The feed's bounded buffer is the recent-event window
                let events = self.feed.events_window(DateTime::<Utc>::MIN_UTC, now);
                evaluate_pattern(
                    &events,
                    event_sequence,
                    *min_occurrences,
                    max_timespan,
                    *allow_partial,
                )
            }
            TriggerCondition::Anomaly {
                metric,
                method,
                sensitivity,
                detection_window,
                baseline_window,
                min_samples,
            } => {
                let detection = ChronoDuration::from_std(*detection_window).ok()?;
                let baseline = ChronoDuration::from_std(*baseline_window).ok()?;
                let detection_start = now - detection;
                let baseline_samples =
                    self.feed
                        .metric_window(metric, detection_start - baseline, detection_start);
                let detection_samples = self.feed.metric_window(metric, detection_start, now);
                evaluate_anomaly(
                    metric,
                    &baseline_samples,
                    &detection_samples,
                    *method,
                    *sensitivity,
                    *min_samples,
                )
            }
            TriggerCondition::Schedule { interval, cron } => {
                let interval = ChronoDuration::from_std(*interval).ok()?;
                evaluate_schedule(history.last().copied(), interval, cron, now)
            }
        }?;

        Some(FiredTrigger {
            trigger_id: trigger.id.clone(),
            severity: derive_severity(
                matched.score,
                matched.value,
                matched.threshold,
                trigger.priority,
            ),
            priority: trigger.priority,
            reason: matched.reason,
            timestamp: now,
            context: matched.context,
        })
    }
}

/// Deduplicate by `(trigger_id, reason)`, keeping the first occurrence
fn dedup_firings(fired: Vec<FiredTrigger>) -> Vec<FiredTrigger> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    fired
        .into_iter()
        .filter(|f| seen.insert((f.trigger_id.clone(), f.reason.clone())))
        .collect()
}
