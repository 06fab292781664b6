//! Knowledge evolution engine
//!
//! Decides what to keep, prune, and merge, and how confidence evolves from
//! new evidence. All operations here are pure with respect to stored
//! state: they take units in and return decisions or updated copies out,
//! leaving persistence to the caller.

use crate::config::EvolutionConfig;
use crate::error::{MetanoiaError, Result};
use crate::services::{GenerateOptions, LlmProvider};
use crate::types::{Feedback, KnowledgeUnit, UnitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Outcome of a pruning evaluation
#[derive(Debug, Clone, Default)]
pub struct PruningDecision {
    pub keep: Vec<KnowledgeUnit>,
    pub prune: Vec<KnowledgeUnit>,
}

/// Output of a reflection pass. Pure reporting; no stored state changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionReport {
    pub insights: Vec<String>,
    pub patterns: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Reasoning steps shorter than this are too generic to count as patterns
const MIN_PATTERN_LENGTH: usize = 20;

/// Knowledge evolution engine
pub struct KnowledgeEvolutionEngine {
    config: EvolutionConfig,
}

impl KnowledgeEvolutionEngine {
    pub fn new(config: EvolutionConfig) -> Self {
        Self { config }
    }

    /// Partition units into keep/prune sets.
    pub fn evaluate_for_pruning(&self, units: &[KnowledgeUnit]) -> PruningDecision {
        self.evaluate_for_pruning_at(units, Utc::now())
    }

    /// [`evaluate_for_pruning`](Self::evaluate_for_pruning) against an
    /// explicit instant (the age rule depends on it).
    pub fn evaluate_for_pruning_at(
        &self,
        units: &[KnowledgeUnit],
        now: DateTime<Utc>,
    ) -> PruningDecision {
        let mut decision = PruningDecision::default();

        for unit in units {
            match self.prune_reason(unit, now) {
                Some(reason) => {
                    info!("Pruning unit {}: {}", unit.id, reason);
                    decision.prune.push(unit.clone());
                }
                None => decision.keep.push(unit.clone()),
            }
        }

        decision
    }

    /// Why a unit should be pruned, if it should be. Rules are evaluated
    /// in order and the first match wins; proven units are never pruned.
    pub fn prune_reason(&self, unit: &KnowledgeUnit, now: DateTime<Utc>) -> Option<String> {
        // Proven units are exempt from every later rule
        if unit.confidence >= 0.9 && unit.success_rate >= 0.9 {
            return None;
        }

        if unit.confidence < self.config.min_confidence_threshold {
            return Some(format!(
                "confidence {:.2} below minimum {:.2}",
                unit.confidence, self.config.min_confidence_threshold
            ));
        }

        if unit.usage_count >= self.config.min_usage_count
            && unit.success_rate < self.config.min_success_rate
        {
            return Some(format!(
                "success rate {:.2} below minimum {:.2} after {} uses",
                unit.success_rate, self.config.min_success_rate, unit.usage_count
            ));
        }

        let age = unit.age_in_days(now);
        if age > self.config.max_age_days && unit.usage_count == 0 {
            return Some(format!(
                "never used and {} days old",
                age.round()
            ));
        }

        None
    }

    /// Fold one experience into a unit, returning the updated copy.
    ///
    /// The success rate becomes a running mean over all uses; confidence
    /// moves by exponential smoothing toward the evidence score (the
    /// feedback score when provided, otherwise 1.0/0.0 for
    /// success/failure), takes an extra multiplicative penalty on failure,
    /// and is clamped back into `[0, 1]`. Feedback comments become lessons
    /// only on failure.
    pub fn update_from_experience(
        &self,
        unit: &KnowledgeUnit,
        success: bool,
        feedback: Option<&Feedback>,
    ) -> KnowledgeUnit {
        let mut updated = unit.clone();
        let alpha = self.config.smoothing_factor;

        updated.usage_count = unit.usage_count + 1;
        let n = updated.usage_count as f64;

        let outcome = if success { 1.0 } else { 0.0 };
        updated.success_rate = (unit.success_rate * (n - 1.0) + outcome) / n;

        let evidence = feedback.and_then(|f| f.score).unwrap_or(outcome);
        updated.confidence = unit.confidence * (1.0 - alpha) + evidence * alpha;
        if !success {
            updated.confidence *= self.config.failure_penalty;
        }
        updated.clamp_scores();

        if !success {
            if let Some(comment) = feedback.and_then(|f| f.comment.clone()) {
                updated.lessons.push(comment);
            }
        }

        updated.updated_at = Utc::now();
        updated
    }

    /// Merge near-duplicate units into one.
    ///
    /// The highest-confidence unit is the structural base; reasoning,
    /// lessons, and related ids are unioned order-insensitively; confidence
    /// and success rate become usage-count-weighted averages. The merged id
    /// is deterministic over the sorted source ids, so merging the same set
    /// twice names the same unit (content idempotency is not guaranteed
    /// against mutated inputs).
    pub fn merge_units(&self, units: &[KnowledgeUnit]) -> Result<KnowledgeUnit> {
        let base = match units {
            [] => {
                return Err(MetanoiaError::Validation(
                    "cannot merge zero units".to_string(),
                ))
            }
            [single] => return Ok(single.clone()),
            _ => units
                .iter()
                .max_by(|a, b| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("non-empty slice"),
        };

        let source_ids: Vec<UnitId> = units.iter().map(|u| u.id.clone()).collect();
        let mut merged = base.clone();
        merged.id = UnitId::merged(&source_ids);

        let mut reasoning: BTreeSet<String> = BTreeSet::new();
        let mut lessons: BTreeSet<String> = BTreeSet::new();
        let mut related: BTreeSet<UnitId> = BTreeSet::new();
        for unit in units {
            reasoning.extend(unit.reasoning.iter().cloned());
            lessons.extend(unit.lessons.iter().cloned());
            related.extend(unit.related_units.iter().cloned());
        }
        merged.reasoning = reasoning.into_iter().collect();
        merged.lessons = lessons.into_iter().collect();
        merged.related_units = related;

        let total_usage: u64 = units.iter().map(|u| u.usage_count).sum();
        if total_usage > 0 {
            let weight_sum = total_usage as f64;
            merged.confidence = units
                .iter()
                .map(|u| u.confidence * u.usage_count as f64)
                .sum::<f64>()
                / weight_sum;
            merged.success_rate = units
                .iter()
                .map(|u| u.success_rate * u.usage_count as f64)
                .sum::<f64>()
                / weight_sum;
        } else {
            // No usage anywhere: plain averages
            let n = units.len() as f64;
            merged.confidence = units.iter().map(|u| u.confidence).sum::<f64>() / n;
            merged.success_rate = units.iter().map(|u| u.success_rate).sum::<f64>() / n;
        }
        merged.usage_count = total_usage;
        merged.clamp_scores();
        merged.updated_at = Utc::now();

        info!(
            "Merged {} units into {} (base {})",
            units.len(),
            merged.id,
            base.id
        );
        Ok(merged)
    }

    /// Generate an improved instruction variant per unit from its lessons.
    ///
    /// One failed generation is logged and skipped; it never aborts the
    /// batch.
    pub async fn generate_instruction_variants(
        &self,
        units: &[KnowledgeUnit],
        llm: &dyn LlmProvider,
    ) -> Vec<(UnitId, String)> {
        let options = GenerateOptions::default();
        let mut variants = Vec::new();

        for unit in units {
            let prompt = format!(
                "You are refining a learned strategy for the '{}' domain.\n\
                 Reasoning so far:\n{}\n\n\
                 Lessons from failed applications:\n{}\n\n\
                 Rewrite the strategy as a single improved instruction that \
                 addresses the lessons. Reply with the instruction only.",
                unit.domain,
                unit.reasoning.join("\n"),
                unit.lessons.join("\n"),
            );

            match llm.generate(&prompt, &options).await {
                Ok(text) => variants.push((unit.id.clone(), text.trim().to_string())),
                Err(e) => {
                    warn!(
                        "Instruction generation failed for {}, skipping: {}",
                        unit.id, e
                    );
                }
            }
        }

        variants
    }

    /// Reflection pass over a batch of units.
    pub fn evolve(&self, units: &[KnowledgeUnit]) -> EvolutionReport {
        let successful: Vec<&KnowledgeUnit> = units
            .iter()
            .filter(|u| u.success && u.success_rate > 0.8)
            .collect();
        let failing: Vec<&KnowledgeUnit> = units
            .iter()
            .filter(|u| !u.success || u.success_rate < 0.5)
            .collect();
        let transferable: Vec<&KnowledgeUnit> =
            units.iter().filter(|u| u.transferable).collect();

        debug!(
            "Reflection over {} units: {} successful, {} failing, {} transferable",
            units.len(),
            successful.len(),
            failing.len(),
            transferable.len()
        );

        // Recurring long reasoning steps across successful units
        let mut step_counts: HashMap<&str, usize> = HashMap::new();
        for unit in &successful {
            for step in &unit.reasoning {
                if step.len() > MIN_PATTERN_LENGTH {
                    *step_counts.entry(step.as_str()).or_default() += 1;
                }
            }
        }
        let mut patterns: Vec<String> = step_counts
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .map(|(step, _)| step.to_string())
            .collect();
        patterns.sort();

        // Lessons shared across failing units
        let mut lesson_counts: HashMap<&str, usize> = HashMap::new();
        for unit in &failing {
            for lesson in &unit.lessons {
                *lesson_counts.entry(lesson.as_str()).or_default() += 1;
            }
        }
        let mut recommendations: Vec<String> = lesson_counts
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .map(|(lesson, _)| format!("Recurring lesson from failures: {}", lesson))
            .collect();
        recommendations.sort();

        if !patterns.is_empty() {
            recommendations.push(
                "Study the recurring patterns from successful units before the next retraining"
                    .to_string(),
            );
        }

        let mut insights = Vec::new();
        if !units.is_empty() {
            insights.push(format!(
                "{} of {} units are performing well",
                successful.len(),
                units.len()
            ));
        }
        if !failing.is_empty() {
            insights.push(format!(
                "{} units are failing and candidates for pruning",
                failing.len()
            ));
        }
        if !transferable.is_empty() {
            insights.push(format!(
                "{} units are marked transferable across domains",
                transferable.len()
            ));
        }

        EvolutionReport {
            insights,
            patterns,
            recommendations,
        }
    }
}
