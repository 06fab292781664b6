//! Condition evaluators
//!
//! Pure functions from window samples to a fired/not-fired decision. An
//! anomaly condition with fewer than the required baseline samples is
//! inconclusive and does not fire (insufficient evidence is a policy
//! outcome, not an error).

use super::feed::StreamEvent;
use super::types::{AnomalyMethod, CompareOp};
use crate::types::Severity;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

/// A condition that fired, with the inputs severity derivation needs
#[derive(Debug, Clone)]
pub struct ConditionMatch {
    pub reason: String,

    /// Anomaly score, when an anomaly method produced one
    pub score: Option<f64>,

    /// Observed aggregate value, for threshold conditions
    pub value: Option<f64>,

    /// Configured threshold, for threshold conditions
    pub threshold: Option<f64>,

    pub context: serde_json::Value,
}

/// Threshold: mean of the window compared against the configured value
pub fn evaluate_threshold(
    metric: &str,
    samples: &[f64],
    operator: CompareOp,
    value: f64,
    min_samples: usize,
) -> Option<ConditionMatch> {
    if samples.len() < min_samples {
        return None;
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    if !operator.compare(mean, value) {
        return None;
    }

    Some(ConditionMatch {
        reason: format!(
            "metric '{}' mean {:.2} {} {:.2} over {} samples",
            metric,
            mean,
            operator,
            value,
            samples.len()
        ),
        score: None,
        value: Some(mean),
        threshold: Some(value),
        context: json!({
            "metric": metric,
            "mean": mean,
            "samples": samples.len(),
        }),
    })
}

/// Pattern: ordered subsequence occurrences within the event window.
///
/// Matches are non-overlapping and each occurrence must span at most
/// `max_timespan` from its first to its last event. With `allow_partial`,
/// a trailing prefix covering at least half the sequence counts as one
/// occurrence.
pub fn evaluate_pattern(
    events: &[StreamEvent],
    sequence: &[String],
    min_occurrences: usize,
    max_timespan: Duration,
    allow_partial: bool,
) -> Option<ConditionMatch> {
    if sequence.is_empty() {
        return None;
    }

    let mut occurrences = 0usize;
    let mut pos = 0usize;
    let mut start: Option<DateTime<Utc>> = None;

    for event in events {
        if event.name != sequence[pos] {
            continue;
        }

        if let Some(started) = start {
            if event.timestamp - started > max_timespan {
                // Current attempt ran out of time; restart from this event
                pos = 0;
                start = None;
                if event.name != sequence[0] {
                    continue;
                }
            }
        }

        if pos == 0 {
            start = Some(event.timestamp);
        }
        pos += 1;

        if pos == sequence.len() {
            occurrences += 1;
            pos = 0;
            start = None;
        }
    }

    // Trailing partial prefix
    if allow_partial && pos > 0 && pos * 2 >= sequence.len() {
        occurrences += 1;
    }

    if occurrences < min_occurrences {
        return None;
    }

    Some(ConditionMatch {
        reason: format!(
            "event sequence [{}] occurred {} times",
            sequence.join(" -> "),
            occurrences
        ),
        score: None,
        value: None,
        threshold: None,
        context: json!({
            "sequence": sequence,
            "occurrences": occurrences,
        }),
    })
}

/// Anomaly: latest detection-window value tested against the baseline
pub fn evaluate_anomaly(
    metric: &str,
    baseline: &[f64],
    detection: &[f64],
    method: AnomalyMethod,
    sensitivity: f64,
    min_samples: usize,
) -> Option<ConditionMatch> {
    // Inconclusive without enough baseline evidence
    if baseline.is_empty() || baseline.len() < min_samples {
        return None;
    }
    let value = *detection.last()?;

    let score = match method {
        AnomalyMethod::ZScore => z_score(baseline, value),
        AnomalyMethod::Iqr => iqr_score(baseline, value, sensitivity),
        AnomalyMethod::Mad => mad_score(baseline, value),
    };

    let fired = match method {
        // IQR already folds sensitivity into its bounds
        AnomalyMethod::Iqr => score > 0.0,
        _ => score > sensitivity,
    };
    if !fired {
        return None;
    }

    Some(ConditionMatch {
        reason: format!(
            "metric '{}' value {:.2} is anomalous ({:?} score {:.2})",
            metric, value, method, score
        ),
        score: Some(score),
        value: Some(value),
        threshold: None,
        context: json!({
            "metric": metric,
            "value": value,
            "method": format!("{:?}", method),
            "score": score,
        }),
    })
}

/// Schedule: fires on first invocation, then once the interval elapses.
/// Cron expressions are a declared gap and never fire.
pub fn evaluate_schedule(
    last_invocation: Option<DateTime<Utc>>,
    interval: Duration,
    cron: &Option<String>,
    now: DateTime<Utc>,
) -> Option<ConditionMatch> {
    if cron.is_some() {
        return None;
    }

    let due = match last_invocation {
        None => true,
        Some(last) => now - last >= interval,
    };
    if !due {
        return None;
    }

    Some(ConditionMatch {
        reason: match last_invocation {
            None => "first scheduled invocation".to_string(),
            Some(last) => format!(
                "interval of {}s elapsed since last invocation at {}",
                interval.num_seconds(),
                last.to_rfc3339()
            ),
        },
        score: None,
        value: None,
        threshold: None,
        context: json!({ "interval_seconds": interval.num_seconds() }),
    })
}

/// Severity of a fired trigger.
///
/// An extreme anomaly score or a threshold breach of more than twice the
/// threshold is critical regardless of priority; otherwise priority
/// buckets decide.
pub fn derive_severity(
    score: Option<f64>,
    value: Option<f64>,
    threshold: Option<f64>,
    priority: u8,
) -> Severity {
    if let Some(score) = score {
        if score > 5.0 {
            return Severity::Critical;
        }
    }
    if let (Some(value), Some(threshold)) = (value, threshold) {
        if (value - threshold).abs() > 2.0 * threshold.abs() {
            return Severity::Critical;
        }
    }

    if priority >= 90 {
        Severity::Critical
    } else if priority >= 70 {
        Severity::High
    } else if priority >= 40 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn mean_stddev(samples: &[f64]) -> (f64, f64) {
    let n = samples.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = samples.iter().sum::<f64>() / n as f64;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    (mean, variance.sqrt())
}

/// Z-score with the standard deviation floored at 1 so constant baselines
/// still produce a finite, large score for big excursions
fn z_score(baseline: &[f64], value: f64) -> f64 {
    let (mean, stddev) = mean_stddev(baseline);
    (value - mean).abs() / stddev.max(1.0)
}

/// Index-percentile IQR bounds check; returns 0 inside the bounds,
/// otherwise distance-to-nearest-bound divided by the IQR (floored at 1)
fn iqr_score(baseline: &[f64], value: f64, sensitivity: f64) -> f64 {
    let mut sorted = baseline.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[(sorted.len() * 3 / 4).min(sorted.len() - 1)];
    let iqr = q3 - q1;

    let lower = q1 - sensitivity * iqr;
    let upper = q3 + sensitivity * iqr;

    if value >= lower && value <= upper {
        return 0.0;
    }

    let distance = if value < lower {
        lower - value
    } else {
        value - upper
    };
    distance / iqr.max(1.0)
}

/// Modified z-score with the MAD floored at 1
fn mad_score(baseline: &[f64], value: f64) -> f64 {
    let mut sorted = baseline.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = sorted[sorted.len() / 2];

    let mut deviations: Vec<f64> = sorted.iter().map(|x| (x - median).abs()).collect();
    deviations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mad = deviations[deviations.len() / 2];

    0.6745 * (value - median).abs() / mad.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(names: &[(&str, i64)]) -> Vec<StreamEvent> {
        let now = Utc::now();
        names
            .iter()
            .map(|(name, minutes_ago)| StreamEvent {
                name: name.to_string(),
                timestamp: now - Duration::minutes(*minutes_ago),
            })
            .collect()
    }

    #[test]
    fn test_threshold_fires_and_formats_mean() {
        let samples = vec![110.0, 115.0, 120.0, 125.0, 130.0];
        let result =
            evaluate_threshold("latency", &samples, CompareOp::Gt, 100.0, 5).unwrap();
        assert!(result.reason.contains("120.00"));
        assert_eq!(result.value, Some(120.0));
    }

    #[test]
    fn test_threshold_needs_min_samples() {
        let samples = vec![120.0, 120.0];
        assert!(evaluate_threshold("latency", &samples, CompareOp::Gt, 100.0, 5).is_none());
    }

    #[test]
    fn test_threshold_respects_operator() {
        let samples = vec![50.0; 10];
        assert!(evaluate_threshold("latency", &samples, CompareOp::Gt, 100.0, 5).is_none());
        assert!(evaluate_threshold("latency", &samples, CompareOp::Lt, 100.0, 5).is_some());
        assert!(evaluate_threshold("latency", &samples, CompareOp::Eq, 50.00001, 5).is_some());
    }

    #[test]
    fn test_pattern_counts_full_matches() {
        let window = events(&[
            ("error", 10),
            ("retry", 9),
            ("error", 8),
            ("error", 5),
            ("retry", 4),
            ("error", 3),
        ]);
        let sequence = vec!["error".to_string(), "retry".to_string(), "error".to_string()];

        let result =
            evaluate_pattern(&window, &sequence, 2, Duration::minutes(30), false).unwrap();
        assert!(result.reason.contains("2 times"));
    }

    #[test]
    fn test_pattern_below_min_occurrences_does_not_fire() {
        let window = events(&[("error", 5), ("retry", 4)]);
        let sequence = vec!["error".to_string(), "retry".to_string()];
        assert!(evaluate_pattern(&window, &sequence, 2, Duration::minutes(30), false).is_none());
    }

    #[test]
    fn test_pattern_timespan_restarts_match() {
        // Second element arrives outside the allowed span
        let window = events(&[("error", 120), ("retry", 1)]);
        let sequence = vec!["error".to_string(), "retry".to_string()];
        assert!(evaluate_pattern(&window, &sequence, 1, Duration::minutes(30), false).is_none());
    }

    #[test]
    fn test_pattern_partial_prefix_counts_when_enabled() {
        let window = events(&[("error", 3), ("retry", 2)]);
        let sequence = vec![
            "error".to_string(),
            "retry".to_string(),
            "error".to_string(),
        ];

        assert!(evaluate_pattern(&window, &sequence, 1, Duration::minutes(30), false).is_none());
        let partial =
            evaluate_pattern(&window, &sequence, 1, Duration::minutes(30), true).unwrap();
        assert!(partial.reason.contains("1 times"));
    }

    #[test]
    fn test_z_score_constant_baseline_floor() {
        // stddev floor of 1 forces a large score on a constant baseline
        let baseline = vec![10.0, 10.0, 10.0, 10.0, 10.0];
        let result = evaluate_anomaly(
            "latency",
            &baseline,
            &[50.0],
            AnomalyMethod::ZScore,
            3.0,
            5,
        )
        .unwrap();
        assert!(result.score.unwrap() > 5.0);
    }

    #[test]
    fn test_z_score_within_noise_does_not_fire() {
        let baseline = vec![10.0, 12.0, 9.0, 11.0, 10.0, 10.5, 9.5, 11.5];
        assert!(evaluate_anomaly(
            "latency",
            &baseline,
            &[11.0],
            AnomalyMethod::ZScore,
            3.0,
            5
        )
        .is_none());
    }

    #[test]
    fn test_anomaly_insufficient_baseline_inconclusive() {
        let baseline = vec![10.0, 10.0];
        assert!(evaluate_anomaly(
            "latency",
            &baseline,
            &[1000.0],
            AnomalyMethod::ZScore,
            3.0,
            5
        )
        .is_none());
    }

    #[test]
    fn test_anomaly_empty_detection_window_inconclusive() {
        let baseline = vec![10.0; 10];
        assert!(
            evaluate_anomaly("latency", &baseline, &[], AnomalyMethod::ZScore, 3.0, 5).is_none()
        );
    }

    #[test]
    fn test_iqr_outlier_fires() {
        let baseline = vec![10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 17.0];
        let result = evaluate_anomaly(
            "latency",
            &baseline,
            &[100.0],
            AnomalyMethod::Iqr,
            1.5,
            5,
        )
        .unwrap();
        assert!(result.score.unwrap() > 0.0);

        // A value inside the bounds does not fire
        assert!(evaluate_anomaly(
            "latency",
            &baseline,
            &[13.0],
            AnomalyMethod::Iqr,
            1.5,
            5
        )
        .is_none());
    }

    #[test]
    fn test_mad_outlier_fires() {
        let baseline = vec![10.0, 10.0, 11.0, 9.0, 10.0, 12.0, 8.0];
        let result = evaluate_anomaly(
            "latency",
            &baseline,
            &[60.0],
            AnomalyMethod::Mad,
            3.5,
            5,
        )
        .unwrap();
        assert!(result.score.unwrap() > 3.5);
    }

    #[test]
    fn test_schedule_fires_first_time_then_waits() {
        let now = Utc::now();
        let interval = Duration::seconds(3600);

        assert!(evaluate_schedule(None, interval, &None, now).is_some());

        let recent = now - Duration::seconds(100);
        assert!(evaluate_schedule(Some(recent), interval, &None, now).is_none());

        let old = now - Duration::seconds(4000);
        assert!(evaluate_schedule(Some(old), interval, &None, now).is_some());
    }

    #[test]
    fn test_schedule_cron_never_fires() {
        let now = Utc::now();
        let cron = Some("0 * * * *".to_string());
        assert!(evaluate_schedule(None, Duration::seconds(60), &cron, now).is_none());
    }

    #[test]
    fn test_severity_extreme_score_is_critical() {
        assert_eq!(derive_severity(Some(6.0), None, None, 10), Severity::Critical);
    }

    #[test]
    fn test_severity_large_threshold_breach_is_critical() {
        // |350 - 100| > 2 * 100
        assert_eq!(
            derive_severity(None, Some(350.0), Some(100.0), 10),
            Severity::Critical
        );
    }

    #[test]
    fn test_severity_priority_buckets() {
        assert_eq!(derive_severity(None, None, None, 95), Severity::Critical);
        assert_eq!(derive_severity(None, None, None, 75), Severity::High);
        assert_eq!(derive_severity(None, None, None, 50), Severity::Medium);
        assert_eq!(derive_severity(None, None, None, 10), Severity::Low);
    }
}
