//! Drift report types and severity bucketing
//!
//! Drift is a statistically meaningful change in validity between two
//! adjacent halves of the trailing window. A half with zero usage defaults
//! to validity 1.0 (assume valid absent evidence), so a unit that simply
//! stopped being used does not read as degraded.

use crate::types::{Severity, UnitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one drift check for a tracked reflexion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub reflexion_id: UnitId,

    /// Validity over the recent half of the window
    pub recent_validity: f64,

    /// Validity over the older half of the window
    pub older_validity: f64,

    /// `recent_validity - older_validity`; positive means improvement
    pub validity_change: f64,

    pub drift_detected: bool,
    pub severity: Severity,

    pub checked_at: DateTime<Utc>,
}

/// Map an absolute validity change onto a severity bucket
pub fn drift_severity(validity_change: f64) -> Severity {
    let magnitude = validity_change.abs();
    if magnitude < 0.1 {
        Severity::Low
    } else if magnitude < 0.2 {
        Severity::Medium
    } else if magnitude < 0.3 {
        Severity::High
    } else {
        Severity::Critical
    }
}

/// Validity of one window half; zero usage defaults to 1.0
pub fn half_validity(total: u64, successes: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        successes as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_severity_buckets() {
        assert_eq!(drift_severity(0.05), Severity::Low);
        assert_eq!(drift_severity(-0.05), Severity::Low);
        assert_eq!(drift_severity(0.15), Severity::Medium);
        assert_eq!(drift_severity(-0.25), Severity::High);
        assert_eq!(drift_severity(0.35), Severity::Critical);
        assert_eq!(drift_severity(-1.0), Severity::Critical);
    }

    #[test]
    fn test_bucket_boundaries() {
        // Boundaries belong to the higher bucket
        assert_eq!(drift_severity(0.1), Severity::Medium);
        assert_eq!(drift_severity(0.2), Severity::High);
        assert_eq!(drift_severity(0.3), Severity::Critical);
    }

    #[test]
    fn test_half_validity_defaults_to_valid() {
        assert_eq!(half_validity(0, 0), 1.0);
    }

    #[test]
    fn test_half_validity_ratio() {
        assert!((half_validity(4, 3) - 0.75).abs() < f64::EPSILON);
        assert_eq!(half_validity(5, 0), 0.0);
    }
}
