// Validity Module - Outcome tracking and drift detection
//
// Maintains the authoritative outcome history for tracked reflexions and
// derives the validity and drift signals consumed by the evolution and
// trigger engines.
//
// Components:
// - tracker: usage recording, validity recomputation, staleness marking,
//   cross-store similarity search, aggregate stats
// - drift: half-window comparison and severity bucketing

pub mod drift;
pub mod tracker;

pub use drift::{drift_severity, DriftReport};
pub use tracker::{
    SimilarUnit, SimilarityReport, StalenessAdvisory, ValidityStats, ValidityTracker,
};
