//! Live event and metric feed
//!
//! Bounded rolling buffers the trigger engine reads on each evaluation
//! tick. The caller bridges its durable store or event stream into this
//! feed; the engine only ever queries by window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Samples retained per metric
const MAX_POINTS_PER_METRIC: usize = 1024;

/// Events retained in the stream buffer
const MAX_EVENTS: usize = 4096;

/// One metric observation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricPoint {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// One named event on the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded metric/event buffer
#[derive(Default)]
pub struct EventFeed {
    metrics: RwLock<HashMap<String, VecDeque<MetricPoint>>>,
    events: RwLock<VecDeque<StreamEvent>>,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a metric observation stamped now
    pub fn record_metric(&self, name: &str, value: f64) {
        self.record_metric_at(name, value, Utc::now());
    }

    /// Record a metric observation at an explicit instant
    pub fn record_metric_at(&self, name: &str, value: f64, timestamp: DateTime<Utc>) {
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        let window = metrics.entry(name.to_string()).or_default();
        window.push_back(MetricPoint { value, timestamp });
        while window.len() > MAX_POINTS_PER_METRIC {
            window.pop_front();
        }
    }

    /// Record a stream event stamped now
    pub fn record_event(&self, name: &str) {
        self.record_event_at(name, Utc::now());
    }

    /// Record a stream event at an explicit instant
    pub fn record_event_at(&self, name: &str, timestamp: DateTime<Utc>) {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        events.push_back(StreamEvent {
            name: name.to_string(),
            timestamp,
        });
        while events.len() > MAX_EVENTS {
            events.pop_front();
        }
    }

    /// Metric values inside `[start, end)`, oldest first
    pub fn metric_window(&self, name: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<f64> {
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        metrics
            .get(name)
            .map(|window| {
                window
                    .iter()
                    .filter(|p| p.timestamp >= start && p.timestamp < end)
                    .map(|p| p.value)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stream events inside `[start, end)`, oldest first
    pub fn events_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<StreamEvent> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        events
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .cloned()
            .collect()
    }
}
