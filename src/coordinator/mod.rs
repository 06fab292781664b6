//! Task coordinator - bounded retraining execution
//!
//! Drains a batch of retraining tasks through a semaphore-gated worker
//! pool: a new task starts exactly when a slot frees, with no polling
//! delay. Failed tasks retry with linear-multiple backoff (base × attempt
//! number) up to the configured maximum; every task produces exactly one
//! terminal [`TrainingResult`], and results come back in the original
//! batch order regardless of completion order.
//!
//! With shared learning enabled, each task's configuration is enriched
//! from the learning components before execution: a one-directional read
//! from tracker/engine insights into task config, never the reverse.

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::types::{RetrainTask, TrainingResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Executes one retraining task against the optimizer/LLM provider.
/// Implementations own their request timeouts; the coordinator treats a
/// timeout like any other failure.
#[async_trait]
pub trait RetrainExecutor: Send + Sync {
    async fn execute(&self, task: &RetrainTask) -> Result<serde_json::Value>;
}

/// Aggregate insights for one knowledge domain, read from the learning
/// components
#[derive(Debug, Clone, Default)]
pub struct DomainInsights {
    /// Historical average validity improvement observed for this domain
    pub average_improvement: f64,

    /// Current average validity across the domain's tracked reflexions
    pub average_validity: f64,

    /// Tracked reflexions currently marked stale
    pub stale_count: u64,
}

/// Source of per-domain insights for shared learning
#[async_trait]
pub trait InsightSource: Send + Sync {
    async fn domain_insights(&self, domain: &str) -> Option<DomainInsights>;
}

#[async_trait]
impl InsightSource for crate::validity::ValidityTracker {
    async fn domain_insights(&self, domain: &str) -> Option<DomainInsights> {
        let stats = self.stats(Some(domain)).await;
        if stats.total_reflexions == 0 {
            return None;
        }
        Some(DomainInsights {
            average_improvement: self.average_recent_improvement().await,
            average_validity: stats.average_validity,
            stale_count: stats.stale_count,
        })
    }
}

/// Derived view over completed results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorStats {
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub in_flight: u64,
}

/// Task coordinator
pub struct TaskCoordinator {
    config: CoordinatorConfig,
    executor: Arc<dyn RetrainExecutor>,
    insights: Option<Arc<dyn InsightSource>>,
    completed: Arc<RwLock<Vec<TrainingResult>>>,
    in_flight: Arc<AtomicUsize>,
}

impl TaskCoordinator {
    pub fn new(config: CoordinatorConfig, executor: Arc<dyn RetrainExecutor>) -> Self {
        Self {
            config,
            executor,
            insights: None,
            completed: Arc::new(RwLock::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attach an insight source for shared learning
    pub fn with_insights(mut self, insights: Arc<dyn InsightSource>) -> Self {
        self.insights = Some(insights);
        self
    }

    /// Run a batch of tasks, returning results in the input order.
    pub async fn run(&self, tasks: Vec<RetrainTask>) -> Vec<TrainingResult> {
        let count = tasks.len();
        if count == 0 {
            return Vec::new();
        }
        info!(
            "Running {} retraining task(s), max {} concurrent",
            count, self.config.max_concurrent
        );

        let mut indexed: Vec<(usize, RetrainTask)> = tasks.into_iter().enumerate().collect();
        if self.config.priority_sort {
            // Stable: equal priorities keep their submission order
            indexed.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut join_set: JoinSet<(usize, TrainingResult)> = JoinSet::new();

        for (index, task) in indexed {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let insights = self.insights.clone();
            let config = self.config.clone();
            let in_flight = self.in_flight.clone();

            join_set.spawn(async move {
                // Worker slot: acquired exactly when one frees
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("coordinator semaphore closed");

                in_flight.fetch_add(1, Ordering::SeqCst);
                let result = execute_with_retry(executor, insights, &config, task).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);

                (index, result)
            });
        }

        let mut slots: Vec<Option<TrainingResult>> = (0..count).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!("Retraining worker panicked: {}", e),
            }
        }

        let results: Vec<TrainingResult> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| TrainingResult {
                    domain: String::new(),
                    success: false,
                    error: Some("worker panicked before reporting".to_string()),
                    duration_ms: 0,
                    retries: 0,
                })
            })
            .collect();

        self.completed.write().await.extend(results.iter().cloned());
        results
    }

    /// Derived view over everything this coordinator has completed
    pub async fn stats(&self) -> CoordinatorStats {
        let completed = self.completed.read().await;
        let total = completed.len() as u64;
        let succeeded = completed.iter().filter(|r| r.success).count() as u64;
        let avg_duration_ms = if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|r| r.duration_ms as f64).sum::<f64>() / completed.len() as f64
        };

        CoordinatorStats {
            completed: total,
            succeeded,
            failed: total - succeeded,
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64
            },
            avg_duration_ms,
            in_flight: self.in_flight.load(Ordering::SeqCst) as u64,
        }
    }
}

/// Execute one task to a terminal result, retrying with backoff.
async fn execute_with_retry(
    executor: Arc<dyn RetrainExecutor>,
    insights: Option<Arc<dyn InsightSource>>,
    config: &CoordinatorConfig,
    mut task: RetrainTask,
) -> TrainingResult {
    if config.share_learning {
        if let Some(source) = &insights {
            if let Some(domain_insights) = source.domain_insights(&task.domain).await {
                if domain_insights.average_improvement > 0.0 {
                    let scaled = (task.num_trials as f64
                        * (1.0 + domain_insights.average_improvement))
                        .round() as u32;
                    debug!(
                        "Shared learning for '{}': scaling trials {} -> {}",
                        task.domain, task.num_trials, scaled
                    );
                    task.num_trials = scaled;
                }
            }
        }
    }

    let start = Instant::now();
    let mut retries: u32 = 0;

    loop {
        match executor.execute(&task).await {
            Ok(_) => {
                return TrainingResult {
                    domain: task.domain.clone(),
                    success: true,
                    error: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    retries,
                };
            }
            Err(e) => {
                if !config.retry_on_failure || retries >= config.max_retries {
                    warn!(
                        "Task for '{}' failed terminally after {} retries: {}",
                        task.domain, retries, e
                    );
                    return TrainingResult {
                        domain: task.domain.clone(),
                        success: false,
                        error: Some(e.to_string()),
                        duration_ms: start.elapsed().as_millis() as u64,
                        retries,
                    };
                }

                retries += 1;
                let backoff = config.backoff_base * retries;
                debug!(
                    "Task for '{}' failed (attempt {}), retrying after {:?}: {}",
                    task.domain, retries, backoff, e
                );
                sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetanoiaError;
    use crate::types::TaskPriority;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Executor double that records concurrency and execution order
    struct ProbeExecutor {
        delay: Duration,
        fail: bool,
        current: AtomicUsize,
        max_observed: AtomicUsize,
        order: Mutex<Vec<String>>,
        seen_trials: Mutex<Vec<u32>>,
    }

    impl ProbeExecutor {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail: false,
                current: AtomicUsize::new(0),
                max_observed: AtomicUsize::new(0),
                order: Mutex::new(Vec::new()),
                seen_trials: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Duration::from_millis(1))
            }
        }
    }

    #[async_trait]
    impl RetrainExecutor for ProbeExecutor {
        async fn execute(&self, task: &RetrainTask) -> crate::error::Result<serde_json::Value> {
            let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(current, Ordering::SeqCst);
            self.order.lock().unwrap().push(task.domain.clone());
            self.seen_trials.lock().unwrap().push(task.num_trials);

            sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                Err(MetanoiaError::Llm("optimizer unavailable".to_string()))
            } else {
                Ok(json!({ "domain": task.domain }))
            }
        }
    }

    struct FixedInsights(f64);

    #[async_trait]
    impl InsightSource for FixedInsights {
        async fn domain_insights(&self, _domain: &str) -> Option<DomainInsights> {
            Some(DomainInsights {
                average_improvement: self.0,
                ..Default::default()
            })
        }
    }

    fn tasks(domains: &[&str]) -> Vec<RetrainTask> {
        domains
            .iter()
            .map(|d| RetrainTask::new(*d, json!({})))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_and_order_preserved() {
        let config = CoordinatorConfig {
            max_concurrent: 2,
            priority_sort: false,
            ..Default::default()
        };
        let executor = Arc::new(ProbeExecutor::new(Duration::from_millis(50)));
        let coordinator = TaskCoordinator::new(config, executor.clone());

        let batch = tasks(&["a", "b", "c", "d", "e"]);
        let results = coordinator.run(batch).await;

        // Never more than 2 in flight
        assert!(executor.max_observed.load(Ordering::SeqCst) <= 2);

        // Output order equals input order
        let domains: Vec<&str> = results.iter().map(|r| r.domain.as_str()).collect();
        assert_eq!(domains, vec!["a", "b", "c", "d", "e"]);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_failure() {
        let config = CoordinatorConfig {
            max_concurrent: 1,
            max_retries: 3,
            ..Default::default()
        };
        let coordinator = TaskCoordinator::new(config, Arc::new(ProbeExecutor::failing()));

        let results = coordinator.run(tasks(&["a"])).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].retries, 3);
        assert!(results[0].error.as_deref().unwrap().contains("optimizer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_disabled_fails_immediately() {
        let config = CoordinatorConfig {
            max_concurrent: 1,
            retry_on_failure: false,
            ..Default::default()
        };
        let executor = Arc::new(ProbeExecutor::failing());
        let coordinator = TaskCoordinator::new(config, executor.clone());

        let results = coordinator.run(tasks(&["a"])).await;
        assert!(!results[0].success);
        assert_eq!(results[0].retries, 0);
        assert_eq!(executor.order.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_sort_executes_critical_first() {
        let config = CoordinatorConfig {
            max_concurrent: 1,
            priority_sort: true,
            ..Default::default()
        };
        let executor = Arc::new(ProbeExecutor::new(Duration::from_millis(1)));
        let coordinator = TaskCoordinator::new(config, executor.clone());

        let batch = vec![
            RetrainTask::new("background", json!({})).with_priority(TaskPriority::Low),
            RetrainTask::new("urgent", json!({})).with_priority(TaskPriority::Critical),
        ];
        let results = coordinator.run(batch).await;

        // Execution order honors priority
        assert_eq!(
            *executor.order.lock().unwrap(),
            vec!["urgent".to_string(), "background".to_string()]
        );
        // Result order stays the submission order
        assert_eq!(results[0].domain, "background");
        assert_eq!(results[1].domain, "urgent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_learning_scales_trials() {
        let config = CoordinatorConfig {
            max_concurrent: 1,
            share_learning: true,
            ..Default::default()
        };
        let executor = Arc::new(ProbeExecutor::new(Duration::from_millis(1)));
        let coordinator = TaskCoordinator::new(config, executor.clone())
            .with_insights(Arc::new(FixedInsights(0.5)));

        coordinator.run(tasks(&["a"])).await;

        // 10 trials scaled by (1 + 0.5)
        assert_eq!(*executor.seen_trials.lock().unwrap(), vec![15]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_learning_disabled_leaves_trials() {
        let config = CoordinatorConfig {
            max_concurrent: 1,
            share_learning: false,
            ..Default::default()
        };
        let executor = Arc::new(ProbeExecutor::new(Duration::from_millis(1)));
        let coordinator = TaskCoordinator::new(config, executor.clone())
            .with_insights(Arc::new(FixedInsights(0.5)));

        coordinator.run(tasks(&["a"])).await;
        assert_eq!(*executor.seen_trials.lock().unwrap(), vec![10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_reflect_outcomes() {
        let config = CoordinatorConfig {
            max_concurrent: 2,
            retry_on_failure: false,
            priority_sort: false,
            ..Default::default()
        };
        let coordinator = TaskCoordinator::new(config, Arc::new(ProbeExecutor::failing()));

        coordinator.run(tasks(&["a", "b"])).await;
        let stats = coordinator.stats().await;

        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.succeeded, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let coordinator = TaskCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(ProbeExecutor::new(Duration::from_millis(1))),
        );
        let results = coordinator.run(Vec::new()).await;
        assert!(results.is_empty());
        assert_eq!(coordinator.stats().await, CoordinatorStats::default());
    }
}
