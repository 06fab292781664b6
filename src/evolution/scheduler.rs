// Auto-Evolution Scheduler
//
// Periodic wrapper that invokes a caller-supplied evolution cycle on a
// fixed interval. One failed cycle never stops subsequent cycles; stop is
// idempotent and deterministic for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Auto-evolution is already running")]
    AlreadyRunning,
}

/// One evolution cycle, supplied by the caller
#[async_trait]
pub trait EvolutionCycle: Send + Sync {
    async fn run_cycle(&self) -> anyhow::Result<()>;
}

/// Periodic auto-evolution runner
pub struct AutoEvolution {
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AutoEvolution {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start invoking the cycle every interval.
    ///
    /// Cycle errors are logged and swallowed so a failed pass never stops
    /// the next one.
    pub async fn start(&self, cycle: Arc<dyn EvolutionCycle>) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!("Starting auto-evolution (interval {:?})", self.interval);

        let running = self.running.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // cycle runs one full interval after start
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                debug!("Running auto-evolution cycle");
                if let Err(e) = cycle.run_cycle().await {
                    error!("Auto-evolution cycle failed: {:#}", e);
                }
            }
        });

        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the runner. Safe to call repeatedly or before start.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        info!("Stopped auto-evolution");
    }
}
