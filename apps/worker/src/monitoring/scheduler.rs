use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::executor::MonitoringExecutor;
use super::health::{HISTORY_WINDOW, HealthStatus};
use super::types::CheckResult;
use crate::database::Database;
use crate::database::models::MonitoredTarget;
use crate::notifications::TransitionNotifier;

const MIN_WORKERS: usize = 10;
const MAX_WORKERS: usize = 50;
const WORKERS_PER_CPU: usize = 5;

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Targets that were due in this sweep
    pub targets: usize,
    /// Results persisted together with their classification
    pub recorded: usize,
    /// Pipelines that stored nothing (storage error or a crashed task)
    pub failed: usize,
    /// Alerts accepted by the notification sink
    pub notified: usize,
    /// The target list could not be read; nothing was checked
    pub aborted: bool,
}

/// Outcome of one target pipeline
enum Pipeline {
    Recorded { notified: bool },
    Failed,
}

/// Monitoring scheduler - runs a check for every registered target once per
/// sweep and repeats after a fixed pause
pub struct MonitoringScheduler {
    database: Arc<dyn Database>,
    executor: Arc<MonitoringExecutor>,
    notifier: Arc<TransitionNotifier>,
    interval: Duration,
    max_concurrency: Option<usize>,
}

impl MonitoringScheduler {
    pub fn new(
        database: Arc<dyn Database>,
        executor: Arc<MonitoringExecutor>,
        notifier: Arc<TransitionNotifier>,
        interval: Duration,
    ) -> Self {
        Self { database, executor, notifier, interval, max_concurrency: None }
    }

    /// Fix the number of concurrent checks; 0 keeps the CPU based default
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = (max_concurrency > 0).then_some(max_concurrency);
        self
    }

    /// Sweep until `shutdown` resolves
    ///
    /// The pause starts when a sweep completes, so sweeps never overlap. A
    /// sweep in flight when shutdown fires is allowed to finish.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(interval_secs = self.interval.as_secs(), "monitoring scheduler started");

        loop {
            let summary = self.run_sweep().await;
            if summary.aborted {
                warn!("sweep aborted, retrying in {}s", self.interval.as_secs());
            } else {
                debug!(delay_secs = self.interval.as_secs(), "next sweep scheduled");
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("monitoring scheduler stopped");
    }

    /// Check every registered target once
    pub async fn run_sweep(&self) -> SweepSummary {
        let started = Instant::now();

        let targets = match self.database.fetch_all_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                error!("failed to load targets: {e:#}");
                return SweepSummary { aborted: true, ..Default::default() };
            }
        };

        let mut summary = SweepSummary { targets: targets.len(), ..Default::default() };
        if targets.is_empty() {
            debug!("no targets registered");
            return summary;
        }

        let workers = calc_workers(self.max_concurrency, targets.len());
        debug!(targets = targets.len(), workers, "starting sweep");

        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for target in targets {
            let permits = permits.clone();
            let database = self.database.clone();
            let executor = self.executor.clone();
            let notifier = self.notifier.clone();

            tasks.spawn(async move {
                // The semaphore is never closed.
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Pipeline::Failed;
                };
                check_target(database.as_ref(), &executor, &notifier, target).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Pipeline::Recorded { notified }) => {
                    summary.recorded += 1;
                    if notified {
                        summary.notified += 1;
                    }
                }
                Ok(Pipeline::Failed) => summary.failed += 1,
                Err(e) => {
                    error!("check task crashed: {e}");
                    summary.failed += 1;
                }
            }
        }

        info!(
            targets = summary.targets,
            recorded = summary.recorded,
            failed = summary.failed,
            notified = summary.notified,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sweep complete"
        );
        summary
    }
}

/// Probe, persist and classify, then alert on the edge into UNHEALTHY
async fn check_target(
    database: &dyn Database,
    executor: &MonitoringExecutor,
    notifier: &TransitionNotifier,
    target: MonitoredTarget,
) -> Pipeline {
    let previous: HealthStatus = target.health_status;
    let outcome = executor.execute_check(&target).await;

    if outcome.success {
        debug!(target_id = target.id, protocol = %target.protocol, latency_ms = outcome.latency_ms, "check ok");
    } else {
        debug!(
            target_id = target.id,
            protocol = %target.protocol,
            latency_ms = outcome.latency_ms,
            "check failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    let result = CheckResult::new(target.id, outcome);
    let cycle = match database.record_cycle(&result, HISTORY_WINDOW).await {
        Ok(cycle) => cycle,
        Err(e) => {
            error!(target_id = target.id, "failed to record check for '{}': {e:#}", target.name);
            return Pipeline::Failed;
        }
    };

    if cycle.status != previous {
        info!(target_id = target.id, status = %cycle.status, "server '{}' changed state (was {previous})", target.name);
    }

    let notified = notifier.maybe_notify(&target, previous, cycle.status, &cycle.history).await;
    Pipeline::Recorded { notified }
}

/// Number of checks allowed in flight during one sweep
pub fn calc_workers(configured: Option<usize>, targets: usize) -> usize {
    let workers = configured.unwrap_or_else(|| {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        (cpus * WORKERS_PER_CPU).clamp(MIN_WORKERS, MAX_WORKERS)
    });
    workers.min(targets).max(1)
}

/// Register the interrupt handler and return a future that resolves on
/// Ctrl-C
///
/// The handler is installed before this returns, so an interrupt that
/// arrives during the first sweep is not lost.
#[cfg(unix)]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    Ok(async move {
        interrupt.recv().await;
        info!("shutdown requested");
    })
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    let mut interrupt = tokio::signal::windows::ctrl_c()?;
    Ok(async move {
        interrupt.recv().await;
        info!("shutdown requested");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_workers_bounds() {
        assert_eq!(calc_workers(Some(4), 100), 4);
        assert_eq!(calc_workers(Some(4), 2), 2);
        assert_eq!(calc_workers(None, 3), 3);
        assert_eq!(calc_workers(Some(8), 0), 1);

        let auto = calc_workers(None, 1_000);
        assert!((MIN_WORKERS..=MAX_WORKERS).contains(&auto));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_before_first_poll_is_not_lost() {
        let shutdown = shutdown_signal().expect("install interrupt handler");

        let status = std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .expect("run kill");
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .expect("interrupt delivered to the registered handler");
    }
}
