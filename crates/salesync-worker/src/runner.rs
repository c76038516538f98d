//! Poll loop shared by the pipeline stages

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::WorkerResult;

/// Counts for one processed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub completed: usize,
    pub retrying: usize,
    pub dead: usize,
    /// Rows whose claim was released by someone else before they finished
    pub superseded: usize,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.claimed == 0
    }
}

/// One pipeline stage: claim a batch and process it row by row
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Claim and process one batch. Per-row failures are recorded on the row;
    /// only errors that make the whole iteration pointless are returned.
    async fn run_once(&self) -> WorkerResult<BatchReport>;

    async fn reclaim_stale(&self, lease_timeout: Duration) -> WorkerResult<u64>;
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub poll_interval: Duration,
    pub error_pause: Duration,
    pub lease_timeout: Option<Duration>,
}

impl From<&Config> for RunnerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            error_pause: config.loop_error_pause(),
            lease_timeout: config.lease_timeout(),
        }
    }
}

/// Run `stage` until `shutdown` is cancelled. A batch in progress is always
/// finished before the loop exits.
pub async fn run_stage<S>(stage: &S, config: &RunnerConfig, shutdown: CancellationToken)
where
    S: Stage + ?Sized,
{
    tracing::info!(
        stage = stage.name(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        lease_timeout_secs = config.lease_timeout.map(|d| d.as_secs()),
        "Stage started"
    );

    while !shutdown.is_cancelled() {
        if let Some(lease_timeout) = config.lease_timeout {
            if let Err(err) = stage.reclaim_stale(lease_timeout).await {
                tracing::error!(stage = stage.name(), error = %err, "Stale claim sweep failed");
                if !pause(&shutdown, config.error_pause).await {
                    break;
                }
                continue;
            }
        }

        let wait = match stage.run_once().await {
            Ok(report) if report.is_empty() => Some(config.poll_interval),
            Ok(report) => {
                tracing::info!(
                    stage = stage.name(),
                    claimed = report.claimed,
                    completed = report.completed,
                    retrying = report.retrying,
                    dead = report.dead,
                    superseded = report.superseded,
                    "Batch finished"
                );
                None
            }
            Err(err) => {
                tracing::error!(
                    stage = stage.name(),
                    error = %err,
                    infrastructure = err.is_infrastructure(),
                    pause_ms = config.error_pause.as_millis() as u64,
                    "Loop iteration aborted"
                );
                Some(config.error_pause)
            }
        };

        if let Some(wait) = wait {
            if !pause(&shutdown, wait).await {
                break;
            }
        }
    }

    tracing::info!(stage = stage.name(), "Stage stopped");
}

/// Sleep for `duration`; false if shutdown was requested meanwhile
async fn pause(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replays scripted batch results, then reports empty batches
    struct ScriptedStage {
        script: std::sync::Mutex<Vec<WorkerResult<BatchReport>>>,
        calls: AtomicUsize,
        sweeps: AtomicUsize,
    }

    impl ScriptedStage {
        fn new(mut script: Vec<WorkerResult<BatchReport>>) -> Self {
            script.reverse();
            Self {
                script: std::sync::Mutex::new(script),
                calls: AtomicUsize::new(0),
                sweeps: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Stage for ScriptedStage {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run_once(&self) -> WorkerResult<BatchReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(BatchReport::default()))
        }

        async fn reclaim_stale(&self, _lease_timeout: Duration) -> WorkerResult<u64> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    fn config(lease_timeout: Option<Duration>) -> RunnerConfig {
        RunnerConfig {
            poll_interval: Duration::from_millis(2_000),
            error_pause: Duration::from_millis(10_000),
            lease_timeout,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_batches_run_back_to_back() {
        let busy = BatchReport {
            claimed: 3,
            completed: 3,
            ..Default::default()
        };
        let stage = Arc::new(ScriptedStage::new(vec![Ok(busy), Ok(busy)]));
        let shutdown = CancellationToken::new();

        let handle = {
            let stage = stage.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { run_stage(stage.as_ref(), &config(None), shutdown).await })
        };

        // Two busy batches and the first empty one happen without waiting
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(stage.calls.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(stage.calls.load(Ordering::SeqCst), 4);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(stage.sweeps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_infrastructure_error_pauses_longer() {
        let stage = Arc::new(ScriptedStage::new(vec![Err(WorkerError::InfrastructureUnavailable(
            sqlx::Error::PoolTimedOut,
        ))]));
        let shutdown = CancellationToken::new();

        let handle = {
            let stage = stage.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { run_stage(stage.as_ref(), &config(None), shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(stage.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(5_001)).await;
        assert_eq!(stage.calls.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_runs_each_iteration_when_enabled() {
        let stage = Arc::new(ScriptedStage::new(vec![]));
        let shutdown = CancellationToken::new();

        let handle = {
            let stage = stage.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_stage(stage.as_ref(), &config(Some(Duration::from_secs(600))), shutdown).await
            })
        };

        tokio::time::sleep(Duration::from_millis(4_001)).await;
        assert_eq!(stage.sweeps.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let stage = ScriptedStage::new(vec![]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        run_stage(&stage, &config(None), shutdown).await;
        assert_eq!(stage.calls.load(Ordering::SeqCst), 0);
    }
}
