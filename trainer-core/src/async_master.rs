//! Asynchronous training coordinator.
//!
//! The master seeds every worker once, then absorbs streaming gradient
//! updates while a background monitor samples the loss out-of-band. All
//! run state lives behind one lock: `GradState`, `BestTracker` and the
//! completion sender are observed and mutated together, so termination
//! always sees a consistent pair. Critical sections never await.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cluster::ClusterCore;
use crate::dataset::Dataset;
use crate::error::{Result, TrainerError};
use crate::grad_state::{AsyncConfig, BestTracker, GradState};
use crate::monitor;
use crate::telemetry;
use crate::vector::Vector;

/// Seam the RPC surface dispatches streamed gradient updates through; the
/// synchronous master rejects them, the asynchronous master applies them.
#[async_trait]
pub trait GradUpdateHandler: Send + Sync {
    async fn handle_grad_update(&self, delta: Vector) -> Result<()>;
}

pub(crate) struct AsyncRun {
    /// Distinguishes successive runs, so a monitor or a stale cutoff from
    /// an earlier run can never act on a later one.
    pub(crate) id: u64,
    pub(crate) state: GradState,
    pub(crate) best: BestTracker,
    pub(crate) config: AsyncConfig,
    done_tx: Option<oneshot::Sender<GradState>>,
}

/// Master coordinating one asynchronous run at a time.
pub struct AsyncMaster {
    cluster: Arc<ClusterCore>,
    dataset: Arc<Dataset>,
    pub(crate) run: Mutex<Option<AsyncRun>>,
    next_run_id: std::sync::atomic::AtomicU64,
}

impl AsyncMaster {
    pub fn new(cluster: Arc<ClusterCore>, dataset: Arc<Dataset>) -> Self {
        Self {
            cluster,
            dataset,
            run: Mutex::new(None),
            next_run_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn cluster(&self) -> &Arc<ClusterCore> {
        &self.cluster
    }

    pub(crate) fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Snapshot of the current run state, if any run was ever started.
    pub fn current_state(&self) -> Option<GradState> {
        self.run.lock().as_ref().map(|r| r.state.clone())
    }

    /// Snapshot of the best `(loss, weights)` pair of the current run.
    pub fn best_snapshot(&self) -> Option<(f64, Vector)> {
        self.run
            .lock()
            .as_ref()
            .map(|r| (r.best.best_loss(), r.best.best_grad().clone()))
    }

    /// Start an asynchronous run.
    ///
    /// Gated on cluster readiness. Fails with `AlreadyRunning` while a
    /// non-terminal run exists. On success the fleet has been seeded, the
    /// loss monitor is live, and the returned receiver resolves exactly
    /// once with the terminal state.
    pub async fn run(self: &Arc<Self>, config: AsyncConfig) -> Result<oneshot::Receiver<GradState>> {
        if config.batch_size == 0 {
            return Err(TrainerError::config("batch_size must be greater than 0"));
        }
        if config.check_every == 0 {
            return Err(TrainerError::config("check_every must be greater than 0"));
        }

        self.cluster.ready().await;
        let workers = self.cluster.workers().await;
        if workers.is_empty() {
            return Err(TrainerError::illegal_state("cluster ready with no workers"));
        }

        let (done_tx, done_rx) = oneshot::channel();
        let run_id;
        {
            let mut guard = self.run.lock();
            if let Some(existing) = guard.as_ref() {
                if !existing.state.is_terminal() {
                    return Err(TrainerError::AlreadyRunning);
                }
            }
            run_id = self
                .next_run_id
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let dim = config.initial_weights.dim();
            *guard = Some(AsyncRun {
                id: run_id,
                state: GradState::start(config.initial_weights.clone()),
                best: BestTracker::cleared(dim),
                config: config.clone(),
                done_tx: Some(done_tx),
            });
        }
        counter!(telemetry::ASYNC_RUNS, 1);
        info!(
            workers = workers.len(),
            max_steps = config.max_steps,
            batch_size = config.batch_size,
            check_every = config.check_every,
            "starting asynchronous run"
        );

        // Seed the fleet. On failure the fresh run is rolled back so a
        // later attempt is not spuriously AlreadyRunning.
        let assignments = config.split.split(self.dataset.len(), workers.len());
        let seeds = workers.iter().zip(&assignments).map(|((_, stub), range)| {
            stub.init_async(
                &config.initial_weights,
                std::slice::from_ref(range),
                config.batch_size,
            )
        });
        if let Err(e) = try_join_all(seeds).await {
            *self.run.lock() = None;
            return Err(e);
        }

        tokio::spawn(monitor::run(Arc::clone(self), run_id));
        Ok(done_rx)
    }

    /// Start a run and wait for its terminal state.
    pub async fn fit(self: &Arc<Self>, config: AsyncConfig) -> Result<GradState> {
        let done = self.run(config).await?;
        done.await.map_err(|_| TrainerError::Aborted)
    }

    /// Terminate the current run.
    ///
    /// Atomically stamps the terminal state (weights and loss taken from
    /// the best tracker) and hands the result to the completion channel,
    /// then broadcasts `stopAsync` so workers wind down. Idempotent.
    pub async fn end_computation(&self) -> Result<()> {
        let current = self.run.lock().as_ref().map(|run| run.id);
        match current {
            Some(run_id) => self.end_run(run_id).await,
            None => Ok(()),
        }
    }

    /// Terminate a specific run; a no-op if that run is already terminal
    /// or has been superseded.
    pub(crate) async fn end_run(&self, run_id: u64) -> Result<()> {
        let (final_state, done_tx) = {
            let mut guard = self.run.lock();
            let run = match guard.as_mut() {
                None => return Ok(()),
                Some(run) if run.id != run_id || run.state.is_terminal() => return Ok(()),
                Some(run) => run,
            };
            let best_loss = run.best.best_loss();
            let best_grad = run.best.best_grad().clone();
            run.state.replace_grad(best_grad)?;
            run.state.finish(best_loss)?;
            (run.state.clone(), run.done_tx.take())
        };

        info!(
            final_loss = ?final_state.final_loss(),
            updates = final_state.updates(),
            "asynchronous run terminated"
        );

        // Cooperative fleet wind-down; stragglers only cost a warning.
        for (node, stub) in self.cluster.workers().await {
            tokio::spawn(async move {
                if let Err(e) = stub.stop_async().await {
                    warn!(worker = %node, error = %e, "stopAsync failed");
                }
            });
        }

        if let Some(done_tx) = done_tx {
            let _ = done_tx.send(final_state);
        }
        Ok(())
    }

    /// Apply one streamed gradient update.
    ///
    /// Late updates after termination (and updates with no run at all) are
    /// acked without effect so stragglers drain quietly. Reaching
    /// `max_steps` triggers termination.
    async fn apply_grad_update(&self, delta: Vector) -> Result<()> {
        let hit_cutoff = {
            let mut guard = self.run.lock();
            match guard.as_mut() {
                None => {
                    debug!("gradient update with no active run; acked and dropped");
                    counter!(telemetry::ASYNC_LATE_UPDATES, 1);
                    None
                }
                Some(run) if run.state.is_terminal() => {
                    debug!("late gradient update after termination; acked and dropped");
                    counter!(telemetry::ASYNC_LATE_UPDATES, 1);
                    None
                }
                Some(run) => {
                    run.state.update(&delta)?;
                    counter!(telemetry::ASYNC_UPDATES, 1);
                    (run.state.updates() >= run.config.max_steps).then_some(run.id)
                }
            }
        };

        if let Some(run_id) = hit_cutoff {
            info!("max steps reached; terminating run");
            self.end_run(run_id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl GradUpdateHandler for AsyncMaster {
    async fn handle_grad_update(&self, delta: Vector) -> Result<()> {
        self.apply_grad_update(delta).await
    }
}
