//! Background loss monitor for asynchronous runs.
//!
//! A single cooperative task that samples the current weights, evaluates
//! the local loss, tracks the best pair seen, and terminates the run when
//! the stopping criterion holds. It works exclusively on snapshots taken
//! inside the shared critical section and never blocks the update path;
//! the loss itself is computed outside any lock.

use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::async_master::AsyncMaster;
use crate::loss::local_loss;

/// Backoff while too few new updates have arrived since the last probe.
const LOSS_CHECK_BACKOFF: Duration = Duration::from_secs(2);

pub(crate) async fn run(master: Arc<AsyncMaster>, run_id: u64) {
    let mut last_checked: u64 = 0;
    let mut losses: Vec<f64> = Vec::new();
    let mut previous: Option<f64> = None;

    loop {
        // Consistent (grad, updates) snapshot from the shared cell. The
        // monitor dies with its own run; it never follows a successor.
        let snapshot = {
            let guard = master.run.lock();
            match guard.as_ref() {
                None => return,
                Some(run) if run.id != run_id || run.state.is_terminal() => return,
                Some(run) => (
                    run.state.grad().clone(),
                    run.state.updates(),
                    run.config.check_every,
                    run.config.leak_coef,
                    run.config.stopping.clone(),
                ),
            }
        };
        let (grad, updates, check_every, leak_coef, stopping) = snapshot;

        if updates.saturating_sub(last_checked) < check_every {
            sleep(LOSS_CHECK_BACKOFF).await;
            continue;
        }

        // A transient numeric hiccup must not kill a long run.
        let raw = match local_loss(master.dataset(), &grad) {
            Ok(loss) => loss,
            Err(e) => {
                warn!(error = %e, "loss probe failed; retrying");
                sleep(LOSS_CHECK_BACKOFF).await;
                continue;
            }
        };

        let loss = match previous {
            Some(prev) => leak_coef * raw + (1.0 - leak_coef) * prev,
            None => raw,
        };
        previous = Some(loss);
        gauge!(crate::telemetry::ASYNC_LOSS, loss);

        let should_stop = {
            let mut guard = master.run.lock();
            match guard.as_mut() {
                None => return,
                Some(run) if run.id != run_id || run.state.is_terminal() => return,
                Some(run) => {
                    // The best pair always refers to the snapshot the loss
                    // was evaluated on, not the weights of this instant.
                    if run.best.observe(loss, &grad) {
                        debug!(loss, updates, "new best loss");
                    }
                    losses.insert(0, loss);
                    (stopping)(&losses)
                }
            }
        };
        debug!(loss, updates, "loss probe");

        if should_stop {
            info!(loss, updates, "stopping criterion met; terminating run");
            if let Err(e) = master.end_run(run_id).await {
                warn!(error = %e, "termination after convergence failed");
            }
            return;
        }
        last_checked = updates;
    }
}
