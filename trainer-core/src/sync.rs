//! Synchronous training loop.
//!
//! Epochs sweep every worker's piece in lock-step batches: the master
//! scatters a gradient request per worker, gathers all replies, applies
//! the mean gradient, and only then starts the next batch. Any worker
//! failure aborts the run with the first observed cause.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::try_join_all;
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, warn};

use crate::async_master::GradUpdateHandler;
use crate::cluster::ClusterCore;
use crate::dataset::Dataset;
use crate::error::{Result, TrainerError};
use crate::grad_state::GradState;
use crate::loss::distributed_loss;
use crate::protocol::SampleRange;
use crate::split::piece_size;
use crate::stopping::StoppingCriterion;
use crate::telemetry;
use crate::vector::Vector;

/// Master driving paired scatter/gather training rounds.
pub struct SyncMaster {
    cluster: Arc<ClusterCore>,
    dataset: Arc<Dataset>,
}

impl SyncMaster {
    pub fn new(cluster: Arc<ClusterCore>, dataset: Arc<Dataset>) -> Self {
        Self { cluster, dataset }
    }

    pub fn cluster(&self) -> &Arc<ClusterCore> {
        &self.cluster
    }

    /// Run `epochs` synchronous epochs from `initial` weights.
    ///
    /// Gated on cluster readiness. Per epoch, every batch applies the mean
    /// of the worker gradients by subtraction; after the batches the
    /// distributed loss of the updated weights is prepended to the trace
    /// and the stopping criterion consulted. Returns the terminal state.
    pub async fn fit(
        &self,
        epochs: usize,
        batch_size: usize,
        initial: Vector,
        stopping: StoppingCriterion,
    ) -> Result<GradState> {
        if epochs == 0 {
            return Err(TrainerError::config("epochs must be greater than 0"));
        }
        if batch_size == 0 {
            return Err(TrainerError::config("batch_size must be greater than 0"));
        }

        self.cluster.ready().await;
        let workers = self.cluster.workers().await;
        if workers.is_empty() {
            return Err(TrainerError::illegal_state("cluster ready with no workers"));
        }

        let piece = piece_size(self.dataset.len(), workers.len());
        if piece == 0 {
            return Err(TrainerError::dataset(format!(
                "{} samples cannot feed {} workers",
                self.dataset.len(),
                workers.len()
            )));
        }
        let dropped = self.dataset.len() - piece * workers.len();
        if dropped != 0 {
            warn!(dropped, "dataset does not divide evenly; trailing samples ignored");
        }

        info!(
            epochs,
            batch_size,
            workers = workers.len(),
            piece,
            "starting synchronous training"
        );

        let mut state = GradState::start(initial);
        let mut losses: Vec<f64> = Vec::new();

        for epoch in 1..=epochs {
            let mut offset = 0;
            while offset < piece {
                let started = Instant::now();
                let batch_weights = state.grad().clone();

                let requests = workers.iter().enumerate().map(|(i, (_, stub))| {
                    let start = i * piece + offset;
                    let end = usize::min(start + batch_size, (i + 1) * piece);
                    stub.gradient(&batch_weights, SampleRange::new(start, end))
                });
                let replies = try_join_all(requests).await?;

                if let Some(slowest) = replies.iter().map(|r| r.elapsed_ms()).max() {
                    debug!(epoch, offset, slowest_worker_ms = slowest, "batch gathered");
                }

                let grads: Vec<Vector> = replies.into_iter().map(|r| r.grad).collect();
                let mean = Vector::mean_of(&grads)?;
                state.update(&mean)?;

                histogram!(
                    telemetry::SYNC_BATCH_DURATION_MS,
                    started.elapsed().as_secs_f64() * 1000.0
                );
                offset += batch_size;
            }

            let loss = distributed_loss(&workers, &self.dataset, state.grad()).await?;
            losses.insert(0, loss);
            gauge!(telemetry::SYNC_LOSS, loss);
            counter!(telemetry::SYNC_EPOCHS, 1);
            info!(epoch, loss, updates = state.updates(), "epoch complete");

            if (stopping)(&losses) {
                info!(epoch, loss, "stopping criterion met");
                break;
            }
        }

        // At least one epoch ran, so the trace is non-empty.
        let final_loss = losses
            .first()
            .copied()
            .ok_or_else(|| TrainerError::illegal_state("no loss recorded"))?;
        state.finish(final_loss)?;
        info!(
            final_loss,
            updates = state.updates(),
            sparsity = state.grad().sparsity(),
            "synchronous training finished"
        );
        Ok(state)
    }
}

#[async_trait]
impl GradUpdateHandler for SyncMaster {
    async fn handle_grad_update(&self, _delta: Vector) -> Result<()> {
        Err(TrainerError::UnsupportedOnSync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Sample;
    use crate::stopping;
    use crate::test_support::{MockConnector, MockWorker};
    use crate::protocol::Node;

    fn constant_dataset(len: usize, dim: usize) -> Arc<Dataset> {
        let samples = (0..len)
            .map(|_| Sample {
                features: Vector::zeros(dim),
                label: 0.0,
            })
            .collect();
        Arc::new(Dataset::from_samples(samples).unwrap())
    }

    async fn cluster_of(workers: Vec<Arc<MockWorker>>) -> Arc<ClusterCore> {
        let connector = Arc::new(MockConnector::default());
        for worker in &workers {
            connector.insert(Arc::clone(worker));
        }
        let cluster = Arc::new(ClusterCore::new(workers.len(), connector));
        for worker in &workers {
            cluster.register(worker.node().clone()).await.unwrap();
        }
        cluster
    }

    fn unit_gradient_worker(i: u16, dim: usize) -> Arc<MockWorker> {
        let worker = Arc::new(MockWorker::new(Node::new(format!("worker-{}", i), 7000 + i)));
        worker.set_gradient(move |_w, _range| Vector::filled(dim, 1.0));
        worker
    }

    #[tokio::test]
    async fn test_single_epoch_applies_mean_gradient() {
        // Two workers, ten samples, batch of five: one batch per epoch,
        // both report an all-ones gradient, so the epoch subtracts ones.
        let workers = vec![unit_gradient_worker(0, 2), unit_gradient_worker(1, 2)];
        let cluster = cluster_of(workers.clone()).await;
        let master = SyncMaster::new(cluster, constant_dataset(10, 2));

        let state = master
            .fit(1, 5, Vector::zeros(2), stopping::never())
            .await
            .unwrap();

        assert_eq!(state.grad(), &Vector::new(vec![-1.0, -1.0]).unwrap());
        assert_eq!(state.updates(), 1);
        assert!(state.is_terminal());
        assert!(state.final_loss().is_some());
    }

    #[tokio::test]
    async fn test_backward_converges_to_target() {
        // A worker reporting grad = weights - target turns each batch into
        // a fixed-point step landing exactly on the target.
        let target = Vector::new(vec![3.0, -1.5]).unwrap();
        let worker = Arc::new(MockWorker::new(Node::new("worker-0", 7000)));
        {
            let target = target.clone();
            worker.set_gradient(move |w, _range| w.checked_sub(&target));
        }
        let cluster = cluster_of(vec![worker]).await;
        let master = SyncMaster::new(cluster, constant_dataset(8, 2));

        let state = master
            .fit(3, 4, Vector::zeros(2), stopping::never())
            .await
            .unwrap();

        let residual: f64 = state
            .grad()
            .as_slice()
            .iter()
            .zip(target.as_slice())
            .map(|(a, b)| (a - b).abs())
            .sum();
        assert!(residual < 1e-9, "residual {} too large", residual);
    }

    #[tokio::test]
    async fn test_stopping_criterion_short_circuits() {
        // Zero gradients leave the weights unchanged, so the loss repeats
        // and the delta criterion fires on the second epoch.
        let worker = Arc::new(MockWorker::new(Node::new("worker-0", 7000)));
        worker.set_gradient(|_w, _range| Ok(Vector::zeros(2)));
        let cluster = cluster_of(vec![worker.clone()]).await;
        let master = SyncMaster::new(cluster, constant_dataset(4, 2));

        let state = master
            .fit(10, 4, Vector::zeros(2), stopping::loss_delta_below(1e-6))
            .await
            .unwrap();

        assert!(state.is_terminal());
        // one batch per epoch, two epochs before the early stop
        assert_eq!(worker.gradient_calls(), 2);
    }

    #[tokio::test]
    async fn test_worker_failure_aborts_run() {
        let healthy = unit_gradient_worker(0, 2);
        let broken = Arc::new(MockWorker::new(Node::new("worker-1", 7001)));
        broken.set_gradient(|_w, _range| {
            Err(TrainerError::worker_rpc("gradient", "worker exploded"))
        });
        let cluster = cluster_of(vec![healthy, broken]).await;
        let master = SyncMaster::new(cluster, constant_dataset(10, 2));

        let result = master.fit(1, 5, Vector::zeros(2), stopping::never()).await;
        assert!(matches!(result, Err(TrainerError::WorkerRpc { .. })));
    }

    #[tokio::test]
    async fn test_fit_waits_for_cluster_readiness() {
        let worker = unit_gradient_worker(0, 2);
        let connector = Arc::new(MockConnector::default());
        connector.insert(Arc::clone(&worker));
        let cluster = Arc::new(ClusterCore::new(1, connector));
        let master = Arc::new(SyncMaster::new(
            Arc::clone(&cluster),
            constant_dataset(4, 2),
        ));

        let fit = {
            let master = Arc::clone(&master);
            tokio::spawn(async move {
                master
                    .fit(1, 4, Vector::zeros(2), stopping::never())
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(!fit.is_finished());

        cluster.register(worker.node().clone()).await.unwrap();
        let state = fit.await.unwrap().unwrap();
        assert!(state.is_terminal());
    }

    #[tokio::test]
    async fn test_rejects_more_workers_than_samples() {
        let workers = vec![unit_gradient_worker(0, 2), unit_gradient_worker(1, 2)];
        let cluster = cluster_of(workers).await;
        let master = SyncMaster::new(cluster, constant_dataset(1, 2));

        let result = master.fit(1, 1, Vector::zeros(2), stopping::never()).await;
        assert!(matches!(result, Err(TrainerError::Dataset { .. })));
    }

    #[tokio::test]
    async fn test_sync_master_rejects_streamed_updates() {
        let workers = vec![unit_gradient_worker(0, 2)];
        let cluster = cluster_of(workers).await;
        let master = SyncMaster::new(cluster, constant_dataset(4, 2));

        let result = master.handle_grad_update(Vector::zeros(2)).await;
        assert!(matches!(result, Err(TrainerError::UnsupportedOnSync)));
    }
}
