//! Cluster membership.
//!
//! The master tracks registered workers in a concurrent map keyed by node
//! identity and gates training on a single-fire readiness latch that
//! completes when the expected worker count is first reached. Membership
//! changes are gossiped to the rest of the fleet so workers can talk to
//! each other directly; gossip is fire-and-forget and the registration ack
//! never waits for it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, TrainerError};
use crate::protocol::Node;
use crate::worker::{WorkerClient, WorkerConnector};

/// Shared membership core used by both training masters.
pub struct ClusterCore {
    expected: usize,
    workers: RwLock<HashMap<Node, Arc<dyn WorkerClient>>>,
    connector: Arc<dyn WorkerConnector>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl ClusterCore {
    pub fn new(expected: usize, connector: Arc<dyn WorkerConnector>) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            expected,
            workers: RwLock::new(HashMap::new()),
            connector,
            ready_tx,
            ready_rx,
        }
    }

    /// Number of workers the cluster waits for before becoming ready.
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// Whether the readiness latch has fired.
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Wait until the cluster has reached its expected size. Returns
    /// immediately once the latch has fired; the latch never reverts.
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        // The sender lives in self, so the channel cannot close under us.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Defer `f` until the cluster is ready, then run it.
    pub async fn with_cluster_ready<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.ready().await;
        f().await
    }

    /// Register a worker node.
    ///
    /// Dials the node, adds it to the registry, gossips the newcomer to
    /// every previously-known worker and every known peer to the newcomer,
    /// and fires the readiness latch when the expected size is first
    /// reached. Registering past the expected size fails with
    /// `ClusterOverflow` and leaves the registry untouched; re-registering
    /// a known node replaces its stub.
    pub async fn register(&self, node: Node) -> Result<()> {
        // Fail fast before paying for a dial.
        {
            let workers = self.workers.read().await;
            if !workers.contains_key(&node) && workers.len() >= self.expected {
                return Err(TrainerError::ClusterOverflow {
                    expected: self.expected,
                });
            }
        }

        let stub = self.connector.connect(&node).await?;

        let peers: Vec<(Node, Arc<dyn WorkerClient>)>;
        {
            let mut workers = self.workers.write().await;
            if workers.contains_key(&node) {
                debug!(%node, "known worker re-registered; replacing stub");
                workers.insert(node, stub);
                return Ok(());
            }
            if workers.len() >= self.expected {
                return Err(TrainerError::ClusterOverflow {
                    expected: self.expected,
                });
            }

            peers = workers
                .iter()
                .map(|(n, s)| (n.clone(), Arc::clone(s)))
                .collect();
            workers.insert(node.clone(), Arc::clone(&stub));

            if workers.len() == self.expected {
                // Edge-triggered, exactly once; later sends are no-ops.
                let _ = self.ready_tx.send(true);
                info!(workers = self.expected, "cluster ready");
            } else {
                info!(%node, registered = workers.len(), expected = self.expected, "worker registered");
            }
        }

        // Full-mesh gossip, off the registration path.
        for (peer_node, peer_stub) in peers {
            let newcomer = node.clone();
            let newcomer_stub = Arc::clone(&stub);
            tokio::spawn(async move {
                if let Err(e) = peer_stub.register_peer(&newcomer).await {
                    warn!(peer = %peer_node, node = %newcomer, error = %e, "peer gossip failed");
                }
                if let Err(e) = newcomer_stub.register_peer(&peer_node).await {
                    warn!(peer = %newcomer, node = %peer_node, error = %e, "peer gossip failed");
                }
            });
        }

        Ok(())
    }

    /// Unregister a worker node and gossip the removal to the remaining
    /// fleet. Unregistering an unknown node is a no-op.
    pub async fn unregister(&self, node: &Node) -> Result<()> {
        let remaining: Vec<(Node, Arc<dyn WorkerClient>)>;
        {
            let mut workers = self.workers.write().await;
            if workers.remove(node).is_none() {
                debug!(%node, "unregister for unknown node ignored");
                return Ok(());
            }
            remaining = workers
                .iter()
                .map(|(n, s)| (n.clone(), Arc::clone(s)))
                .collect();
        }
        info!(%node, remaining = remaining.len(), "worker unregistered");

        for (peer_node, peer_stub) in remaining {
            let departed = node.clone();
            tokio::spawn(async move {
                if let Err(e) = peer_stub.unregister_peer(&departed).await {
                    warn!(peer = %peer_node, node = %departed, error = %e, "removal gossip failed");
                }
            });
        }

        Ok(())
    }

    /// Snapshot of the current workers, sorted by node identity so
    /// positional dispatch (piece assignment) is deterministic.
    pub async fn workers(&self) -> Vec<(Node, Arc<dyn WorkerClient>)> {
        let workers = self.workers.read().await;
        let mut snapshot: Vec<_> = workers
            .iter()
            .map(|(n, s)| (n.clone(), Arc::clone(s)))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }
}
