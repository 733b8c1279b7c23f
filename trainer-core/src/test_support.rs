//! In-process fakes for the worker RPC seam, shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Result, TrainerError};
use crate::protocol::{GradientReply, Node, SampleRange};
use crate::vector::Vector;
use crate::worker::{WorkerClient, WorkerConnector};

type ForwardFn = dyn Fn(SampleRange, &Vector) -> Result<Vec<f64>> + Send + Sync;
type GradientFn = dyn Fn(&Vector, SampleRange) -> Result<Vector> + Send + Sync;

/// Scriptable in-process worker stub.
pub(crate) struct MockWorker {
    node: Node,
    forward_fn: Mutex<Option<Box<ForwardFn>>>,
    gradient_fn: Mutex<Option<Box<GradientFn>>>,
    registered: Mutex<Vec<Node>>,
    unregistered: Mutex<Vec<Node>>,
    init_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    gradient_calls: AtomicUsize,
    fail_next_init: Mutex<bool>,
}

impl MockWorker {
    pub(crate) fn new(node: Node) -> Self {
        Self {
            node,
            forward_fn: Mutex::new(None),
            gradient_fn: Mutex::new(None),
            registered: Mutex::new(Vec::new()),
            unregistered: Mutex::new(Vec::new()),
            init_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            gradient_calls: AtomicUsize::new(0),
            fail_next_init: Mutex::new(false),
        }
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    pub(crate) fn set_forward(
        &self,
        f: impl Fn(SampleRange, &Vector) -> Result<Vec<f64>> + Send + Sync + 'static,
    ) {
        *self.forward_fn.lock() = Some(Box::new(f));
    }

    pub(crate) fn set_gradient(
        &self,
        f: impl Fn(&Vector, SampleRange) -> Result<Vector> + Send + Sync + 'static,
    ) {
        *self.gradient_fn.lock() = Some(Box::new(f));
    }

    pub(crate) fn registered_peers(&self) -> Vec<Node> {
        self.registered.lock().clone()
    }

    pub(crate) fn unregistered_peers(&self) -> Vec<Node> {
        self.unregistered.lock().clone()
    }

    pub(crate) fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn gradient_calls(&self) -> usize {
        self.gradient_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_next_init(&self) {
        *self.fail_next_init.lock() = true;
    }
}

#[async_trait]
impl WorkerClient for MockWorker {
    async fn forward(&self, range: SampleRange, weights: &Vector) -> Result<Vec<f64>> {
        match &*self.forward_fn.lock() {
            Some(f) => f(range, weights),
            None => Ok(vec![0.0; range.len()]),
        }
    }

    async fn gradient(&self, weights: &Vector, range: SampleRange) -> Result<GradientReply> {
        self.gradient_calls.fetch_add(1, Ordering::SeqCst);
        let grad = match &*self.gradient_fn.lock() {
            Some(f) => f(weights, range)?,
            None => Vector::filled(weights.dim(), 1.0)?,
        };
        Ok(GradientReply {
            grad,
            started_at_ms: 0,
            terminated_at_ms: 0,
        })
    }

    async fn init_async(
        &self,
        _weights: &Vector,
        _assignment: &[SampleRange],
        _batch_size: usize,
    ) -> Result<()> {
        if std::mem::take(&mut *self.fail_next_init.lock()) {
            return Err(TrainerError::worker_rpc(
                "initAsync",
                format!("injected init failure for {}", self.node),
            ));
        }
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_async(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn register_peer(&self, node: &Node) -> Result<()> {
        self.registered.lock().push(node.clone());
        Ok(())
    }

    async fn unregister_peer(&self, node: &Node) -> Result<()> {
        self.unregistered.lock().push(node.clone());
        Ok(())
    }
}

/// Connector handing out (and remembering) mock workers per node.
#[derive(Default)]
pub(crate) struct MockConnector {
    workers: Mutex<HashMap<Node, Arc<MockWorker>>>,
    fail_next: Mutex<bool>,
}

impl MockConnector {
    /// Pre-seed the stub that `connect` will return for `node`.
    pub(crate) fn insert(&self, worker: Arc<MockWorker>) {
        self.workers.lock().insert(worker.node().clone(), worker);
    }

    /// Fetch the stub previously handed out for `node`.
    pub(crate) async fn worker(&self, node: &Node) -> Arc<MockWorker> {
        self.workers
            .lock()
            .get(node)
            .cloned()
            .expect("no mock worker for node")
    }

    pub(crate) async fn fail_next_connect(&self) {
        *self.fail_next.lock() = true;
    }
}

#[async_trait]
impl WorkerConnector for MockConnector {
    async fn connect(&self, node: &Node) -> Result<Arc<dyn WorkerClient>> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(TrainerError::worker_rpc(
                "connect",
                format!("injected connect failure for {}", node),
            ));
        }
        let worker = self
            .workers
            .lock()
            .entry(node.clone())
            .or_insert_with(|| Arc::new(MockWorker::new(node.clone())))
            .clone();
        Ok(worker)
    }
}
