//! Worker RPC client.
//!
//! This module provides the gRPC client the master uses to drive remote
//! workers, behind a trait seam so orchestration logic and tests can run
//! against in-process fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::config::RpcConfig;
use crate::error::{Result, TrainerError};
use crate::proto;
use crate::proto::worker_service_client::WorkerServiceClient;
use crate::protocol::{GradientReply, Node, SampleRange};
use crate::vector::Vector;

/// Trait for worker stub implementations.
///
/// One stub per registered worker; its lifetime equals the registry entry.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Compute predictions for the given sample range under `weights`.
    async fn forward(&self, range: SampleRange, weights: &Vector) -> Result<Vec<f64>>;

    /// Compute the gradient over the given sample range under `weights`.
    async fn gradient(&self, weights: &Vector, range: SampleRange) -> Result<GradientReply>;

    /// Seed an asynchronous run: initial weights, owned sample ranges and
    /// the per-step batch size.
    async fn init_async(
        &self,
        weights: &Vector,
        assignment: &[SampleRange],
        batch_size: usize,
    ) -> Result<()>;

    /// Tell the worker to stop streaming gradient updates.
    async fn stop_async(&self) -> Result<()>;

    /// Peer-awareness gossip: a node joined the cluster.
    async fn register_peer(&self, node: &Node) -> Result<()>;

    /// Peer-awareness gossip: a node left the cluster.
    async fn unregister_peer(&self, node: &Node) -> Result<()>;
}

/// Trait for establishing worker connections, injected into the registry
/// so membership logic is testable without a network.
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    async fn connect(&self, node: &Node) -> Result<Arc<dyn WorkerClient>>;
}

/// gRPC-based worker stub.
pub struct GrpcWorkerClient {
    node: Node,
    client: WorkerServiceClient<Channel>,
}

impl GrpcWorkerClient {
    fn new(node: Node, channel: Channel) -> Self {
        Self {
            node,
            client: WorkerServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl WorkerClient for GrpcWorkerClient {
    async fn forward(&self, range: SampleRange, weights: &Vector) -> Result<Vec<f64>> {
        let mut client = self.client.clone();

        let request = Request::new(proto::ForwardRequest {
            range: Some(range.into()),
            weights: weights.to_vec(),
        });

        let response = client.forward(request).await.map_err(|e| {
            TrainerError::worker_rpc_with_source(
                "forward",
                format!("worker {} failed", self.node),
                e,
            )
        })?;

        let predictions = response.into_inner().predictions;
        if predictions.iter().any(|p| p.is_nan()) {
            return Err(TrainerError::invalid_vector(format!(
                "NaN prediction from worker {}",
                self.node
            )));
        }
        Ok(predictions)
    }

    async fn gradient(&self, weights: &Vector, range: SampleRange) -> Result<GradientReply> {
        let mut client = self.client.clone();

        let request = Request::new(proto::GradientRequest {
            weights: weights.to_vec(),
            range: Some(range.into()),
        });

        let response = client.gradient(request).await.map_err(|e| {
            TrainerError::worker_rpc_with_source(
                "gradient",
                format!("worker {} failed", self.node),
                e,
            )
        })?;

        // NaN components are rejected here, at the wire boundary
        GradientReply::try_from(response.into_inner())
    }

    async fn init_async(
        &self,
        weights: &Vector,
        assignment: &[SampleRange],
        batch_size: usize,
    ) -> Result<()> {
        let mut client = self.client.clone();

        let request = Request::new(proto::InitAsyncRequest {
            weights: weights.to_vec(),
            assignment: assignment.iter().map(|r| (*r).into()).collect(),
            batch_size: batch_size as u64,
        });

        client.init_async(request).await.map_err(|e| {
            TrainerError::worker_rpc_with_source(
                "initAsync",
                format!("worker {} failed", self.node),
                e,
            )
        })?;
        Ok(())
    }

    async fn stop_async(&self) -> Result<()> {
        let mut client = self.client.clone();

        client
            .stop_async(Request::new(proto::StopAsyncRequest {}))
            .await
            .map_err(|e| {
                TrainerError::worker_rpc_with_source(
                    "stopAsync",
                    format!("worker {} failed", self.node),
                    e,
                )
            })?;
        Ok(())
    }

    async fn register_peer(&self, node: &Node) -> Result<()> {
        let mut client = self.client.clone();

        client
            .register_slave(Request::new(proto::Node::from(node)))
            .await
            .map_err(|e| {
                TrainerError::worker_rpc_with_source(
                    "registerSlave",
                    format!("worker {} failed", self.node),
                    e,
                )
            })?;
        Ok(())
    }

    async fn unregister_peer(&self, node: &Node) -> Result<()> {
        let mut client = self.client.clone();

        client
            .unregister_slave(Request::new(proto::Node::from(node)))
            .await
            .map_err(|e| {
                TrainerError::worker_rpc_with_source(
                    "unregisterSlave",
                    format!("worker {} failed", self.node),
                    e,
                )
            })?;
        Ok(())
    }
}

/// gRPC connector with bounded-backoff dialing.
pub struct GrpcWorkerConnector {
    config: RpcConfig,
}

impl GrpcWorkerConnector {
    pub fn new(config: RpcConfig) -> Self {
        Self { config }
    }

    async fn dial(&self, node: &Node) -> Result<Channel> {
        let endpoint = Endpoint::from_shared(node.uri())
            .map_err(|e| {
                TrainerError::worker_rpc_with_source(
                    "connect",
                    format!("invalid endpoint for {}", node),
                    e,
                )
            })?
            .connect_timeout(Duration::from_millis(self.config.connect_timeout_ms))
            .timeout(Duration::from_millis(self.config.request_timeout_ms));

        let mut attempts = 0;
        let mut delay = Duration::from_millis(self.config.reconnect_delay_ms);

        loop {
            match endpoint.connect().await {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.config.max_connect_attempts {
                        return Err(TrainerError::worker_rpc_with_source(
                            "connect",
                            format!("failed to connect to {} after {} attempts", node, attempts),
                            e,
                        ));
                    }

                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(
                        delay * 2,
                        Duration::from_millis(self.config.request_timeout_ms),
                    );
                }
            }
        }
    }
}

#[async_trait]
impl WorkerConnector for GrpcWorkerConnector {
    async fn connect(&self, node: &Node) -> Result<Arc<dyn WorkerClient>> {
        let channel = self.dial(node).await?;
        Ok(Arc::new(GrpcWorkerClient::new(node.clone(), channel)))
    }
}
