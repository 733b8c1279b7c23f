//! gRPC service implementation for the master.
//!
//! Thin RPC surface over the shared cluster core and the mode-specific
//! gradient-update handler. Vectors are NaN-checked at decode, so a
//! malformed worker payload is rejected before it can touch run state.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::debug;

use trainer_core::proto::master_service_server::MasterService;
use trainer_core::proto::{Ack, GradUpdate, Node as ProtoNode};
use trainer_core::{ClusterCore, GradUpdateHandler, Node, TrainerError, Vector};

pub struct MasterServiceImpl {
    cluster: Arc<ClusterCore>,
    handler: Arc<dyn GradUpdateHandler>,
}

impl MasterServiceImpl {
    pub fn new(cluster: Arc<ClusterCore>, handler: Arc<dyn GradUpdateHandler>) -> Self {
        Self { cluster, handler }
    }
}

fn to_status(error: TrainerError) -> Status {
    match &error {
        TrainerError::ClusterOverflow { .. } | TrainerError::AlreadyRunning => {
            Status::failed_precondition(error.to_string())
        }
        TrainerError::UnsupportedOnSync => Status::unimplemented(error.to_string()),
        TrainerError::InvalidVector { .. } | TrainerError::Config { .. } => {
            Status::invalid_argument(error.to_string())
        }
        TrainerError::WorkerRpc { .. } => Status::unavailable(error.to_string()),
        _ => Status::internal(error.to_string()),
    }
}

#[tonic::async_trait]
impl MasterService for MasterServiceImpl {
    async fn register_slave(
        &self,
        request: Request<ProtoNode>,
    ) -> Result<Response<Ack>, Status> {
        let node = Node::try_from(request.into_inner()).map_err(to_status)?;
        debug!(%node, "registerSlave");
        self.cluster.register(node).await.map_err(to_status)?;
        Ok(Response::new(Ack { ok: true }))
    }

    async fn unregister_slave(
        &self,
        request: Request<ProtoNode>,
    ) -> Result<Response<Ack>, Status> {
        let node = Node::try_from(request.into_inner()).map_err(to_status)?;
        debug!(%node, "unregisterSlave");
        self.cluster.unregister(&node).await.map_err(to_status)?;
        Ok(Response::new(Ack { ok: true }))
    }

    async fn update_grad(
        &self,
        request: Request<GradUpdate>,
    ) -> Result<Response<Ack>, Status> {
        let delta = Vector::new(request.into_inner().grad_update).map_err(to_status)?;
        self.handler
            .handle_grad_update(delta)
            .await
            .map_err(to_status)?;
        Ok(Response::new(Ack { ok: true }))
    }
}
