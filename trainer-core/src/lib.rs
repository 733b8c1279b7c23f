//! Distributed Sparse-SVM Trainer - Master Core
//!
//! This crate provides the master-side core of a parameter-server-style
//! distributed trainer for a linear model trained by stochastic gradient
//! descent: cluster membership, the synchronous epoch/batch training loop,
//! the asynchronous coordinator with its background loss monitor, and the
//! client seam for driving remote workers over gRPC.
//!
//! Workers are remote processes holding dataset shards; the master owns
//! membership, aggregation and convergence decisions, and produces a final
//! weight vector.

pub mod cluster;
pub mod config;
pub mod dataset;
pub mod error;
pub mod forward;
pub mod grad_state;
pub mod loss;
pub mod model;
pub mod protocol;
pub mod split;
pub mod stopping;
pub mod telemetry;
pub mod vector;
pub mod worker;

pub mod async_master;
pub mod sync;

mod monitor;

#[cfg(test)]
mod test_support;

// Include generated protobuf code
pub mod proto {
    tonic::include_proto!("svm.trainer");
}

// Re-export commonly used types for convenience
pub use async_master::{AsyncMaster, GradUpdateHandler};
pub use cluster::ClusterCore;
pub use config::MasterConfig;
pub use dataset::{Dataset, Sample};
pub use error::{Result, TrainerError};
pub use grad_state::{AsyncConfig, BestTracker, GradState};
pub use protocol::{GradientReply, Node, SampleRange};
pub use split::{EvenSplit, SplitStrategy};
pub use stopping::StoppingCriterion;
pub use sync::SyncMaster;
pub use vector::Vector;
pub use worker::{GrpcWorkerConnector, WorkerClient, WorkerConnector};
