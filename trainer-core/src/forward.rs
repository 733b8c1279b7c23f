//! Forward-pass orchestration.
//!
//! Scatters prediction requests over the worker fleet and reassembles the
//! replies in dispatch order. Any failed RPC fails the whole pass; no
//! partial prediction set is ever returned.

use std::sync::Arc;

use futures::future::try_join_all;

use crate::error::{Result, TrainerError};
use crate::protocol::Node;
use crate::split::{EvenSplit, SplitStrategy};
use crate::vector::Vector;
use crate::worker::WorkerClient;

/// Scatter a forward pass for `samples` indices over the workers and
/// concatenate the predictions in worker order. Each worker receives a
/// contiguous piece of `⌊samples / workers⌋` indices; a trailing
/// remainder is dropped.
pub async fn forward_pass(
    workers: &[(Node, Arc<dyn WorkerClient>)],
    samples: usize,
    weights: &Vector,
) -> Result<Vec<f64>> {
    if workers.is_empty() {
        return Err(TrainerError::worker_rpc(
            "forward",
            "no registered workers",
        ));
    }

    let ranges = EvenSplit.split(samples, workers.len());
    let requests = workers
        .iter()
        .zip(ranges)
        .map(|((_, stub), range)| stub.forward(range, weights));

    let replies = try_join_all(requests).await?;
    Ok(replies.into_iter().flatten().collect())
}
