//! Loss evaluation.
//!
//! Mean squared residual between predictions and labels, computed either
//! through the worker fleet (distributed) or locally on the master. All
//! reductions accumulate in `f64`; nothing is rounded mid-sum.

use std::sync::Arc;

use rand::Rng;

use crate::dataset::Dataset;
use crate::error::{Result, TrainerError};
use crate::forward::forward_pass;
use crate::model;
use crate::protocol::Node;
use crate::vector::Vector;
use crate::worker::WorkerClient;

/// Distributed loss: scatter a forward pass, then average the squared
/// residuals over the returned predictions (the dropped remainder, if
/// any, is excluded on both sides).
pub async fn distributed_loss(
    workers: &[(Node, Arc<dyn WorkerClient>)],
    dataset: &Dataset,
    weights: &Vector,
) -> Result<f64> {
    let predictions = forward_pass(workers, dataset.len(), weights).await?;
    if predictions.is_empty() {
        return Err(TrainerError::dataset(
            "forward pass covered no samples; fewer samples than workers?",
        ));
    }

    let mut acc = 0.0;
    for (i, prediction) in predictions.iter().enumerate() {
        let sample = dataset
            .get(i)
            .ok_or_else(|| TrainerError::dataset(format!("prediction index {} out of range", i)))?;
        let residual = prediction - sample.label;
        acc += residual * residual;
    }
    Ok(acc / predictions.len() as f64)
}

/// Local loss over the full dataset.
pub fn local_loss(dataset: &Dataset, weights: &Vector) -> Result<f64> {
    if dataset.is_empty() {
        return Err(TrainerError::dataset("cannot evaluate loss on an empty dataset"));
    }
    if weights.dim() != dataset.dim() {
        return Err(TrainerError::invalid_vector(format!(
            "weight dimension {} does not match dataset dimension {}",
            weights.dim(),
            dataset.dim()
        )));
    }

    let mut acc = 0.0;
    for sample in dataset.iter() {
        let residual = model::predict(weights, &sample.features) - sample.label;
        acc += residual * residual;
    }
    Ok(acc / dataset.len() as f64)
}

/// Local loss estimated from `count` uniform samples drawn with
/// replacement.
pub fn local_loss_sampled(dataset: &Dataset, weights: &Vector, count: usize) -> Result<f64> {
    if dataset.is_empty() {
        return Err(TrainerError::dataset("cannot evaluate loss on an empty dataset"));
    }
    if count == 0 {
        return Err(TrainerError::dataset("sample count must be greater than 0"));
    }
    if weights.dim() != dataset.dim() {
        return Err(TrainerError::invalid_vector(format!(
            "weight dimension {} does not match dataset dimension {}",
            weights.dim(),
            dataset.dim()
        )));
    }

    let mut rng = rand::thread_rng();
    let mut acc = 0.0;
    for _ in 0..count {
        let index = rng.gen_range(0..dataset.len());
        let sample = dataset
            .get(index)
            .ok_or_else(|| TrainerError::dataset(format!("sample index {} out of range", index)))?;
        let residual = model::predict(weights, &sample.features) - sample.label;
        acc += residual * residual;
    }
    Ok(acc / count as f64)
}
