//! Run state shared between the RPC surface and the loss monitor.
//!
//! `GradState` summarizes one training run. Once `finish` stamps the end
//! timestamp the record is immutable; every mutator enforces that. The
//! surrounding coordinator keeps `GradState` and `BestTracker` behind a
//! single lock so termination always observes a consistent pair.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Result, TrainerError};
use crate::split::SplitStrategy;
use crate::stopping::StoppingCriterion;
use crate::vector::Vector;

/// Summary of a training run: current weights, applied update count and
/// lifecycle timestamps.
#[derive(Debug, Clone)]
pub struct GradState {
    grad: Vector,
    updates: u64,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    final_loss: Option<f64>,
}

impl GradState {
    /// Seed a fresh run from initial weights.
    pub fn start(initial: Vector) -> Self {
        Self {
            grad: initial,
            updates: 0,
            started_at: Utc::now(),
            ended_at: None,
            final_loss: None,
        }
    }

    pub fn grad(&self) -> &Vector {
        &self.grad
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.final_loss
    }

    /// Whether the run has been finished.
    pub fn is_terminal(&self) -> bool {
        self.ended_at.is_some()
    }

    fn guard_mutable(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(TrainerError::illegal_state(
                "run is terminal; state is immutable",
            ));
        }
        Ok(())
    }

    /// Apply one gradient step: `grad <- grad - delta`, bumping the update
    /// counter. Workers send the loss gradient, so subtraction descends.
    pub fn update(&mut self, delta: &Vector) -> Result<()> {
        self.guard_mutable()?;
        self.grad = self.grad.checked_sub(delta)?;
        self.updates += 1;
        Ok(())
    }

    /// Swap the weight vector wholesale.
    pub fn replace_grad(&mut self, grad: Vector) -> Result<()> {
        self.guard_mutable()?;
        self.grad = grad;
        Ok(())
    }

    /// Stamp the end of the run with its terminal loss.
    pub fn finish(&mut self, loss: f64) -> Result<()> {
        self.guard_mutable()?;
        self.ended_at = Some(Utc::now());
        self.final_loss = Some(loss);
        Ok(())
    }
}

/// Best `(loss, weights)` pair observed by the loss monitor. The weights
/// are always the snapshot on which the loss was evaluated.
#[derive(Debug, Clone)]
pub struct BestTracker {
    best_loss: f64,
    best_grad: Vector,
}

impl BestTracker {
    /// Cleared tracker: infinite loss and all-zero weights of the run's
    /// dimension.
    pub fn cleared(dim: usize) -> Self {
        Self {
            best_loss: f64::INFINITY,
            best_grad: Vector::zeros(dim),
        }
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn best_grad(&self) -> &Vector {
        &self.best_grad
    }

    /// Record an observation; keeps the pair only if it improves on the
    /// best loss so far. Returns whether it did.
    pub fn observe(&mut self, loss: f64, grad: &Vector) -> bool {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_grad = grad.clone();
            true
        } else {
            false
        }
    }
}

/// Immutable parameters of one asynchronous run.
#[derive(Clone)]
pub struct AsyncConfig {
    pub initial_weights: Vector,
    pub max_steps: u64,
    pub stopping: StoppingCriterion,
    pub batch_size: usize,
    pub split: Arc<dyn SplitStrategy>,
    pub check_every: u64,
    /// Exponential smoothing coefficient for monitored losses; 1.0 means
    /// the raw loss is used unsmoothed.
    pub leak_coef: f64,
}

impl AsyncConfig {
    pub fn new(
        initial_weights: Vector,
        max_steps: u64,
        stopping: StoppingCriterion,
        batch_size: usize,
        split: Arc<dyn SplitStrategy>,
        check_every: u64,
    ) -> Self {
        Self {
            initial_weights,
            max_steps,
            stopping,
            batch_size,
            split,
            check_every,
            leak_coef: 1.0,
        }
    }

    #[must_use]
    pub fn with_leak_coef(mut self, leak_coef: f64) -> Self {
        self.leak_coef = leak_coef;
        self
    }
}
