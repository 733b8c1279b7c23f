//! Early-stopping predicates.
//!
//! A stopping criterion is a pure function over the loss history, ordered
//! most-recent-first. The training loops call it only on non-empty
//! histories; criteria must still tolerate short ones.

use std::sync::Arc;

/// Predicate over the loss trace (most-recent-first) deciding termination.
pub type StoppingCriterion = Arc<dyn Fn(&[f64]) -> bool + Send + Sync>;

/// Never stop early; run to the epoch or step limit.
pub fn never() -> StoppingCriterion {
    Arc::new(|_| false)
}

/// Stop once two consecutive losses differ by less than `epsilon`.
pub fn loss_delta_below(epsilon: f64) -> StoppingCriterion {
    Arc::new(move |losses| match losses {
        [latest, previous, ..] => (latest - previous).abs() < epsilon,
        _ => false,
    })
}

/// Stop once the latest loss drops below `threshold`.
pub fn loss_below(threshold: f64) -> StoppingCriterion {
    Arc::new(move |losses| losses.first().is_some_and(|l| *l < threshold))
}
