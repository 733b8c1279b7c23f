//! The model kernel: a pure function from weights and features to a
//! prediction. The master treats it as opaque; the linear margin below is
//! the single loss surface this trainer supports.

use crate::vector::Vector;

/// Predicted margin of a linear model.
pub fn predict(weights: &Vector, features: &Vector) -> f64 {
    weights.dot(features)
}
