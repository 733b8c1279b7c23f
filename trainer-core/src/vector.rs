//! Dense numeric vectors for weights, gradients and feature rows.
//!
//! The master never mutates a vector in place; arithmetic produces fresh
//! values so snapshots handed to background tasks stay stable. Construction
//! rejects NaN components, so a malformed worker reply is caught at the
//! wire boundary instead of poisoning the aggregate.

use std::ops::{Add, Sub};

use ndarray::Array1;

use crate::error::{Result, TrainerError};

/// Immutable dense vector of `f64` components.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector(Array1<f64>);

impl Vector {
    /// Build a vector from raw components, rejecting NaN.
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if let Some(idx) = values.iter().position(|v| v.is_nan()) {
            return Err(TrainerError::invalid_vector(format!(
                "NaN component at index {}",
                idx
            )));
        }
        Ok(Self(Array1::from_vec(values)))
    }

    /// All-zero vector of the given dimension.
    pub fn zeros(dim: usize) -> Self {
        Self(Array1::zeros(dim))
    }

    /// Vector with every component set to `value`. Panics on NaN only via
    /// the checked constructor, so this is limited to finite fills.
    pub fn filled(dim: usize, value: f64) -> Result<Self> {
        Self::new(vec![value; dim])
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        self.0.as_slice().expect("dense 1-d array is contiguous")
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    /// Inner product with another vector of the same dimension.
    pub fn dot(&self, other: &Vector) -> f64 {
        self.0.dot(&other.0)
    }

    pub fn sum(&self) -> f64 {
        self.0.sum()
    }

    pub fn mean(&self) -> Option<f64> {
        self.0.mean()
    }

    /// Number of exactly-zero components.
    pub fn nnz(&self) -> usize {
        self.0.iter().filter(|v| **v != 0.0).count()
    }

    /// Fraction of zero components, in `[0, 1]`. Empty vectors count as
    /// fully sparse.
    pub fn sparsity(&self) -> f64 {
        if self.0.is_empty() {
            return 1.0;
        }
        1.0 - self.nnz() as f64 / self.0.len() as f64
    }

    /// Elementwise subtraction with a dimension check, for wire-originated
    /// operands whose length the type system cannot vouch for.
    pub fn checked_sub(&self, rhs: &Vector) -> Result<Vector> {
        if self.dim() != rhs.dim() {
            return Err(TrainerError::invalid_vector(format!(
                "dimension mismatch: {} vs {}",
                self.dim(),
                rhs.dim()
            )));
        }
        Ok(Vector(&self.0 - &rhs.0))
    }

    /// Componentwise mean of a non-empty set of equal-dimension vectors.
    pub fn mean_of(vectors: &[Vector]) -> Result<Vector> {
        let first = vectors
            .first()
            .ok_or_else(|| TrainerError::invalid_vector("mean of an empty set"))?;
        let mut acc = first.0.clone();
        for v in &vectors[1..] {
            if v.dim() != first.dim() {
                return Err(TrainerError::invalid_vector(format!(
                    "dimension mismatch: {} vs {}",
                    first.dim(),
                    v.dim()
                )));
            }
            acc += &v.0;
        }
        acc /= vectors.len() as f64;
        Ok(Vector(acc))
    }
}

impl Sub for &Vector {
    type Output = Vector;

    fn sub(self, rhs: &Vector) -> Vector {
        Vector(&self.0 - &rhs.0)
    }
}

impl Add for &Vector {
    type Output = Vector;

    fn add(self, rhs: &Vector) -> Vector {
        Vector(&self.0 + &rhs.0)
    }
}
