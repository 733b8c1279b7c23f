//! In-memory training dataset.
//!
//! The master holds the full dataset and addresses it by index ranges when
//! scattering work; workers are assumed to hold the same data (or a shard
//! of it) and interpret the same ranges.

use std::path::Path;

use crate::error::{Result, TrainerError};
use crate::vector::Vector;

/// A single labelled example.
#[derive(Debug, Clone)]
pub struct Sample {
    pub features: Vector,
    pub label: f64,
}

/// Read-only indexed collection of labelled examples with a uniform
/// feature dimension.
#[derive(Debug, Clone)]
pub struct Dataset {
    samples: Vec<Sample>,
    dim: usize,
}

impl Dataset {
    /// Build a dataset from samples, checking dimensional consistency.
    pub fn from_samples(samples: Vec<Sample>) -> Result<Self> {
        let dim = samples
            .first()
            .map(|s| s.features.dim())
            .ok_or_else(|| TrainerError::dataset("dataset must not be empty"))?;
        for (i, sample) in samples.iter().enumerate() {
            if sample.features.dim() != dim {
                return Err(TrainerError::dataset(format!(
                    "sample {} has dimension {}, expected {}",
                    i,
                    sample.features.dim(),
                    dim
                )));
            }
            if sample.label.is_nan() {
                return Err(TrainerError::dataset(format!("sample {} has NaN label", i)));
            }
        }
        Ok(Self { samples, dim })
    }

    /// Parse svmlight/libsvm-format text: one `label idx:value ...` line
    /// per sample, indices 1-based. Features are densified to the largest
    /// index seen (or `dim`, when given and large enough).
    pub fn from_libsvm_str(content: &str, dim: Option<usize>) -> Result<Self> {
        let mut rows: Vec<(f64, Vec<(usize, f64)>)> = Vec::new();
        let mut max_index = 0usize;

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let label_token = match parts.next() {
                Some(token) => token,
                None => continue,
            };
            let label: f64 = label_token
                .parse()
                .map_err(|_| TrainerError::dataset(format!("line {}: bad label", lineno + 1)))?;

            let mut entries = Vec::new();
            for part in parts {
                let (idx, val) = part.split_once(':').ok_or_else(|| {
                    TrainerError::dataset(format!("line {}: expected idx:value, got '{}'", lineno + 1, part))
                })?;
                let idx: usize = idx.parse().map_err(|_| {
                    TrainerError::dataset(format!("line {}: bad feature index '{}'", lineno + 1, idx))
                })?;
                if idx == 0 {
                    return Err(TrainerError::dataset(format!(
                        "line {}: feature indices are 1-based",
                        lineno + 1
                    )));
                }
                let val: f64 = val.parse().map_err(|_| {
                    TrainerError::dataset(format!("line {}: bad feature value '{}'", lineno + 1, val))
                })?;
                max_index = max_index.max(idx);
                entries.push((idx, val));
            }
            rows.push((label, entries));
        }

        let dim = match dim {
            Some(d) if d >= max_index => d,
            Some(d) => {
                return Err(TrainerError::dataset(format!(
                    "declared dimension {} smaller than max feature index {}",
                    d, max_index
                )))
            }
            None => max_index,
        };

        let mut samples = Vec::with_capacity(rows.len());
        for (label, entries) in rows {
            let mut dense = vec![0.0; dim];
            for (idx, val) in entries {
                dense[idx - 1] = val;
            }
            samples.push(Sample {
                features: Vector::new(dense)?,
                label,
            });
        }
        Self::from_samples(samples)
    }

    /// Load an svmlight-format dataset from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrainerError::config_with_source(
                format!("failed to read dataset file '{}'", path.display()),
                e,
            )
        })?;
        Self::from_libsvm_str(&content, None)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Feature dimension shared by every sample.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.label)
    }
}
