//! Dataset partitioning strategies.
//!
//! A split strategy carves the sample index space into one contiguous
//! range per worker. The core does not interpret the ranges beyond
//! forwarding them; strategies are injected as values.

use tracing::warn;

use crate::protocol::SampleRange;

/// Strategy for assigning sample ranges to workers.
pub trait SplitStrategy: Send + Sync {
    /// Produce exactly one range per worker over `samples` indices.
    fn split(&self, samples: usize, workers: usize) -> Vec<SampleRange>;
}

/// Even contiguous split: every worker receives `⌊samples / workers⌋`
/// consecutive samples. A trailing remainder is dropped; the tail is
/// surfaced in the logs when that happens.
#[derive(Debug, Default)]
pub struct EvenSplit;

impl SplitStrategy for EvenSplit {
    fn split(&self, samples: usize, workers: usize) -> Vec<SampleRange> {
        if workers == 0 {
            return Vec::new();
        }
        let piece = samples / workers;
        let dropped = samples % workers;
        if dropped != 0 {
            warn!(
                samples,
                workers, dropped, "dataset does not divide evenly; dropping trailing samples"
            );
        }
        (0..workers)
            .map(|i| SampleRange::new(i * piece, (i + 1) * piece))
            .collect()
    }
}

/// Number of samples each worker owns under the even split.
pub fn piece_size(samples: usize, workers: usize) -> usize {
    if workers == 0 {
        0
    } else {
        samples / workers
    }
}
