//! Property-based tests for the trainer-core public API.
//!
//! Invariants that must hold for all inputs:
//! - `GradState`: update counting is exact, subtraction is applied
//!   componentwise, terminal states are immutable
//! - `BestTracker`: never exceeds the minimum observed loss
//! - `Vector`: NaN components never survive construction
//! - `EvenSplit`: disjoint, ordered, equally sized ranges
//! - `ClusterCore`: the readiness latch is edge-triggered and monotonic

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;

use trainer_core::{
    BestTracker, ClusterCore, EvenSplit, GradState, GradientReply, Node, SampleRange,
    SplitStrategy, TrainerError, Vector, WorkerClient, WorkerConnector,
};

struct NullWorker;

#[async_trait]
impl WorkerClient for NullWorker {
    async fn forward(
        &self,
        range: SampleRange,
        _weights: &Vector,
    ) -> trainer_core::Result<Vec<f64>> {
        Ok(vec![0.0; range.len()])
    }

    async fn gradient(
        &self,
        weights: &Vector,
        _range: SampleRange,
    ) -> trainer_core::Result<GradientReply> {
        Ok(GradientReply {
            grad: Vector::zeros(weights.dim()),
            started_at_ms: 0,
            terminated_at_ms: 0,
        })
    }

    async fn init_async(
        &self,
        _weights: &Vector,
        _assignment: &[SampleRange],
        _batch_size: usize,
    ) -> trainer_core::Result<()> {
        Ok(())
    }

    async fn stop_async(&self) -> trainer_core::Result<()> {
        Ok(())
    }

    async fn register_peer(&self, _node: &Node) -> trainer_core::Result<()> {
        Ok(())
    }

    async fn unregister_peer(&self, _node: &Node) -> trainer_core::Result<()> {
        Ok(())
    }
}

struct NullConnector;

#[async_trait]
impl WorkerConnector for NullConnector {
    async fn connect(&self, _node: &Node) -> trainer_core::Result<Arc<dyn WorkerClient>> {
        Ok(Arc::new(NullWorker))
    }
}

#[derive(Debug, Clone)]
enum MembershipOp {
    Register(u16),
    Unregister(u16),
}

fn membership_ops() -> impl Strategy<Value = Vec<MembershipOp>> {
    proptest::collection::vec(
        prop_oneof![
            (0u16..6).prop_map(MembershipOp::Register),
            (0u16..6).prop_map(MembershipOp::Unregister),
        ],
        0..32,
    )
}

proptest! {
    /// Accepted updates are counted exactly and applied by subtraction;
    /// dimension mismatches are rejected without side effects.
    #[test]
    fn grad_state_updates_are_monotonic_and_exact(
        initial in proptest::collection::vec(-100.0f64..100.0, 1..8),
        deltas in proptest::collection::vec(
            proptest::collection::vec(-10.0f64..10.0, 1..8),
            0..32,
        ),
    ) {
        let dim = initial.len();
        let mut state = GradState::start(Vector::new(initial.clone()).unwrap());
        let mut accepted = 0u64;
        let mut expected = initial;

        for delta in &deltas {
            let result = state.update(&Vector::new(delta.clone()).unwrap());
            if delta.len() == dim {
                prop_assert!(result.is_ok());
                accepted += 1;
                for (e, d) in expected.iter_mut().zip(delta) {
                    *e -= d;
                }
            } else {
                prop_assert!(result.is_err());
            }
            prop_assert_eq!(state.updates(), accepted);
        }

        for (got, want) in state.grad().as_slice().iter().zip(&expected) {
            prop_assert!((got - want).abs() < 1e-9);
        }
    }

    /// Once finished, a state refuses every mutation.
    #[test]
    fn grad_state_is_immutable_after_finish(loss in -10.0f64..10.0) {
        let mut state = GradState::start(Vector::zeros(3));
        state.finish(loss).unwrap();

        prop_assert!(state.is_terminal());
        prop_assert!(state.update(&Vector::zeros(3)).is_err());
        prop_assert!(state.replace_grad(Vector::zeros(3)).is_err());
        prop_assert!(state.finish(loss).is_err());
        prop_assert_eq!(state.final_loss(), Some(loss));
        prop_assert_eq!(state.updates(), 0);
    }

    /// The best tracker never exceeds the minimum of the observed losses.
    #[test]
    fn best_tracker_tracks_the_minimum(
        losses in proptest::collection::vec(0.0f64..100.0, 0..64),
    ) {
        let mut best = BestTracker::cleared(2);
        let grad = Vector::zeros(2);
        for loss in &losses {
            best.observe(*loss, &grad);
        }

        let min = losses.iter().copied().fold(f64::INFINITY, f64::min);
        prop_assert!(best.best_loss() <= min);
        if min.is_finite() {
            prop_assert_eq!(best.best_loss(), min);
        }
    }

    /// A NaN component anywhere fails construction; finite input succeeds.
    #[test]
    fn vectors_reject_nan_anywhere(
        values in proptest::collection::vec(-100.0f64..100.0, 1..16),
        position in 0usize..16,
    ) {
        let mut poisoned = values.clone();
        let position = position % poisoned.len();
        poisoned[position] = f64::NAN;

        prop_assert!(Vector::new(values).is_ok());
        let is_invalid_vector = matches!(
            Vector::new(poisoned),
            Err(TrainerError::InvalidVector { .. })
        );
        prop_assert!(is_invalid_vector);
    }

    /// Even splits are disjoint, ordered, equally sized, and drop less
    /// than one worker's worth of trailing samples.
    #[test]
    fn even_split_partitions_cleanly(samples in 0usize..500, workers in 1usize..17) {
        let ranges = EvenSplit.split(samples, workers);
        let piece = samples / workers;

        prop_assert_eq!(ranges.len(), workers);
        for (i, range) in ranges.iter().enumerate() {
            prop_assert_eq!(range.len(), piece);
            prop_assert_eq!(range.start, i * piece);
        }

        let covered: usize = ranges.iter().map(|r| r.len()).sum();
        prop_assert!(covered <= samples);
        prop_assert!(samples - covered < workers);
    }

    /// The readiness latch fires iff membership ever reached the expected
    /// count, and never reverts afterwards.
    #[test]
    fn quorum_latch_is_monotonic(expected in 1usize..5, ops in membership_ops()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let cluster = ClusterCore::new(expected, Arc::new(NullConnector));
            let mut ever_full = false;

            for op in ops {
                match op {
                    MembershipOp::Register(i) => {
                        let _ = cluster.register(Node::new("w", 7000 + i)).await;
                    }
                    MembershipOp::Unregister(i) => {
                        cluster.unregister(&Node::new("w", 7000 + i)).await.unwrap();
                    }
                }
                let size = cluster.len().await;
                assert!(size <= expected, "registry grew past the expected count");
                if size == expected {
                    ever_full = true;
                }
                assert_eq!(cluster.is_ready(), ever_full);
            }
        });
    }
}
