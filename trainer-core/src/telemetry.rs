//! Stable metric identifiers.
//!
//! Dotted names under `master.sync.*` and `master.async.*`; emitted
//! through the `metrics` facade at the call sites. Exporter wiring is the
//! embedding process's concern.

/// Latest distributed loss observed by the synchronous loop.
pub const SYNC_LOSS: &str = "master.sync.loss";

/// Wall-clock duration of one synchronous scatter/gather batch.
pub const SYNC_BATCH_DURATION_MS: &str = "master.sync.batch_duration_ms";

/// Completed synchronous epochs.
pub const SYNC_EPOCHS: &str = "master.sync.epochs";

/// Gradient updates applied to the asynchronous run.
pub const ASYNC_UPDATES: &str = "master.async.updates";

/// Updates acked but discarded because the run was already terminal.
pub const ASYNC_LATE_UPDATES: &str = "master.async.late_updates";

/// Latest (smoothed) loss observed by the asynchronous monitor.
pub const ASYNC_LOSS: &str = "master.async.loss";

/// Asynchronous runs started.
pub const ASYNC_RUNS: &str = "master.async.runs";
