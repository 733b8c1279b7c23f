//! Configuration for the master process.
//!
//! TOML file parsing with environment variable overrides (prefixed `SVM_`)
//! and validation of the values the training loops depend on.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};

// Top-level master configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub cluster: ClusterConfig,
    pub training: TrainingConfig,
    pub rpc: RpcConfig,
}

// Cluster membership options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of workers that must register before training may start.
    pub expected_workers: usize,
    /// Address the master RPC server binds to.
    pub bind_address: String,
    /// Port the master RPC server binds to.
    pub bind_port: u16,
}

// Training loop options shared by both modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Synchronous mode: number of epochs.
    pub epochs: usize,
    /// Samples per gradient batch.
    pub batch_size: usize,
    /// Asynchronous mode: hard cutoff on applied updates.
    pub max_steps: u64,
    /// Asynchronous mode: minimum updates between two loss probes.
    pub check_every: u64,
    /// Stopping threshold on the delta of consecutive losses.
    pub loss_epsilon: f64,
    /// Exponential smoothing coefficient for monitored losses; 1.0 means
    /// no smoothing.
    pub leak_coef: f64,
}

// Worker RPC client options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Attempts before giving up on dialing a registering worker.
    pub max_connect_attempts: u32,
    /// Initial delay between connect attempts; doubles up to the request
    /// timeout.
    pub reconnect_delay_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            expected_workers: 1,
            bind_address: "0.0.0.0".to_string(),
            bind_port: 50051,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            max_steps: 10_000,
            check_every: 100,
            loss_epsilon: 1e-6,
            leak_coef: 1.0,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_connect_attempts: 5,
            reconnect_delay_ms: 100,
        }
    }
}

impl FromStr for MasterConfig {
    type Err = TrainerError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| TrainerError::config_with_source("failed to parse TOML config", e))
    }
}

impl MasterConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed, or if the
    // parsed values fail validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrainerError::config_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `SVM_` and use underscores to separate
    // nested fields, e.g. `SVM_CLUSTER_EXPECTED_WORKERS` overrides
    // `cluster.expected_workers`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SVM_CLUSTER_EXPECTED_WORKERS") {
            if let Ok(v) = val.parse() {
                self.cluster.expected_workers = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_CLUSTER_BIND_ADDRESS") {
            self.cluster.bind_address = val;
        }
        if let Ok(val) = std::env::var("SVM_CLUSTER_BIND_PORT") {
            if let Ok(v) = val.parse() {
                self.cluster.bind_port = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_TRAINING_EPOCHS") {
            if let Ok(v) = val.parse() {
                self.training.epochs = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_TRAINING_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.training.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_TRAINING_MAX_STEPS") {
            if let Ok(v) = val.parse() {
                self.training.max_steps = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_TRAINING_CHECK_EVERY") {
            if let Ok(v) = val.parse() {
                self.training.check_every = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_TRAINING_LOSS_EPSILON") {
            if let Ok(v) = val.parse() {
                self.training.loss_epsilon = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_TRAINING_LEAK_COEF") {
            if let Ok(v) = val.parse() {
                self.training.leak_coef = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_RPC_CONNECT_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.rpc.connect_timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_RPC_REQUEST_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.rpc.request_timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_RPC_MAX_CONNECT_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                self.rpc.max_connect_attempts = v;
            }
        }
        if let Ok(val) = std::env::var("SVM_RPC_RECONNECT_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.rpc.reconnect_delay_ms = v;
            }
        }
        self
    }

    // Validate all configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.expected_workers == 0 {
            return Err(TrainerError::config(
                "cluster.expected_workers must be greater than 0",
            ));
        }
        if self.training.epochs == 0 {
            return Err(TrainerError::config(
                "training.epochs must be greater than 0",
            ));
        }
        if self.training.batch_size == 0 {
            return Err(TrainerError::config(
                "training.batch_size must be greater than 0",
            ));
        }
        if self.training.max_steps == 0 {
            return Err(TrainerError::config(
                "training.max_steps must be greater than 0",
            ));
        }
        if self.training.check_every == 0 {
            return Err(TrainerError::config(
                "training.check_every must be greater than 0",
            ));
        }
        if !(self.training.loss_epsilon > 0.0) {
            return Err(TrainerError::config(
                "training.loss_epsilon must be greater than 0",
            ));
        }
        if !(self.training.leak_coef > 0.0 && self.training.leak_coef <= 1.0) {
            return Err(TrainerError::config(
                "training.leak_coef must be in (0, 1]",
            ));
        }
        if self.rpc.connect_timeout_ms == 0 {
            return Err(TrainerError::config(
                "rpc.connect_timeout_ms must be greater than 0",
            ));
        }
        if self.rpc.request_timeout_ms == 0 {
            return Err(TrainerError::config(
                "rpc.request_timeout_ms must be greater than 0",
            ));
        }
        if self.rpc.max_connect_attempts == 0 {
            return Err(TrainerError::config(
                "rpc.max_connect_attempts must be greater than 0",
            ));
        }
        Ok(())
    }
}
