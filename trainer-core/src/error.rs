use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainerError {

    #[error("cluster overflow: all {expected} expected workers are already registered")]
    ClusterOverflow {
        expected: usize,
    },

    #[error("an asynchronous training run is already active")]
    AlreadyRunning,

    #[error("gradient updates are not supported by a synchronous master")]
    UnsupportedOnSync,

    #[error("worker rpc '{operation}' failed: {message}")]
    WorkerRpc {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid vector: {message}")]
    InvalidVector {
        message: String,
    },

    #[error("configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("dataset error: {message}")]
    Dataset {
        message: String,
    },

    #[error("illegal state: {message}")]
    IllegalState {
        message: String,
    },

    #[error("training run aborted before completion")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, TrainerError>;

// Convenience constructors
impl TrainerError {

    pub fn worker_rpc(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WorkerRpc {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn worker_rpc_with_source(
        operation: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::WorkerRpc {
            operation: operation.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn invalid_vector(message: impl Into<String>) -> Self {
        Self::InvalidVector {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn dataset(message: impl Into<String>) -> Self {
        Self::Dataset {
            message: message.into(),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }
}
