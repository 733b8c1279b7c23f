//! Distributed Sparse-SVM Trainer - Master Process
//!
//! Binds the master RPC surface, waits for the worker fleet to register,
//! runs the selected training mode and reports the final weights.
//!
//! # Usage
//!
//! ```bash
//! # Synchronous training, two workers
//! svm-master --mode sync --data train.svm --expected-workers 2
//!
//! # Asynchronous training with a configuration file
//! svm-master --mode async --data train.svm --config master.toml
//! ```

mod service;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use service::MasterServiceImpl;
use trainer_core::proto::master_service_server::MasterServiceServer;
use trainer_core::{
    stopping, AsyncConfig, AsyncMaster, ClusterCore, Dataset, EvenSplit, GradState,
    GradUpdateHandler, GrpcWorkerConnector, MasterConfig, SyncMaster, TrainerError, Vector,
};

/// Distributed Sparse-SVM Trainer Master
#[derive(Parser, Debug)]
#[command(name = "svm-master")]
#[command(about = "Master process for the distributed sparse-SVM trainer")]
struct Args {
    /// Training mode
    #[arg(long, value_enum, default_value = "sync")]
    mode: Mode,

    /// Path to the svmlight-format training data
    #[arg(long)]
    data: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    address: Option<String>,

    /// Number of workers to wait for (overrides config)
    #[arg(long)]
    expected_workers: Option<usize>,

    /// Write the final weights to this file, one component per line
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Sync,
    Async,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration: file (or defaults), then environment, then CLI flags
    let mut config = match &args.config {
        Some(path) => MasterConfig::from_file(path)?,
        None => MasterConfig::default(),
    };
    config = config.with_env_overrides();
    if let Some(port) = args.port {
        config.cluster.bind_port = port;
    }
    if let Some(address) = &args.address {
        config.cluster.bind_address = address.clone();
    }
    if let Some(expected) = args.expected_workers {
        config.cluster.expected_workers = expected;
    }
    config.validate()?;

    let dataset = Arc::new(Dataset::from_file(&args.data)?);
    tracing::info!(
        samples = dataset.len(),
        dim = dataset.dim(),
        data = %args.data.display(),
        "dataset loaded"
    );

    let connector = Arc::new(GrpcWorkerConnector::new(config.rpc.clone()));
    let cluster = Arc::new(ClusterCore::new(
        config.cluster.expected_workers,
        connector,
    ));

    let addr: SocketAddr = format!(
        "{}:{}",
        config.cluster.bind_address, config.cluster.bind_port
    )
    .parse()?;

    let initial = Vector::zeros(dataset.dim());
    let stopping = stopping::loss_delta_below(config.training.loss_epsilon);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server: JoinHandle<Result<(), tonic::transport::Error>>;
    let outcome: trainer_core::Result<GradState>;

    match args.mode {
        Mode::Sync => {
            let master = Arc::new(SyncMaster::new(Arc::clone(&cluster), Arc::clone(&dataset)));
            let service = MasterServiceImpl::new(
                Arc::clone(&cluster),
                Arc::clone(&master) as Arc<dyn GradUpdateHandler>,
            );
            server = spawn_server(addr, service, shutdown_rx);
            tracing::info!(%addr, expected_workers = cluster.expected(), "sync master listening");

            let fit = master.fit(
                config.training.epochs,
                config.training.batch_size,
                initial,
                stopping,
            );
            tokio::pin!(fit);
            outcome = tokio::select! {
                result = &mut fit => result,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received; shutting down");
                    Err(TrainerError::Aborted)
                }
            };
        }
        Mode::Async => {
            let master = Arc::new(AsyncMaster::new(Arc::clone(&cluster), Arc::clone(&dataset)));
            let run_config = AsyncConfig::new(
                initial,
                config.training.max_steps,
                stopping,
                config.training.batch_size,
                Arc::new(EvenSplit),
                config.training.check_every,
            )
            .with_leak_coef(config.training.leak_coef);
            let service = MasterServiceImpl::new(
                Arc::clone(&cluster),
                Arc::clone(&master) as Arc<dyn GradUpdateHandler>,
            );
            server = spawn_server(addr, service, shutdown_rx);
            tracing::info!(%addr, expected_workers = cluster.expected(), "async master listening");

            let fit = master.fit(run_config);
            tokio::pin!(fit);
            outcome = tokio::select! {
                result = &mut fit => result,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received; terminating run");
                    master.end_computation().await?;
                    fit.await
                }
            };
        }
    }

    // Always release the port, whatever the training outcome.
    let _ = shutdown_tx.send(());
    server.await??;

    match outcome {
        Ok(state) => {
            report(&state, args.output.as_deref())?;
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "training failed");
            Err(e.into())
        }
    }
}

fn spawn_server(
    addr: SocketAddr,
    service: MasterServiceImpl,
    shutdown: oneshot::Receiver<()>,
) -> JoinHandle<Result<(), tonic::transport::Error>> {
    tokio::spawn(async move {
        Server::builder()
            .add_service(MasterServiceServer::new(service))
            .serve_with_shutdown(addr, async {
                let _ = shutdown.await;
            })
            .await
    })
}

fn report(state: &GradState, output: Option<&Path>) -> std::io::Result<()> {
    tracing::info!(
        final_loss = ?state.final_loss(),
        updates = state.updates(),
        dim = state.grad().dim(),
        sparsity = state.grad().sparsity(),
        "training complete"
    );

    if let Some(path) = output {
        let mut content = String::with_capacity(state.grad().dim() * 8);
        for component in state.grad().as_slice() {
            content.push_str(&component.to_string());
            content.push('\n');
        }
        std::fs::write(path, content)?;
        tracing::info!(path = %path.display(), "weights written");
    }
    Ok(())
}
